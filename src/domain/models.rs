use crate::domain::actuator::{ActuatorButton, ActuatorState, ToggleControl};
use std::fmt;
use std::str::FromStr;

/// Bluetooth address of a peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:012X}", self.0)
    }
}

impl FromStr for DeviceId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        u64::from_str_radix(&digits.replace(':', ""), 16).map(DeviceId)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedDevice {
    pub id: DeviceId,
    pub name: String,
    pub signal_strength: i16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    Requested,
    LinkLost(String),
    ConnectFailed(String),
}

/// Lifecycle of the link to the peripheral
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Scanning,
    Connecting,
    Resolving,
    Ready,
    Disconnected(DisconnectReason),
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Scanning => f.write_str("scanning"),
            Self::Connecting => f.write_str("connecting"),
            Self::Resolving => f.write_str("resolving"),
            Self::Ready => f.write_str("ready"),
            Self::Disconnected(DisconnectReason::Requested) => f.write_str("disconnected"),
            Self::Disconnected(DisconnectReason::LinkLost(reason)) => {
                write!(f, "disconnected (link lost: {})", reason)
            }
            Self::Disconnected(DisconnectReason::ConnectFailed(reason)) => {
                write!(f, "disconnected (connect failed: {})", reason)
            }
        }
    }
}

/// Requests from the input surface and the scanner UI
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    StartScan,
    StopScan,
    SelectDevice(DeviceId),
    Disconnect,
    Axis { x: f32, y: f32 },
    Button { button: ActuatorButton, pressed: bool },
    Toggle(ToggleControl),
    Reset,
    Shutdown,
}

/// Events the engine publishes; presentation only ever reads these
#[derive(Debug, Clone)]
pub enum AppEvent {
    DeviceDiscovered(ScannedDevice),
    ConnectionStateChanged(LinkState),
    ActuatorChanged(ActuatorState),
    LogMessage(StatusMessage),
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_parsing() {
        assert_eq!("0xA1B2".parse::<DeviceId>().unwrap(), DeviceId(0xA1B2));
        assert_eq!(
            "AA:BB:CC:DD:EE:FF".parse::<DeviceId>().unwrap(),
            DeviceId(0xAABBCCDDEEFF)
        );
        assert!("zz".parse::<DeviceId>().is_err());
        assert_eq!(DeviceId(0xAB).to_string(), "0000000000AB");
    }
}
