//! Error types for the control engine and its transports.

use crate::domain::control::Role;
use crate::domain::models::{DeviceId, LinkState};
use thiserror::Error;

/// Failures of the radio stack underneath the engine
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("not connected to a peripheral")]
    NotConnected,

    #[error("no endpoint handle {0}")]
    UnknownHandle(u64),

    #[error("GATT: {0}")]
    Gatt(String),

    #[error("simulated failure: {0}")]
    Simulated(String),

    #[cfg(windows)]
    #[error("WinRT: {0}")]
    Platform(#[from] windows::core::Error),
}

/// Everything the engine can report. None of these are fatal; the worst
/// outcome is that no command reaches the peripheral this cycle.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Bluetooth radio unavailable or unsupported")]
    LinkUnavailable,

    #[error("service discovery failed: {0}")]
    DiscoveryFailed(String),

    #[error("control point {0} was never resolved")]
    EndpointMissing(Role),

    #[error("write to {role} failed: {reason}")]
    WriteFailed { role: Role, reason: TransportError },

    #[error("{operation} is not allowed while {state}")]
    InvalidTransition {
        operation: &'static str,
        state: LinkState,
    },

    #[error("device {0} was not seen in this scan")]
    UnknownDevice(DeviceId),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
