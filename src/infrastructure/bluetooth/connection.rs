//! Connection Manager
//!
//! Owns the link to one peripheral: scanning, connecting, control-point
//! resolution and teardown. Everything that belongs to a single connection
//! attempt lives in a [`ConnectionSession`] that is built on `connect` and
//! dropped on disconnect, so nothing stale survives a reconnect.

use crate::domain::actuator::{ActuatorButton, ActuatorState, ToggleControl};
use crate::domain::control::{AxisCommand, ProtocolGeneration, ProtocolIds, Role, WireCommand};
use crate::domain::models::{
    AppEvent, DeviceId, DisconnectReason, LinkState, MessageSeverity, ScannedDevice,
    StatusMessage,
};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::error::ControlError;
use crate::infrastructure::bluetooth::heartbeat::HeartbeatClock;
use crate::infrastructure::bluetooth::protocol::{axis_payloads, encode_discrete};
use crate::infrastructure::bluetooth::registry::EndpointRegistry;
use crate::infrastructure::bluetooth::transport::{
    Advertisement, DiscoveredCharacteristic, Transport, TransportEvent,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Configuration for connection behavior
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub ids: ProtocolIds,
    pub generation: ProtocolGeneration,
    pub heartbeat_period: Duration,
    /// List every named device, not only those advertising our service
    pub show_all_devices: bool,
}

impl ConnectionConfig {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        Ok(Self {
            ids: settings.protocol_ids()?,
            generation: settings.protocol_generation,
            heartbeat_period: settings.heartbeat_period(),
            show_all_devices: settings.scan_show_all_devices,
        })
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            ids: ProtocolIds::default(),
            generation: ProtocolGeneration::default(),
            heartbeat_period: Duration::from_millis(5000),
            show_all_devices: false,
        }
    }
}

/// State scoped to one connection attempt
#[derive(Debug)]
pub struct ConnectionSession {
    pub peripheral: DeviceId,
    pub registry: EndpointRegistry,
    pub heartbeat: HeartbeatClock,
    pub actuator: ActuatorState,
}

impl ConnectionSession {
    fn new(peripheral: DeviceId, config: &ConnectionConfig) -> Self {
        Self {
            peripheral,
            registry: EndpointRegistry::new(config.ids.clone()),
            heartbeat: HeartbeatClock::new(config.heartbeat_period),
            actuator: ActuatorState::default(),
        }
    }
}

pub struct ConnectionManager<T: Transport> {
    transport: T,
    config: ConnectionConfig,
    state: LinkState,
    discovered: Vec<ScannedDevice>,
    session: Option<ConnectionSession>,
    event_sender: mpsc::UnboundedSender<AppEvent>,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(
        transport: T,
        config: ConnectionConfig,
        event_sender: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        Self {
            transport,
            config,
            state: LinkState::Idle,
            discovered: Vec::new(),
            session: None,
            event_sender,
        }
    }

    pub fn state(&self) -> &LinkState {
        &self.state
    }

    pub fn session(&self) -> Option<&ConnectionSession> {
        self.session.as_ref()
    }

    pub fn heartbeat_deadline(&self) -> Option<Instant> {
        self.session.as_ref().and_then(|s| s.heartbeat.deadline())
    }

    /// Begin listing devices for the scanner UI
    pub fn start_scan(&mut self) -> Result<(), ControlError> {
        if !matches!(self.state, LinkState::Idle | LinkState::Disconnected(_)) {
            return Err(self.invalid("start scan"));
        }
        if !self.transport.is_available() {
            self.send_log(
                "Bluetooth is off or not supported on this machine",
                MessageSeverity::Warning,
            );
            return Err(ControlError::LinkUnavailable);
        }

        info!("Starting scan for service {}", self.config.ids.service);
        self.discovered.clear();
        self.transport
            .start_scan(self.config.ids.service, self.config.show_all_devices)?;
        self.set_state(LinkState::Scanning);
        self.send_log("Scanning for peripherals...", MessageSeverity::Info);
        Ok(())
    }

    pub fn stop_scan(&mut self) -> Result<(), ControlError> {
        if self.state != LinkState::Scanning {
            return Err(self.invalid("stop scan"));
        }
        info!("Stopping scan");
        self.transport.stop_scan()?;
        self.set_state(LinkState::Idle);
        Ok(())
    }

    /// Connect to a device listed in the current scan
    pub fn connect(&mut self, device: DeviceId) -> Result<(), ControlError> {
        if self.state != LinkState::Scanning {
            return Err(self.invalid("connect"));
        }
        if !self.discovered.iter().any(|d| d.id == device) {
            return Err(ControlError::UnknownDevice(device));
        }

        if let Err(e) = self.transport.stop_scan() {
            warn!("Failed to stop scan before connecting: {}", e);
        }

        info!("Connecting to peripheral {}", device);
        self.session = Some(ConnectionSession::new(device, &self.config));
        self.set_state(LinkState::Connecting);
        if let Err(e) = self.transport.connect(device) {
            self.teardown(DisconnectReason::ConnectFailed(e.to_string()));
            return Err(e.into());
        }
        Ok(())
    }

    pub fn disconnect(&mut self) {
        info!("Disconnect requested while {}", self.state);
        self.teardown(DisconnectReason::Requested);
    }

    /// Stop everything before the process exits
    pub fn shutdown(&mut self) {
        match self.state {
            LinkState::Scanning
            | LinkState::Connecting
            | LinkState::Resolving
            | LinkState::Ready => self.teardown(DisconnectReason::Requested),
            LinkState::Idle | LinkState::Disconnected(_) => {}
        }
    }

    /// Heartbeat first, then the session (and its registry), then the link.
    /// Nothing can write to the handle once it is released.
    fn teardown(&mut self, reason: DisconnectReason) {
        if self.state == LinkState::Scanning {
            if let Err(e) = self.transport.stop_scan() {
                warn!("Failed to stop scan: {}", e);
            }
        }

        if let Some(mut session) = self.session.take() {
            session.heartbeat.disarm();
            session.registry.clear();
            let peripheral = session.peripheral;
            drop(session);
            self.transport.disconnect(peripheral);
            info!("Released peripheral {}", peripheral);
        }

        let message = match &reason {
            DisconnectReason::Requested => "Disconnected".to_string(),
            DisconnectReason::LinkLost(why) => format!("Link lost: {}", why),
            DisconnectReason::ConnectFailed(why) => format!("Connection failed: {}", why),
        };
        let severity = match reason {
            DisconnectReason::Requested => MessageSeverity::Info,
            _ => MessageSeverity::Error,
        };
        self.set_state(LinkState::Disconnected(reason));
        self.send_log(&message, severity);
    }

    pub fn handle_transport_event(&mut self, event: TransportEvent, now: Instant) {
        match event {
            TransportEvent::Advertisement(advertisement) => self.on_advertisement(advertisement),
            TransportEvent::Connected(device) => self.on_connected(device),
            TransportEvent::ConnectFailed { device, reason } => {
                if self.is_current(device) && self.state == LinkState::Connecting {
                    error!("Connection to {} failed: {}", device, reason);
                    self.teardown(DisconnectReason::ConnectFailed(reason));
                }
            }
            TransportEvent::CharacteristicsDiscovered {
                device,
                characteristics,
            } => self.on_characteristics(device, &characteristics, now),
            TransportEvent::DiscoveryFailed { device, reason } => {
                if self.is_current(device) {
                    let err = ControlError::DiscoveryFailed(reason);
                    error!("{}", err);
                    self.send_log(&err.to_string(), MessageSeverity::Error);
                }
            }
            TransportEvent::LinkLost { device, reason } => {
                if self.is_current(device) {
                    warn!("Link to {} lost: {}", device, reason);
                    self.teardown(DisconnectReason::LinkLost(reason));
                }
            }
        }
    }

    fn on_advertisement(&mut self, advertisement: Advertisement) {
        if self.state != LinkState::Scanning {
            return;
        }
        // A device without a name is useless in a picker
        let Some(name) = advertisement.name.filter(|n| !n.trim().is_empty()) else {
            trace!("Skipping unnamed device {}", advertisement.id);
            return;
        };

        let device = ScannedDevice {
            id: advertisement.id,
            name,
            signal_strength: advertisement.signal_strength,
        };
        match self.discovered.iter_mut().find(|d| d.id == device.id) {
            Some(existing) => *existing = device.clone(),
            None => {
                info!("Discovered {} ({})", device.name, device.id);
                self.discovered.push(device.clone());
            }
        }
        let _ = self.event_sender.send(AppEvent::DeviceDiscovered(device));
    }

    fn on_connected(&mut self, device: DeviceId) {
        if !self.is_current(device) || self.state != LinkState::Connecting {
            debug!("Ignoring stale connect notification from {}", device);
            return;
        }
        info!("Link established with {}, resolving control points", device);
        self.set_state(LinkState::Resolving);
        if let Err(e) = self.transport.discover(device, self.config.ids.service) {
            // Stays in Resolving; the user decides whether to retry
            let err = ControlError::DiscoveryFailed(e.to_string());
            error!("{}", err);
            self.send_log(&err.to_string(), MessageSeverity::Error);
        }
    }

    fn on_characteristics(
        &mut self,
        device: DeviceId,
        characteristics: &[DiscoveredCharacteristic],
        now: Instant,
    ) {
        if !self.is_current(device)
            || !matches!(self.state, LinkState::Resolving | LinkState::Ready)
        {
            debug!("Ignoring characteristics from {} while {}", device, self.state);
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };

        for characteristic in characteristics {
            if let Some(role) = session
                .registry
                .register(characteristic.uuid, characteristic.handle)
            {
                debug!("Resolved {} -> {:?}", role, characteristic.handle);
            }
        }

        if self.state == LinkState::Resolving && session.registry.is_ready() {
            let missing = session.registry.missing();
            if !missing.is_empty() {
                info!("Optional control points absent: {:?}", missing);
            }
            session.heartbeat.arm(now);
            self.set_state(LinkState::Ready);
            self.send_log("Peripheral ready", MessageSeverity::Success);
        }
    }

    pub fn on_axis(&mut self, x: f32, y: f32, now: Instant) {
        let command = AxisCommand::quantize(x, y, self.config.generation);
        self.dispatch("axis", &[WireCommand::Axis(command)], now);
    }

    pub fn on_button(&mut self, button: ActuatorButton, pressed: bool, now: Instant) {
        let Some(session) = self.ready_session() else {
            debug!("{:?} ignored while {}", button, self.state);
            return;
        };
        let command = if pressed {
            session.actuator.press(button)
        } else {
            session.actuator.release(button)
        };
        match command {
            Some(command) => self.dispatch_actuator(&[command], now),
            None => trace!("{:?} pressed={} produced no transition", button, pressed),
        }
    }

    pub fn on_toggle(&mut self, control: ToggleControl, now: Instant) {
        let Some(session) = self.ready_session() else {
            debug!("{:?} toggle ignored while {}", control, self.state);
            return;
        };
        let command = session.actuator.toggle(control);
        self.dispatch_actuator(&[command], now);
    }

    pub fn on_reset(&mut self, now: Instant) {
        let Some(session) = self.ready_session() else {
            debug!("Reset ignored while {}", self.state);
            return;
        };
        let commands = session.actuator.reset();
        info!("Resetting actuator");
        self.dispatch_actuator(&commands, now);
    }

    /// Re-send the last axis command if the heartbeat is due
    pub fn on_heartbeat(&mut self, now: Instant) {
        if self.state != LinkState::Ready {
            return;
        }
        let generation = self.config.generation;
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Some(command) = session.heartbeat.poll(now) {
            trace!("Heartbeat re-send {:?}", command);
            send_command(
                &mut self.transport,
                &session.registry,
                generation,
                &WireCommand::Axis(command),
            );
        }
    }

    fn dispatch_actuator(&mut self, commands: &[WireCommand], now: Instant) {
        self.dispatch("actuator", commands, now);
        if let Some(session) = self.session.as_ref() {
            let _ = self
                .event_sender
                .send(AppEvent::ActuatorChanged(session.actuator));
        }
    }

    /// Explicit, user-driven writes. The heartbeat restarts only when at
    /// least one write reached the transport, accepted or not; commands for
    /// unresolved control points leave the schedule alone.
    fn dispatch(&mut self, source: &str, commands: &[WireCommand], now: Instant) {
        if self.state != LinkState::Ready {
            debug!("Dropping {} command while {}", source, self.state);
            return;
        }
        let generation = self.config.generation;
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let mut written = false;
        for command in commands {
            let attempted =
                send_command(&mut self.transport, &session.registry, generation, command);
            if attempted {
                if let WireCommand::Axis(axis) = command {
                    session.heartbeat.record_axis(*axis, now);
                }
            }
            written |= attempted;
        }
        if written {
            session.heartbeat.rearm(now);
        }
    }

    fn ready_session(&mut self) -> Option<&mut ConnectionSession> {
        if self.state != LinkState::Ready {
            return None;
        }
        self.session.as_mut()
    }

    fn is_current(&self, device: DeviceId) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.peripheral == device)
    }

    fn invalid(&self, operation: &'static str) -> ControlError {
        ControlError::InvalidTransition {
            operation,
            state: self.state.clone(),
        }
    }

    fn set_state(&mut self, state: LinkState) {
        if self.state == state {
            return;
        }
        debug!("Link state {} -> {}", self.state, state);
        self.state = state.clone();
        let _ = self
            .event_sender
            .send(AppEvent::ConnectionStateChanged(state));
    }

    fn send_log(&self, message: &str, severity: MessageSeverity) {
        let _ = self.event_sender.send(AppEvent::LogMessage(StatusMessage {
            message: message.to_string(),
            severity,
        }));
    }
}

/// Encode and write one command. Failures are logged and swallowed; the next
/// heartbeat or user input is the retry. Returns whether any write was handed
/// to the transport.
fn send_command<T: Transport>(
    transport: &mut T,
    registry: &EndpointRegistry,
    generation: ProtocolGeneration,
    command: &WireCommand,
) -> bool {
    match command {
        WireCommand::Axis(axis) => {
            let (x, y) = axis_payloads(axis, generation);
            let sent_x = write_role(transport, registry, Role::AxisX, &x);
            let sent_y = write_role(transport, registry, Role::AxisY, &y);
            sent_x || sent_y
        }
        WireCommand::Discrete { role, value } => {
            write_role(transport, registry, *role, &encode_discrete(*value))
        }
    }
}

fn write_role<T: Transport>(
    transport: &mut T,
    registry: &EndpointRegistry,
    role: Role,
    payload: &[u8],
) -> bool {
    let endpoint = match registry.get(role) {
        Ok(endpoint) => endpoint,
        Err(e) => {
            debug!("Dropping write: {}", e);
            return false;
        }
    };
    if let Err(reason) = transport.write(endpoint, payload, role.write_mode()) {
        warn!("{}", ControlError::WriteFailed { role, reason });
    } else {
        trace!("{} <- {:02X?}", role, payload);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::simulated::{
        SimulatedPeripheral, SimulatedTransport, SimulatorHandle,
    };

    const DEVICE: DeviceId = DeviceId(0x00AA_BBCC_DDEE);
    const OTHER: DeviceId = DeviceId(0x0011_2233_4455);

    struct Fixture {
        manager: ConnectionManager<SimulatedTransport>,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        _app_events: mpsc::UnboundedReceiver<AppEvent>,
        sim: SimulatorHandle,
    }

    impl Fixture {
        fn new() -> Self {
            let (transport_tx, transport_events) = mpsc::unbounded_channel();
            let (event_tx, _app_events) = mpsc::unbounded_channel();
            let peripherals = vec![
                SimulatedPeripheral::new(DEVICE, "Actuator", ProtocolGeneration::Current),
                SimulatedPeripheral::new(OTHER, "Neighbour", ProtocolGeneration::Current),
            ];
            let (transport, sim) =
                SimulatedTransport::new(transport_tx, ProtocolIds::default(), peripherals);
            Self {
                manager: ConnectionManager::new(transport, ConnectionConfig::default(), event_tx),
                transport_events,
                _app_events,
                sim,
            }
        }

        /// Feed everything the transport has reported so far
        fn pump(&mut self) {
            while let Ok(event) = self.transport_events.try_recv() {
                self.manager.handle_transport_event(event, Instant::now());
            }
        }

        /// Pending transport events, not yet seen by the manager
        fn take_pending(&mut self) -> Vec<TransportEvent> {
            let mut pending = Vec::new();
            while let Ok(event) = self.transport_events.try_recv() {
                pending.push(event);
            }
            pending
        }

        fn scanning(&mut self) {
            self.manager.start_scan().unwrap();
            self.pump();
        }
    }

    #[tokio::test]
    async fn test_connect_failure_ends_disconnected() {
        let mut fx = Fixture::new();
        fx.scanning();
        fx.manager.connect(DEVICE).unwrap();
        assert_eq!(fx.manager.state(), &LinkState::Connecting);

        // The radio gives up instead of connecting
        fx.take_pending();
        fx.manager.handle_transport_event(
            TransportEvent::ConnectFailed {
                device: DEVICE,
                reason: "timed out".to_string(),
            },
            Instant::now(),
        );

        assert_eq!(
            fx.manager.state(),
            &LinkState::Disconnected(DisconnectReason::ConnectFailed("timed out".to_string()))
        );
        assert!(fx.manager.session().is_none());
        assert!(!fx.sim.is_connected());
    }

    #[tokio::test]
    async fn test_events_for_other_devices_are_ignored() {
        let mut fx = Fixture::new();
        fx.scanning();
        fx.manager.connect(DEVICE).unwrap();
        fx.take_pending();

        fx.manager
            .handle_transport_event(TransportEvent::Connected(OTHER), Instant::now());
        assert_eq!(fx.manager.state(), &LinkState::Connecting);

        fx.manager
            .handle_transport_event(TransportEvent::Connected(DEVICE), Instant::now());
        fx.pump();
        assert_eq!(fx.manager.state(), &LinkState::Ready);

        fx.manager.handle_transport_event(
            TransportEvent::LinkLost {
                device: OTHER,
                reason: "gone".to_string(),
            },
            Instant::now(),
        );
        assert_eq!(fx.manager.state(), &LinkState::Ready);
        assert!(fx.manager.heartbeat_deadline().is_some());
        assert!(fx.sim.is_connected());
    }

    #[tokio::test]
    async fn test_connect_requires_scanning_and_a_seen_device() {
        let mut fx = Fixture::new();
        assert!(matches!(
            fx.manager.connect(DEVICE),
            Err(ControlError::InvalidTransition {
                operation: "connect",
                state: LinkState::Idle
            })
        ));

        fx.scanning();
        assert!(matches!(
            fx.manager.connect(DeviceId(0x77)),
            Err(ControlError::UnknownDevice(DeviceId(0x77)))
        ));
        assert_eq!(fx.manager.state(), &LinkState::Scanning);
    }

    #[tokio::test]
    async fn test_radio_off_rejects_scan() {
        let mut fx = Fixture::new();
        fx.sim.set_available(false);
        assert!(matches!(
            fx.manager.start_scan(),
            Err(ControlError::LinkUnavailable)
        ));
        assert_eq!(fx.manager.state(), &LinkState::Idle);
    }
}
