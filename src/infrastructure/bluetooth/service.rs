//! Control Service
//!
//! The single serialization point of the engine. User commands, transport
//! callbacks and heartbeat deadlines are merged into one task, so the
//! connection state, the actuator state and the last axis command are only
//! ever touched from here.

use crate::domain::models::{AppEvent, EngineCommand, MessageSeverity, StatusMessage};
use crate::infrastructure::bluetooth::connection::{ConnectionConfig, ConnectionManager};
use crate::infrastructure::bluetooth::error::ControlError;
use crate::infrastructure::bluetooth::transport::{Transport, TransportEvent};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{error, info};

/// Main service coordinating all peripheral I/O
pub struct ControlService<T: Transport> {
    manager: ConnectionManager<T>,
    commands: mpsc::UnboundedReceiver<EngineCommand>,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    event_sender: mpsc::UnboundedSender<AppEvent>,
}

impl<T: Transport> ControlService<T> {
    pub fn new(
        transport: T,
        config: ConnectionConfig,
        commands: mpsc::UnboundedReceiver<EngineCommand>,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        event_sender: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        Self {
            manager: ConnectionManager::new(transport, config, event_sender.clone()),
            commands,
            transport_events,
            event_sender,
        }
    }

    /// Run until `Shutdown` arrives or every command sender is gone
    pub async fn run(mut self) {
        info!("Control service started");
        loop {
            let deadline = self.manager.heartbeat_deadline();
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(EngineCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(event) = self.transport_events.recv() => {
                    self.manager.handle_transport_event(event, Instant::now());
                }
                _ = wait_for(deadline) => self.manager.on_heartbeat(Instant::now()),
            }
        }

        // Heartbeat is disarmed inside teardown before the link is released
        self.manager.shutdown();
        info!("Control service stopped");
    }

    fn handle_command(&mut self, command: EngineCommand) {
        let now = Instant::now();
        let result = match command {
            EngineCommand::StartScan => self.manager.start_scan(),
            EngineCommand::StopScan => self.manager.stop_scan(),
            EngineCommand::SelectDevice(device) => self.manager.connect(device),
            EngineCommand::Disconnect => {
                self.manager.disconnect();
                Ok(())
            }
            EngineCommand::Axis { x, y } => {
                self.manager.on_axis(x, y, now);
                Ok(())
            }
            EngineCommand::Button { button, pressed } => {
                self.manager.on_button(button, pressed, now);
                Ok(())
            }
            EngineCommand::Toggle(control) => {
                self.manager.on_toggle(control, now);
                Ok(())
            }
            EngineCommand::Reset => {
                self.manager.on_reset(now);
                Ok(())
            }
            EngineCommand::Shutdown => Ok(()),
        };

        if let Err(e) = result {
            self.report(&e);
        }
    }

    fn report(&self, err: &ControlError) {
        error!("{}", err);
        let severity = match err {
            ControlError::LinkUnavailable | ControlError::InvalidTransition { .. } => {
                MessageSeverity::Warning
            }
            _ => MessageSeverity::Error,
        };
        // LinkUnavailable already produced its own status message
        if !matches!(err, ControlError::LinkUnavailable) {
            let _ = self.event_sender.send(AppEvent::LogMessage(StatusMessage {
                message: err.to_string(),
                severity,
            }));
        }
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::actuator::{ActuatorButton, ToggleControl};
    use crate::domain::models::{DeviceId, LinkState};
    use crate::domain::control::{ProtocolGeneration, ProtocolIds, Role, WriteMode};
    use crate::infrastructure::bluetooth::simulated::{
        RecordedWrite, SimulatedPeripheral, SimulatedTransport, SimulatorHandle,
    };
    use std::time::Duration;
    use tokio::task::JoinHandle;

    const PERIOD: Duration = Duration::from_millis(5000);
    const DEVICE: DeviceId = DeviceId(0x00AA_BBCC_DDEE);

    struct Harness {
        commands: mpsc::UnboundedSender<EngineCommand>,
        events: mpsc::UnboundedReceiver<AppEvent>,
        sim: SimulatorHandle,
        task: JoinHandle<()>,
    }

    impl Harness {
        fn start(generation: ProtocolGeneration) -> Self {
            let (event_tx, events) = mpsc::unbounded_channel();
            let (commands, command_rx) = mpsc::unbounded_channel();
            let (transport_tx, transport_rx) = mpsc::unbounded_channel();
            let peripherals = vec![
                SimulatedPeripheral::new(DEVICE, "Actuator", generation),
                SimulatedPeripheral {
                    name: None,
                    ..SimulatedPeripheral::new(DeviceId(0x01), "", generation)
                },
            ];
            let (transport, sim) =
                SimulatedTransport::new(transport_tx, ProtocolIds::default(), peripherals);
            let config = ConnectionConfig {
                generation,
                heartbeat_period: PERIOD,
                ..ConnectionConfig::default()
            };
            let service = ControlService::new(transport, config, command_rx, transport_rx, event_tx);
            let task = tokio::spawn(service.run());
            Self {
                commands,
                events,
                sim,
                task,
            }
        }

        fn send(&self, command: EngineCommand) {
            self.commands.send(command).unwrap();
        }

        async fn wait_for_state(&mut self, wanted: LinkState) {
            while let Some(event) = self.events.recv().await {
                if let AppEvent::ConnectionStateChanged(state) = event {
                    if state == wanted {
                        return;
                    }
                }
            }
            panic!("event stream ended before {:?}", wanted);
        }

        async fn connect(&mut self) {
            self.send(EngineCommand::StartScan);
            self.wait_for_state(LinkState::Scanning).await;
            self.send(EngineCommand::SelectDevice(DEVICE));
            self.wait_for_state(LinkState::Ready).await;
        }

        /// Let the service drain its queues without moving the clock
        async fn settle(&self) {
            for _ in 0..10 {
                tokio::task::yield_now().await;
            }
        }

        fn writes_to(&self, role: Role) -> Vec<RecordedWrite> {
            self.sim
                .writes()
                .into_iter()
                .filter(|w| w.role == role)
                .collect()
        }
    }

    fn values(writes: &[RecordedWrite]) -> Vec<i8> {
        writes.iter().map(|w| w.payload[0] as i8).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_unnamed_devices_are_not_listed() {
        let mut harness = Harness::start(ProtocolGeneration::Current);
        harness.send(EngineCommand::StartScan);
        harness.wait_for_state(LinkState::Scanning).await;
        harness.settle().await;

        let mut listed = Vec::new();
        while let Ok(event) = harness.events.try_recv() {
            if let AppEvent::DeviceDiscovered(device) = event {
                listed.push(device.id);
            }
        }
        assert_eq!(listed, vec![DEVICE]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_resends_once_per_period() {
        let mut harness = Harness::start(ProtocolGeneration::Current);
        harness.connect().await;
        let ready_at = Instant::now();

        tokio::time::sleep(PERIOD * 3 + Duration::from_millis(100)).await;
        harness.settle().await;

        let x_writes = harness.writes_to(Role::AxisX);
        assert_eq!(x_writes.len(), 3);
        assert_eq!(harness.writes_to(Role::AxisY).len(), 3);
        for (i, write) in x_writes.iter().enumerate() {
            assert_eq!(write.at, ready_at + PERIOD * (i as u32 + 1));
            assert_eq!(write.payload, vec![0, 0]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_send_restarts_heartbeat() {
        let mut harness = Harness::start(ProtocolGeneration::Current);
        harness.connect().await;

        tokio::time::sleep(Duration::from_millis(3000)).await;
        harness.send(EngineCommand::Axis { x: 0.5, y: -1.0 });
        harness.settle().await;
        let sent_at = Instant::now();

        // The earlier deadline (5s after Ready) passes without a re-send
        tokio::time::sleep(Duration::from_millis(4000)).await;
        harness.settle().await;
        assert_eq!(harness.writes_to(Role::AxisX).len(), 1);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        harness.settle().await;
        let x_writes = harness.writes_to(Role::AxisX);
        assert_eq!(x_writes.len(), 2);
        assert_eq!(x_writes[1].at, sent_at + PERIOD);
        assert_eq!(x_writes[1].payload, 127i16.to_le_bytes().to_vec());
        let y_writes = harness.writes_to(Role::AxisY);
        assert_eq!(y_writes[1].payload, (-255i16).to_le_bytes().to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_stops_heartbeat() {
        let mut harness = Harness::start(ProtocolGeneration::Current);
        harness.connect().await;

        tokio::time::sleep(Duration::from_millis(4900)).await;
        harness.send(EngineCommand::Disconnect);
        harness
            .wait_for_state(LinkState::Disconnected(crate::domain::models::DisconnectReason::Requested))
            .await;

        tokio::time::sleep(PERIOD * 4).await;
        harness.settle().await;
        assert!(harness.sim.writes().is_empty());
        assert!(!harness.sim.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_loss_stops_heartbeat() {
        let mut harness = Harness::start(ProtocolGeneration::Current);
        harness.connect().await;

        harness.sim.drop_link("supervision timeout");
        harness
            .wait_for_state(LinkState::Disconnected(
                crate::domain::models::DisconnectReason::LinkLost("supervision timeout".to_string()),
            ))
            .await;

        tokio::time::sleep(PERIOD * 2).await;
        harness.settle().await;
        assert!(harness.sim.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_press_release_writes_exactly_twice() {
        let mut harness = Harness::start(ProtocolGeneration::Current);
        harness.connect().await;

        harness.send(EngineCommand::Button {
            button: ActuatorButton::ExtendInner,
            pressed: true,
        });
        harness.send(EngineCommand::Button {
            button: ActuatorButton::ExtendInner,
            pressed: true,
        });
        harness.send(EngineCommand::Button {
            button: ActuatorButton::ExtendInner,
            pressed: false,
        });
        harness.settle().await;

        let writes = harness.writes_to(Role::ExtendInner);
        assert_eq!(values(&writes), vec![1, 0]);
        assert!(writes.iter().all(|w| w.mode == WriteMode::WithoutResponse));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_toggles_on_the_wire() {
        let mut harness = Harness::start(ProtocolGeneration::Current);
        harness.connect().await;

        for control in [ToggleControl::Upper, ToggleControl::Lower, ToggleControl::Upper] {
            harness.send(EngineCommand::Toggle(control));
        }
        harness.settle().await;

        let writes = harness.writes_to(Role::StageSelect);
        assert_eq!(values(&writes), vec![2, 0, 2]);
        assert!(writes.iter().all(|w| w.mode == WriteMode::WithResponse));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_orders_mode_writes() {
        let mut harness = Harness::start(ProtocolGeneration::Current);
        harness.connect().await;

        harness.send(EngineCommand::Toggle(ToggleControl::Mode));
        harness.send(EngineCommand::Reset);
        harness.settle().await;

        let writes = harness.sim.writes();
        let roles: Vec<Role> = writes.iter().map(|w| w.role).collect();
        assert_eq!(
            roles,
            vec![
                Role::ControlMode,
                Role::ControlMode,
                Role::ControlMode,
                Role::AxisX,
                Role::AxisY
            ]
        );
        assert_eq!(values(&writes[..3]), vec![0, -1, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_legacy_peripheral_drops_missing_endpoints() {
        let mut harness = Harness::start(ProtocolGeneration::Legacy);
        harness.connect().await;

        harness.send(EngineCommand::Toggle(ToggleControl::Mode));
        harness.send(EngineCommand::Axis { x: 1.0, y: -1.0 });
        harness.settle().await;

        let writes = harness.sim.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].payload, vec![127u8]);
        assert_eq!(writes[1].payload, vec![(-127i8) as u8]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_is_not_fatal() {
        let mut harness = Harness::start(ProtocolGeneration::Current);
        harness.connect().await;

        harness.sim.set_fail_writes(true);
        harness.send(EngineCommand::Axis { x: 0.2, y: 0.2 });
        harness.settle().await;
        assert!(harness.sim.writes().is_empty());

        harness.sim.set_fail_writes(false);
        tokio::time::sleep(PERIOD + Duration::from_millis(10)).await;
        harness.settle().await;
        // The heartbeat carries the value that failed to go out
        let x_writes = harness.writes_to(Role::AxisX);
        assert_eq!(x_writes.len(), 1);
        assert_eq!(x_writes[0].payload, 51i16.to_le_bytes().to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_releases_link() {
        let mut harness = Harness::start(ProtocolGeneration::Current);
        harness.connect().await;

        harness.send(EngineCommand::Shutdown);
        (&mut harness.task).await.unwrap();
        assert!(!harness.sim.is_connected());
        assert!(harness.sim.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_while_extend_held_neutralizes_it() {
        let mut harness = Harness::start(ProtocolGeneration::Current);
        harness.connect().await;

        harness.send(EngineCommand::Button {
            button: ActuatorButton::ExtendInner,
            pressed: true,
        });
        harness.send(EngineCommand::Toggle(ToggleControl::Upper));
        harness.send(EngineCommand::Reset);
        harness.send(EngineCommand::Button {
            button: ActuatorButton::ExtendInner,
            pressed: false,
        });
        harness.settle().await;

        assert_eq!(values(&harness.writes_to(Role::ExtendInner)), vec![1, 0]);
        assert_eq!(values(&harness.writes_to(Role::StageSelect)), vec![2, 0]);
        assert!(harness.writes_to(Role::ExtendOuter).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_commands_do_not_hold_off_heartbeat() {
        let mut harness = Harness::start(ProtocolGeneration::Legacy);
        harness.connect().await;

        // Legacy firmware has no mode control point; these never reach the wire
        for _ in 0..6 {
            tokio::time::sleep(Duration::from_millis(4000)).await;
            harness.send(EngineCommand::Toggle(ToggleControl::Mode));
            harness.settle().await;
        }

        assert!(harness.writes_to(Role::ControlMode).is_empty());
        assert_eq!(harness.writes_to(Role::AxisX).len(), 4);
        assert_eq!(harness.writes_to(Role::AxisY).len(), 4);
    }

    fn drain(harness: &mut Harness) -> Vec<AppEvent> {
        let mut events = Vec::new();
        while let Ok(event) = harness.events.try_recv() {
            events.push(event);
        }
        events
    }

    fn states(events: &[AppEvent]) -> Vec<LinkState> {
        events
            .iter()
            .filter_map(|event| match event {
                AppEvent::ConnectionStateChanged(state) => Some(state.clone()),
                _ => None,
            })
            .collect()
    }

    fn messages(events: &[AppEvent]) -> Vec<(MessageSeverity, String)> {
        events
            .iter()
            .filter_map(|event| match event {
                AppEvent::LogMessage(msg) => Some((msg.severity, msg.message.clone())),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_with_radio_off_stays_idle() {
        let mut harness = Harness::start(ProtocolGeneration::Current);
        harness.sim.set_available(false);

        harness.send(EngineCommand::StartScan);
        harness.settle().await;
        let events = drain(&mut harness);
        assert!(states(&events).is_empty());
        let messages = messages(&events);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, MessageSeverity::Warning);

        // Still idle, so a scan is allowed once the radio is back
        harness.sim.set_available(true);
        harness.send(EngineCommand::StartScan);
        harness.wait_for_state(LinkState::Scanning).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_failure_stays_resolving() {
        let mut harness = Harness::start(ProtocolGeneration::Current);
        harness.sim.set_fail_discovery(true);

        harness.send(EngineCommand::StartScan);
        harness.wait_for_state(LinkState::Scanning).await;
        harness.send(EngineCommand::SelectDevice(DEVICE));
        harness.wait_for_state(LinkState::Resolving).await;

        tokio::time::sleep(PERIOD * 3).await;
        harness.settle().await;
        let events = drain(&mut harness);
        assert!(states(&events).is_empty());
        assert!(messages(&events)
            .iter()
            .any(|(severity, text)| *severity == MessageSeverity::Error
                && text.starts_with("service discovery failed")));

        // Inputs are ignored short of Ready
        harness.send(EngineCommand::Axis { x: 1.0, y: 1.0 });
        harness.settle().await;
        assert!(harness.sim.writes().is_empty());
        assert!(harness.sim.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_rejections_are_reported() {
        let mut harness = Harness::start(ProtocolGeneration::Current);

        harness.send(EngineCommand::SelectDevice(DEVICE));
        harness.settle().await;
        let events = drain(&mut harness);
        assert!(states(&events).is_empty());
        assert_eq!(
            messages(&events),
            vec![(
                MessageSeverity::Warning,
                "connect is not allowed while idle".to_string()
            )]
        );

        harness.send(EngineCommand::StartScan);
        harness.wait_for_state(LinkState::Scanning).await;
        harness.settle().await;
        drain(&mut harness);

        harness.send(EngineCommand::SelectDevice(DeviceId(0x77)));
        harness.settle().await;
        let events = drain(&mut harness);
        assert!(states(&events).is_empty());
        assert_eq!(
            messages(&events),
            vec![(
                MessageSeverity::Error,
                "device 000000000077 was not seen in this scan".to_string()
            )]
        );
        assert!(!harness.sim.is_connected());
    }
}
