//! Simulated peripheral
//!
//! Stands in for the radio on machines without a supported Bluetooth stack
//! and in tests. Connection and discovery complete immediately through the
//! event channel; every accepted write is kept in a shared log.

use crate::domain::control::{ProtocolGeneration, ProtocolIds, Role, WriteMode};
use crate::domain::models::DeviceId;
use crate::infrastructure::bluetooth::error::TransportError;
use crate::infrastructure::bluetooth::protocol::{decode_axis_raw, decode_discrete};
use crate::infrastructure::bluetooth::registry::{Endpoint, EndpointHandle};
use crate::infrastructure::bluetooth::transport::{
    Advertisement, DiscoveredCharacteristic, Transport, TransportEvent, TransportEventSender,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// A device the simulator advertises
#[derive(Debug, Clone)]
pub struct SimulatedPeripheral {
    pub id: DeviceId,
    pub name: Option<String>,
    pub signal_strength: i16,
    pub generation: ProtocolGeneration,
}

impl SimulatedPeripheral {
    pub fn new(id: DeviceId, name: &str, generation: ProtocolGeneration) -> Self {
        Self {
            id,
            name: Some(name.to_string()),
            signal_strength: -52,
            generation,
        }
    }

    /// Legacy firmware only exposes the two axis control points
    fn roles(&self) -> Vec<Role> {
        match self.generation {
            ProtocolGeneration::Current => Role::ALL.to_vec(),
            ProtocolGeneration::Legacy => vec![Role::AxisX, Role::AxisY],
        }
    }
}

/// One write as the peripheral saw it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    pub role: Role,
    pub payload: Vec<u8>,
    pub mode: WriteMode,
    pub at: Instant,
}

/// Oldest writes are dropped past this many
pub const WRITE_LOG_CAPACITY: usize = 256;

#[derive(Debug)]
struct SimulatorState {
    ids: ProtocolIds,
    peripherals: Vec<SimulatedPeripheral>,
    available: bool,
    fail_writes: bool,
    fail_discovery: bool,
    scanning: bool,
    connected: Option<DeviceId>,
    writes: VecDeque<RecordedWrite>,
}

pub struct SimulatedTransport {
    events: TransportEventSender,
    shared: Arc<Mutex<SimulatorState>>,
}

/// Test and demo controls for a running simulator
#[derive(Clone)]
pub struct SimulatorHandle {
    events: TransportEventSender,
    shared: Arc<Mutex<SimulatorState>>,
}

fn lock(shared: &Mutex<SimulatorState>) -> MutexGuard<'_, SimulatorState> {
    // A panic while holding the lock leaves plain data behind; keep using it
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SimulatedTransport {
    pub fn new(
        events: TransportEventSender,
        ids: ProtocolIds,
        peripherals: Vec<SimulatedPeripheral>,
    ) -> (Self, SimulatorHandle) {
        let shared = Arc::new(Mutex::new(SimulatorState {
            ids,
            peripherals,
            available: true,
            fail_writes: false,
            fail_discovery: false,
            scanning: false,
            connected: None,
            writes: VecDeque::with_capacity(WRITE_LOG_CAPACITY),
        }));
        let handle = SimulatorHandle {
            events: events.clone(),
            shared: shared.clone(),
        };
        (Self { events, shared }, handle)
    }

    fn send(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }
}

impl Transport for SimulatedTransport {
    fn is_available(&self) -> bool {
        lock(&self.shared).available
    }

    fn start_scan(&mut self, _service: Uuid, _show_all_devices: bool) -> Result<(), TransportError> {
        let advertisements: Vec<Advertisement> = {
            let mut state = lock(&self.shared);
            state.scanning = true;
            state
                .peripherals
                .iter()
                .map(|p| Advertisement {
                    id: p.id,
                    name: p.name.clone(),
                    signal_strength: p.signal_strength,
                })
                .collect()
        };
        info!("Simulator advertising {} device(s)", advertisements.len());
        for advertisement in advertisements {
            self.send(TransportEvent::Advertisement(advertisement));
        }
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), TransportError> {
        lock(&self.shared).scanning = false;
        Ok(())
    }

    fn connect(&mut self, device: DeviceId) -> Result<(), TransportError> {
        let known = {
            let mut state = lock(&self.shared);
            let known = state.peripherals.iter().any(|p| p.id == device);
            if known {
                state.connected = Some(device);
            }
            known
        };
        if known {
            self.send(TransportEvent::Connected(device));
        } else {
            self.send(TransportEvent::ConnectFailed {
                device,
                reason: "no such peripheral".to_string(),
            });
        }
        Ok(())
    }

    fn discover(&mut self, device: DeviceId, service: Uuid) -> Result<(), TransportError> {
        let outcome = {
            let state = lock(&self.shared);
            if state.connected != Some(device) {
                return Err(TransportError::NotConnected);
            }
            if state.fail_discovery || service != state.ids.service {
                Err("service not found".to_string())
            } else {
                let roles = state
                    .peripherals
                    .iter()
                    .find(|p| p.id == device)
                    .map(SimulatedPeripheral::roles)
                    .unwrap_or_default();
                Ok(roles
                    .into_iter()
                    .map(|role| DiscoveredCharacteristic {
                        uuid: state.ids.uuid_for(role),
                        handle: EndpointHandle(role as u64),
                    })
                    .collect::<Vec<_>>())
            }
        };

        match outcome {
            Ok(characteristics) => self.send(TransportEvent::CharacteristicsDiscovered {
                device,
                characteristics,
            }),
            Err(reason) => self.send(TransportEvent::DiscoveryFailed { device, reason }),
        }
        Ok(())
    }

    fn write(
        &mut self,
        endpoint: &Endpoint,
        payload: &[u8],
        mode: WriteMode,
    ) -> Result<(), TransportError> {
        let mut state = lock(&self.shared);
        let Some(device) = state.connected else {
            return Err(TransportError::NotConnected);
        };
        if state.fail_writes {
            return Err(TransportError::Simulated("write rejected".to_string()));
        }

        let generation = state
            .peripherals
            .iter()
            .find(|p| p.id == device)
            .map(|p| p.generation)
            .unwrap_or_default();
        match endpoint.role {
            Role::AxisX | Role::AxisY => {
                debug!("[sim] {} = {:?}", endpoint.role, decode_axis_raw(payload, generation))
            }
            role => debug!("[sim] {} = {:?}", role, decode_discrete(payload)),
        }

        if state.writes.len() == WRITE_LOG_CAPACITY {
            state.writes.pop_front();
        }
        state.writes.push_back(RecordedWrite {
            role: endpoint.role,
            payload: payload.to_vec(),
            mode,
            at: Instant::now(),
        });
        Ok(())
    }

    fn disconnect(&mut self, device: DeviceId) {
        let mut state = lock(&self.shared);
        if state.connected == Some(device) {
            state.connected = None;
            info!("Simulator released {}", device);
        }
    }
}

impl SimulatorHandle {
    pub fn writes(&self) -> Vec<RecordedWrite> {
        lock(&self.shared).writes.iter().cloned().collect()
    }

    pub fn clear_writes(&self) {
        lock(&self.shared).writes.clear();
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.shared).connected.is_some()
    }

    pub fn set_available(&self, available: bool) {
        lock(&self.shared).available = available;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        lock(&self.shared).fail_writes = fail;
    }

    pub fn set_fail_discovery(&self, fail: bool) {
        lock(&self.shared).fail_discovery = fail;
    }

    /// Drop the link from the peripheral side
    pub fn drop_link(&self, reason: &str) {
        let device = lock(&self.shared).connected.take();
        if let Some(device) = device {
            let _ = self.events.send(TransportEvent::LinkLost {
                device,
                reason: reason.to_string(),
            });
        }
    }
}
