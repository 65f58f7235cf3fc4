//! Transport seam
//!
//! The engine talks to the radio only through [`Transport`]. Requests are
//! non-blocking; anything that completes later (scan results, connection,
//! characteristic discovery, link loss) comes back as a [`TransportEvent`]
//! on the channel handed to the transport when it was built.

use crate::domain::control::WriteMode;
use crate::domain::models::DeviceId;
use crate::infrastructure::bluetooth::error::TransportError;
use crate::infrastructure::bluetooth::registry::{Endpoint, EndpointHandle};
use tokio::sync::mpsc;
use uuid::Uuid;

pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// One advertisement seen while scanning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub id: DeviceId,
    pub name: Option<String>,
    pub signal_strength: i16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveredCharacteristic {
    pub uuid: Uuid,
    pub handle: EndpointHandle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Advertisement(Advertisement),
    Connected(DeviceId),
    ConnectFailed {
        device: DeviceId,
        reason: String,
    },
    CharacteristicsDiscovered {
        device: DeviceId,
        characteristics: Vec<DiscoveredCharacteristic>,
    },
    DiscoveryFailed {
        device: DeviceId,
        reason: String,
    },
    LinkLost {
        device: DeviceId,
        reason: String,
    },
}

pub trait Transport: Send {
    /// Whether the radio is powered and supports low energy
    fn is_available(&self) -> bool;

    fn start_scan(&mut self, service: Uuid, show_all_devices: bool) -> Result<(), TransportError>;

    fn stop_scan(&mut self) -> Result<(), TransportError>;

    /// Completion arrives as `Connected` or `ConnectFailed`
    fn connect(&mut self, device: DeviceId) -> Result<(), TransportError>;

    /// Completion arrives as `CharacteristicsDiscovered` or `DiscoveryFailed`
    fn discover(&mut self, device: DeviceId, service: Uuid) -> Result<(), TransportError>;

    /// Fire-and-forget; an `Ok` only means the write was handed to the stack
    fn write(
        &mut self,
        endpoint: &Endpoint,
        payload: &[u8],
        mode: WriteMode,
    ) -> Result<(), TransportError>;

    /// Release the connection and every handle obtained through it
    fn disconnect(&mut self, device: DeviceId);
}

/// The open link of an asynchronous transport, plus the device a connect
/// is still working on. A connect that completes after its target was
/// released or replaced gets its link handed back for closing instead of
/// being stored.
#[derive(Debug)]
pub struct LinkSlot<L> {
    pending: Option<DeviceId>,
    link: Option<(DeviceId, L)>,
}

impl<L> Default for LinkSlot<L> {
    fn default() -> Self {
        Self {
            pending: None,
            link: None,
        }
    }
}

impl<L> LinkSlot<L> {
    /// A connect to `device` has started; any earlier pending target is stale
    pub fn begin(&mut self, device: DeviceId) {
        self.pending = Some(device);
    }

    /// A connect finished. `Ok` carries the link it displaced, if any;
    /// `Err` hands the new link back because nobody wants it any more.
    pub fn complete(&mut self, device: DeviceId, link: L) -> Result<Option<L>, L> {
        if self.pending != Some(device) {
            return Err(link);
        }
        self.pending = None;
        Ok(self.link.replace((device, link)).map(|(_, previous)| previous))
    }

    /// A connect failed; nothing to store
    pub fn fail(&mut self, device: DeviceId) {
        if self.pending == Some(device) {
            self.pending = None;
        }
    }

    /// Forget `device`, pending or open. Returns the link to close.
    pub fn release(&mut self, device: DeviceId) -> Option<L> {
        if self.pending == Some(device) {
            self.pending = None;
        }
        match &self.link {
            Some((open, _)) if *open == device => self.link.take().map(|(_, link)| link),
            _ => None,
        }
    }

    pub fn current(&self) -> Option<&L> {
        self.link.as_ref().map(|(_, link)| link)
    }

    pub fn get_mut(&mut self, device: DeviceId) -> Option<&mut L> {
        match &mut self.link {
            Some((open, link)) if *open == device => Some(link),
            _ => None,
        }
    }

    pub fn get(&self, device: DeviceId) -> Option<&L> {
        match &self.link {
            Some((open, link)) if *open == device => Some(link),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: DeviceId = DeviceId(0xA);
    const B: DeviceId = DeviceId(0xB);

    #[test]
    fn test_completed_connect_is_stored() {
        let mut slot = LinkSlot::default();
        slot.begin(A);
        assert_eq!(slot.complete(A, "a"), Ok(None));
        assert_eq!(slot.get(A), Some(&"a"));
        assert_eq!(slot.current(), Some(&"a"));
        assert_eq!(slot.release(A), Some("a"));
        assert_eq!(slot.current(), None);
    }

    #[test]
    fn test_connect_released_while_pending_is_handed_back() {
        let mut slot = LinkSlot::default();
        slot.begin(A);
        assert_eq!(slot.release(A), None);
        assert_eq!(slot.complete(A, "a"), Err("a"));
        assert_eq!(slot.current(), None);
    }

    #[test]
    fn test_superseded_connect_is_handed_back() {
        let mut slot = LinkSlot::default();
        slot.begin(A);
        slot.begin(B);
        assert_eq!(slot.complete(A, "a"), Err("a"));
        assert_eq!(slot.complete(B, "b"), Ok(None));
        assert_eq!(slot.get(A), None);
        assert_eq!(slot.get_mut(B), Some(&mut "b"));
    }

    #[test]
    fn test_failed_connect_clears_pending() {
        let mut slot: LinkSlot<&str> = LinkSlot::default();
        slot.begin(A);
        slot.fail(A);
        assert_eq!(slot.complete(A, "late"), Err("late"));
    }

    #[test]
    fn test_release_of_other_device_keeps_link() {
        let mut slot = LinkSlot::default();
        slot.begin(A);
        slot.complete(A, "a").unwrap();
        assert_eq!(slot.release(B), None);
        assert_eq!(slot.current(), Some(&"a"));
    }
}
