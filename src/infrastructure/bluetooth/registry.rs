//! Endpoint Registry
//!
//! Maps each control point role to the transport handle discovered for it
//! during one session. Unknown characteristics are ignored; the session can
//! carry commands once both axis roles have resolved.

use crate::domain::control::{ProtocolIds, Role};
use crate::infrastructure::bluetooth::error::ControlError;
use std::collections::BTreeMap;
use tracing::{debug, trace};
use uuid::Uuid;

/// Transport-defined token for one resolved control point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub role: Role,
    pub handle: EndpointHandle,
}

/// Role → endpoint map for one session. Partial until discovery completes.
#[derive(Debug)]
pub struct EndpointRegistry {
    ids: ProtocolIds,
    endpoints: BTreeMap<Role, Endpoint>,
}

impl EndpointRegistry {
    pub fn new(ids: ProtocolIds) -> Self {
        Self {
            ids,
            endpoints: BTreeMap::new(),
        }
    }

    /// Store a discovered control point if it is one of ours
    pub fn register(&mut self, uuid: Uuid, handle: EndpointHandle) -> Option<Role> {
        let Some(role) = self.ids.role_for(uuid) else {
            trace!("Ignoring unknown characteristic {}", uuid);
            return None;
        };
        if self
            .endpoints
            .insert(role, Endpoint { role, handle })
            .is_some()
        {
            debug!("Control point {} rediscovered, handle replaced", role);
        }
        Some(role)
    }

    pub fn get(&self, role: Role) -> Result<&Endpoint, ControlError> {
        self.endpoints
            .get(&role)
            .ok_or(ControlError::EndpointMissing(role))
    }

    /// All required roles are present
    pub fn is_ready(&self) -> bool {
        Role::ALL
            .iter()
            .filter(|role| role.is_required())
            .all(|role| self.endpoints.contains_key(role))
    }

    pub fn missing(&self) -> Vec<Role> {
        Role::ALL
            .into_iter()
            .filter(|role| !self.endpoints.contains_key(role))
            .collect()
    }

    pub fn clear(&mut self) {
        self.endpoints.clear();
    }
}
