//! Bluetooth Module
//!
//! Drives the actuator peripheral over BLE.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     ControlService                       │
//! │   (single task: commands + transport events + heartbeat) │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!                       ▼
//!              ┌──────────────────┐
//!              │ ConnectionManager│──── ConnectionSession
//!              │                  │      - EndpointRegistry
//!              │  - lifecycle     │      - HeartbeatClock
//!              │  - writes        │      - ActuatorState
//!              └────────┬─────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         ▼             ▼             ▼
//! ┌───────────┐  ┌────────────┐  ┌──────────┐
//! │ Protocol  │  │ Transport  │  │ WinRT /  │
//! │ - Payloads│  │ (trait)    │  │ Simulated│
//! │ - Codec   │  │            │  │          │
//! └───────────┘  └────────────┘  └──────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Payload codec for the control points
//! - [`registry`] - Role to endpoint mapping for a session
//! - [`heartbeat`] - Re-send schedule that keeps the link from idling out
//! - [`connection`] - Link lifecycle and command writes
//! - [`service`] - The event loop everything is serialized through
//! - [`transport`] - Seam over the radio stack
//! - [`simulated`] - In-process peripheral
//! - `winrt` - Windows GATT transport

pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod protocol;
pub mod registry;
pub mod service;
pub mod simulated;
pub mod transport;
#[cfg(windows)]
pub mod winrt;

// Re-export main service for convenience
pub use service::ControlService;
