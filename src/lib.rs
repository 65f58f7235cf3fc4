//! Remote control for a two-stage linear actuator peripheral over BLE.
//!
//! The protocol engine lives in [`infrastructure::bluetooth`]; the discrete
//! control state and settings in [`domain`]; [`presentation`] is a console
//! stand-in for the joystick and device picker.

pub mod domain;
pub mod infrastructure;
pub mod presentation;
