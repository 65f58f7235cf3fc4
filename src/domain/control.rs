//! Control points
//!
//! Identifiers and logical roles of the peripheral's control points, the
//! firmware generations, and the commands the engine wants on the wire.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Control service UUID
/// Decoded: "JoystickRemote-1" in ASCII (4A 6F 79 73 74 69 63 6B 52 65 6D 6F 74 65 2D 31)
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x4a6f7973_7469_636b_5265_6d6f74652d31);

/// X axis control point
pub const AXIS_X_CHAR_UUID: Uuid = Uuid::from_u128(0xa7c3e1d0_5b2f_4c8e_9d61_3f0e8b2c4001);

/// Y axis control point
pub const AXIS_Y_CHAR_UUID: Uuid = Uuid::from_u128(0xa7c3e1d0_5b2f_4c8e_9d61_3f0e8b2c4002);

/// Inner stage extend/retract control point
pub const EXTEND_INNER_CHAR_UUID: Uuid = Uuid::from_u128(0xa7c3e1d0_5b2f_4c8e_9d61_3f0e8b2c4003);

/// Outer stage extend/retract control point
pub const EXTEND_OUTER_CHAR_UUID: Uuid = Uuid::from_u128(0xa7c3e1d0_5b2f_4c8e_9d61_3f0e8b2c4004);

/// Smooth/instant mode control point (also carries the reset pulse)
pub const CONTROL_MODE_CHAR_UUID: Uuid = Uuid::from_u128(0xa7c3e1d0_5b2f_4c8e_9d61_3f0e8b2c4005);

/// Upper/lower stage selection control point
pub const STAGE_SELECT_CHAR_UUID: Uuid = Uuid::from_u128(0xa7c3e1d0_5b2f_4c8e_9d61_3f0e8b2c4006);

/// Value written to the mode control point to clear a latched fault.
/// The peripheral only honours it when a valid mode value follows.
pub const MODE_RESET_PULSE: i8 = -1;

/// Logical role of a control point on the peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    AxisX,
    AxisY,
    ExtendInner,
    ExtendOuter,
    ControlMode,
    StageSelect,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::AxisX,
        Role::AxisY,
        Role::ExtendInner,
        Role::ExtendOuter,
        Role::ControlMode,
        Role::StageSelect,
    ];

    /// Well-known control point identifier for this role
    pub fn default_uuid(self) -> Uuid {
        match self {
            Self::AxisX => AXIS_X_CHAR_UUID,
            Self::AxisY => AXIS_Y_CHAR_UUID,
            Self::ExtendInner => EXTEND_INNER_CHAR_UUID,
            Self::ExtendOuter => EXTEND_OUTER_CHAR_UUID,
            Self::ControlMode => CONTROL_MODE_CHAR_UUID,
            Self::StageSelect => STAGE_SELECT_CHAR_UUID,
        }
    }

    /// Extend/retract writes go out unacknowledged; they are re-sent on
    /// every press and release so an occasional loss is tolerated.
    pub fn write_mode(self) -> WriteMode {
        match self {
            Self::ExtendInner | Self::ExtendOuter => WriteMode::WithoutResponse,
            _ => WriteMode::WithResponse,
        }
    }

    /// Roles that must resolve before the session can carry commands
    pub fn is_required(self) -> bool {
        matches!(self, Self::AxisX | Self::AxisY)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AxisX => "axis-x",
            Self::AxisY => "axis-y",
            Self::ExtendInner => "extend-inner",
            Self::ExtendOuter => "extend-outer",
            Self::ControlMode => "control-mode",
            Self::StageSelect => "stage-select",
        };
        f.write_str(name)
    }
}

/// GATT write flavour for a control point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    WithResponse,
    WithoutResponse,
}

/// Wire format generation of the peripheral firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolGeneration {
    /// 2-byte axes scaled by 255
    #[default]
    Current,
    /// 1-byte axes scaled by 127, no extend/mode/stage control points
    Legacy,
}

impl ProtocolGeneration {
    /// Fixed-point factor applied to a normalized axis value
    pub fn scale(self) -> i16 {
        match self {
            Self::Current => 255,
            Self::Legacy => 127,
        }
    }

    /// Axis payload width in bytes
    pub fn axis_width(self) -> usize {
        match self {
            Self::Current => 2,
            Self::Legacy => 1,
        }
    }
}

/// Service and control-point identifiers in use for a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolIds {
    pub service: Uuid,
    pub characteristics: [(Role, Uuid); 6],
}

impl ProtocolIds {
    /// Role for a discovered characteristic identifier, if it is one of ours
    pub fn role_for(&self, uuid: Uuid) -> Option<Role> {
        self.characteristics
            .iter()
            .find(|(_, known)| *known == uuid)
            .map(|(role, _)| *role)
    }

    pub fn uuid_for(&self, role: Role) -> Uuid {
        self.characteristics
            .iter()
            .find(|(known, _)| *known == role)
            .map(|(_, uuid)| *uuid)
            .unwrap_or_else(|| role.default_uuid())
    }
}

impl Default for ProtocolIds {
    fn default() -> Self {
        Self {
            service: SERVICE_UUID,
            characteristics: Role::ALL.map(|role| (role, role.default_uuid())),
        }
    }
}

/// Quantized two-axis command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AxisCommand {
    pub x: i16,
    pub y: i16,
}

impl AxisCommand {
    pub const ZERO: Self = Self { x: 0, y: 0 };

    /// Quantize normalized input. Out-of-range input clamps, NaN maps to zero.
    pub fn quantize(x: f32, y: f32, generation: ProtocolGeneration) -> Self {
        Self {
            x: quantize(x, generation),
            y: quantize(y, generation),
        }
    }
}

/// One write the engine wants on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireCommand {
    /// Both axis control points
    Axis(AxisCommand),
    /// A single signed byte on a discrete control point
    Discrete { role: Role, value: i8 },
}

fn quantize(value: f32, generation: ProtocolGeneration) -> i16 {
    if value.is_nan() {
        return 0;
    }
    let scale = f32::from(generation.scale());
    // Truncation toward zero, then clamp so overshoot never wraps
    (value * scale).trunc().clamp(-scale, scale) as i16
}
