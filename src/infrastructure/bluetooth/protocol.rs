//! Actuator Remote Control Protocol
//!
//! Byte-level codec for the control points: axis payloads per firmware
//! generation and single signed bytes for the discrete points.

use crate::domain::control::{AxisCommand, ProtocolGeneration};

fn encode_axis_value(value: i16, generation: ProtocolGeneration) -> Vec<u8> {
    match generation {
        ProtocolGeneration::Current => value.to_le_bytes().to_vec(),
        ProtocolGeneration::Legacy => {
            let narrowed = value.clamp(i16::from(i8::MIN), i16::from(i8::MAX)) as i8;
            narrowed.to_le_bytes().to_vec()
        }
    }
}

/// Wire payloads for the X and Y control points
pub fn axis_payloads(command: &AxisCommand, generation: ProtocolGeneration) -> (Vec<u8>, Vec<u8>) {
    (
        encode_axis_value(command.x, generation),
        encode_axis_value(command.y, generation),
    )
}

/// Encode normalized X/Y input into the two axis payloads
pub fn encode_axis(x: f32, y: f32, generation: ProtocolGeneration) -> (Vec<u8>, Vec<u8>) {
    axis_payloads(&AxisCommand::quantize(x, y, generation), generation)
}

/// Encode a discrete control value as a single signed byte
pub fn encode_discrete(value: i8) -> [u8; 1] {
    value.to_le_bytes()
}

/// Raw integer carried by an axis payload
pub fn decode_axis_raw(payload: &[u8], generation: ProtocolGeneration) -> Option<i16> {
    match (generation, payload) {
        (ProtocolGeneration::Current, [lo, hi]) => Some(i16::from_le_bytes([*lo, *hi])),
        (ProtocolGeneration::Legacy, [byte]) => Some(i16::from(i8::from_le_bytes([*byte]))),
        _ => None,
    }
}

/// Normalized value carried by an axis payload
pub fn decode_axis(payload: &[u8], generation: ProtocolGeneration) -> Option<f32> {
    decode_axis_raw(payload, generation)
        .map(|raw| f32::from(raw) / f32::from(generation.scale()))
}

pub fn decode_discrete(payload: &[u8]) -> Option<i8> {
    match payload {
        [byte] => Some(i8::from_le_bytes([*byte])),
        _ => None,
    }
}
