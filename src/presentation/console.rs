//! Console driver
//!
//! A line-oriented stand-in for the joystick screen and the device picker.
//! Lines become [`EngineCommand`]s; [`AppEvent`]s are printed back.

use crate::domain::actuator::{ActuatorButton, ActuatorState, ToggleControl};
use crate::domain::joystick::JoystickGeometry;
use crate::domain::models::{AppEvent, DeviceId, EngineCommand, MessageSeverity};
use std::io::BufRead;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

pub const HELP: &str = "\
commands:
  scan | stop                      start/stop listing peripherals
  connect <address>                connect to a listed peripheral
  disconnect
  axis <x> <y>                     normalized input in [-1, 1]
  drag <dx> <dy>                   stick translation in points
  release                          stick back to centre
  press|unpress <button>           extend-inner, retract-inner, extend-outer, retract-outer
  upper | lower | mode | reset
  quit";

#[derive(Debug, Error, PartialEq)]
pub enum ConsoleError {
    #[error("unknown command {0:?} (type `help`)")]
    Unknown(String),
    #[error("missing {0}")]
    MissingArgument(&'static str),
    #[error("not a number: {0:?}")]
    InvalidNumber(String),
    #[error("not a device address: {0:?}")]
    InvalidAddress(String),
    #[error("unknown button {0:?}")]
    UnknownButton(String),
}

/// What a console line asks for
#[derive(Debug, PartialEq)]
pub enum ConsoleInput {
    Command(EngineCommand),
    Help,
    Nothing,
}

fn number<'a>(
    parts: &mut impl Iterator<Item = &'a str>,
    what: &'static str,
) -> Result<f32, ConsoleError> {
    let raw = parts.next().ok_or(ConsoleError::MissingArgument(what))?;
    raw.parse()
        .map_err(|_| ConsoleError::InvalidNumber(raw.to_string()))
}

fn button(name: Option<&str>) -> Result<ActuatorButton, ConsoleError> {
    match name {
        Some("extend-inner") => Ok(ActuatorButton::ExtendInner),
        Some("retract-inner") => Ok(ActuatorButton::RetractInner),
        Some("extend-outer") => Ok(ActuatorButton::ExtendOuter),
        Some("retract-outer") => Ok(ActuatorButton::RetractOuter),
        Some(other) => Err(ConsoleError::UnknownButton(other.to_string())),
        None => Err(ConsoleError::MissingArgument("button")),
    }
}

pub fn parse_line(line: &str, geometry: &JoystickGeometry) -> Result<ConsoleInput, ConsoleError> {
    let mut parts = line.split_whitespace();
    let Some(word) = parts.next() else {
        return Ok(ConsoleInput::Nothing);
    };

    let command = match word.to_lowercase().as_str() {
        "help" | "?" => return Ok(ConsoleInput::Help),
        "scan" => EngineCommand::StartScan,
        "stop" => EngineCommand::StopScan,
        "connect" => {
            let raw = parts.next().ok_or(ConsoleError::MissingArgument("address"))?;
            let id: DeviceId = raw
                .parse()
                .map_err(|_| ConsoleError::InvalidAddress(raw.to_string()))?;
            EngineCommand::SelectDevice(id)
        }
        "disconnect" => EngineCommand::Disconnect,
        "axis" => {
            let x = number(&mut parts, "x")?;
            let y = number(&mut parts, "y")?;
            EngineCommand::Axis { x, y }
        }
        "drag" => {
            let dx = number(&mut parts, "dx")?;
            let dy = number(&mut parts, "dy")?;
            let (x, y) = geometry.normalize(dx, dy);
            EngineCommand::Axis { x, y }
        }
        "release" => {
            let (x, y) = geometry.release();
            EngineCommand::Axis { x, y }
        }
        "press" => EngineCommand::Button {
            button: button(parts.next())?,
            pressed: true,
        },
        "unpress" => EngineCommand::Button {
            button: button(parts.next())?,
            pressed: false,
        },
        "upper" => EngineCommand::Toggle(ToggleControl::Upper),
        "lower" => EngineCommand::Toggle(ToggleControl::Lower),
        "mode" => EngineCommand::Toggle(ToggleControl::Mode),
        "reset" => EngineCommand::Reset,
        "quit" | "exit" => EngineCommand::Shutdown,
        other => return Err(ConsoleError::Unknown(other.to_string())),
    };
    Ok(ConsoleInput::Command(command))
}

/// Feed lines from `input` to the engine until `quit` or end of input.
/// Blocking; run it on its own thread.
pub fn read_commands(
    input: impl BufRead,
    geometry: JoystickGeometry,
    commands: mpsc::UnboundedSender<EngineCommand>,
) {
    println!("{}", HELP);
    for line in input.lines() {
        let Ok(line) = line else {
            break;
        };
        match parse_line(&line, &geometry) {
            Ok(ConsoleInput::Command(command)) => {
                let quitting = command == EngineCommand::Shutdown;
                debug!("console -> {:?}", command);
                if commands.send(command).is_err() || quitting {
                    return;
                }
            }
            Ok(ConsoleInput::Help) => println!("{}", HELP),
            Ok(ConsoleInput::Nothing) => {}
            Err(e) => println!("! {}", e),
        }
    }
    let _ = commands.send(EngineCommand::Shutdown);
}

fn describe_actuator(state: &ActuatorState) -> String {
    format!(
        "inner={:?} outer={:?} upper={} lower={} mode={:?}",
        state.inner,
        state.outer,
        state.stage.upper_selected(),
        state.stage.lower_selected(),
        state.mode
    )
}

pub fn render(event: &AppEvent) -> String {
    match event {
        AppEvent::DeviceDiscovered(device) => format!(
            "  {}  {:<24} {} dBm",
            device.id, device.name, device.signal_strength
        ),
        AppEvent::ConnectionStateChanged(state) => format!("[link] {}", state),
        AppEvent::ActuatorChanged(state) => format!("[actuator] {}", describe_actuator(state)),
        AppEvent::LogMessage(msg) => {
            let tag = match msg.severity {
                MessageSeverity::Info => "info",
                MessageSeverity::Success => "ok",
                MessageSeverity::Warning => "warn",
                MessageSeverity::Error => "error",
            };
            format!("[{}] {}", tag, msg.message)
        }
    }
}
