//! Discrete actuator state
//!
//! Turns button and toggle events into wire commands. Every transition is
//! edge-detected against the current state, so repeated press events for a
//! direction that is already active never reach the peripheral twice.

use crate::domain::control::{AxisCommand, Role, WireCommand, MODE_RESET_PULSE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtendState {
    #[default]
    Idle,
    Extending,
    Retracting,
}

impl ExtendState {
    pub fn wire_value(self) -> i8 {
        match self {
            Self::Idle => 0,
            Self::Extending => 1,
            Self::Retracting => -1,
        }
    }
}

/// Which stage(s) the extend commands act on. There is no "neither".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StageSelect {
    #[default]
    Both,
    UpperOnly,
    LowerOnly,
}

impl StageSelect {
    /// Lower-only is 1 and upper-only is 2 on the wire.
    pub fn wire_value(self) -> i8 {
        match self {
            Self::Both => 0,
            Self::LowerOnly => 1,
            Self::UpperOnly => 2,
        }
    }

    fn toggle_upper(self) -> Self {
        match self {
            Self::Both => Self::UpperOnly,
            Self::UpperOnly | Self::LowerOnly => Self::Both,
        }
    }

    fn toggle_lower(self) -> Self {
        match self {
            Self::Both => Self::LowerOnly,
            Self::LowerOnly | Self::UpperOnly => Self::Both,
        }
    }

    pub fn upper_selected(self) -> bool {
        matches!(self, Self::Both | Self::UpperOnly)
    }

    pub fn lower_selected(self) -> bool {
        matches!(self, Self::Both | Self::LowerOnly)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlMode {
    #[default]
    Smooth,
    Instant,
}

impl ControlMode {
    pub fn wire_value(self) -> i8 {
        match self {
            Self::Smooth => 1,
            Self::Instant => 0,
        }
    }

    fn toggled(self) -> Self {
        match self {
            Self::Smooth => Self::Instant,
            Self::Instant => Self::Smooth,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorButton {
    ExtendInner,
    RetractInner,
    ExtendOuter,
    RetractOuter,
}

impl ActuatorButton {
    fn role(self) -> Role {
        match self {
            Self::ExtendInner | Self::RetractInner => Role::ExtendInner,
            Self::ExtendOuter | Self::RetractOuter => Role::ExtendOuter,
        }
    }

    fn direction(self) -> ExtendState {
        match self {
            Self::ExtendInner | Self::ExtendOuter => ExtendState::Extending,
            Self::RetractInner | Self::RetractOuter => ExtendState::Retracting,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleControl {
    Upper,
    Lower,
    Mode,
}

/// Discrete control state for one connection session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActuatorState {
    pub inner: ExtendState,
    pub outer: ExtendState,
    pub stage: StageSelect,
    pub mode: ControlMode,
}

impl ActuatorState {
    fn extend_slot(&mut self, button: ActuatorButton) -> &mut ExtendState {
        match button.role() {
            Role::ExtendInner => &mut self.inner,
            _ => &mut self.outer,
        }
    }

    /// Press sends the direction immediately. Pressing the opposite
    /// direction while one is held switches over.
    pub fn press(&mut self, button: ActuatorButton) -> Option<WireCommand> {
        let direction = button.direction();
        let slot = self.extend_slot(button);
        if *slot == direction {
            return None;
        }
        *slot = direction;
        Some(WireCommand::Discrete {
            role: button.role(),
            value: direction.wire_value(),
        })
    }

    /// Release neutralizes only if this button's direction is still the
    /// active one; a release superseded by the opposite button is stale.
    pub fn release(&mut self, button: ActuatorButton) -> Option<WireCommand> {
        let slot = self.extend_slot(button);
        if *slot != button.direction() {
            return None;
        }
        *slot = ExtendState::Idle;
        Some(WireCommand::Discrete {
            role: button.role(),
            value: ExtendState::Idle.wire_value(),
        })
    }

    pub fn toggle(&mut self, control: ToggleControl) -> WireCommand {
        match control {
            ToggleControl::Upper => {
                self.stage = self.stage.toggle_upper();
                self.stage_command()
            }
            ToggleControl::Lower => {
                self.stage = self.stage.toggle_lower();
                self.stage_command()
            }
            ToggleControl::Mode => {
                self.mode = self.mode.toggled();
                WireCommand::Discrete {
                    role: Role::ControlMode,
                    value: self.mode.wire_value(),
                }
            }
        }
    }

    /// Neutralize held extends and reselect both stages on the peripheral,
    /// then pulse the mode channel and restore the mode. The pulse must come
    /// before the restore. A release of a button held across the reset finds
    /// its slot idle and sends nothing more.
    pub fn reset(&mut self) -> Vec<WireCommand> {
        let mut commands = Vec::new();
        for (role, slot) in [
            (Role::ExtendInner, &mut self.inner),
            (Role::ExtendOuter, &mut self.outer),
        ] {
            if *slot != ExtendState::Idle {
                *slot = ExtendState::Idle;
                commands.push(WireCommand::Discrete {
                    role,
                    value: ExtendState::Idle.wire_value(),
                });
            }
        }
        if self.stage != StageSelect::Both {
            self.stage = StageSelect::Both;
            commands.push(self.stage_command());
        }

        commands.extend([
            WireCommand::Discrete {
                role: Role::ControlMode,
                value: MODE_RESET_PULSE,
            },
            WireCommand::Discrete {
                role: Role::ControlMode,
                value: self.mode.wire_value(),
            },
            WireCommand::Axis(AxisCommand::ZERO),
        ]);
        commands
    }

    fn stage_command(&self) -> WireCommand {
        WireCommand::Discrete {
            role: Role::StageSelect,
            value: self.stage.wire_value(),
        }
    }
}
