pub mod actuator;
pub mod control;
pub mod joystick;
pub mod models;
pub mod settings;
