use crate::domain::control::{self, ProtocolGeneration, ProtocolIds, Role};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "actuator_remote".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_settings: LogSettings,

    // Protocol
    #[serde(default)]
    pub protocol_generation: ProtocolGeneration,
    /// 0 turns the heartbeat off (event-driven sends only)
    #[serde(default = "default_heartbeat_period_ms")]
    pub heartbeat_period_ms: u64,

    // Input
    #[serde(default = "default_false")]
    pub invert_y: bool,
    #[serde(default = "default_joystick_radius")]
    pub joystick_radius: f32,

    // Advanced BLE Settings
    #[serde(default = "default_service_uuid")]
    pub ble_service_uuid: String,
    #[serde(default = "default_axis_x_uuid")]
    pub ble_axis_x_char_uuid: String,
    #[serde(default = "default_axis_y_uuid")]
    pub ble_axis_y_char_uuid: String,
    #[serde(default = "default_extend_inner_uuid")]
    pub ble_extend_inner_char_uuid: String,
    #[serde(default = "default_extend_outer_uuid")]
    pub ble_extend_outer_char_uuid: String,
    #[serde(default = "default_control_mode_uuid")]
    pub ble_control_mode_char_uuid: String,
    #[serde(default = "default_stage_select_uuid")]
    pub ble_stage_select_char_uuid: String,
    #[serde(default = "default_false")]
    pub scan_show_all_devices: bool,

    // Simulator
    #[serde(default = "default_false")]
    pub use_simulator: bool,
    #[serde(default = "default_simulator_name")]
    pub simulator_device_name: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            protocol_generation: ProtocolGeneration::default(),
            heartbeat_period_ms: default_heartbeat_period_ms(),
            invert_y: default_false(),
            joystick_radius: default_joystick_radius(),
            ble_service_uuid: default_service_uuid(),
            ble_axis_x_char_uuid: default_axis_x_uuid(),
            ble_axis_y_char_uuid: default_axis_y_uuid(),
            ble_extend_inner_char_uuid: default_extend_inner_uuid(),
            ble_extend_outer_char_uuid: default_extend_outer_uuid(),
            ble_control_mode_char_uuid: default_control_mode_uuid(),
            ble_stage_select_char_uuid: default_stage_select_uuid(),
            scan_show_all_devices: default_false(),
            use_simulator: default_false(),
            simulator_device_name: default_simulator_name(),
        }
    }
}

impl Settings {
    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_millis(self.heartbeat_period_ms)
    }

    /// Parse the configured identifiers
    pub fn protocol_ids(&self) -> anyhow::Result<ProtocolIds> {
        let parse = |value: &str, what: &str| {
            Uuid::parse_str(value)
                .map_err(|e| anyhow::anyhow!("Invalid {} UUID {:?}: {}", what, value, e))
        };

        Ok(ProtocolIds {
            service: parse(&self.ble_service_uuid, "service")?,
            characteristics: [
                (Role::AxisX, parse(&self.ble_axis_x_char_uuid, "axis X")?),
                (Role::AxisY, parse(&self.ble_axis_y_char_uuid, "axis Y")?),
                (
                    Role::ExtendInner,
                    parse(&self.ble_extend_inner_char_uuid, "extend inner")?,
                ),
                (
                    Role::ExtendOuter,
                    parse(&self.ble_extend_outer_char_uuid, "extend outer")?,
                ),
                (
                    Role::ControlMode,
                    parse(&self.ble_control_mode_char_uuid, "control mode")?,
                ),
                (
                    Role::StageSelect,
                    parse(&self.ble_stage_select_char_uuid, "stage select")?,
                ),
            ],
        })
    }
}

fn default_heartbeat_period_ms() -> u64 {
    5000
}
fn default_joystick_radius() -> f32 {
    100.0
}
fn default_service_uuid() -> String {
    control::SERVICE_UUID.to_string()
}
fn default_axis_x_uuid() -> String {
    control::AXIS_X_CHAR_UUID.to_string()
}
fn default_axis_y_uuid() -> String {
    control::AXIS_Y_CHAR_UUID.to_string()
}
fn default_extend_inner_uuid() -> String {
    control::EXTEND_INNER_CHAR_UUID.to_string()
}
fn default_extend_outer_uuid() -> String {
    control::EXTEND_OUTER_CHAR_UUID.to_string()
}
fn default_control_mode_uuid() -> String {
    control::CONTROL_MODE_CHAR_UUID.to_string()
}
fn default_stage_select_uuid() -> String {
    control::STAGE_SELECT_CHAR_UUID.to_string()
}
fn default_simulator_name() -> String {
    "Actuator Remote (simulated)".to_string()
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::open(settings_path))
    }

    /// Load from `path`, falling back to defaults and writing them out on first run
    pub fn open(settings_path: PathBuf) -> Self {
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                if settings_path.exists() {
                    eprintln!(
                        "Ignoring unreadable settings at {}: {}",
                        settings_path.display(),
                        e
                    );
                }
                Settings::default()
            }
        };

        let service = Self {
            settings,
            settings_path,
        };
        if !service.settings_path.exists() {
            if let Err(e) = service.save() {
                eprintln!("Could not write default settings: {}", e);
            }
        }
        service
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("ActuatorRemote");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }
}
