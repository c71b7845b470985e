use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::infrastructure::bluetooth::protocol;

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
    "colibri-link".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Transport tunables. The defaults match the wallet firmware's contract;
/// overrides mainly exist for bench setups against test peripherals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSettings {
    #[serde(default = "default_scan_duration_ms")]
    pub scan_duration_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
    #[serde(default = "default_requested_mtu")]
    pub requested_mtu: u16,
    #[serde(default = "default_max_response_size")]
    pub max_response_size: usize,

    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            scan_duration_ms: default_scan_duration_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
            requested_mtu: default_requested_mtu(),
            max_response_size: default_max_response_size(),
            log_settings: LogSettings::default(),
        }
    }
}

fn default_scan_duration_ms() -> u64 {
    protocol::SCAN_DURATION.as_millis() as u64
}
fn default_connect_timeout_ms() -> u64 {
    protocol::CONNECT_TIMEOUT.as_millis() as u64
}
fn default_rpc_timeout_ms() -> u64 {
    protocol::RPC_TIMEOUT.as_millis() as u64
}
fn default_requested_mtu() -> u16 {
    protocol::REQUESTED_MTU
}
fn default_max_response_size() -> usize {
    protocol::MAX_RESPONSE_SIZE
}

impl LinkSettings {
    pub fn scan_duration(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.scan_duration_ms)
    }

    pub fn connect_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn rpc_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.rpc_timeout_ms)
    }
}

pub struct SettingsService {
    settings: LinkSettings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();

        Ok(Self {
            settings,
            settings_path,
        })
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("colibri-link");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &PathBuf) -> anyhow::Result<LinkSettings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &LinkSettings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut LinkSettings {
        &mut self.settings
    }
}
