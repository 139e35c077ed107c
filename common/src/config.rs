use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, profile::DeviceProfile};

/// Placeholder written into fresh configs so an unprovisioned device is
/// distinguishable from one with an intentionally empty field.
pub const UNSET_PLACEHOLDER: &str = "CHANGE_ME";

pub const DEFAULT_BOARD: &str = "adafruit_feather_esp32s2";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CycleConfig {
    pub request_timeout_secs: u32,
    pub default_refresh_secs: u32,
    pub low_battery_percent: i32,
    pub battery_attempts: u8,
    pub battery_retry_delay_ms: u64,
    pub watchdog_timeout_secs: u32,
    pub always_render: bool,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 10,
            default_refresh_secs: 15 * 60,
            low_battery_percent: 5,
            battery_attempts: 5,
            battery_retry_delay_ms: 1_000,
            watchdog_timeout_secs: 60,
            always_render: false,
        }
    }
}

impl CycleConfig {
    pub fn sanitize(&mut self) {
        self.request_timeout_secs = self.request_timeout_secs.clamp(1, 50);
        self.low_battery_percent = self.low_battery_percent.clamp(0, 50);
        self.battery_attempts = self.battery_attempts.clamp(1, 10);
        self.battery_retry_delay_ms = self.battery_retry_delay_ms.min(5_000);
        self.watchdog_timeout_secs = self.watchdog_timeout_secs.clamp(15, 120);

        // A request may take at most half of one watchdog period.
        self.request_timeout_secs = self
            .request_timeout_secs
            .min(self.watchdog_timeout_secs / 2);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub image_server_base_url: String,
}

impl NetworkConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if is_unset(&self.wifi_ssid) {
            return Err(ConfigError::MissingWifiSsid);
        }

        let url = self.image_server_base_url.trim();
        if is_unset(url) {
            return Err(ConfigError::MissingBaseUrl);
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidBaseUrl(url.to_string()));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub network: NetworkConfig,
    #[serde(default)]
    pub cycle: CycleConfig,
    #[serde(default = "default_board")]
    pub board: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            cycle: CycleConfig::default(),
            board: default_board(),
        }
    }
}

impl RuntimeConfig {
    /// Checks everything a cycle needs before it may start and resolves the
    /// board profile.
    pub fn validate(&mut self) -> Result<DeviceProfile, ConfigError> {
        self.cycle.sanitize();
        self.network.validate()?;
        DeviceProfile::lookup(&self.board)
            .ok_or_else(|| ConfigError::UnknownBoard(self.board.clone()))
    }
}

fn default_board() -> String {
    DEFAULT_BOARD.to_string()
}

fn is_unset(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || value == UNSET_PLACEHOLDER
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> RuntimeConfig {
        RuntimeConfig {
            network: NetworkConfig {
                wifi_ssid: "frame-net".to_string(),
                wifi_pass: "hunter22".to_string(),
                image_server_base_url: "http://10.0.0.5:8080/frame/".to_string(),
            },
            ..Default::default()
        }
    }

    #[test]
    fn missing_credentials_are_fatal() {
        let mut runtime = configured();
        runtime.network.wifi_ssid = UNSET_PLACEHOLDER.to_string();
        assert_eq!(runtime.validate().unwrap_err(), ConfigError::MissingWifiSsid);

        let mut runtime = configured();
        runtime.network.image_server_base_url = "  ".to_string();
        assert_eq!(runtime.validate().unwrap_err(), ConfigError::MissingBaseUrl);
    }

    #[test]
    fn open_network_needs_no_password() {
        let mut runtime = configured();
        runtime.network.wifi_pass.clear();
        assert!(runtime.validate().is_ok());
    }

    #[test]
    fn rejects_base_url_without_scheme() {
        let mut runtime = configured();
        runtime.network.image_server_base_url = "10.0.0.5/frame/".to_string();
        assert_eq!(
            runtime.validate().unwrap_err(),
            ConfigError::InvalidBaseUrl("10.0.0.5/frame/".to_string())
        );
    }

    #[test]
    fn unknown_board_is_fatal() {
        let mut runtime = configured();
        runtime.board = "pyportal".to_string();
        assert_eq!(
            runtime.validate().unwrap_err(),
            ConfigError::UnknownBoard("pyportal".to_string())
        );
    }

    #[test]
    fn request_timeout_stays_inside_watchdog_period() {
        let mut cycle = CycleConfig {
            request_timeout_secs: 45,
            watchdog_timeout_secs: 30,
            ..Default::default()
        };
        cycle.sanitize();
        assert_eq!(cycle.request_timeout_secs, 15);

        let mut cycle = CycleConfig {
            request_timeout_secs: 50,
            watchdog_timeout_secs: 60,
            ..Default::default()
        };
        cycle.sanitize();
        assert_eq!(cycle.request_timeout_secs, 30);
    }

    #[test]
    fn runtime_json_without_cycle_section_uses_defaults() {
        let json = r#"{"network":{"wifi_ssid":"a","wifi_pass":"","image_server_base_url":"http://x/"}}"#;
        let runtime: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(runtime.cycle, CycleConfig::default());
        assert_eq!(runtime.board, DEFAULT_BOARD);
    }
}
