use anyhow::{bail, Context, Result};
use std::env;
use std::time::Duration;

#[cfg(test)]
use std::collections::HashMap;

use crate::inspect::modem::is_device_id;
use crate::tracker::Thresholds;

/// Audio family override; `Auto` runs USB detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FamilySetting {
    Auto,
    Uac,
    TtyPcm,
}

impl FamilySetting {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Some(FamilySetting::Auto),
            "uac" => Some(FamilySetting::Uac),
            "tty-pcm" | "tty_pcm" | "ttypcm" => Some(FamilySetting::TtyPcm),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // Scheduling
    pub monitor_enabled: bool,
    pub check_interval_ms: u64,

    // Escalation
    pub thresholds: Thresholds,
    pub max_hard_attempts: u32,

    // Modems
    pub modem_ids: Vec<String>,
    pub modem_id_prefix: String,
    pub modem_family: FamilySetting,

    // Operator log sink (append-only)
    pub log_path: String,

    // External commands
    pub command_timeout_secs: u64,
    pub asterisk_bin: String,
    pub asterisk_restart_command: String,
    /// Empty disables the USB reset step of Hard recovery
    pub usb_reset_command: String,

    // Settle delays after corrective actions
    pub soft_delay_secs: u64,
    pub medium_delay_secs: u64,
    pub hard_delay_secs: u64,
    pub asterisk_delay_secs: u64,
    // Rapid AT commands get dropped on UAC hardware
    pub audio_command_delay_ms: u64,

    // WireGuard
    pub wg_enabled: bool,
    pub wg_interface: String,
    pub wg_config_dir: String,
    pub wg_max_recovery_attempts: u32,
    pub wg_handshake_max_age_secs: u64,

    // Health check HTTP server port (optional, disabled if not set)
    // When set, exposes /health, /ready, /status and /metrics endpoints
    pub health_port: Option<u16>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env if present, ignore if missing
        Self::from_getter(|key| env::var(key).ok())
    }

    /// Parse config from a custom getter function (for testing)
    pub fn from_getter<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let number = |key: &str, default: u64| -> Result<u64> {
            match get(key).filter(|s| !s.trim().is_empty()) {
                Some(s) => s
                    .trim()
                    .parse()
                    .with_context(|| format!("{} must be a non-negative integer", key)),
                None => Ok(default),
            }
        };
        let threshold = |key: &str, default: u32| -> Result<u32> {
            let value = number(key, default as u64)?;
            u32::try_from(value).with_context(|| format!("{} is out of range", key))
        };
        let flag = |key: &str, default: bool| -> bool {
            match get(key).map(|s| s.trim().to_ascii_lowercase()) {
                Some(s) if matches!(s.as_str(), "1" | "true" | "yes" | "on") => true,
                Some(s) if matches!(s.as_str(), "0" | "false" | "no" | "off") => false,
                _ => default,
            }
        };

        let modem_family = match get("MODEM_FAMILY") {
            Some(raw) => FamilySetting::parse(&raw)
                .with_context(|| format!("MODEM_FAMILY '{}' must be auto, uac or tty-pcm", raw))?,
            None => FamilySetting::Auto,
        };

        Ok(Config {
            monitor_enabled: flag("MONITOR_ENABLED", true),
            check_interval_ms: number("CHECK_INTERVAL_MS", 30_000)?,

            thresholds: Thresholds {
                soft: threshold("RECOVERY_SOFT_THRESHOLD", 3)?,
                medium: threshold("RECOVERY_MEDIUM_THRESHOLD", 6)?,
                hard: threshold("RECOVERY_HARD_THRESHOLD", 10)?,
            },
            max_hard_attempts: threshold("MAX_HARD_RECOVERY_ATTEMPTS", 3)?,

            modem_ids: get("MODEM_IDS")
                .unwrap_or_else(|| "quectel0".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            modem_id_prefix: get("MODEM_ID_PREFIX").unwrap_or_else(|| "quectel".to_string()),
            modem_family,

            log_path: get("RECOVERY_LOG_PATH")
                .unwrap_or_else(|| "/var/log/modemguard/recovery.log".to_string()),

            command_timeout_secs: number("COMMAND_TIMEOUT_SECS", 10)?,
            asterisk_bin: get("ASTERISK_BIN").unwrap_or_else(|| "asterisk".to_string()),
            asterisk_restart_command: get("ASTERISK_RESTART_COMMAND")
                .unwrap_or_else(|| "systemctl restart asterisk".to_string()),
            usb_reset_command: get("USB_RESET_COMMAND").unwrap_or_else(|| "usbreset".to_string()),

            soft_delay_secs: number("SOFT_RECOVERY_DELAY_SECS", 5)?,
            medium_delay_secs: number("MEDIUM_RECOVERY_DELAY_SECS", 15)?,
            hard_delay_secs: number("HARD_RECOVERY_DELAY_SECS", 20)?,
            asterisk_delay_secs: number("ASTERISK_RECOVERY_DELAY_SECS", 15)?,
            audio_command_delay_ms: number("AUDIO_COMMAND_DELAY_MS", 1000)?,

            wg_enabled: flag("WIREGUARD_ENABLED", false),
            wg_interface: get("WIREGUARD_INTERFACE").unwrap_or_else(|| "wg0".to_string()),
            wg_config_dir: get("WIREGUARD_CONFIG_DIR").unwrap_or_else(|| "/etc/wireguard".to_string()),
            wg_max_recovery_attempts: threshold("WIREGUARD_MAX_RECOVERY_ATTEMPTS", 3)?,
            wg_handshake_max_age_secs: number("WIREGUARD_HANDSHAKE_MAX_AGE_SECS", 180)?,

            health_port: get("HEALTH_PORT").and_then(|s| s.parse().ok()),
        })
    }

    /// Create config from a HashMap (convenience for testing)
    #[cfg(test)]
    pub fn from_map(map: &HashMap<&str, &str>) -> Result<Self> {
        Self::from_getter(|key| map.get(key).map(|v| v.to_string()))
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn audio_command_delay(&self) -> Duration {
        Duration::from_millis(self.audio_command_delay_ms)
    }

    /// Validate configuration values at startup.
    /// Returns Ok(()) if all validations pass, or Err with details of what failed.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.check_interval_ms == 0 {
            errors.push("CHECK_INTERVAL_MS must be greater than 0.".to_string());
        }

        if let Err(e) = self.thresholds.validate() {
            errors.push(e.to_string());
        }

        if self.max_hard_attempts == 0 {
            errors.push("MAX_HARD_RECOVERY_ATTEMPTS must be at least 1.".to_string());
        }

        if self.modem_id_prefix.trim().is_empty() {
            errors.push("MODEM_ID_PREFIX cannot be empty.".to_string());
        }

        for id in &self.modem_ids {
            if let Err(e) = self.check_modem_id(id) {
                errors.push(format!("MODEM_IDS entry {}", e));
            }
        }

        if self.command_timeout_secs == 0 {
            errors.push("COMMAND_TIMEOUT_SECS must be greater than 0.".to_string());
        }

        if self.log_path.trim().is_empty() {
            errors.push("RECOVERY_LOG_PATH cannot be empty.".to_string());
        }

        if self.asterisk_bin.trim().is_empty() {
            errors.push("ASTERISK_BIN cannot be empty.".to_string());
        }

        if self.wg_enabled && !is_interface_name(&self.wg_interface) {
            errors.push(format!(
                "WIREGUARD_INTERFACE '{}' is not a valid interface name.",
                self.wg_interface
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )
        }
    }

    /// Accept a device id only if it is safe to splice into an engine command
    pub fn check_modem_id(&self, id: &str) -> Result<()> {
        if !is_device_id(id, &self.modem_id_prefix) {
            bail!(
                "'{}' must start with '{}' and contain only [A-Za-z0-9_-].",
                id,
                self.modem_id_prefix
            );
        }
        Ok(())
    }
}

/// Linux interface names: 1-15 chars, no whitespace or slashes
fn is_interface_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 15
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_map(&HashMap::new()).expect("defaults should parse");

        assert!(config.monitor_enabled);
        assert_eq!(config.check_interval_ms, 30_000);
        assert_eq!(config.thresholds, Thresholds { soft: 3, medium: 6, hard: 10 });
        assert_eq!(config.max_hard_attempts, 3);
        assert_eq!(config.modem_ids, vec!["quectel0"]);
        assert_eq!(config.modem_family, FamilySetting::Auto);
        assert_eq!(config.soft_delay_secs, 5);
        assert_eq!(config.medium_delay_secs, 15);
        assert_eq!(config.hard_delay_secs, 20);
        assert_eq!(config.audio_command_delay(), Duration::from_secs(1));
        assert!(!config.wg_enabled);
        assert_eq!(config.wg_max_recovery_attempts, 3);
        assert!(config.health_port.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_modem_ids_list() {
        let mut env = HashMap::new();
        env.insert("MODEM_IDS", " quectel0, quectel-1 ,,quectel2");
        let config = Config::from_map(&env).expect("should parse");
        assert_eq!(config.modem_ids, vec!["quectel0", "quectel-1", "quectel2"]);
    }

    #[test]
    fn test_custom_thresholds() {
        let mut env = HashMap::new();
        env.insert("RECOVERY_SOFT_THRESHOLD", "2");
        env.insert("RECOVERY_MEDIUM_THRESHOLD", "4");
        env.insert("RECOVERY_HARD_THRESHOLD", "8");
        let config = Config::from_map(&env).expect("should parse");
        assert_eq!(config.thresholds, Thresholds { soft: 2, medium: 4, hard: 8 });
    }

    #[test]
    fn test_invalid_number_mentions_key() {
        let mut env = HashMap::new();
        env.insert("CHECK_INTERVAL_MS", "soon");
        let err = Config::from_map(&env).unwrap_err().to_string();
        assert!(err.contains("CHECK_INTERVAL_MS"), "error should mention key: {}", err);
    }

    #[test]
    fn test_threshold_overflow_rejected() {
        let mut env = HashMap::new();
        env.insert("RECOVERY_HARD_THRESHOLD", "99999999999");
        assert!(Config::from_map(&env).is_err());
    }

    #[test]
    fn test_modem_family_values() {
        for (raw, expected) in [
            ("auto", FamilySetting::Auto),
            ("UAC", FamilySetting::Uac),
            ("tty-pcm", FamilySetting::TtyPcm),
        ] {
            let mut env = HashMap::new();
            env.insert("MODEM_FAMILY", raw);
            assert_eq!(Config::from_map(&env).unwrap().modem_family, expected);
        }

        let mut env = HashMap::new();
        env.insert("MODEM_FAMILY", "huawei");
        let err = Config::from_map(&env).unwrap_err().to_string();
        assert!(err.contains("MODEM_FAMILY"));
    }

    #[test]
    fn test_flags() {
        let mut env = HashMap::new();
        env.insert("MONITOR_ENABLED", "off");
        env.insert("WIREGUARD_ENABLED", "yes");
        let config = Config::from_map(&env).unwrap();
        assert!(!config.monitor_enabled);
        assert!(config.wg_enabled);
    }

    #[test]
    fn test_validation_rejects_unordered_thresholds() {
        let mut env = HashMap::new();
        env.insert("RECOVERY_SOFT_THRESHOLD", "6");
        env.insert("RECOVERY_MEDIUM_THRESHOLD", "6");
        let config = Config::from_map(&env).unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("soft < medium < hard"), "unexpected error: {}", err);
    }

    #[test]
    fn test_validation_rejects_bad_modem_id() {
        let mut env = HashMap::new();
        env.insert("MODEM_IDS", "quectel0,dongle1,quectel;reboot");
        let config = Config::from_map(&env).unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("dongle1"));
        assert!(err.contains("quectel;reboot"));
        assert!(!err.contains("'quectel0'"));
    }

    #[test]
    fn test_check_modem_id() {
        let config = Config::from_map(&HashMap::new()).unwrap();
        assert!(config.check_modem_id("quectel0").is_ok());
        assert!(config.check_modem_id("quectel-b_2").is_ok());
        for id in ["quectel0;reboot", "quectel0 $(id)", "dongle0", "", "quectel0`id`"] {
            let err = config.check_modem_id(id).expect_err(id).to_string();
            assert!(err.contains("'quectel'"), "{}", err);
        }
    }

    #[test]
    fn test_validation_zero_interval() {
        let mut env = HashMap::new();
        env.insert("CHECK_INTERVAL_MS", "0");
        let config = Config::from_map(&env).unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("CHECK_INTERVAL_MS"));
    }

    #[test]
    fn test_validation_bad_interface_only_when_enabled() {
        let mut env = HashMap::new();
        env.insert("WIREGUARD_INTERFACE", "wg 0; reboot");
        let config = Config::from_map(&env).unwrap();
        assert!(config.validate().is_ok());

        env.insert("WIREGUARD_ENABLED", "true");
        let config = Config::from_map(&env).unwrap();
        assert!(config.validate().unwrap_err().to_string().contains("WIREGUARD_INTERFACE"));
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut env = HashMap::new();
        env.insert("CHECK_INTERVAL_MS", "0");
        env.insert("COMMAND_TIMEOUT_SECS", "0");
        env.insert("MAX_HARD_RECOVERY_ATTEMPTS", "0");
        let err = Config::from_map(&env).unwrap().validate().unwrap_err().to_string();
        assert!(err.contains("CHECK_INTERVAL_MS"));
        assert!(err.contains("COMMAND_TIMEOUT_SECS"));
        assert!(err.contains("MAX_HARD_RECOVERY_ATTEMPTS"));
    }
}
