/// GSM modem inspection
/// Enumerates devices and reads per-device state from the telephony engine CLI.
///
/// Parsing is line-oriented `Key: Value`. Anything missing or unparseable
/// falls back to the least favourable value so a garbled reply reads as
/// unhealthy rather than silently ok.

use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

use crate::executor::EngineCli;

/// Channel driver command prefix for the modem CLI
pub const DEVICE_COMMAND_PREFIX: &str = "quectel";

/// Maximum digits taken from an RSSI field (guards against overflow)
const MAX_RSSI_DIGITS: usize = 6;

/// Modem call state as reported by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModemState {
    Free,
    Ring,
    Dialing,
    Unknown,
    /// Any state string the supervisor does not recognise
    Other(String),
}

impl ModemState {
    pub fn parse(raw: &str) -> Self {
        let value = raw.trim();
        if value.is_empty() {
            return ModemState::Unknown;
        }
        match value.to_ascii_lowercase().as_str() {
            "free" => ModemState::Free,
            "ring" => ModemState::Ring,
            "dialing" => ModemState::Dialing,
            "unknown" => ModemState::Unknown,
            _ => ModemState::Other(value.to_string()),
        }
    }

    /// States in which the device can carry a call
    pub fn is_operational(&self) -> bool {
        matches!(self, ModemState::Free | ModemState::Ring | ModemState::Dialing)
    }
}

impl fmt::Display for ModemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModemState::Free => write!(f, "Free"),
            ModemState::Ring => write!(f, "Ring"),
            ModemState::Dialing => write!(f, "Dialing"),
            ModemState::Unknown => write!(f, "Unknown"),
            ModemState::Other(s) => write!(f, "{}", s),
        }
    }
}

/// Health of a single modem, re-derived every tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModemHealth {
    pub id: String,
    pub state: ModemState,
    pub registered: bool,
    pub rssi: u32,
}

impl ModemHealth {
    /// Least favourable reading for a modem we could not inspect
    pub fn unreachable(id: &str) -> Self {
        Self {
            id: id.to_string(),
            state: ModemState::Unknown,
            registered: false,
            rssi: 0,
        }
    }

    pub fn ok(&self) -> bool {
        self.state.is_operational() && self.registered && self.rssi > 0
    }
}

/// Parse a `device state` reply into a [`ModemHealth`]
pub fn parse_device_state(id: &str, output: &str) -> ModemHealth {
    let mut health = ModemHealth::unreachable(id);
    let mut seen_state = false;
    let mut seen_registration = false;
    let mut seen_rssi = false;

    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "State" if !seen_state => {
                health.state = ModemState::parse(value);
                seen_state = true;
            }
            "GSM Registration Status" if !seen_registration => {
                health.registered = is_registered(value);
                seen_registration = true;
            }
            "RSSI" if !seen_rssi => {
                health.rssi = extract_number(value).unwrap_or(0);
                seen_rssi = true;
            }
            _ => {}
        }
    }

    health
}

/// `Registered, home network` counts, `Not Registered` does not
pub fn is_registered(value: &str) -> bool {
    let value = value.trim();
    value.contains("Registered") && !value.to_ascii_lowercase().starts_with("not")
}

/// First run of ASCII digits in `value`, e.g. `"23, -67 dBm"` gives 23
pub fn extract_number(value: &str) -> Option<u32> {
    let digits: String = value
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .take(MAX_RSSI_DIGITS)
        .collect();
    digits.parse().ok()
}

/// Whether `token` looks like a device id: `<prefix>` followed by `[A-Za-z0-9_-]*`
pub fn is_device_id(token: &str, prefix: &str) -> bool {
    !prefix.is_empty()
        && token.starts_with(prefix)
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Extract device ids from a `show devices` table (first column), in order, deduplicated
pub fn parse_device_list(output: &str, prefix: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for line in output.lines() {
        if let Some(token) = line.split_whitespace().next() {
            if is_device_id(token, prefix) && !ids.iter().any(|id| id == token) {
                ids.push(token.to_string());
            }
        }
    }
    ids
}

/// Reads modem state through the engine CLI
#[derive(Clone)]
pub struct ModemInspector {
    cli: EngineCli,
    id_prefix: String,
}

impl ModemInspector {
    pub fn new(cli: EngineCli, id_prefix: impl Into<String>) -> Self {
        Self {
            cli,
            id_prefix: id_prefix.into(),
        }
    }

    /// Live device enumeration; empty when the engine is unreachable
    pub async fn enumerate(&self) -> Vec<String> {
        match self.cli.rx(&format!("{} show devices", DEVICE_COMMAND_PREFIX)).await {
            Ok(output) => parse_device_list(&output, &self.id_prefix),
            Err(e) => {
                debug!("Device enumeration failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Live enumeration, falling back to the static list when nothing is found.
    /// Returns the ids and whether they came from the live engine.
    pub async fn known_ids(&self, fallback: &[String]) -> (Vec<String>, bool) {
        let live = self.enumerate().await;
        if live.is_empty() {
            (fallback.to_vec(), false)
        } else {
            (live, true)
        }
    }

    pub async fn inspect(&self, id: &str) -> ModemHealth {
        let command = format!("{} show device state {}", DEVICE_COMMAND_PREFIX, id);
        match self.cli.rx(&command).await {
            Ok(output) => parse_device_state(id, &output),
            Err(e) => {
                warn!("Modem {} inspection failed: {}", id, e);
                ModemHealth::unreachable(id)
            }
        }
    }
}
