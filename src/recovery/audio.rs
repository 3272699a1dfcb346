/// Modem audio configuration
/// AT-command sequences differ by hardware family:
/// - UAC-capable (Quectel): audio over USB, must be reapplied after every
///   modem reset; needs a pause between commands or the module drops them
/// - TTY-PCM (SIMCom, Huawei): PCM over the audio tty, gain/format only
///
/// Per-command failures are logged and skipped; a partially configured
/// modem beats an unconfigured one.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::sleep;
use tracing::debug;

use crate::config::FamilySetting;
use crate::executor::EngineCli;
use crate::inspect::modem::DEVICE_COMMAND_PREFIX;
use crate::recovery_log::RecoveryLog;

/// USB vendor ids of UAC-capable modules
pub const UAC_VENDORS: [&str; 1] = ["2c7c"];
/// USB vendor ids of TTY-PCM modules
pub const TTY_PCM_VENDORS: [&str; 2] = ["1e0e", "12d1"];

/// UAC setup: audio mode select, voice routing, echo cancellation
pub const UAC_COMMANDS: [&str; 3] = ["AT+QAUDMOD=3", "AT+QPCMV=1,2", "AT+QEEC=0,1"];
pub const UAC_READBACK_COMMAND: &str = "AT+QPCMV?";
pub const UAC_EXPECTED_READBACK: &str = "+QPCMV: 1,2";

/// TTY-PCM setup: PCM frame format, mic gain, output gain, speaker volume
pub const TTY_PCM_COMMANDS: [&str; 4] = ["AT+CPCMFRM=1", "AT+CMICGAIN=0", "AT+COUTGAIN=5", "AT+CLVL=3"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModemFamily {
    Uac,
    TtyPcm,
}

impl fmt::Display for ModemFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModemFamily::Uac => write!(f, "UAC"),
            ModemFamily::TtyPcm => write!(f, "TTY-PCM"),
        }
    }
}

/// Match `lsusb` output against known vendor ids; None when inconclusive
pub fn detect_family(lsusb_output: &str) -> Option<ModemFamily> {
    for line in lsusb_output.lines() {
        // "Bus 001 Device 004: ID 2c7c:0125 Quectel Wireless Solutions Co., Ltd. EC25 LTE modem"
        let Some(usb_id) = line
            .split_whitespace()
            .skip_while(|token| *token != "ID")
            .nth(1)
        else {
            continue;
        };
        let vendor = usb_id.split(':').next().unwrap_or("").to_ascii_lowercase();
        if UAC_VENDORS.contains(&vendor.as_str()) {
            return Some(ModemFamily::Uac);
        }
        if TTY_PCM_VENDORS.contains(&vendor.as_str()) {
            return Some(ModemFamily::TtyPcm);
        }
    }
    None
}

/// `vid:pid` of the first known modem in `lsusb` output
pub fn find_modem_usb_id(lsusb_output: &str) -> Option<String> {
    lsusb_output.lines().find_map(|line| {
        let usb_id = line
            .split_whitespace()
            .skip_while(|token| *token != "ID")
            .nth(1)?;
        let vendor = usb_id.split(':').next()?.to_ascii_lowercase();
        let known = UAC_VENDORS.contains(&vendor.as_str()) || TTY_PCM_VENDORS.contains(&vendor.as_str());
        known.then(|| usb_id.to_ascii_lowercase())
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioOutcome {
    pub modem_id: String,
    pub family: ModemFamily,
    pub commands_sent: usize,
    pub commands_failed: usize,
    /// Read-back result; None for families without verification
    pub verified: Option<bool>,
}

pub struct AudioConfigurator {
    cli: EngineCli,
    setting: FamilySetting,
    command_delay: Duration,
    family: OnceCell<ModemFamily>,
}

impl AudioConfigurator {
    pub fn new(cli: EngineCli, setting: FamilySetting, command_delay: Duration) -> Self {
        Self {
            cli,
            setting,
            command_delay,
            family: OnceCell::new(),
        }
    }

    /// Hardware family, detected on first use and cached
    pub async fn family(&self, log: &RecoveryLog) -> ModemFamily {
        *self
            .family
            .get_or_init(|| async {
                match self.setting {
                    FamilySetting::Uac => ModemFamily::Uac,
                    FamilySetting::TtyPcm => ModemFamily::TtyPcm,
                    FamilySetting::Auto => self.detect(log).await,
                }
            })
            .await
    }

    async fn detect(&self, log: &RecoveryLog) -> ModemFamily {
        let detected = match self.cli.shell("lsusb").await {
            Ok(output) => detect_family(&output),
            Err(e) => {
                debug!("lsusb failed: {}", e);
                None
            }
        };
        match detected {
            Some(family) => {
                log.info(format!("Detected {} modem family", family));
                family
            }
            None => {
                // UAC commands are harmless no-ops on TTY-PCM hardware
                log.warning("Modem family detection inconclusive, assuming UAC");
                ModemFamily::Uac
            }
        }
    }

    fn at_command(modem_id: &str, at: &str) -> String {
        format!("{} cmd {} {}", DEVICE_COMMAND_PREFIX, modem_id, at)
    }

    pub async fn configure(&self, modem_id: &str, log: &RecoveryLog) -> AudioOutcome {
        let family = self.family(log).await;
        log.info(format!("Configuring {} audio for {}", family, modem_id));

        let (commands, delay): (&[&str], Option<Duration>) = match family {
            ModemFamily::Uac => (&UAC_COMMANDS, Some(self.command_delay)),
            ModemFamily::TtyPcm => (&TTY_PCM_COMMANDS, None),
        };

        let mut outcome = AudioOutcome {
            modem_id: modem_id.to_string(),
            family,
            commands_sent: 0,
            commands_failed: 0,
            verified: None,
        };

        for at in commands {
            outcome.commands_sent += 1;
            if let Err(e) = self.cli.rx(&Self::at_command(modem_id, at)).await {
                outcome.commands_failed += 1;
                log.error(format!("{} on {} failed: {}", at, modem_id, e));
            }
            if let Some(delay) = delay {
                sleep(delay).await;
            }
        }

        if family == ModemFamily::Uac {
            let verified = match self.cli.rx(&Self::at_command(modem_id, UAC_READBACK_COMMAND)).await {
                Ok(output) => output.contains(UAC_EXPECTED_READBACK),
                Err(e) => {
                    debug!("Audio read-back on {} failed: {}", modem_id, e);
                    false
                }
            };
            if verified {
                log.ok(format!("UAC audio mode verified on {}", modem_id));
            } else {
                log.warning(format!(
                    "UAC audio mode not confirmed on {} (expected {})",
                    modem_id, UAC_EXPECTED_READBACK
                ));
            }
            outcome.verified = Some(verified);
        }

        outcome
    }
}
