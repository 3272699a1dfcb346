//! Corrective actions
//!
//! Each action blocks the calling cycle until its settle delay has passed.
//! Command failures are logged and swallowed: the caller has already
//! counted the attempt, so a consistently failing action still escalates.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use super::audio::{find_modem_usb_id, AudioConfigurator};
use crate::config::Config;
use crate::executor::{CommandError, EngineCli};
use crate::inspect::modem::DEVICE_COMMAND_PREFIX;
use crate::inspect::{AsteriskInspector, ModemInspector};
use crate::recovery_log::RecoveryLog;
use crate::tunnel::TunnelProvider;

/// How a Hard recovery reset the hardware
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HardReset {
    UsbReset(String),
    ServiceRestart,
}

pub struct RecoveryExecutor {
    config: Arc<Config>,
    cli: EngineCli,
    modems: ModemInspector,
    asterisk: AsteriskInspector,
    audio: AudioConfigurator,
    log: Arc<RecoveryLog>,
}

impl RecoveryExecutor {
    pub fn new(
        config: Arc<Config>,
        cli: EngineCli,
        modems: ModemInspector,
        asterisk: AsteriskInspector,
        audio: AudioConfigurator,
        log: Arc<RecoveryLog>,
    ) -> Self {
        Self {
            config,
            cli,
            modems,
            asterisk,
            audio,
            log,
        }
    }

    pub fn audio(&self) -> &AudioConfigurator {
        &self.audio
    }

    fn report(&self, what: &str, result: &Result<String, CommandError>) -> bool {
        match result {
            Ok(_) => true,
            Err(e) if !e.is_delivery_failure() => {
                self.log.warning(format!("{} returned an error: {}", what, e));
                true
            }
            Err(e) => {
                self.log.error(format!("{} failed: {}", what, e));
                false
            }
        }
    }

    async fn restart_engine(&self) -> bool {
        let result = self.cli.shell(&self.config.asterisk_restart_command).await;
        self.report("Asterisk restart", &result)
    }

    /// Reconfigure audio on every known modem; outcomes are logged by the configurator
    async fn configure_all(&self) {
        let (ids, _) = self.modems.known_ids(&self.config.modem_ids).await;
        for id in &ids {
            self.audio.configure(id, &self.log).await;
        }
    }

    /// Restart a single device, settle, reconfigure its audio
    pub async fn soft(&self, modem_id: &str) -> bool {
        self.log.info(format!("Soft recovery: restarting device {}", modem_id));
        let result = self
            .cli
            .rx(&format!("{} restart now {}", DEVICE_COMMAND_PREFIX, modem_id))
            .await;
        let delivered = self.report(&format!("Device restart of {}", modem_id), &result);

        sleep(Duration::from_secs(self.config.soft_delay_secs)).await;
        self.audio.configure(modem_id, &self.log).await;

        if delivered {
            self.log.info(format!("Soft recovery of {} completed", modem_id));
        }
        delivered
    }

    /// Restart the telephony engine, settle, reconfigure every modem
    pub async fn medium(&self, modem_id: &str) -> bool {
        self.log.info(format!("Medium recovery for {}: restarting Asterisk", modem_id));
        let delivered = self.restart_engine().await;

        sleep(Duration::from_secs(self.config.medium_delay_secs)).await;
        self.configure_all().await;

        if delivered {
            self.log.info(format!("Medium recovery for {} completed", modem_id));
        }
        delivered
    }

    /// Best-effort USB reset (engine restart if unavailable), settle, reconfigure every modem
    pub async fn hard(&self, modem_id: &str) -> HardReset {
        self.log.info(format!("Hard recovery for {}: resetting USB", modem_id));

        let reset = match self.usb_reset().await {
            Some(usb_id) => HardReset::UsbReset(usb_id),
            None => {
                self.log.warning("USB reset unavailable, falling back to Asterisk restart");
                self.restart_engine().await;
                HardReset::ServiceRestart
            }
        };

        sleep(Duration::from_secs(self.config.hard_delay_secs)).await;
        self.configure_all().await;

        self.log.info(format!("Hard recovery for {} completed", modem_id));
        reset
    }

    async fn usb_reset(&self) -> Option<String> {
        let tool = self.config.usb_reset_command.trim();
        if tool.is_empty() {
            return None;
        }

        let usb_id = match self.cli.shell("lsusb").await {
            Ok(output) => find_modem_usb_id(&output)?,
            Err(e) => {
                self.log.warning(format!("lsusb failed: {}", e));
                return None;
            }
        };

        match self.cli.shell(&format!("{} {}", tool, usb_id)).await {
            Ok(_) => {
                self.log.info(format!("USB device {} reset", usb_id));
                Some(usb_id)
            }
            Err(e) => {
                self.log.warning(format!("USB reset of {} failed: {}", usb_id, e));
                None
            }
        }
    }

    /// Restart the engine, settle, re-check. Returns whether it came back.
    pub async fn recover_asterisk(&self) -> bool {
        self.log.info("Restarting Asterisk");
        self.restart_engine().await;

        sleep(Duration::from_secs(self.config.asterisk_delay_secs)).await;

        if self.asterisk.check().await {
            self.log.ok("Asterisk recovered after restart");
            true
        } else {
            self.log.error("Asterisk still not responding after restart");
            false
        }
    }

    pub async fn reconnect_tunnel(&self, provider: &dyn TunnelProvider) -> bool {
        self.log.info(format!("Reconnecting WireGuard tunnel {}", self.config.wg_interface));
        match provider.reconnect().await {
            Ok(()) => {
                self.log.info("WireGuard reconnect issued");
                true
            }
            Err(e) => {
                self.log.error(format!("WireGuard reconnect failed: {:#}", e));
                false
            }
        }
    }
}
