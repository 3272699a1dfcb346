//! Site-to-site tunnel provider
//!
//! The supervisor only needs three facts about the tunnel and one lever to
//! pull. [`TunnelProvider`] is that seam; [`WireGuardProvider`] backs it
//! with `wg` and `wg-quick`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::Config;
use crate::executor::CommandExecutor;
use crate::inspect::wireguard::has_recent_handshake;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TunnelStatus {
    pub enabled: bool,
    pub configured: bool,
    pub connected: bool,
}

#[async_trait]
pub trait TunnelProvider: Send + Sync {
    async fn status(&self) -> Result<TunnelStatus>;
    async fn reconnect(&self) -> Result<()>;
}

/// WireGuard via the `wg` / `wg-quick` tools
pub struct WireGuardProvider {
    executor: Arc<dyn CommandExecutor>,
    enabled: bool,
    iface: String,
    config_dir: PathBuf,
    handshake_max_age_secs: i64,
    timeout: Duration,
}

impl WireGuardProvider {
    pub fn new(config: &Config, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            executor,
            enabled: config.wg_enabled,
            iface: config.wg_interface.clone(),
            config_dir: PathBuf::from(&config.wg_config_dir),
            handshake_max_age_secs: config.wg_handshake_max_age_secs as i64,
            timeout: config.command_timeout(),
        }
    }

    fn config_file(&self) -> PathBuf {
        self.config_dir.join(format!("{}.conf", self.iface))
    }
}

#[async_trait]
impl TunnelProvider for WireGuardProvider {
    async fn status(&self) -> Result<TunnelStatus> {
        if !self.enabled {
            return Ok(TunnelStatus::default());
        }

        let configured = tokio::fs::try_exists(self.config_file())
            .await
            .with_context(|| format!("Failed to stat {}", self.config_file().display()))?;

        let connected = if configured {
            match self
                .executor
                .run(&format!("wg show {} latest-handshakes", self.iface), self.timeout)
                .await
            {
                Ok(output) => {
                    has_recent_handshake(&output, chrono::Utc::now().timestamp(), self.handshake_max_age_secs)
                }
                Err(e) => {
                    debug!("wg show {} failed: {}", self.iface, e);
                    false
                }
            }
        } else {
            false
        };

        Ok(TunnelStatus {
            enabled: true,
            configured,
            connected,
        })
    }

    async fn reconnect(&self) -> Result<()> {
        info!("Reconnecting WireGuard interface {}", self.iface);
        // Interface may already be down
        let _ = self
            .executor
            .run(&format!("wg-quick down {}", self.iface), self.timeout)
            .await;
        self.executor
            .run(&format!("wg-quick up {}", self.iface), self.timeout)
            .await
            .with_context(|| format!("wg-quick up {} failed", self.iface))?;
        Ok(())
    }
}
