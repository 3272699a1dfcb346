/// WireGuard tunnel inspection
/// Pure parsers over `wg show` and `ip link show` output.

use tracing::debug;

use crate::executor::EngineCli;

/// Whether `ip link show <iface>` output describes the interface
pub fn interface_present(output: &str, iface: &str) -> bool {
    if iface.is_empty() || output.contains("does not exist") {
        return false;
    }
    // Header line looks like: "5: wg0: <POINTOPOINT,NOARP,UP,LOWER_UP> mtu 1420 ..."
    output.lines().any(|line| {
        line.split(':')
            .nth(1)
            .map(|name| name.trim() == iface)
            .unwrap_or(false)
    })
}

/// Whether any peer in `wg show <iface> latest-handshakes` output handshook recently.
/// Each line is `<public key>\t<unix seconds>`; zero means never.
pub fn has_recent_handshake(output: &str, now_epoch: i64, max_age_secs: i64) -> bool {
    output.lines().any(|line| {
        line.split_whitespace()
            .nth(1)
            .and_then(|ts| ts.parse::<i64>().ok())
            .map(|ts| ts > 0 && now_epoch.saturating_sub(ts) <= max_age_secs)
            .unwrap_or(false)
    })
}

/// Checks that the tunnel's network interface exists
#[derive(Clone)]
pub struct InterfaceInspector {
    cli: EngineCli,
    iface: String,
}

impl InterfaceInspector {
    pub fn new(cli: EngineCli, iface: impl Into<String>) -> Self {
        Self {
            cli,
            iface: iface.into(),
        }
    }

    pub async fn interface_exists(&self) -> bool {
        match self.cli.shell(&format!("ip link show {}", self.iface)).await {
            Ok(output) => interface_present(&output, &self.iface),
            Err(e) => {
                debug!("Interface {} lookup failed: {}", self.iface, e);
                false
            }
        }
    }
}
