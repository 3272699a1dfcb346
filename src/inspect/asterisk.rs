//! Telephony engine liveness

use tracing::debug;

use crate::executor::{CommandError, EngineCli};

/// Product marker expected in the version banner
pub const PRODUCT_MARKER: &str = "Asterisk";

/// Liveness command issued to the engine
pub const VERSION_COMMAND: &str = "core show version";

/// Remote console errors that still exit 0
const CONSOLE_ERRORS: [&str; 2] = ["Unable to connect to remote asterisk", "No such command"];

/// Healthy iff the command ran, reported no console error and names the product
pub fn is_alive(result: &Result<String, CommandError>) -> bool {
    match result {
        Ok(output) => {
            output.contains(PRODUCT_MARKER) && !CONSOLE_ERRORS.iter().any(|e| output.contains(e))
        }
        Err(_) => false,
    }
}

#[derive(Clone)]
pub struct AsteriskInspector {
    cli: EngineCli,
}

impl AsteriskInspector {
    pub fn new(cli: EngineCli) -> Self {
        Self { cli }
    }

    pub async fn check(&self) -> bool {
        let result = self.cli.rx(VERSION_COMMAND).await;
        if let Err(e) = &result {
            debug!("Engine liveness command failed: {}", e);
        }
        is_alive(&result)
    }
}
