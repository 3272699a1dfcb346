pub mod actions;
pub mod audio;

pub use actions::{HardReset, RecoveryExecutor};
pub use audio::{AudioConfigurator, AudioOutcome, ModemFamily};
