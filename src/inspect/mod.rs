pub mod asterisk;
pub mod modem;
pub mod wireguard;

pub use asterisk::AsteriskInspector;
pub use modem::{ModemHealth, ModemInspector, ModemState};
pub use wireguard::InterfaceInspector;
