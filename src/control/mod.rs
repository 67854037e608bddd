//! Operator control: the throttling toggle, shutdown and global hotkeys.

pub mod keyboard;
pub mod state;

pub use keyboard::{Key, KeyCallback, KeyEvent, KeyListener, KeyParseError, KeySource};
#[cfg(windows)]
pub use keyboard::AsyncKeyStateSource;
pub use state::{ControlPlane, ControlState};
