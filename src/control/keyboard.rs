//! Global hotkeys.
//!
//! A [`KeySource`] produces raw key transitions; the [`KeyListener`] runs it
//! on a dedicated thread and invokes the registered callback when a bound
//! key goes down.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use thiserror::Error;

use crate::control::state::ControlState;
use crate::error::Result;

/// How long the listener waits for an event before re-checking its stop flag.
pub const LISTENER_POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// A key that can be bound to an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    /// Function keys F1..=F24
    F(u8),
    Escape,
    /// A letter (stored lowercase) or a digit
    Char(char),
    Space,
    Enter,
    Tab,
    Insert,
    Delete,
    Home,
    End,
    PageUp,
    PageDown,
    Pause,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown key name '{0}'")]
pub struct KeyParseError(pub String);

impl FromStr for Key {
    type Err = KeyParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        let key = match name.as_str() {
            "esc" | "escape" => Key::Escape,
            "space" => Key::Space,
            "enter" | "return" => Key::Enter,
            "tab" => Key::Tab,
            "insert" | "ins" => Key::Insert,
            "delete" | "del" => Key::Delete,
            "home" => Key::Home,
            "end" => Key::End,
            "pageup" | "page up" | "pgup" => Key::PageUp,
            "pagedown" | "page down" | "pgdn" => Key::PageDown,
            "pause" => Key::Pause,
            other => {
                if let Some(number) = other.strip_prefix('f').and_then(|n| n.parse::<u8>().ok()) {
                    if (1..=24).contains(&number) {
                        return Ok(Key::F(number));
                    }
                    return Err(KeyParseError(s.to_string()));
                }

                let mut chars = other.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) if c.is_ascii_alphanumeric() => Key::Char(c),
                    _ => return Err(KeyParseError(s.to_string())),
                }
            }
        };
        Ok(key)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::F(n) => write!(f, "f{}", n),
            Key::Escape => write!(f, "esc"),
            Key::Char(c) => write!(f, "{}", c),
            Key::Space => write!(f, "space"),
            Key::Enter => write!(f, "enter"),
            Key::Tab => write!(f, "tab"),
            Key::Insert => write!(f, "insert"),
            Key::Delete => write!(f, "delete"),
            Key::Home => write!(f, "home"),
            Key::End => write!(f, "end"),
            Key::PageUp => write!(f, "pageup"),
            Key::PageDown => write!(f, "pagedown"),
            Key::Pause => write!(f, "pause"),
        }
    }
}

impl Key {
    /// Win32 virtual-key code.
    pub fn virtual_key_code(&self) -> i32 {
        match self {
            Key::F(n) => 0x70 + i32::from(*n) - 1,
            Key::Escape => 0x1B,
            Key::Char(c) => c.to_ascii_uppercase() as i32,
            Key::Space => 0x20,
            Key::Enter => 0x0D,
            Key::Tab => 0x09,
            Key::Insert => 0x2D,
            Key::Delete => 0x2E,
            Key::Home => 0x24,
            Key::End => 0x23,
            Key::PageUp => 0x21,
            Key::PageDown => 0x22,
            Key::Pause => 0x13,
        }
    }
}

/// A key transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: Key,
    pub is_down: bool,
}

impl KeyEvent {
    pub fn down(key: Key) -> Self {
        Self { key, is_down: true }
    }

    pub fn up(key: Key) -> Self {
        Self { key, is_down: false }
    }
}

/// Source of global key events.
pub trait KeySource: Send {
    /// Waits up to `timeout` for the next transition.
    ///
    /// `Ok(None)` means nothing happened within the timeout.
    fn next_event(&mut self, timeout: Duration) -> Result<Option<KeyEvent>>;
}

/// Polls `GetAsyncKeyState` for a fixed set of keys.
#[cfg(windows)]
pub struct AsyncKeyStateSource {
    keys: Vec<Key>,
    pressed: std::collections::HashSet<Key>,
    pending: std::collections::VecDeque<KeyEvent>,
    poll_interval: Duration,
}

#[cfg(windows)]
impl AsyncKeyStateSource {
    pub fn new(keys: impl IntoIterator<Item = Key>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
            pressed: Default::default(),
            pending: Default::default(),
            poll_interval: Duration::from_millis(15),
        }
    }

    fn poll(&mut self) {
        use winapi::um::winuser::GetAsyncKeyState;

        for key in &self.keys {
            // High bit set: the key is currently down.
            let state = unsafe { GetAsyncKeyState(key.virtual_key_code()) } as u16;
            let is_down = state & 0x8000 != 0;

            let was_down = self.pressed.contains(key);
            if is_down && !was_down {
                self.pressed.insert(*key);
                self.pending.push_back(KeyEvent::down(*key));
            } else if !is_down && was_down {
                self.pressed.remove(key);
                self.pending.push_back(KeyEvent::up(*key));
            }
        }
    }
}

#[cfg(windows)]
impl KeySource for AsyncKeyStateSource {
    fn next_event(&mut self, timeout: Duration) -> Result<Option<KeyEvent>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            self.poll();
            if !self.pending.is_empty() {
                continue;
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(self.poll_interval);
        }
    }
}

/// Replays a fixed list of events, then stays quiet.
#[cfg(test)]
pub struct ScriptedKeySource {
    events: std::collections::VecDeque<KeyEvent>,
}

#[cfg(test)]
impl ScriptedKeySource {
    pub fn new(events: Vec<KeyEvent>) -> Self {
        Self {
            events: events.into(),
        }
    }
}

#[cfg(test)]
impl KeySource for ScriptedKeySource {
    fn next_event(&mut self, timeout: Duration) -> Result<Option<KeyEvent>> {
        match self.events.pop_front() {
            Some(event) => Ok(Some(event)),
            None => {
                thread::sleep(timeout.min(Duration::from_millis(5)));
                Ok(None)
            }
        }
    }
}

pub type KeyCallback = Box<dyn Fn() + Send + Sync>;

/// Background thread dispatching key-down events to callbacks.
///
/// The thread exits when [`KeyListener::stop`] is called or as soon as a
/// shutdown has been requested on the shared [`ControlState`].
pub struct KeyListener {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl KeyListener {
    pub fn start<S>(
        mut source: S,
        callbacks: HashMap<Key, KeyCallback>,
        state: Arc<ControlState>,
    ) -> Result<Self>
    where
        S: KeySource + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        let thread = thread::Builder::new()
            .name("key-listener".into())
            .spawn(move || {
                while !thread_stop.load(Ordering::SeqCst) && !state.is_shutting_down() {
                    match source.next_event(LISTENER_POLL_TIMEOUT) {
                        Ok(Some(event)) if event.is_down => {
                            if let Some(callback) = callbacks.get(&event.key) {
                                debug!("Hotkey {} pressed", event.key);
                                callback();
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!("Keyboard error: {}", e);
                            thread::sleep(LISTENER_POLL_TIMEOUT);
                        }
                    }
                }
                debug!("Key listener thread exiting");
            })?;

        info!("Keyboard handler started");
        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Signals the thread and waits up to `timeout` for it to exit.
    ///
    /// Returns `false` if the thread was still running when the timeout
    /// expired; it is detached in that case.
    pub fn stop(&mut self, timeout: Duration) -> bool {
        self.stop.store(true, Ordering::SeqCst);

        let Some(thread) = self.thread.take() else {
            return true;
        };

        let deadline = Instant::now() + timeout;
        while !thread.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        let finished = thread.is_finished();
        if finished {
            if thread.join().is_err() {
                error!("Key listener thread panicked");
            }
            info!("Keyboard handler stopped");
        } else {
            warn!("Key listener did not stop within {:?}", timeout);
        }
        finished
    }
}

impl Drop for KeyListener {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}
