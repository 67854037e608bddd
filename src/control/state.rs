use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::info;

use crate::control::keyboard::{Key, KeyListener};
use crate::network::core::handle::RecvInterrupt;
use crate::network::stats::{StatsCollector, StatsReport};

/// Upper bound on waiting for the key listener during shutdown.
pub const LISTENER_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Default, Clone, Copy)]
struct Flags {
    throttling_enabled: bool,
    shutting_down: bool,
}

/// Operator-controlled flags shared by the capture loop and the key
/// listener. Throttling starts disabled.
///
/// While a capture is running it registers its receive interrupt here, so a
/// shutdown request wakes a loop that is waiting for traffic.
#[derive(Debug)]
pub struct ControlState {
    flags: Mutex<Flags>,
    recv_interrupt: Mutex<Option<RecvInterrupt>>,
    target_label: String,
    toggle_key: Key,
}

impl ControlState {
    /// `target_label` and `toggle_key` only feed the toggle notice.
    pub fn new(target_label: impl Into<String>, toggle_key: Key) -> Self {
        Self {
            flags: Mutex::new(Flags::default()),
            recv_interrupt: Mutex::new(None),
            target_label: target_label.into(),
            toggle_key,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Flags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Flips throttling and returns the new value.
    pub fn toggle(&self) -> bool {
        let mut flags = self.lock();
        flags.throttling_enabled = !flags.throttling_enabled;
        let enabled = flags.throttling_enabled;

        let status = if enabled { "ENABLED" } else { "DISABLED" };
        info!(
            "Throttling {} - Press {} to toggle",
            status,
            self.toggle_key.to_string().to_uppercase()
        );
        if enabled {
            info!("{} will now be throttled", self.target_label);
        } else {
            info!("{} throttling removed", self.target_label);
        }
        enabled
    }

    pub fn is_throttling_enabled(&self) -> bool {
        self.lock().throttling_enabled
    }

    /// Asks every loop to wind down and wakes a blocked capture receive.
    /// Returns `true` for the first request.
    pub fn request_shutdown(&self) -> bool {
        let first = {
            let mut flags = self.lock();
            let first = !flags.shutting_down;
            flags.shutting_down = true;
            first
        };
        if let Some(interrupt) = self.current_interrupt() {
            interrupt.fire();
        }
        first
    }

    fn current_interrupt(&self) -> Option<RecvInterrupt> {
        self.recv_interrupt
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Registers the receive interrupt of the capture that is about to run.
    /// Fires it right away if shutdown was already requested.
    pub fn attach_recv_interrupt(&self, interrupt: RecvInterrupt) {
        *self
            .recv_interrupt
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(interrupt.clone());
        if self.is_shutting_down() {
            interrupt.fire();
        }
    }

    pub fn detach_recv_interrupt(&self) {
        self.recv_interrupt
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }
}

/// Owns the run-wide control objects and performs the one-time teardown.
pub struct ControlPlane {
    state: Arc<ControlState>,
    stats: Arc<StatsCollector>,
    listener: Mutex<Option<KeyListener>>,
    finalized: AtomicBool,
}

impl ControlPlane {
    pub fn new(state: Arc<ControlState>, stats: Arc<StatsCollector>) -> Self {
        Self {
            state,
            stats,
            listener: Mutex::new(None),
            finalized: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> &Arc<ControlState> {
        &self.state
    }

    pub fn stats(&self) -> &Arc<StatsCollector> {
        &self.stats
    }

    /// Hands the key listener over so `shutdown` can stop it.
    pub fn attach_listener(&self, listener: KeyListener) {
        let mut slot = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(listener);
    }

    pub fn request_shutdown(&self) {
        if self.state.request_shutdown() {
            info!("Shutdown requested");
        }
    }

    /// Stops the listener and logs the final statistics.
    ///
    /// Only the first call does anything and returns the final report;
    /// every later call returns `None`.
    pub fn shutdown(&self) -> Option<StatsReport> {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return None;
        }

        info!("Initiating shutdown...");
        self.state.request_shutdown();

        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut listener) = listener {
            listener.stop(LISTENER_JOIN_TIMEOUT);
        }

        let report = self.stats.report();
        report.log_final();
        info!("Shutdown complete");
        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::keyboard::ScriptedKeySource;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn plane() -> ControlPlane {
        ControlPlane::new(
            Arc::new(ControlState::new("game", Key::F(1))),
            Arc::new(StatsCollector::new()),
        )
    }

    #[test]
    fn test_throttling_starts_disabled() {
        let state = ControlState::new("game", Key::F(1));
        assert!(!state.is_throttling_enabled());
        assert!(!state.is_shutting_down());
    }

    #[test]
    fn test_toggle_twice_restores_state() {
        let state = ControlState::new("game", Key::F(1));

        assert!(state.toggle());
        assert!(state.is_throttling_enabled());
        assert!(!state.toggle());
        assert!(!state.is_throttling_enabled());
    }

    #[test]
    fn test_concurrent_toggles_are_serialized() {
        let state = Arc::new(ControlState::new("game", Key::F(1)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let state = Arc::clone(&state);
                thread::spawn(move || {
                    for _ in 0..100 {
                        state.toggle();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // 800 flips in total
        assert!(!state.is_throttling_enabled());
    }

    #[test]
    fn test_request_shutdown_reports_first_call() {
        let state = ControlState::new("game", Key::F(1));
        assert!(state.request_shutdown());
        assert!(!state.request_shutdown());
        assert!(state.is_shutting_down());
    }

    #[test]
    fn test_shutdown_request_fires_recv_interrupt() {
        let state = ControlState::new("game", Key::F(1));
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        state.attach_recv_interrupt(RecvInterrupt::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        state.request_shutdown();
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        state.detach_recv_interrupt();
        state.request_shutdown();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_interrupt_attached_after_shutdown_fires_at_once() {
        let state = ControlState::new("game", Key::F(1));
        state.request_shutdown();

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        state.attach_recv_interrupt(RecvInterrupt::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let plane = plane();
        plane.stats().record_processed();

        let first = plane.shutdown();
        let second = plane.shutdown();

        assert_eq!(first.map(|r| r.processed), Some(1));
        assert!(second.is_none());
        assert!(plane.state().is_shutting_down());
    }

    #[test]
    fn test_shutdown_stops_listener() {
        let plane = plane();
        let listener = KeyListener::start(
            ScriptedKeySource::new(vec![]),
            HashMap::new(),
            Arc::clone(plane.state()),
        )
        .unwrap();
        plane.attach_listener(listener);

        assert!(plane.shutdown().is_some());
        assert!(plane.listener.lock().unwrap().is_none());
    }

    #[test]
    fn test_request_shutdown_does_not_finalize() {
        let plane = plane();
        plane.request_shutdown();

        assert!(plane.state().is_shutting_down());
        assert!(plane.shutdown().is_some());
    }
}
