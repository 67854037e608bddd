//! Windows timer resolution.
//!
//! The default scheduler tick on Windows is ~15.6 ms, far too coarse for
//! millisecond latency simulation. Raising the resolution for the duration
//! of a run makes the pipeline's sleeps land close to their target.

#[cfg(windows)]
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(windows)]
use log::{info, warn};

/// Timer resolution requested while shaping, in milliseconds.
#[cfg(windows)]
const TIMER_RESOLUTION_MS: u32 = 1;

#[cfg(windows)]
static TIMER_RESOLUTION_SET: AtomicBool = AtomicBool::new(false);

#[cfg(windows)]
#[link(name = "winmm")]
extern "system" {
    fn timeBeginPeriod(uPeriod: u32) -> u32;
    fn timeEndPeriod(uPeriod: u32) -> u32;
}

/// Raises the system timer resolution until [`restore_timer_resolution`].
#[cfg(windows)]
pub fn set_high_precision_timer() {
    if TIMER_RESOLUTION_SET.load(Ordering::SeqCst) {
        return;
    }
    let result = unsafe { timeBeginPeriod(TIMER_RESOLUTION_MS) };
    if result == 0 {
        info!("Set Windows timer resolution to {}ms", TIMER_RESOLUTION_MS);
        TIMER_RESOLUTION_SET.store(true, Ordering::SeqCst);
    } else {
        warn!("Failed to set high-precision timer: {}", result);
    }
}

/// Restores the timer resolution raised by [`set_high_precision_timer`].
#[cfg(windows)]
pub fn restore_timer_resolution() {
    if TIMER_RESOLUTION_SET.swap(false, Ordering::SeqCst) {
        unsafe {
            timeEndPeriod(TIMER_RESOLUTION_MS);
        }
        info!("Restored Windows timer resolution");
    }
}

#[cfg(not(windows))]
pub fn set_high_precision_timer() {}

#[cfg(not(windows))]
pub fn restore_timer_resolution() {}
