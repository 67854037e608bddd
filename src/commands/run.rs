//! The `run` command: resolve the target, open the capture and shape until
//! the operator exits.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use log::{error, info, warn};

use crate::control::keyboard::{Key, KeyCallback};
use crate::control::state::{ControlPlane, ControlState};
use crate::error::{Result, ThrottlerError};
use crate::network::core::clock::Clock;
use crate::network::core::handle::{CaptureBackend, CaptureHandle, HandleConfig};
use crate::network::core::{restore_timer_resolution, set_high_precision_timer};
use crate::network::modules::{
    AdaptiveRateLimiter, DropPolicy, RateGovernor, RateLimiter, DEFAULT_WINDOW,
};
use crate::network::processing::ShapingPipeline;
use crate::network::stats::StatsCollector;
use crate::network::utils::{open_with_escalation, FilterBuilder};
use crate::settings::{Settings, SettingsBuilder};
use crate::target::{SystemProcessSource, TargetDescriptor, TargetResolver};
use crate::utils::{check_windivert_files, ensure_admin_privileges};

/// Command-line overrides for the configuration file.
#[derive(Debug, Default, Clone, Args)]
pub struct RunArgs {
    /// Case-insensitive substring of the target process name
    #[arg(long = "process", short = 'p', id = "process")]
    pub process: Option<String>,

    /// Target bandwidth in Mbps
    #[arg(long = "bandwidth", short = 'b', id = "bandwidth")]
    pub bandwidth_mbps: Option<f64>,

    /// Fixed delay added to every throttled packet, in ms
    #[arg(long = "delay", short = 'd', id = "delay")]
    pub lag_delay_ms: Option<u64>,

    /// Probability (0.0 to 1.0) of dropping a throttled packet
    #[arg(long = "drop-rate", id = "drop-rate")]
    pub drop_rate: Option<f64>,

    /// Lower the bandwidth automatically while the link is saturated
    #[arg(long = "adaptive", id = "adaptive")]
    pub adaptive: bool,

    #[arg(long = "toggle-key", id = "toggle-key")]
    pub toggle_key: Option<String>,

    #[arg(long = "exit-key", id = "exit-key")]
    pub exit_key: Option<String>,

    /// Packets between status lines
    #[arg(long = "status-interval", id = "status-interval")]
    pub status_update_interval: Option<u64>,

    #[arg(long = "log-level", id = "log-level")]
    pub log_level: Option<String>,

    #[arg(long = "log-file", id = "log-file")]
    pub log_file: Option<PathBuf>,
}

impl RunArgs {
    /// Layers the flags that were given on top of `builder`.
    pub fn apply(&self, mut builder: SettingsBuilder) -> SettingsBuilder {
        if let Some(process) = &self.process {
            builder = builder.process(process.clone());
        }
        if let Some(mbps) = self.bandwidth_mbps {
            builder = builder.bandwidth_mbps(mbps);
        }
        if let Some(delay) = self.lag_delay_ms {
            builder = builder.lag_delay_ms(delay);
        }
        if let Some(rate) = self.drop_rate {
            builder = builder.drop_rate(rate);
        }
        if self.adaptive {
            builder = builder.adaptive(true);
        }
        if let Some(key) = &self.toggle_key {
            builder = builder.toggle_key(key.clone());
        }
        if let Some(key) = &self.exit_key {
            builder = builder.exit_key(key.clone());
        }
        if let Some(interval) = self.status_update_interval {
            builder = builder.status_update_interval(interval);
        }
        if let Some(level) = &self.log_level {
            builder = builder.log_level(level.clone());
        }
        if let Some(path) = &self.log_file {
            builder = builder.log_file(path.clone());
        }
        builder
    }
}

/// Runs a full throttling session with validated `settings`.
///
/// Whatever happens, the final statistics are emitted and the timer
/// resolution is restored before returning.
pub fn execute(settings: &Settings) -> Result<()> {
    ensure_admin_privileges()?;
    info!("Starting netthrottle: {}", settings);

    let state = Arc::new(ControlState::new(
        settings.target.process_name_substring.clone(),
        settings.toggle_key()?,
    ));
    let plane = ControlPlane::new(Arc::clone(&state), Arc::new(StatsCollector::new()));
    install_interrupt_handler(Arc::clone(&state));

    let result = run_session(settings, &plane);
    if let Err(e) = &result {
        error!("{}", e);
        if let ThrottlerError::TargetNotFound(_) = e {
            error!(
                "Make sure {} is running and try again.",
                settings.target.process_name_substring
            );
        } else if e.is_capture_failure() {
            log_troubleshooting();
        }
    }

    plane.shutdown();
    restore_timer_resolution();
    result
}

fn run_session(settings: &Settings, plane: &ControlPlane) -> Result<()> {
    let resolver = TargetResolver::new(SystemProcessSource::new());
    let target = resolver.resolve(&settings.target.process_name_substring)?;

    start_hotkeys(settings, plane)?;
    set_high_precision_timer();

    capture(settings, &target, plane)
}

#[cfg(windows)]
fn capture(settings: &Settings, target: &TargetDescriptor, plane: &ControlPlane) -> Result<()> {
    use crate::network::core::{SystemClock, WinDivertBackend};

    shape(
        settings,
        &WinDivertBackend::new(),
        target,
        plane,
        Arc::new(SystemClock),
    )
}

#[cfg(not(windows))]
fn capture(_settings: &Settings, _target: &TargetDescriptor, _plane: &ControlPlane) -> Result<()> {
    use crate::network::core::CaptureError;

    Err(CaptureError::Unsupported(
        "packet capture needs the WinDivert driver, which is only available on Windows".into(),
    )
    .into())
}

/// Opens the capture for `target` and runs the pipeline until shutdown or
/// the end of the stream. The handle is closed on every path.
#[cfg_attr(not(windows), allow(dead_code))]
pub(crate) fn shape<B: CaptureBackend>(
    settings: &Settings,
    backend: &B,
    target: &TargetDescriptor,
    plane: &ControlPlane,
    clock: Arc<dyn Clock>,
) -> Result<()> {
    let mut pipeline = build_pipeline(settings, plane, clock)?;

    let builder = FilterBuilder::new(
        settings.target.port_range_start,
        settings.target.port_range_end,
    );
    let (mut handle, filter) =
        open_with_escalation(backend, &builder, &target.ports, &HandleConfig::default())?;
    info!(
        "Shaping {} (PID {}) with {} filter: {}",
        target.process_name,
        target.process_id,
        filter.kind(),
        filter
    );

    let result = pipeline.run(&mut handle);
    if let Err(e) = handle.close() {
        warn!("Failed to close capture handle: {}", e);
    }
    result
}

pub(crate) fn build_governor(
    settings: &Settings,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn RateGovernor>> {
    let limiter = RateLimiter::with_clock(settings.max_bytes_per_second(), DEFAULT_WINDOW, clock)?;

    if settings.bandwidth.adaptive {
        let adaptive = AdaptiveRateLimiter::new(limiter, settings.bandwidth.adaptation_factor)?;
        Ok(Arc::new(adaptive))
    } else {
        Ok(Arc::new(limiter))
    }
}

fn build_pipeline(
    settings: &Settings,
    plane: &ControlPlane,
    clock: Arc<dyn Clock>,
) -> Result<ShapingPipeline> {
    let governor = build_governor(settings, Arc::clone(&clock))?;

    Ok(ShapingPipeline::new(
        governor,
        Arc::clone(plane.state()),
        Arc::clone(plane.stats()),
    )
    .with_lag(settings.delay.lag_delay(), clock)
    .with_drop_policy(DropPolicy::new(settings.drop.packet_drop_rate))
    .with_status_interval(settings.controls.status_update_interval))
}

/// Toggle flips throttling, exit requests shutdown.
fn hotkey_callbacks(toggle: Key, exit: Key, state: &Arc<ControlState>) -> HashMap<Key, KeyCallback> {
    let mut callbacks: HashMap<Key, KeyCallback> = HashMap::new();

    let toggler = Arc::clone(state);
    callbacks.insert(
        toggle,
        Box::new(move || {
            toggler.toggle();
        }),
    );

    let stopper = Arc::clone(state);
    callbacks.insert(
        exit,
        Box::new(move || {
            if stopper.request_shutdown() {
                info!("Exit key pressed, shutting down...");
            }
        }),
    );

    callbacks
}

fn start_hotkeys(settings: &Settings, plane: &ControlPlane) -> Result<()> {
    let toggle = settings.toggle_key()?;
    let exit = settings.exit_key()?;
    let callbacks = hotkey_callbacks(toggle, exit, plane.state());

    #[cfg(windows)]
    {
        use crate::control::keyboard::{AsyncKeyStateSource, KeyListener};

        let source = AsyncKeyStateSource::new([toggle, exit]);
        let listener = KeyListener::start(source, callbacks, Arc::clone(plane.state()))?;
        plane.attach_listener(listener);

        info!("Press {} to toggle throttling ON/OFF", toggle);
        info!("Press {} to exit", exit);
    }

    #[cfg(not(windows))]
    {
        drop(callbacks);
        warn!("Global hotkeys are only available on Windows; press Ctrl+C to exit");
    }

    Ok(())
}

fn install_interrupt_handler(state: Arc<ControlState>) {
    let result = ctrlc::set_handler(move || {
        if state.request_shutdown() {
            info!("Interrupted, shutting down...");
        }
    });

    if let Err(e) = result {
        warn!("Failed to install Ctrl+C handler: {}", e);
    }
}

fn log_troubleshooting() {
    error!("Troubleshooting:");
    error!("1. Make sure you're running as administrator");
    if !check_windivert_files() {
        error!("2. WinDivert.dll and WinDivert64.sys must be next to the executable");
    } else {
        error!("2. WinDivert files are present; check they match the executable's architecture");
    }
    error!("3. Try restarting the target process and running again");
    error!("4. Check Windows Defender/antivirus settings");
    error!("5. Ensure no other packet capture tools are running");
    error!("6. Try reducing the number of target ports if the filter is too complex");
}
