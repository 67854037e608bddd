//! WinDivert capture backend.
//!
//! Interception runs on a dedicated receive thread that owns the diverting
//! handle and forwards packets over a channel. Re-injection goes through a
//! second handle opened with a filter that matches nothing. Packets the
//! pipeline never sends back are dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use log::{debug, error, info, warn};
use windivert::error::WinDivertError;
use windivert::layer::NetworkLayer;
use windivert::packet::WinDivertPacket;
use windivert::{CloseAction, WinDivert};
use windivert_sys::{WinDivertFlags, WinDivertParam};

use crate::network::core::handle::{
    CaptureBackend, CaptureError, CaptureHandle, HandleConfig, RecvInterrupt, RECV_BUFFER_SIZE,
};
use crate::network::core::packet_data::CapturedPacket;

type Packet = WinDivertPacket<'static, NetworkLayer>;

impl CapturedPacket for WinDivertPacket<'_, NetworkLayer> {
    fn data(&self) -> &[u8] {
        &self.data[..]
    }
}

/// Messages from the receive thread (and the interrupt) to the pipeline.
enum Incoming {
    Packet(Packet),
    Failed(CaptureError),
    Interrupted,
}

/// Opens WinDivert network-layer handles.
#[derive(Debug, Default, Clone, Copy)]
pub struct WinDivertBackend;

impl WinDivertBackend {
    pub fn new() -> Self {
        Self
    }
}

impl CaptureBackend for WinDivertBackend {
    type Handle = WinDivertHandle;

    fn open(&self, config: &HandleConfig) -> Result<WinDivertHandle, CaptureError> {
        flush_wfp_cache();

        let mut injector =
            WinDivert::<NetworkLayer>::network("false", config.priority, WinDivertFlags::new())
                .map_err(|e| {
                    error!("Failed to open WinDivert injection handle: {}", e);
                    CaptureError::Open(e.to_string())
                })?;

        info!("Opening WinDivert handle with filter: {}", config.filter);

        let (incoming, events, stop) = match start_receiver(config) {
            Ok(channel) => channel,
            Err(e) => {
                let _ = injector.close(CloseAction::Nothing);
                flush_wfp_cache();
                return Err(e);
            }
        };
        debug!("WinDivert handle opened successfully");

        Ok(WinDivertHandle {
            injector: Some(injector),
            incoming,
            waker: Arc::new(Mutex::new(events)),
            stop,
            interrupted: Arc::new(AtomicBool::new(false)),
        })
    }
}

/// Spawns the receive thread and waits until it has opened the diverting
/// handle, so filter errors surface from `open`.
fn start_receiver(
    config: &HandleConfig,
) -> Result<(Receiver<Incoming>, Sender<Incoming>, Arc<AtomicBool>), CaptureError> {
    let (events, incoming) = mpsc::channel();
    let (ready_tx, ready_rx) = mpsc::channel();
    let stop = Arc::new(AtomicBool::new(false));

    let thread_config = config.clone();
    let thread_events = events.clone();
    let thread_stop = Arc::clone(&stop);
    thread::Builder::new()
        .name("capture-recv".into())
        .spawn(move || receive_loop(&thread_config, &thread_events, &thread_stop, &ready_tx))
        .map_err(|e| CaptureError::Open(format!("failed to start receive thread: {}", e)))?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok((incoming, events, stop)),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(CaptureError::Open(
            "receive thread exited before opening the handle".into(),
        )),
    }
}

fn open_intercept(config: &HandleConfig) -> Result<WinDivert<NetworkLayer>, CaptureError> {
    match WinDivert::<NetworkLayer>::network(&config.filter, config.priority, WinDivertFlags::new()) {
        Ok(mut handle) => {
            // The pipeline sleeps per packet; give the driver room to queue behind it.
            if let Err(e) = handle.set_param(WinDivertParam::QueueLength, config.queue_length) {
                warn!("Failed to set WinDivert queue length: {}", e);
            }
            if let Err(e) = handle.set_param(WinDivertParam::QueueTime, config.queue_time_ms) {
                warn!("Failed to set WinDivert queue time: {}", e);
            }
            Ok(handle)
        }
        Err(e) => {
            error!("Failed to open WinDivert handle: {}", e);
            debug!("WinDivert error detailed: {:?}", e);
            Err(classify_open_error(&e))
        }
    }
}

/// Owns the diverting handle. Exits after a receive failure, once the
/// pipeline hangs up, or at the first packet after `stop` is set; that
/// last packet is re-injected so nothing is lost on the way out.
fn receive_loop(
    config: &HandleConfig,
    events: &Sender<Incoming>,
    stop: &AtomicBool,
    ready: &Sender<Result<(), CaptureError>>,
) {
    let mut handle = match open_intercept(config) {
        Ok(handle) => {
            let _ = ready.send(Ok(()));
            handle
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    let mut buffer = vec![0u8; RECV_BUFFER_SIZE];
    loop {
        let result = handle.recv(Some(&mut buffer[..])).map(|p| p.into_owned());

        if stop.load(Ordering::SeqCst) {
            if let Ok(packet) = &result {
                if let Err(e) = handle.send(packet) {
                    warn!("Failed to re-inject packet while stopping: {}", e);
                }
            }
            break;
        }

        let event = match result {
            Ok(packet) => Incoming::Packet(packet),
            Err(e) => Incoming::Failed(CaptureError::Recv(e.to_string())),
        };
        let failed = matches!(event, Incoming::Failed(_));
        if events.send(event).is_err() || failed {
            break;
        }
    }

    debug!("Closing packet receiving WinDivert handle");
    if let Err(e) = handle.close(CloseAction::Nothing) {
        error!("Failed to close WinDivert handle: {}", e);
    }
}

/// WinDivert reports an unparsable or oversized filter as an invalid
/// parameter; everything else is a plain open failure.
fn classify_open_error(error: &WinDivertError) -> CaptureError {
    let text = format!("{} {:?}", error, error).to_lowercase();
    if text.contains("parameter") || text.contains("filter") {
        CaptureError::FilterRejected(error.to_string())
    } else {
        CaptureError::Open(error.to_string())
    }
}

/// An open capture: the receive thread's channel plus the injection handle.
pub struct WinDivertHandle {
    injector: Option<WinDivert<NetworkLayer>>,
    incoming: Receiver<Incoming>,
    waker: Arc<Mutex<Sender<Incoming>>>,
    stop: Arc<AtomicBool>,
    interrupted: Arc<AtomicBool>,
}

impl CaptureHandle for WinDivertHandle {
    type Packet = Packet;

    fn recv(&mut self) -> Result<Option<Packet>, CaptureError> {
        if self.injector.is_none() || self.interrupted.load(Ordering::SeqCst) {
            return Ok(None);
        }

        match self.incoming.recv() {
            Ok(Incoming::Packet(packet)) => Ok(Some(packet)),
            Ok(Incoming::Failed(e)) => Err(e),
            Ok(Incoming::Interrupted) | Err(_) => Ok(None),
        }
    }

    fn send(&mut self, packet: &Packet) -> Result<(), CaptureError> {
        let Some(injector) = self.injector.as_ref() else {
            return Err(CaptureError::Send("handle is closed".into()));
        };

        injector
            .send(packet)
            .map(|_| ())
            .map_err(|e| CaptureError::Send(e.to_string()))
    }

    /// Stops the receive thread at its next packet and closes the injection
    /// handle. The thread may still be waiting in the driver when this
    /// returns; it releases the diverting handle itself.
    fn close(&mut self) -> Result<(), CaptureError> {
        self.stop.store(true, Ordering::SeqCst);

        if let Some(mut injector) = self.injector.take() {
            debug!("Closing WinDivert injection handle");
            injector
                .close(CloseAction::Nothing)
                .map_err(|e| CaptureError::Close(e.to_string()))?;
            flush_wfp_cache();
        }
        Ok(())
    }

    fn recv_interrupt(&self) -> RecvInterrupt {
        let waker = Arc::clone(&self.waker);
        let stop = Arc::clone(&self.stop);
        let interrupted = Arc::clone(&self.interrupted);

        RecvInterrupt::new(move || {
            if interrupted.swap(true, Ordering::SeqCst) {
                return;
            }
            stop.store(true, Ordering::SeqCst);
            let waker = waker.lock().unwrap_or_else(PoisonError::into_inner);
            let _ = waker.send(Incoming::Interrupted);
        })
    }
}

impl Drop for WinDivertHandle {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("Error closing WinDivert handle on drop: {}", e);
        }
    }
}

/// Flushes the Windows Filtering Platform (WFP) cache.
///
/// Opens and immediately closes a handle with a no-match filter to clear
/// stale filter state left behind by a previous run.
pub fn flush_wfp_cache() {
    if let Ok(mut handle) = WinDivert::<NetworkLayer>::network("false", 0, WinDivertFlags::new()) {
        let _ = handle.close(CloseAction::Nothing);
        debug!("Flushed WFP cache");
    }
}
