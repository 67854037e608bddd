//! In-memory capture backend used by the tests.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use crate::network::core::handle::{
    CaptureBackend, CaptureError, CaptureHandle, HandleConfig, RecvInterrupt,
};

type RecvHook = Box<dyn FnMut(usize) + Send>;

/// Receive-side shutdown flag plus the condvar a blocked `recv` waits on.
#[derive(Default)]
struct Wake {
    interrupted: Mutex<bool>,
    signal: Condvar,
}

impl Wake {
    fn fire(&self) {
        *self.interrupted.lock().unwrap() = true;
        self.signal.notify_all();
    }

    fn is_set(&self) -> bool {
        *self.interrupted.lock().unwrap()
    }

    fn wait(&self) {
        let mut interrupted = self.interrupted.lock().unwrap();
        while !*interrupted {
            interrupted = self.signal.wait(interrupted).unwrap();
        }
    }
}

/// Records every open attempt and replays scripted open results.
///
/// The first successful open receives the queued packets; everything the
/// pipeline re-injects lands in `sent`.
#[derive(Default)]
pub struct MockBackend {
    open_results: Mutex<VecDeque<Result<(), CaptureError>>>,
    packets: Mutex<Vec<Vec<u8>>>,
    recv_hook: Mutex<Option<RecvHook>>,
    fail_recv_after: Option<usize>,
    block_when_empty: bool,
    pub attempts: Arc<Mutex<Vec<String>>>,
    pub sent: Arc<Mutex<Vec<Vec<u8>>>>,
    pub closes: Arc<Mutex<usize>>,
}

impl MockBackend {
    pub fn with_packets(packets: Vec<Vec<u8>>) -> Self {
        Self {
            packets: Mutex::new(packets),
            ..Default::default()
        }
    }

    /// Like a live driver: once the queued packets are used up, `recv`
    /// blocks until the handle's receive interrupt fires.
    pub fn blocking(packets: Vec<Vec<u8>>) -> Self {
        Self {
            block_when_empty: true,
            ..Self::with_packets(packets)
        }
    }

    /// Queues the outcome of the next open attempts, in order. Once the
    /// script runs out every open succeeds.
    pub fn script_opens(self, results: Vec<Result<(), CaptureError>>) -> Self {
        *self.open_results.lock().unwrap() = results.into();
        self
    }

    /// Calls `hook` with the running receive count after every packet.
    pub fn on_recv(self, hook: impl FnMut(usize) + Send + 'static) -> Self {
        *self.recv_hook.lock().unwrap() = Some(Box::new(hook));
        self
    }

    /// Makes `recv` fail once `count` packets have been delivered.
    pub fn fail_recv_after(mut self, count: usize) -> Self {
        self.fail_recv_after = Some(count);
        self
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn attempted_filters(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }
}

impl CaptureBackend for MockBackend {
    type Handle = MockHandle;

    fn open(&self, config: &HandleConfig) -> Result<MockHandle, CaptureError> {
        self.attempts.lock().unwrap().push(config.filter.clone());

        if let Some(result) = self.open_results.lock().unwrap().pop_front() {
            result?;
        }

        let packets = std::mem::take(&mut *self.packets.lock().unwrap());
        Ok(MockHandle {
            incoming: packets.into(),
            received: 0,
            open: true,
            recv_hook: self.recv_hook.lock().unwrap().take(),
            fail_recv_after: self.fail_recv_after,
            block_when_empty: self.block_when_empty,
            wake: Arc::new(Wake::default()),
            sent: Arc::clone(&self.sent),
            closes: Arc::clone(&self.closes),
        })
    }
}

pub struct MockHandle {
    incoming: VecDeque<Vec<u8>>,
    received: usize,
    open: bool,
    recv_hook: Option<RecvHook>,
    fail_recv_after: Option<usize>,
    block_when_empty: bool,
    wake: Arc<Wake>,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    closes: Arc<Mutex<usize>>,
}

impl CaptureHandle for MockHandle {
    type Packet = Vec<u8>;

    fn recv(&mut self) -> Result<Option<Vec<u8>>, CaptureError> {
        if !self.open || self.wake.is_set() {
            return Ok(None);
        }
        if self.fail_recv_after == Some(self.received) {
            return Err(CaptureError::Recv("simulated driver failure".into()));
        }

        let packet = self.incoming.pop_front();
        if packet.is_some() {
            self.received += 1;
            if let Some(hook) = self.recv_hook.as_mut() {
                hook(self.received);
            }
        } else if self.block_when_empty {
            self.wake.wait();
        }
        Ok(packet)
    }

    fn send(&mut self, packet: &Vec<u8>) -> Result<(), CaptureError> {
        self.sent.lock().unwrap().push(packet.clone());
        Ok(())
    }

    fn close(&mut self) -> Result<(), CaptureError> {
        if self.open {
            self.open = false;
            *self.closes.lock().unwrap() += 1;
        }
        Ok(())
    }

    fn recv_interrupt(&self) -> RecvInterrupt {
        let wake = Arc::clone(&self.wake);
        RecvInterrupt::new(move || wake.fire())
    }
}
