// Timer pulses that drive the scheduler. The realtime source runs on its own
// thread so heavy work elsewhere can't starve it; the manual source is fired
// by hand from tests and offline renders.

use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;

pub type PulseCallback = Box<dyn FnMut() + Send>;

pub trait PulseSource: Send {
    /// Call `callback` every `interval` until disarmed. Arming again
    /// replaces the previous callback.
    fn arm(&mut self, interval: Duration, callback: PulseCallback) -> io::Result<()>;
    fn disarm(&mut self);
    fn is_armed(&self) -> bool;
}

/// A dedicated thread ticking on a `crossbeam_channel::tick` timer.
#[derive(Default)]
pub struct ThreadPulse {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ThreadPulse {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PulseSource for ThreadPulse {
    fn arm(&mut self, interval: Duration, mut callback: PulseCallback) -> io::Result<()> {
        self.disarm();
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let handle = thread::Builder::new().name("procscore-pulse".into()).spawn(move || {
            let ticker = crossbeam_channel::tick(interval);
            loop {
                crossbeam_channel::select! {
                    recv(ticker) -> _ => callback(),
                    recv(stop_rx) -> _ => break, // a message or a dropped sender
                }
            }
        })?;
        self.stop_tx = Some(stop_tx);
        self.handle = Some(handle);
        tracing::debug!(?interval, "pulse armed");
        Ok(())
    }

    fn disarm(&mut self) {
        let Some(stop_tx) = self.stop_tx.take() else {
            return;
        };
        drop(stop_tx);
        if let Some(handle) = self.handle.take() {
            // joining ourselves would never return
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                tracing::warn!("pulse thread panicked");
            }
        }
        tracing::debug!("pulse disarmed");
    }

    fn is_armed(&self) -> bool {
        self.stop_tx.is_some()
    }
}

impl Drop for ThreadPulse {
    fn drop(&mut self) {
        self.disarm();
    }
}

type Slot = Arc<Mutex<Option<PulseCallback>>>;

/// A pulse source that only fires when its `PulseTrigger` says so.
pub struct ManualPulse {
    slot: Slot,
}

#[derive(Clone)]
pub struct PulseTrigger {
    slot: Slot,
}

impl ManualPulse {
    pub fn new() -> (ManualPulse, PulseTrigger) {
        let slot: Slot = Arc::new(Mutex::new(None));
        (ManualPulse { slot: Arc::clone(&slot) }, PulseTrigger { slot })
    }
}

impl PulseSource for ManualPulse {
    fn arm(&mut self, _interval: Duration, callback: PulseCallback) -> io::Result<()> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(callback);
        Ok(())
    }

    fn disarm(&mut self) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn is_armed(&self) -> bool {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }
}

impl PulseTrigger {
    /// Deliver one pulse. Returns false if nothing is armed.
    pub fn fire(&self) -> bool {
        match self.slot.lock().unwrap_or_else(PoisonError::into_inner).as_mut() {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }
}
