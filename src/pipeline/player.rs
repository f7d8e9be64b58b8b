// The public face of the engine: start/stop/switch/destroy on a shared
// engine, with the pulse source armed while playing.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use super::project::EngineConfig;
use super::pulse::PulseSource;
use super::scheduler::{BeatObserver, Engine, EngineSnapshot};
use crate::audio_api::SignalBackend;
use crate::shared::Track;

/// Longest `destroy` waits for in-flight voices to ring out.
pub const MAX_DRAIN: Duration = Duration::from_secs(5);

pub struct Player<B: SignalBackend + 'static> {
    engine: Arc<Mutex<Engine<B>>>,
    pulse: Box<dyn PulseSource>,
    interval: Duration,
}

impl<B: SignalBackend + 'static> Player<B> {
    pub fn new(engine: Engine<B>, pulse: Box<dyn PulseSource>) -> Self {
        let interval = engine.config().pulse_interval();
        Self { engine: Arc::new(Mutex::new(engine)), pulse, interval }
    }

    // a panic in a pulse shouldn't take the controls down with it
    fn lock(&self) -> MutexGuard<'_, Engine<B>> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start playback and arm the pulse source. Returns false if already
    /// playing, or if the pulse source could not be armed (playback is
    /// stopped again in that case).
    pub fn start(&mut self) -> bool {
        if !self.lock().start() {
            return false;
        }
        let engine = Arc::clone(&self.engine);
        let callback = Box::new(move || {
            engine.lock().unwrap_or_else(PoisonError::into_inner).on_timer_pulse();
        });
        if let Err(e) = self.pulse.arm(self.interval, callback) {
            tracing::error!("could not arm pulse source: {e}");
            self.lock().stop();
            return false;
        }
        // schedule the first window now rather than one interval from now
        self.lock().on_timer_pulse();
        true
    }

    /// Stop playback. The pulse is disarmed before the engine is locked so a
    /// pulse in flight can finish.
    pub fn stop(&mut self) -> bool {
        self.pulse.disarm();
        self.lock().stop()
    }

    pub fn toggle(&mut self) -> bool {
        let playing = self.lock().is_playing();
        if playing {
            self.stop();
        } else {
            self.start();
        }
        !playing
    }

    pub fn switch_track(&mut self, track: Track) -> bool {
        self.lock().switch_track(track)
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.lock().set_enabled(enabled);
    }

    pub fn toggle_enabled(&mut self) -> bool {
        let mut engine = self.lock();
        let enabled = !engine.is_enabled();
        engine.set_enabled(enabled);
        enabled
    }

    pub fn subscribe(&mut self, observer: BeatObserver) {
        self.lock().subscribe(observer);
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        self.lock().snapshot()
    }

    pub fn is_armed(&self) -> bool {
        self.pulse.is_armed()
    }

    /// The configuration to persist: the loaded settings with the track the
    /// session ended on (or was heading to) as the next initial track.
    pub fn session_config(&self) -> EngineConfig {
        let engine = self.lock();
        let snap = engine.snapshot();
        EngineConfig {
            initial_track: snap.pending_track.unwrap_or(snap.transport.current_track),
            ..engine.config().clone()
        }
    }

    pub fn with_engine<R>(&self, f: impl FnOnce(&mut Engine<B>) -> R) -> R {
        f(&mut self.lock())
    }

    /// Stop, let in-flight voices ring out (at most `MAX_DRAIN`), then free
    /// every voice and the mix bus.
    pub fn destroy(&mut self) {
        self.destroy_with_grace(MAX_DRAIN);
    }

    pub fn destroy_with_grace(&mut self, grace: Duration) {
        self.stop();
        let grace = grace.min(MAX_DRAIN);
        let began = Instant::now();
        loop {
            {
                let mut engine = self.lock();
                if engine.is_shut_down() {
                    return;
                }
                engine.housekeep();
                let now = engine.backend().now();
                if engine.drain_deadline().is_none_or(|deadline| now >= deadline) {
                    break;
                }
            }
            if began.elapsed() >= grace {
                tracing::debug!("voices still ringing at teardown, cutting them off");
                break;
            }
            thread::sleep(self.interval.min(grace.saturating_sub(began.elapsed())));
        }
        self.lock().shutdown();
    }
}
