// Headless rig for tests and dry runs: an engine on the recording backend,
// a manual pulse standing in for the timer, and every beat collected.

use std::sync::{Arc, Mutex, PoisonError};

use crate::audio::RecordingBackend;
use crate::audio_api::{BackendError, SignalBackend};
use crate::pipeline::player::Player;
use crate::pipeline::project::EngineConfig;
use crate::pipeline::pulse::{ManualPulse, PulseTrigger};
use crate::pipeline::scheduler::Engine;
use crate::shared::Beat;

pub const RIG_SAMPLE_RATE: u32 = 48_000;

pub struct Rig {
    pub player: Player<RecordingBackend>,
    pub trigger: PulseTrigger,
    beats: Arc<Mutex<Vec<Beat>>>,
}

impl Rig {
    pub fn new(cfg: EngineConfig) -> Result<Self, BackendError> {
        Self::with_backend(RecordingBackend::new(RIG_SAMPLE_RATE), cfg)
    }

    pub fn with_backend(backend: RecordingBackend, cfg: EngineConfig) -> Result<Self, BackendError> {
        let engine = Engine::new(backend, cfg)?;
        let (pulse, trigger) = ManualPulse::new();
        let mut player = Player::new(engine, Box::new(pulse));

        let beats = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&beats);
        player.subscribe(Box::new(move |beat| {
            sink.lock().unwrap_or_else(PoisonError::into_inner).push(beat);
        }));
        Ok(Self { player, trigger, beats })
    }

    pub fn now(&self) -> f64 {
        self.player.with_engine(|e| e.backend().now())
    }

    /// Move the render clock forward by `dt`, then deliver one pulse.
    pub fn step(&mut self, dt: f64) -> bool {
        self.player.with_engine(|e| e.backend_mut().advance(dt));
        self.trigger.fire()
    }

    /// Pulse every `interval` seconds of render time for `seconds`.
    pub fn run_for(&mut self, seconds: f64, interval: f64) {
        let steps = (seconds / interval).round() as usize;
        for _ in 0..steps {
            self.step(interval);
        }
    }

    pub fn beats(&self) -> Vec<Beat> {
        self.beats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn clear_beats(&mut self) {
        self.beats.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}
