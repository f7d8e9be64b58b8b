// The lookahead scheduler and transport controller.
//
// Every timer pulse schedules all ticks that fall inside the next lookahead
// window against the backend's render clock. The timer only has to be
// roughly on time; the backend plays each event at its exact timestamp.

use std::path::Path;
use std::sync::Arc;

use super::mixbus::MixBus;
use super::pattern::{self, VoiceKind};
use super::project::EngineConfig;
use super::transport::TransportState;
use super::voice::{self, VoiceArena};
use crate::audio::{SampleBuffer, impulse_response, white_noise};
use crate::audio_api::{BackendError, SignalBackend};
use crate::shared::{Beat, Track};

const NOISE_SECONDS: f64 = 2.0;
const IMPULSE_DECAY: f64 = 3.0;

pub type BeatObserver = Box<dyn FnMut(Beat) + Send>;

#[derive(Clone, Copy, Debug, PartialEq)]
struct PendingSwitch {
    track: Track,
    due: f64, // render clock time the fade-out completes
}

/// What the front end needs to draw, copied out under the lock.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EngineSnapshot {
    pub transport: TransportState,
    pub pending_track: Option<Track>,
    pub enabled: bool,
    pub live_voices: usize,
    pub now: f64,
    pub seed: u64,
}

pub struct Engine<B: SignalBackend> {
    backend: B,
    cfg: EngineConfig,
    transport: TransportState,
    bus: Option<MixBus>, // None once shut down
    voices: VoiceArena,
    noise: Arc<[f32]>,
    seed: u64,
    enabled: bool,
    pending: Option<PendingSwitch>,
    observers: Vec<BeatObserver>,
}

impl<B: SignalBackend> Engine<B> {
    /// Build the mix bus network and an idle transport on the configured
    /// initial track.
    pub fn new(mut backend: B, cfg: EngineConfig) -> Result<Self, BackendError> {
        let cfg = cfg.sanitized();
        let sample_rate = backend.sample_rate();
        let seed = cfg.seed.unwrap_or_else(rand::random::<u64>);

        let impulse = load_impulse(&cfg, sample_rate, seed);
        let bus = MixBus::build(&mut backend, &cfg, impulse)?;
        let noise = white_noise((sample_rate as f64 * NOISE_SECONDS) as usize, seed);

        let track = cfg.initial_track;
        let transport = TransportState::new(track, cfg.track(track).bpm);
        tracing::info!(track = track.name(), seed, sample_rate, "engine ready");

        Ok(Self {
            backend,
            cfg,
            transport,
            bus: Some(bus),
            voices: VoiceArena::new(),
            noise,
            seed,
            enabled: true,
            pending: None,
            observers: Vec::new(),
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn transport(&self) -> &TransportState {
        &self.transport
    }

    pub fn mix_bus(&self) -> Option<&MixBus> {
        self.bus.as_ref()
    }

    pub fn is_playing(&self) -> bool {
        self.transport.is_playing
    }

    pub fn live_voices(&self) -> usize {
        self.voices.len()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            transport: self.transport,
            pending_track: self.pending.map(|p| p.track),
            enabled: self.enabled,
            live_voices: self.voices.len(),
            now: self.backend.now(),
            seed: self.seed,
        }
    }

    pub fn subscribe(&mut self, observer: BeatObserver) {
        self.observers.push(observer);
    }

    /// Mute or unmute. A muted engine keeps time and keeps reporting beats,
    /// it just doesn't build voices.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            tracing::info!(enabled, "engine output toggled");
        }
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    // -- transport --

    /// Stopped -> Playing. Returns false if already playing.
    pub fn start(&mut self) -> bool {
        if self.transport.is_playing || self.bus.is_none() {
            return false;
        }
        if let Err(e) = self.backend.resume() {
            // scheduling goes ahead; the backend plays once it is allowed to
            tracing::warn!("backend not resumed, output deferred: {e}");
        }
        let now = self.backend.now();
        self.transport.next_event_time = self.transport.next_event_time.max(now + self.cfg.start_delay());
        self.transport.is_playing = true;

        let level = self.cfg.track(self.transport.current_track).level;
        if let Some(bus) = self.bus.as_mut() {
            if let Err(e) = bus.fade_in(&mut self.backend, now, level, self.cfg.crossfade()) {
                tracing::warn!("master fade-in failed: {e}");
            }
        }
        tracing::info!(
            track = self.transport.current_track.name(),
            next_event_time = self.transport.next_event_time,
            "playback started"
        );
        true
    }

    /// Playing -> Stopped. Already scheduled voices ring out. Returns false
    /// if already stopped.
    pub fn stop(&mut self) -> bool {
        if !self.transport.is_playing {
            return false;
        }
        self.transport.is_playing = false;
        let now = self.backend.now();
        if let Some(bus) = self.bus.as_mut() {
            if let Err(e) = bus.settle(&mut self.backend, now, self.cfg.crossfade() / 5.0) {
                tracing::warn!("master fade-out failed: {e}");
            }
        }
        // finish a crossfade that was under way
        if let Some(pending) = self.pending.take() {
            self.swap_track(pending.track);
        }
        tracing::info!(bar = self.transport.bar, tick = self.transport.tick, "playback stopped");
        true
    }

    /// Change track. While playing, the master fades out and the swap happens
    /// on the first pulse after the fade completes. Returns false if `track`
    /// is already playing or already the pending target.
    pub fn switch_track(&mut self, track: Track) -> bool {
        let target = self.pending.map_or(self.transport.current_track, |p| p.track);
        if track == target {
            return false;
        }
        if !self.transport.is_playing {
            self.swap_track(track);
            return true;
        }
        if let Some(pending) = self.pending.as_mut() {
            // fade already running, just retarget it
            pending.track = track;
            tracing::debug!(track = track.name(), "crossfade retargeted");
            return true;
        }

        let now = self.backend.now();
        let fade = self.cfg.crossfade();
        if let Some(bus) = self.bus.as_mut() {
            if let Err(e) = bus.fade_out(&mut self.backend, now, fade) {
                tracing::warn!("master crossfade failed: {e}");
            }
        }
        self.pending = Some(PendingSwitch { track, due: now + fade });
        tracing::info!(from = self.transport.current_track.name(), to = track.name(), "crossfade started");
        true
    }

    // The actual swap: new track and tempo from the top, the event time
    // re-seeded without ever moving backwards.
    fn swap_track(&mut self, track: Track) {
        let settings = self.cfg.track(track).clone();
        let now = self.backend.now();
        self.pending = None;
        self.transport.rewind(track, settings.bpm);
        self.transport.next_event_time = self.transport.next_event_time.max(now + self.cfg.start_delay());

        if self.transport.is_playing {
            if let Some(bus) = self.bus.as_mut() {
                if let Err(e) = bus.fade_in(&mut self.backend, now, settings.level, self.cfg.crossfade()) {
                    tracing::warn!("master fade-in failed: {e}");
                }
            }
        }
        tracing::debug!(track = track.name(), bpm = settings.bpm, "track swapped");
    }

    // -- scheduling --

    /// One timer pulse. Ignored while stopped.
    pub fn on_timer_pulse(&mut self) {
        if !self.transport.is_playing {
            return;
        }
        let now = self.backend.now();
        self.collect(now);

        if let Some(pending) = self.pending {
            if now >= pending.due {
                self.swap_track(pending.track);
            }
        }

        let lookahead = self.cfg.lookahead();

        // after a stall, drop what can no longer be played on time
        let mut skipped = 0u32;
        while self.transport.next_event_time < now - lookahead {
            self.transport.advance();
            skipped += 1;
        }
        if skipped > 0 {
            tracing::warn!(skipped, bar = self.transport.bar, "late pulse, skipped stale ticks");
        }

        while self.transport.next_event_time < now + lookahead {
            self.schedule_tick();
            self.transport.advance();
        }
    }

    fn schedule_tick(&mut self) {
        let at = self.transport.next_event_time;
        for req in pattern::emit(&self.transport, self.seed) {
            if let Some(tag) = req.kind.beat_tag() {
                let beat = Beat { time: at + req.offset, tag };
                for observer in self.observers.iter_mut() {
                    observer(beat);
                }
            }
            if !self.enabled {
                continue;
            }
            let Some(bus) = self.bus.as_ref() else {
                continue;
            };

            if req.kind == VoiceKind::Kick {
                if let Err(e) = bus.duck(&mut self.backend, at + req.offset, self.cfg.duck_floor, self.cfg.duck_recovery()) {
                    tracing::warn!("sidechain duck failed: {e}");
                }
            }
            match voice::build(&mut self.backend, &req, at, &bus.inputs(), &self.noise) {
                Ok(v) => {
                    self.voices.insert(v);
                }
                Err(e) => tracing::warn!(voice = req.kind.label(), at, "voice build failed: {e}"),
            }
        }
    }

    // release voices the backend reported as ended, then anything past its
    // deadline that slipped through
    fn collect(&mut self, now: f64) {
        let mut ended = 0;
        for source in self.backend.drain_ended() {
            if self.voices.source_ended(&mut self.backend, source) {
                ended += 1;
            }
        }
        let reaped = self.voices.reap(&mut self.backend, now, self.cfg.release_tail());
        if ended + reaped > 0 {
            tracing::debug!(ended, reaped, live = self.voices.len(), "voices released");
        }
    }

    /// Run the cleanup half of a pulse without scheduling anything.
    pub fn housekeep(&mut self) {
        let now = self.backend.now();
        self.collect(now);
    }

    /// Render clock time by which every live voice will have gone silent,
    /// tail included. None when nothing is playing.
    pub fn drain_deadline(&self) -> Option<f64> {
        self.voices.last_stop().map(|t| t + self.cfg.release_tail())
    }

    /// Stop, free every voice and the mix bus. Further calls do nothing.
    pub fn shutdown(&mut self) {
        self.stop();
        let Some(mut bus) = self.bus.take() else {
            return;
        };
        let voices = self.voices.release_all(&mut self.backend);
        bus.release(&mut self.backend);
        tracing::info!(voices, "engine shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.bus.is_none()
    }
}

// A wav impulse from the config if it loads, the synthetic room otherwise.
fn load_impulse(cfg: &EngineConfig, sample_rate: u32, seed: u64) -> Arc<[f32]> {
    if let Some(path) = cfg.impulse_path.as_deref() {
        match load_impulse_file(path, sample_rate) {
            Ok(ir) => return ir,
            Err(e) => tracing::warn!(path = %path.display(), "impulse response unusable, using synthetic room: {e:#}"),
        }
    }
    impulse_response(sample_rate, cfg.reverb_seconds, IMPULSE_DECAY, seed)
}

fn load_impulse_file(path: &Path, sample_rate: u32) -> anyhow::Result<Arc<[f32]>> {
    let buffer = SampleBuffer::load_wav(path, sample_rate)?;
    anyhow::ensure!(!buffer.data.is_empty(), "empty impulse response");
    Ok(buffer.to_mono())
}
