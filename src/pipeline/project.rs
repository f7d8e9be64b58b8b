// everything tunable about the engine, persisted as json by persistence.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize}; // serde does json

use crate::shared::Track;

// Per-track tempo and the master level the track fades up to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackSettings {
    pub bpm: f64,
    pub level: f64,
}

impl Default for TrackSettings {
    fn default() -> Self {
        Self { bpm: 120.0, level: 0.5 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub lookahead_ms: f64,     // how far ahead of the render clock events get scheduled
    pub pulse_interval_ms: u64, // timer granularity; must stay well under the lookahead
    pub start_delay_ms: f64,
    pub crossfade_ms: f64,
    pub release_tail_ms: f64, // grace after a voice goes silent before it is reaped

    pub duck_floor: f64,
    pub duck_recovery_ms: f64,
    pub reverb_mix: f64,
    pub reverb_seconds: f64,
    pub impulse_path: Option<PathBuf>, // a wav impulse response instead of the synthetic one

    pub ambient: TrackSettings,
    pub main_theme: TrackSettings,
    pub initial_track: Track,
    pub seed: Option<u64>, // None picks a fresh one every run
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lookahead_ms: 100.0,
            pulse_interval_ms: 25,
            start_delay_ms: 50.0,
            crossfade_ms: 1000.0,
            release_tail_ms: 100.0,
            duck_floor: 0.25,
            duck_recovery_ms: 150.0,
            reverb_mix: 0.35,
            reverb_seconds: 2.5,
            impulse_path: None,
            ambient: TrackSettings { bpm: 72.0, level: 0.5 },
            main_theme: TrackSettings { bpm: 124.0, level: 0.6 },
            initial_track: Track::Ambient,
            seed: None,
        }
    }
}

impl EngineConfig {
    pub fn track(&self, track: Track) -> &TrackSettings {
        match track {
            Track::Ambient => &self.ambient,
            Track::MainTheme => &self.main_theme,
        }
    }

    pub fn lookahead(&self) -> f64 {
        self.lookahead_ms / 1000.0
    }

    pub fn start_delay(&self) -> f64 {
        self.start_delay_ms / 1000.0
    }

    pub fn crossfade(&self) -> f64 {
        self.crossfade_ms / 1000.0
    }

    pub fn release_tail(&self) -> f64 {
        self.release_tail_ms / 1000.0
    }

    pub fn duck_recovery(&self) -> f64 {
        self.duck_recovery_ms / 1000.0
    }

    pub fn pulse_interval(&self) -> Duration {
        Duration::from_millis(self.pulse_interval_ms)
    }

    /// Pull out-of-range values back to something playable. A bad config
    /// file should cost a warning, not the music.
    pub fn sanitized(mut self) -> Self {
        let defaults = EngineConfig::default();
        if self.pulse_interval_ms == 0 {
            tracing::warn!("pulse interval of 0 ms, using {}", defaults.pulse_interval_ms);
            self.pulse_interval_ms = defaults.pulse_interval_ms;
        }
        let min_lookahead = 2.0 * self.pulse_interval_ms as f64;
        if !(self.lookahead_ms >= min_lookahead) {
            tracing::warn!(lookahead_ms = self.lookahead_ms, "lookahead shorter than two pulses, using {min_lookahead}");
            self.lookahead_ms = min_lookahead;
        }
        for (name, ms) in [
            ("start_delay_ms", &mut self.start_delay_ms),
            ("crossfade_ms", &mut self.crossfade_ms),
            ("release_tail_ms", &mut self.release_tail_ms),
            ("duck_recovery_ms", &mut self.duck_recovery_ms),
        ] {
            if !(ms.is_finite() && *ms >= 0.0) {
                tracing::warn!(field = name, "invalid duration, using 0");
                *ms = 0.0;
            }
        }
        self.duck_floor = clamp_or(self.duck_floor, 0.001, 1.0, defaults.duck_floor);
        self.reverb_mix = clamp_or(self.reverb_mix, 0.0, 1.0, defaults.reverb_mix);
        self.reverb_seconds = clamp_or(self.reverb_seconds, 0.1, 10.0, defaults.reverb_seconds);
        for (track, fallback) in [(&mut self.ambient, defaults.ambient), (&mut self.main_theme, defaults.main_theme)] {
            if !(track.bpm.is_finite() && track.bpm > 0.0) {
                tracing::warn!(bpm = track.bpm, "invalid tempo, using {}", fallback.bpm);
                track.bpm = fallback.bpm;
            }
            track.level = clamp_or(track.level, 0.0, 1.0, fallback.level);
        }
        self
    }
}

fn clamp_or(value: f64, lo: f64, hi: f64, fallback: f64) -> f64 {
    if value.is_finite() { value.clamp(lo, hi) } else { fallback }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: EngineConfig = serde_json::from_str(r#"{"crossfade_ms": 400, "main_theme": {"bpm": 128}}"#).unwrap();
        assert_eq!(cfg.crossfade(), 0.4);
        assert_eq!(cfg.main_theme.bpm, 128.0);
        assert_eq!(cfg.lookahead_ms, 100.0);
        assert_eq!(cfg.initial_track, Track::Ambient);
    }

    #[test]
    fn track_names_are_camel_case_in_json() {
        let cfg: EngineConfig = serde_json::from_str(r#"{"initial_track": "mainTheme"}"#).unwrap();
        assert_eq!(cfg.initial_track, Track::MainTheme);
    }

    #[test]
    fn sanitize_repairs_nonsense() {
        let cfg = EngineConfig {
            pulse_interval_ms: 0,
            lookahead_ms: 5.0,
            crossfade_ms: f64::NAN,
            duck_floor: 0.0,
            main_theme: TrackSettings { bpm: -3.0, level: 4.0 },
            ..EngineConfig::default()
        }
        .sanitized();
        assert_eq!(cfg.pulse_interval_ms, 25);
        assert_eq!(cfg.lookahead_ms, 50.0);
        assert_eq!(cfg.crossfade_ms, 0.0);
        assert_eq!(cfg.duck_floor, 0.001);
        assert_eq!(cfg.main_theme.bpm, 124.0);
        assert_eq!(cfg.main_theme.level, 1.0);
    }

    #[test]
    fn defaults_survive_sanitize() {
        assert_eq!(EngineConfig::default().sanitized(), EngineConfig::default());
    }
}
