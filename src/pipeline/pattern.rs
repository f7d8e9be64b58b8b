// The pattern generator: a pure function of the transport position (plus a
// seed for the fills) that says which voices to build on this tick.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::song::{AMBIENT, AMBIENT_ROOTS, BASS_ROOTS, LEAD_MELODY, MAIN_THEME, Section};
use super::transport::TransportState;
use crate::audio_api::Waveform;
use crate::shared::{BeatTag, Track};

const ORNAMENT_CHANCE: f64 = 0.15;
const FRAGMENT_CHANCE: f64 = 0.6;
const FRAGMENT_JITTER: f64 = 0.02; // seconds, always late, never early

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum VoiceKind {
    Kick,
    Snare,
    HiHat { open: bool },
    Bass { freq: f64, cutoff: f64, length: f64 },
    Lead { freq: f64, waveform: Waveform, length: f64 },
    Pad { freq: f64, waveform: Waveform, length: f64 },
    NoiseSwell { length: f64 },
}

impl VoiceKind {
    pub fn beat_tag(&self) -> Option<BeatTag> {
        match self {
            VoiceKind::Kick => Some(BeatTag::Kick),
            VoiceKind::Snare => Some(BeatTag::Snare),
            VoiceKind::Bass { .. } => Some(BeatTag::Bass),
            VoiceKind::Lead { .. } => Some(BeatTag::Lead),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            VoiceKind::Kick => "kick",
            VoiceKind::Snare => "snare",
            VoiceKind::HiHat { open: false } => "hihat",
            VoiceKind::HiHat { open: true } => "open-hihat",
            VoiceKind::Bass { .. } => "bass",
            VoiceKind::Lead { .. } => "lead",
            VoiceKind::Pad { .. } => "pad",
            VoiceKind::NoiseSwell { .. } => "noise-swell",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VoiceRequest {
    pub kind: VoiceKind,
    pub gain: f64,
    pub offset: f64, // seconds after the tick's event time, >= 0
}

impl VoiceRequest {
    fn new(kind: VoiceKind, gain: f64) -> Self {
        Self { kind, gain, offset: 0.0 }
    }
}

/// Voices for the tick at `state`'s position. Deterministic for a given
/// `seed`; the seed only feeds the ornament and breakdown fills.
pub fn emit(state: &TransportState, seed: u64) -> Vec<VoiceRequest> {
    let mut rng = fill_rng(seed, state);
    match state.current_track {
        Track::Ambient => ambient(state, &mut rng),
        Track::MainTheme => main_theme(state, &mut rng),
    }
}

// every (track, bar, tick) gets its own stream derived from the seed
fn fill_rng(seed: u64, state: &TransportState) -> StdRng {
    let track = match state.current_track {
        Track::Ambient => 1u64,
        Track::MainTheme => 2u64,
    };
    let position = (track << 48) ^ ((state.bar as u64) << 8) ^ state.tick as u64;
    StdRng::seed_from_u64(splitmix(seed ^ splitmix(position)))
}

fn splitmix(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

fn ambient(state: &TransportState, rng: &mut StdRng) -> Vec<VoiceRequest> {
    let mut out = Vec::new();
    let note = state.note_length();
    let degree = AMBIENT_ROOTS[(state.bar / 2 % AMBIENT_ROOTS.len() as u32) as usize];
    let root = AMBIENT.freq(degree);

    // pads ring for two bars, so they start on even bars only
    if state.tick == 0 && state.bar % 2 == 0 {
        let length = note * 32.0;
        out.push(VoiceRequest::new(VoiceKind::Pad { freq: root * 2.0, waveform: Waveform::Sine, length }, 0.12));
        out.push(VoiceRequest::new(VoiceKind::Pad { freq: root * 1.5, waveform: Waveform::Triangle, length }, 0.08));
    }

    if state.tick % 4 == 0 {
        out.push(VoiceRequest::new(VoiceKind::Bass { freq: root / 2.0, cutoff: 220.0, length: note * 4.0 }, 0.3));
    }

    if rng.gen_bool(ORNAMENT_CHANCE) {
        let n = AMBIENT.len() as i32;
        let degree = rng.gen_range(0..n) + n; // an octave up
        out.push(VoiceRequest::new(
            VoiceKind::Lead { freq: AMBIENT.freq(degree), waveform: Waveform::Sine, length: note * 2.0 },
            0.08,
        ));
    }
    out
}

fn main_theme(state: &TransportState, rng: &mut StdRng) -> Vec<VoiceRequest> {
    let mut out = Vec::new();
    let section = state.section();
    let tick = state.tick;
    let note = state.note_length();
    let breakdown = section == Section::Breakdown;

    // drums
    if !breakdown {
        if tick % 4 == 0 {
            out.push(VoiceRequest::new(VoiceKind::Kick, 0.9));
        }
        let snare = if section == Section::Build { tick % 2 == 0 } else { tick % 8 == 4 };
        if snare {
            out.push(VoiceRequest::new(VoiceKind::Snare, 0.5));
        }
        if tick % 2 == 0 {
            let open = tick % 8 == 2;
            out.push(VoiceRequest::new(VoiceKind::HiHat { open }, if open { 0.12 } else { 0.08 }));
        }
    }

    // bass leaves the kick's ticks alone
    if tick % 4 != 0 {
        let degree = BASS_ROOTS[(state.bar % BASS_ROOTS.len() as u32) as usize];
        let cutoff = match section {
            Section::Breakdown => 300.0,
            Section::Chorus | Section::Outro => 1800.0,
            _ => 900.0,
        };
        out.push(VoiceRequest::new(
            VoiceKind::Bass { freq: MAIN_THEME.freq(degree) / 2.0, cutoff, length: note * 0.9 },
            0.35,
        ));
    }

    // lead
    match section {
        Section::Chorus | Section::Outro => {
            if let Some(degree) = LEAD_MELODY[tick as usize] {
                let octave = if section == Section::Outro { 2.0 } else { 1.0 };
                out.push(VoiceRequest::new(
                    VoiceKind::Lead { freq: MAIN_THEME.freq(degree) * octave, waveform: Waveform::Square, length: note * 0.9 },
                    0.12,
                ));
            }
        }
        Section::Breakdown => {
            if tick % 4 == 0 && rng.gen_bool(FRAGMENT_CHANCE) {
                let n = MAIN_THEME.len() as i32;
                let degree = rng.gen_range(n..2 * n);
                let mut fragment = VoiceRequest::new(
                    VoiceKind::Lead { freq: MAIN_THEME.freq(degree), waveform: Waveform::Triangle, length: note * 2.0 },
                    0.1,
                );
                fragment.offset = rng.gen_range(0.0..FRAGMENT_JITTER);
                out.push(fragment);
            }
        }
        _ => {}
    }

    // riser across every build bar
    if section == Section::Build && tick == 0 {
        out.push(VoiceRequest::new(VoiceKind::NoiseSwell { length: note * 16.0 }, 0.25));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::TICKS_PER_BAR;

    fn at(track: Track, bar: u32, tick: u8) -> TransportState {
        let tempo = if track == Track::Ambient { 72.0 } else { 124.0 };
        let mut s = TransportState::new(track, tempo);
        s.bar = bar;
        s.tick = tick;
        s
    }

    fn kinds(reqs: &[VoiceRequest]) -> Vec<&'static str> {
        reqs.iter().map(|r| r.kind.label()).collect()
    }

    fn count(reqs: &[VoiceRequest], label: &str) -> usize {
        reqs.iter().filter(|r| r.kind.label() == label).count()
    }

    #[test]
    fn chorus_lead_follows_melody_and_rests() {
        for tick in 0..TICKS_PER_BAR {
            let reqs = emit(&at(Track::MainTheme, 20, tick), 1);
            let leads: Vec<_> = reqs.iter().filter(|r| matches!(r.kind, VoiceKind::Lead { .. })).collect();
            match LEAD_MELODY[tick as usize] {
                Some(degree) => {
                    assert_eq!(leads.len(), 1, "tick {tick}");
                    assert!(leads[0].gain > 0.0);
                    let VoiceKind::Lead { freq, .. } = leads[0].kind else { unreachable!() };
                    assert!((freq - MAIN_THEME.freq(degree)).abs() < 1e-9);
                }
                None => assert!(leads.is_empty(), "tick {tick}"),
            }
        }
    }

    #[test]
    fn outro_lead_is_an_octave_up() {
        let chorus = emit(&at(Track::MainTheme, 20, 0), 1);
        let outro = emit(&at(Track::MainTheme, 60, 0), 1);
        let freq = |reqs: &[VoiceRequest]| {
            reqs.iter()
                .find_map(|r| match r.kind {
                    VoiceKind::Lead { freq, .. } => Some(freq),
                    _ => None,
                })
                .unwrap()
        };
        assert!((freq(&outro) - 2.0 * freq(&chorus)).abs() < 1e-9);
    }

    #[test]
    fn lead_is_silent_outside_chorus_outro_and_breakdown() {
        for bar in [0, 5, 12, 41] {
            for tick in 0..TICKS_PER_BAR {
                assert_eq!(count(&emit(&at(Track::MainTheme, bar, tick), 3), "lead"), 0);
            }
        }
    }

    #[test]
    fn verse_drums() {
        let bar = 8;
        for tick in 0..TICKS_PER_BAR {
            let reqs = emit(&at(Track::MainTheme, bar, tick), 0);
            assert_eq!(count(&reqs, "kick"), usize::from(tick % 4 == 0));
            assert_eq!(count(&reqs, "snare"), usize::from(tick % 8 == 4));
            let hats = count(&reqs, "hihat") + count(&reqs, "open-hihat");
            assert_eq!(hats, usize::from(tick % 2 == 0));
            assert_eq!(count(&reqs, "open-hihat"), usize::from(tick % 8 == 2));
        }
    }

    #[test]
    fn build_snare_doubles_and_swell_rises() {
        let reqs = emit(&at(Track::MainTheme, 42, 0), 0);
        assert_eq!(count(&reqs, "noise-swell"), 1);
        for tick in 0..TICKS_PER_BAR {
            let reqs = emit(&at(Track::MainTheme, 42, tick), 0);
            assert_eq!(count(&reqs, "snare"), usize::from(tick % 2 == 0));
        }
    }

    #[test]
    fn breakdown_has_no_drums_and_a_dark_bass() {
        for tick in 0..TICKS_PER_BAR {
            let reqs = emit(&at(Track::MainTheme, 34, tick), 9);
            for drum in ["kick", "snare", "hihat", "open-hihat"] {
                assert_eq!(count(&reqs, drum), 0, "{:?}", kinds(&reqs));
            }
            for r in &reqs {
                if let VoiceKind::Bass { cutoff, .. } = r.kind {
                    assert_eq!(cutoff, 300.0);
                }
                if let VoiceKind::Lead { .. } = r.kind {
                    assert_eq!(tick % 4, 0);
                    assert!(r.offset >= 0.0 && r.offset < FRAGMENT_JITTER);
                }
            }
        }
    }

    #[test]
    fn bass_skips_kick_ticks_and_tracks_section_cutoff() {
        for (bar, cutoff) in [(2, 900.0), (20, 1800.0), (50, 1800.0), (33, 300.0)] {
            for tick in 0..TICKS_PER_BAR {
                let reqs = emit(&at(Track::MainTheme, bar, tick), 0);
                let bass: Vec<_> = reqs
                    .iter()
                    .filter_map(|r| match r.kind {
                        VoiceKind::Bass { cutoff, freq, .. } => Some((cutoff, freq)),
                        _ => None,
                    })
                    .collect();
                if tick % 4 == 0 {
                    assert!(bass.is_empty());
                } else {
                    assert_eq!(bass.len(), 1);
                    assert_eq!(bass[0].0, cutoff);
                    let root = BASS_ROOTS[(bar % 4) as usize];
                    assert!((bass[0].1 - MAIN_THEME.freq(root) / 2.0).abs() < 1e-9);
                }
            }
        }
    }

    #[test]
    fn ambient_pads_on_even_bars_only() {
        let even = emit(&at(Track::Ambient, 4, 0), 0);
        assert_eq!(count(&even, "pad"), 2);
        let odd = emit(&at(Track::Ambient, 5, 0), 0);
        assert_eq!(count(&odd, "pad"), 0);

        let root = AMBIENT.freq(AMBIENT_ROOTS[2]);
        let freqs: Vec<f64> = even
            .iter()
            .filter_map(|r| match r.kind {
                VoiceKind::Pad { freq, .. } => Some(freq),
                _ => None,
            })
            .collect();
        assert!((freqs[0] - root * 2.0).abs() < 1e-9);
        assert!((freqs[1] - root * 1.5).abs() < 1e-9);
    }

    #[test]
    fn ambient_sub_bass_every_fourth_tick() {
        for tick in 0..TICKS_PER_BAR {
            let reqs = emit(&at(Track::Ambient, 1, tick), 0);
            assert_eq!(count(&reqs, "bass"), usize::from(tick % 4 == 0));
        }
    }

    #[test]
    fn ornament_density_is_near_fifteen_percent() {
        let mut hits = 0;
        let mut total = 0;
        for bar in 0..200 {
            for tick in 0..TICKS_PER_BAR {
                total += 1;
                hits += count(&emit(&at(Track::Ambient, bar, tick), 42), "lead");
            }
        }
        let rate = hits as f64 / total as f64;
        assert!((0.12..0.18).contains(&rate), "rate {rate}");
    }

    #[test]
    fn same_seed_same_performance() {
        for bar in 30..40 {
            for tick in 0..TICKS_PER_BAR {
                let s = at(Track::MainTheme, bar, tick);
                assert_eq!(emit(&s, 5), emit(&s, 5));
            }
        }
    }

    #[test]
    fn different_seeds_vary_the_fills() {
        let fills = |seed| -> Vec<usize> {
            (0..64).map(|bar| count(&emit(&at(Track::Ambient, bar, 3), seed), "lead")).collect()
        };
        assert_ne!(fills(1), fills(2));
    }

    #[test]
    fn beat_tags_cover_kick_snare_bass_lead() {
        assert_eq!(VoiceKind::Kick.beat_tag(), Some(BeatTag::Kick));
        assert_eq!(VoiceKind::HiHat { open: true }.beat_tag(), None);
        assert_eq!(VoiceKind::NoiseSwell { length: 1.0 }.beat_tag(), None);
    }
}
