// The clock/position state of playback. The scheduler owns one of these and
// hands a shared reference to the pattern generator on every tick, so the
// generator never reads engine fields behind its back.

use super::song::Section;
use crate::shared::{TICKS_PER_BAR, Track};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransportState {
    pub is_playing: bool,
    pub tempo_bpm: f64,
    pub next_event_time: f64, // absolute render clock seconds
    pub tick: u8,             // 0..16, sixteenth within the bar
    pub bar: u32,
    pub current_track: Track,
}

impl TransportState {
    pub fn new(track: Track, tempo_bpm: f64) -> Self {
        Self {
            is_playing: false,
            tempo_bpm,
            next_event_time: 0.0,
            tick: 0,
            bar: 0,
            current_track: track,
        }
    }

    /// Length of one sixteenth note in seconds.
    pub fn note_length(&self) -> f64 {
        60.0 / self.tempo_bpm / 4.0
    }

    pub fn section(&self) -> Section {
        Section::at(self.bar)
    }

    // one scheduler step: move the event time forward and roll the bar over
    pub fn advance(&mut self) {
        self.next_event_time += self.note_length();
        self.tick += 1;
        if self.tick == TICKS_PER_BAR {
            self.tick = 0;
            self.bar += 1;
        }
    }

    // back to the top of the song, used when the track changes
    pub fn rewind(&mut self, track: Track, tempo_bpm: f64) {
        self.current_track = track;
        self.tempo_bpm = tempo_bpm;
        self.tick = 0;
        self.bar = 0;
    }
}
