// Types shared between the terminal front end, the middle layer and the engine.
//
// Keys (see tui/input.rs):
//   Space         //  PlayPress (start/stop)
//   1             //  SelectTrack(Ambient)
//   2             //  SelectTrack(MainTheme)
//   m             //  MuteToggle
//   Esc / q       //  Quit
//
// The TUI never touches the engine; it renders whatever `DisplayState` the
// middle layer hands it every frame.

use serde::{Deserialize, Serialize};

pub const TICKS_PER_BAR: u8 = 16; // sixteenth notes
pub const NUM_PADS: usize = TICKS_PER_BAR as usize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "String")]
pub enum Track {
    #[default]
    Ambient,
    MainTheme,
}

impl Track {
    pub const ALL: [Track; 2] = [Track::Ambient, Track::MainTheme];

    pub fn name(self) -> &'static str {
        match self {
            Track::Ambient => "ambient",
            Track::MainTheme => "mainTheme",
        }
    }

    /// Parse a track name, accepting `mainTheme`, `main_theme` and `main-theme`.
    pub fn parse(name: &str) -> Option<Track> {
        let folded: String = name
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();
        match folded.as_str() {
            "ambient" => Some(Track::Ambient),
            "maintheme" => Some(Track::MainTheme),
            _ => None,
        }
    }

    /// Unknown names fall back to the default track rather than failing.
    pub fn from_name(name: &str) -> Track {
        Track::parse(name).unwrap_or_else(|| {
            tracing::warn!(name, "unknown track, falling back to {}", Track::default().name());
            Track::default()
        })
    }
}

impl From<String> for Track {
    fn from(name: String) -> Self {
        Track::from_name(&name)
    }
}

// the externally observable events; one per kick/snare/bass/lead voice
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BeatTag {
    Kick,
    Snare,
    Bass,
    Lead,
}

impl BeatTag {
    pub const ALL: [BeatTag; 4] = [BeatTag::Kick, BeatTag::Snare, BeatTag::Bass, BeatTag::Lead];

    pub fn index(self) -> usize {
        match self {
            BeatTag::Kick => 0,
            BeatTag::Snare => 1,
            BeatTag::Bass => 2,
            BeatTag::Lead => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BeatTag::Kick => "KICK",
            BeatTag::Snare => "SNARE",
            BeatTag::Bass => "BASS",
            BeatTag::Lead => "LEAD",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Beat {
    pub time: f64, // render clock seconds, exactly as scheduled
    pub tag: BeatTag,
}

#[derive(Clone, Debug, PartialEq)]
pub enum InputEvent {
    PlayPress,
    SelectTrack(Track),
    MuteToggle,
    Quit,
}

#[derive(Clone, Debug)]
pub struct DisplayState {
    pub leds: [LedState; NUM_PADS], // one per tick of the bar
    pub playing: bool,
    pub muted: bool,
    pub track: Track,
    pub pending_track: Option<Track>, // crossfade in progress
    pub section: &'static str,
    pub bar: u32,
    pub tick: u8,
    pub bpm: f64,
    pub lamps: [bool; 4], // indexed by BeatTag::index
}

impl Default for DisplayState {
    fn default() -> Self {
        Self {
            leds: [LedState::Off; NUM_PADS],
            playing: false,
            muted: false,
            track: Track::default(),
            pending_track: None,
            section: "",
            bar: 0,
            tick: 0,
            bpm: 0.0,
            lamps: [false; 4],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedState {
    Off,
    OnMedium,
    OnHigh,
}
