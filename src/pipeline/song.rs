// The fixed musical material: section map, scales and the sequences the
// pattern generator walks through.

use crate::shared::Track;

pub const DEFAULT_FREQ: f64 = 440.0; // used when a scale name is unknown

/// Song sections as half-open bar ranges. OUTRO is unbounded above.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Section {
    Intro,
    Verse,
    Chorus,
    Breakdown,
    Build,
    Outro,
}

// (section, first bar); each section runs until the next one starts
const SECTION_MAP: [(Section, u32); 6] = [
    (Section::Intro, 0),
    (Section::Verse, 4),
    (Section::Chorus, 16),
    (Section::Breakdown, 32),
    (Section::Build, 40),
    (Section::Outro, 48),
];

impl Section {
    pub const ALL: [Section; 6] = [
        Section::Intro,
        Section::Verse,
        Section::Chorus,
        Section::Breakdown,
        Section::Build,
        Section::Outro,
    ];

    pub fn at(bar: u32) -> Section {
        SECTION_MAP
            .iter()
            .rev()
            .find(|(_, start)| bar >= *start)
            .map(|(s, _)| *s)
            .unwrap_or(Section::Intro)
    }

    /// Bar range `[start, end)`; `end` is `None` for the open-ended outro.
    pub fn range(self) -> (u32, Option<u32>) {
        let i = SECTION_MAP.iter().position(|(s, _)| *s == self).unwrap_or(0);
        (SECTION_MAP[i].1, SECTION_MAP.get(i + 1).map(|(_, start)| *start))
    }

    pub fn contains(self, bar: u32) -> bool {
        let (start, end) = self.range();
        bar >= start && end.is_none_or(|e| bar < e)
    }

    pub fn label(self) -> &'static str {
        match self {
            Section::Intro => "INTRO",
            Section::Verse => "VERSE",
            Section::Chorus => "CHORUS",
            Section::Breakdown => "BREAKDOWN",
            Section::Build => "BUILD",
            Section::Outro => "OUTRO",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Scale {
    pub name: &'static str,
    pub freqs: &'static [f64],
}

pub const MAIN_THEME: Scale = Scale {
    name: "mainTheme",
    freqs: &[130.81, 146.83, 155.56, 174.61, 196.00, 207.65, 233.08],
};

pub const AMBIENT: Scale = Scale {
    name: "ambient",
    freqs: &[110.00, 130.81, 146.83, 164.81, 196.00],
};

impl Scale {
    pub fn named(name: &str) -> Option<&'static Scale> {
        [&MAIN_THEME, &AMBIENT].into_iter().find(|s| s.name == name)
    }

    pub fn for_track(track: Track) -> &'static Scale {
        match track {
            Track::Ambient => &AMBIENT,
            Track::MainTheme => &MAIN_THEME,
        }
    }

    pub fn len(&self) -> usize {
        self.freqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.freqs.is_empty()
    }

    /// Frequency of a scale degree, extended across octaves in both
    /// directions: `freqs[i mod n] * 2^floor(i / n)`.
    pub fn freq(&self, index: i32) -> f64 {
        if self.freqs.is_empty() {
            return DEFAULT_FREQ;
        }
        let n = self.freqs.len() as i32;
        let base = self.freqs[index.rem_euclid(n) as usize];
        base * 2f64.powi(index.div_euclid(n))
    }
}

// Lookup by name; an unknown scale plays the default pitch instead of
// dropping the note.
pub fn get_freq(scale: &str, index: i32) -> f64 {
    match Scale::named(scale) {
        Some(s) => s.freq(index),
        None => {
            tracing::warn!(scale, "unknown scale, using {DEFAULT_FREQ} Hz");
            DEFAULT_FREQ
        }
    }
}

// ambient: chord root per pair of bars
pub const AMBIENT_ROOTS: [i32; 4] = [0, 3, 2, 4];

// main theme: bass root per bar
pub const BASS_ROOTS: [i32; 4] = [0, 5, 3, 6];

// main theme lead, one entry per tick; None is a rest. Degrees sit an octave
// above the bass register.
pub const LEAD_MELODY: [Option<i32>; 16] = [
    Some(7),
    None,
    Some(9),
    Some(7),
    None,
    Some(11),
    Some(9),
    None,
    Some(7),
    None,
    Some(4),
    Some(5),
    None,
    Some(4),
    Some(2),
    None,
];

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn exactly_one_section_matches_every_bar() {
        for bar in 0..500 {
            let matching: Vec<_> = Section::ALL.iter().filter(|s| s.contains(bar)).collect();
            assert_eq!(matching.len(), 1, "bar {bar}");
            assert_eq!(*matching[0], Section::at(bar));
        }
        assert_eq!(Section::at(u32::MAX), Section::Outro);
    }

    #[test]
    fn chorus_covers_bars_16_to_31() {
        assert_eq!(Section::Chorus.range(), (16, Some(32)));
        assert_eq!(Section::at(15), Section::Verse);
        assert_eq!(Section::at(20), Section::Chorus);
        assert_eq!(Section::at(32), Section::Breakdown);
        assert_eq!(Section::Outro.range(), (48, None));
    }

    #[test]
    fn octave_property_holds_for_every_index() {
        for scale in [&MAIN_THEME, &AMBIENT] {
            let n = scale.len() as i32;
            for i in -40..40 {
                assert!(close(scale.freq(i + n), 2.0 * scale.freq(i)), "{} {i}", scale.name);
            }
        }
    }

    #[test]
    fn main_theme_scenario() {
        assert!(close(get_freq("mainTheme", 0), 130.81));
        assert!(close(get_freq("mainTheme", 7), 261.62));
        assert!(close(get_freq("mainTheme", -1), 116.54));
    }

    #[test]
    fn unknown_scale_falls_back_to_default_pitch() {
        assert_eq!(get_freq("lydianDominant", 3), DEFAULT_FREQ);
    }

    #[test]
    fn melody_has_rests() {
        assert!(LEAD_MELODY.iter().any(Option::is_none));
        assert!(LEAD_MELODY.iter().any(Option::is_some));
    }
}
