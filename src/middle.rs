// Sits between the terminal and the player: turns key events into transport
// calls and turns engine snapshots plus beat notifications into the
// DisplayState the TUI draws. Beats arrive up to one lookahead early, so they
// wait here until the render clock catches up with them.

use crossbeam_channel::Receiver;

use crate::audio_api::SignalBackend;
use crate::pipeline::Player;
use crate::pipeline::scheduler::EngineSnapshot;
use crate::shared::{Beat, BeatTag, DisplayState, InputEvent, LedState, NUM_PADS, TICKS_PER_BAR};

const BEAT_QUEUE: usize = 256;
const LAMP_HOLD: f64 = 0.12; // seconds a beat lamp stays lit

pub struct Middle<B: SignalBackend + 'static> {
    player: Player<B>,
    beat_rx: Receiver<Beat>,
    due: Vec<Beat>, // scheduled but not yet audible
    lit_until: [f64; 4],
    display: DisplayState,
}

impl<B: SignalBackend + 'static> Middle<B> {
    pub fn new(mut player: Player<B>) -> Self {
        let (tx, beat_rx) = crossbeam_channel::bounded(BEAT_QUEUE);
        player.subscribe(Box::new(move |beat| {
            let _ = tx.try_send(beat); // a full queue only costs a lamp flash
        }));
        let mut middle = Self { player, beat_rx, due: Vec::new(), lit_until: [f64::NEG_INFINITY; 4], display: DisplayState::default() };
        middle.tick();
        middle
    }

    pub fn player(&self) -> &Player<B> {
        &self.player
    }

    pub fn player_mut(&mut self) -> &mut Player<B> {
        &mut self.player
    }

    /// Apply one input. Returns true when the app should quit.
    pub fn handle_input(&mut self, event: InputEvent) -> bool {
        match event {
            InputEvent::PlayPress => {
                self.player.toggle();
            }
            InputEvent::SelectTrack(track) => {
                self.player.switch_track(track);
            }
            InputEvent::MuteToggle => {
                self.player.toggle_enabled();
            }
            InputEvent::Quit => return true,
        }
        self.tick();
        false
    }

    // called every frame
    pub fn tick(&mut self) {
        self.due.extend(self.beat_rx.try_iter());
        let snap = self.player.snapshot();
        self.light_due_beats(snap.now);
        self.display = build_display(&snap, &self.lit_until);
    }

    fn light_due_beats(&mut self, now: f64) {
        let lit_until = &mut self.lit_until;
        self.due.retain(|beat| {
            if beat.time > now {
                return true;
            }
            let slot = &mut lit_until[beat.tag.index()];
            *slot = slot.max(beat.time + LAMP_HOLD);
            false
        });
    }

    pub fn display_state(&self) -> &DisplayState {
        &self.display
    }
}

// The transport runs a lookahead ahead of what is audible; step back by the
// number of ticks still queued to find the one playing now.
fn audible_tick(snap: &EngineSnapshot) -> u8 {
    let t = &snap.transport;
    if !t.is_playing {
        return t.tick;
    }
    let queued = ((t.next_event_time - snap.now) / t.note_length()).ceil().max(0.0) as i64;
    (t.tick as i64 - queued).rem_euclid(TICKS_PER_BAR as i64) as u8
}

fn build_display(snap: &EngineSnapshot, lit_until: &[f64; 4]) -> DisplayState {
    let t = &snap.transport;
    let tick = audible_tick(snap);
    let mut leds = [LedState::Off; NUM_PADS];
    for (i, led) in leds.iter_mut().enumerate() {
        if t.is_playing && i == tick as usize {
            *led = LedState::OnHigh;
        } else if i % 4 == 0 {
            *led = LedState::OnMedium; // quarter notes
        }
    }
    let mut lamps = [false; 4];
    for tag in BeatTag::ALL {
        lamps[tag.index()] = snap.now < lit_until[tag.index()];
    }
    DisplayState {
        leds,
        playing: t.is_playing,
        muted: !snap.enabled,
        track: t.current_track,
        pending_track: snap.pending_track,
        section: t.section().label(),
        bar: t.bar,
        tick,
        bpm: t.tempo_bpm,
        lamps,
    }
}
