use std::time::Duration;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use procscore::shared::{InputEvent, Track};

// poll for input from the terminal and resolve key presses to input events
pub fn poll_input(timeout: Duration) -> anyhow::Result<Vec<InputEvent>> {
    if !event::poll(timeout)? {
        return Ok(vec![]);
    }

    if let Event::Key(key) = event::read()? {
        if key.kind != KeyEventKind::Press {
            return Ok(vec![]);
        }
        return Ok(handle_key(key.code));
    }
    Ok(vec![])
}

fn handle_key(code: KeyCode) -> Vec<InputEvent> {
    match code {
        KeyCode::Esc | KeyCode::Char('q') => vec![InputEvent::Quit],
        KeyCode::Char(' ') => vec![InputEvent::PlayPress],
        KeyCode::Char(c @ '1'..='9') => match char_to_track(c) {
            Some(track) => vec![InputEvent::SelectTrack(track)],
            None => vec![],
        },
        KeyCode::Char('m' | 'M') => vec![InputEvent::MuteToggle],
        _ => vec![],
    }
}

// number keys pick tracks in their listed order
fn char_to_track(c: char) -> Option<Track> {
    let idx = c.to_digit(10)?.checked_sub(1)? as usize;
    Track::ALL.get(idx).copied()
}
