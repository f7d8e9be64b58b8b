use procscore::shared::{BeatTag, DisplayState};
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};
use ratatui::Frame;

use super::grid;

const HELP: &str = "space play/stop   1 ambient   2 main theme   m mute   q quit";

pub fn render(frame: &mut Frame, area: Rect, state: &DisplayState) {
    let sections = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(6), // status screen
            Constraint::Length(3), // beat lamps
            Constraint::Min(8),    // tick grid
            Constraint::Length(1), // key help
        ])
        .split(area);

    draw_screen(frame, sections[0], state);
    draw_lamps(frame, sections[1], state);
    grid::draw_tick_grid(frame, sections[2], &state.leds);
    frame.render_widget(Paragraph::new(HELP).style(Style::default().fg(Color::DarkGray)), sections[3]);
}

fn draw_screen(frame: &mut Frame, area: Rect, state: &DisplayState) {
    let transport = if state.playing { "PLAYING" } else { "STOPPED" };
    let mut track = Span::styled(state.track.name(), Style::default().add_modifier(Modifier::BOLD));
    if state.muted {
        track = track.style(Style::default().fg(Color::DarkGray).add_modifier(Modifier::CROSSED_OUT));
    }
    let mut first = vec![Span::raw(format!("{transport:<8} ")), track];
    if let Some(next) = state.pending_track {
        first.push(Span::styled(format!(" -> {}", next.name()), Style::default().fg(Color::Yellow)));
    }
    if state.muted {
        first.push(Span::styled("  MUTED", Style::default().fg(Color::Red)));
    }

    let lines = vec![
        Line::from(first),
        Line::from(format!("{:<10} bar {:>3}:{:02}", state.section, state.bar + 1, state.tick + 1)),
        Line::from(format!("{:.0} bpm", state.bpm)),
    ];
    let block = Block::default().borders(Borders::ALL).title(" procscore ");
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn draw_lamps(frame: &mut Frame, area: Rect, state: &DisplayState) {
    let spans: Vec<Span> = BeatTag::ALL
        .iter()
        .flat_map(|tag| {
            let style = if state.lamps[tag.index()] {
                Style::default().fg(Color::Black).bg(lamp_color(*tag))
            } else {
                Style::default().fg(Color::DarkGray)
            };
            [Span::styled(format!(" {:^7} ", tag.label()), style), Span::raw(" ")]
        })
        .collect();
    let block = Block::default().borders(Borders::ALL);
    frame.render_widget(Paragraph::new(Line::from(spans)).block(block), area);
}

fn lamp_color(tag: BeatTag) -> Color {
    match tag {
        BeatTag::Kick => Color::Red,
        BeatTag::Snare => Color::Yellow,
        BeatTag::Bass => Color::Cyan,
        BeatTag::Lead => Color::Magenta,
    }
}
