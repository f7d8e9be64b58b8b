use procscore::shared::{LedState, NUM_PADS};
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Style};
use ratatui::widgets::{Block, Borders};
use ratatui::Frame;

const COLS: usize = 4;
const ROWS: usize = 4;

// one cell per sixteenth of the bar, four beats to a row
pub fn draw_tick_grid(frame: &mut Frame, area: Rect, leds: &[LedState; NUM_PADS]) {
    let row_constraints = [Constraint::Percentage(25); ROWS];
    let col_constraints = [Constraint::Percentage(25); COLS];

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints(row_constraints)
        .split(area);

    for (row_idx, row_area) in rows.iter().enumerate() {
        let cols = Layout::default()
            .direction(Direction::Horizontal)
            .constraints(col_constraints)
            .split(*row_area);

        for (col_idx, cell_area) in cols.iter().enumerate() {
            let style = match leds[row_idx * COLS + col_idx] {
                LedState::OnHigh => Style::default().fg(Color::LightMagenta).bg(Color::Magenta),
                LedState::OnMedium => Style::default().fg(Color::Magenta),
                LedState::Off => Style::default().fg(Color::DarkGray),
            };
            let block = Block::default()
                .borders(Borders::ALL)
                .border_style(style)
                .style(style);
            frame.render_widget(block, *cell_area);
        }
    }
}
