//! Minimal TUI for prompt input.
//!
//! Renders a single-line input popup, used when `generate` is called without
//! a prompt.

use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
    Frame, Terminal,
};
use std::io::{self, Stdout};
use tui_input::backend::crossterm::EventHandler;
use tui_input::Input;

/// Result of the TUI interaction.
pub enum TuiResult {
    /// User submitted a prompt.
    Prompt(String),
    /// User cancelled (Escape).
    Cancelled,
}

/// Run the TUI and return the user's prompt. `title` labels the popup.
pub fn run_tui(title: &str, initial_prompt: Option<String>) -> Result<TuiResult> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run the input loop
    let result = run_input_loop(&mut terminal, title, initial_prompt);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;

    result
}

/// The main input loop.
fn run_input_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    title: &str,
    initial_prompt: Option<String>,
) -> Result<TuiResult> {
    let mut input = Input::default();

    // Set initial value if provided
    if let Some(prompt) = initial_prompt {
        input = input.with_value(prompt);
    }

    loop {
        // Draw the UI
        terminal.draw(|frame| draw_ui(frame, title, &input))?;

        // Handle events
        if let Event::Key(key) = event::read()? {
            // Only handle key press events (not release)
            if key.kind != KeyEventKind::Press {
                continue;
            }

            match key.code {
                KeyCode::Enter => {
                    let prompt = input.value().trim().to_string();
                    if prompt.is_empty() {
                        return Ok(TuiResult::Cancelled);
                    }
                    return Ok(TuiResult::Prompt(prompt));
                }
                KeyCode::Esc => {
                    return Ok(TuiResult::Cancelled);
                }
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                    return Ok(TuiResult::Cancelled);
                }
                _ => {
                    // Handle other input events
                    input.handle_event(&Event::Key(key));
                }
            }
        }
    }
}

/// Draw the TUI.
fn draw_ui(frame: &mut Frame, title: &str, input: &Input) {
    let size = frame.area();

    // Input line plus a key hint, inside a border
    let popup_width = size.width.saturating_sub(4).min(100);
    let popup_height = 4;
    let popup_area = centered_rect(popup_width, popup_height, size);

    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .title(format!(" {} ", title))
        .title_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let inner_area = block.inner(popup_area);
    frame.render_widget(block, popup_area);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Length(1)])
        .split(inner_area);

    let (visible_value, scroll) =
        visible_window(input.value(), input.visual_cursor(), rows[0].width as usize);

    frame.render_widget(
        Paragraph::new(Line::from(Span::styled(
            visible_value,
            Style::default().fg(Color::White),
        ))),
        rows[0],
    );
    frame.render_widget(
        Paragraph::new(Line::from(Span::styled(
            "enter: generate  esc: cancel",
            Style::default().fg(Color::DarkGray),
        ))),
        rows[1],
    );

    let cursor_x = rows[0].x + (input.visual_cursor() - scroll) as u16;
    frame.set_cursor_position((cursor_x, rows[0].y));
}

/// The slice of `value` that fits in `width` columns with the cursor in view,
/// and how many characters were scrolled off the left.
fn visible_window(value: &str, cursor: usize, width: usize) -> (String, usize) {
    let scroll = if width > 0 && cursor >= width {
        cursor - width + 1
    } else {
        0
    };
    (value.chars().skip(scroll).take(width).collect(), scroll)
}

/// Create a centered rectangle.
fn centered_rect(width: u16, height: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length((area.height.saturating_sub(height)) / 2),
            Constraint::Length(height),
            Constraint::Min(0),
        ])
        .split(area);

    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Length((area.width.saturating_sub(width)) / 2),
            Constraint::Length(width),
            Constraint::Min(0),
        ])
        .split(vertical[1]);

    horizontal[1]
}
