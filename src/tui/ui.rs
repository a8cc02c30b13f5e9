use ratatui::Frame;
use ratatui::layout::{Constraint, Direction as LayoutDirection, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};

use super::app::{App, Direction, Entry};

/// Seconds a status message stays visible.
const STATUS_TTL_SECS: u64 = 5;

pub fn draw(frame: &mut Frame, app: &App) {
    let area = frame.area();

    // Main border.
    let status = if app.connected {
        "Connected"
    } else {
        "Disconnected, reconnecting"
    };
    let block = Block::default()
        .title(format!(" serlink -- {} ", app.device))
        .title_bottom(format!(" {status} "))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(if app.connected {
            Color::Green
        } else {
            Color::Red
        }));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    // Layout: scrollback, status line, input line, help bar.
    let chunks = Layout::default()
        .direction(LayoutDirection::Vertical)
        .constraints([
            Constraint::Min(0),    // scrollback
            Constraint::Length(1), // status
            Constraint::Length(1), // input
            Constraint::Length(1), // help bar
        ])
        .split(inner);

    render_scrollback(frame, app, chunks[0]);
    frame.render_widget(Paragraph::new(render_status(app)), chunks[1]);
    frame.render_widget(Paragraph::new(render_input(app)), chunks[2]);

    let help_chunks = Layout::default()
        .direction(LayoutDirection::Horizontal)
        .constraints([Constraint::Min(0), Constraint::Length(40)])
        .split(chunks[3]);
    frame.render_widget(Paragraph::new(render_help()), help_chunks[0]);
    frame.render_widget(Paragraph::new(render_stats(app)), help_chunks[1]);
}

fn render_scrollback(frame: &mut Frame, app: &App, area: Rect) {
    if app.scrollback.is_empty() || area.height == 0 {
        return;
    }

    let visible = area.height as usize;
    let start = app.scrollback.len().saturating_sub(visible);
    let lines: Vec<Line<'static>> = app
        .scrollback
        .iter()
        .skip(start)
        .map(render_entry)
        .collect();

    frame.render_widget(Paragraph::new(lines), area);
}

fn render_entry(entry: &Entry) -> Line<'static> {
    let (marker, color) = match entry.direction {
        Direction::Rx => ("< ", Color::Green),
        Direction::Tx => ("> ", Color::Cyan),
    };
    let text_style = if entry.undecodable {
        Style::default()
            .fg(Color::Red)
            .add_modifier(Modifier::ITALIC)
    } else {
        Style::default().fg(Color::White)
    };

    Line::from(vec![
        Span::styled(marker, Style::default().fg(color)),
        Span::styled(entry.text.clone(), text_style),
    ])
}

fn render_status(app: &App) -> Line<'static> {
    match &app.status {
        Some((at, msg)) if at.elapsed().as_secs() < STATUS_TTL_SECS => Line::from(Span::styled(
            format!("  {msg}"),
            Style::default().fg(Color::Yellow),
        )),
        _ => Line::default(),
    }
}

fn render_input(app: &App) -> Line<'static> {
    Line::from(vec![
        Span::styled(
            "> ",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(app.input.clone()),
        Span::styled("\u{2588}", Style::default().fg(Color::DarkGray)),
    ])
}

fn render_help() -> Line<'static> {
    Line::from(Span::styled(
        "  Enter send  Esc clear input  ^L clear buffer  ^K drop lines  ^C quit",
        Style::default().fg(Color::DarkGray),
    ))
}

fn render_stats(app: &App) -> Line<'static> {
    Line::from(vec![
        Span::raw(format!("Baud {}  ", app.baud_rate)),
        Span::styled(
            format!("Tx: {:>5}", app.tx_lines),
            Style::default().fg(Color::Cyan),
        ),
        Span::raw("  "),
        Span::styled(
            format!("Rx: {:>5}", app.rx_lines),
            Style::default().fg(Color::Green),
        ),
    ])
}
