//! TUI rendering logic using ratatui.

use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, Paragraph},
    Frame,
};

use super::state::{ErrorInfo, ServiceRow, TuiState};
use crate::progress::SessionPhase;
use crate::services::Tier;

/// Colour of a service tier. Pending rows are grey.
pub fn tier_color(tier: Option<Tier>) -> Color {
    match tier {
        Some(Tier::Ok) => Color::Green,
        Some(Tier::Slow) => Color::Yellow,
        Some(Tier::Error) => Color::Red,
        Some(Tier::Checking) => Color::Cyan,
        None => Color::DarkGray,
    }
}

pub fn tier_symbol(tier: Option<Tier>) -> &'static str {
    match tier {
        Some(Tier::Ok) => "●",
        Some(Tier::Slow) => "◐",
        Some(Tier::Error) => "✗",
        Some(Tier::Checking) => "…",
        None => "·",
    }
}

/// Minimal mode threshold in columns.
const MINIMAL_MODE_THRESHOLD: u16 = 60;

pub fn is_minimal_mode(width: u16) -> bool {
    width < MINIMAL_MODE_THRESHOLD
}

/// Entry point: chooses the full or the compact layout by width.
pub fn render_frame(frame: &mut Frame, state: &TuiState) {
    if is_minimal_mode(frame.area().width) {
        render_minimal_frame(frame, state);
    } else {
        render_normal_frame(frame, state);
    }
}

fn render_normal_frame(frame: &mut Frame, state: &TuiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Connection
            Constraint::Length(2), // Phase
            Constraint::Length(2), // Gauge
            Constraint::Min(4),    // Services or error
            Constraint::Length(1), // Status bar
        ])
        .split(frame.area());

    render_connection(frame, chunks[0], state);
    render_phase_indicator(frame, chunks[1], state);
    render_progress(frame, chunks[2], state);
    match state.error {
        Some(ref error) => render_error(frame, chunks[3], error),
        None => render_services(frame, chunks[3], state),
    }
    render_status_bar(frame, chunks[4], state);
}

/// Compact layout for narrow terminals: one line each.
pub fn render_minimal_frame(frame: &mut Frame, state: &TuiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Min(1),
        ])
        .split(frame.area());

    let phase = Paragraph::new(format!("{} {}%", state.phase.label(), state.percent))
        .style(phase_style(state.phase));
    frame.render_widget(phase, chunks[0]);

    let (settled, total) = state.services_settled();
    let services = Paragraph::new(format!("services {}/{}", settled, total))
        .style(Style::default().fg(Color::White));
    frame.render_widget(services, chunks[1]);

    if let Some(ref error) = state.error {
        render_error(frame, chunks[2], error);
    }
}

pub fn render_connection(frame: &mut Frame, area: Rect, state: &TuiState) {
    let block = Block::default()
        .borders(Borders::BOTTOM)
        .border_style(Style::default().fg(Color::DarkGray));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let label = Style::default().fg(Color::White).add_modifier(Modifier::BOLD);
    let value = Style::default().fg(Color::Cyan);

    let mut lines = Vec::new();
    if let Some(ref conn) = state.connection {
        let ip = conn.ip.as_deref().unwrap_or("unknown");
        let country = conn.country.as_deref().unwrap_or("??");
        lines.push(Line::from(vec![
            Span::styled("IP: ", label),
            Span::styled(format!("{} ({})", ip, country), value),
        ]));
        if let Some(ref colo) = conn.colo {
            lines.push(Line::from(vec![
                Span::styled("Edge: ", label),
                Span::styled(colo.clone(), value),
            ]));
        }
    } else {
        lines.push(Line::from(Span::styled(
            "Connection details unavailable",
            Style::default().fg(Color::DarkGray),
        )));
    }

    frame.render_widget(Paragraph::new(lines), inner);
}

fn phase_style(phase: SessionPhase) -> Style {
    match phase {
        SessionPhase::Complete => {
            Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
        }
        _ => Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
    }
}

pub fn render_phase_indicator(frame: &mut Frame, area: Rect, state: &TuiState) {
    let text = match state.phase {
        SessionPhase::Idle => "◐ Starting...".to_string(),
        SessionPhase::Complete => "✓ Complete".to_string(),
        phase => format!("▶ {}", phase.label()),
    };
    frame.render_widget(Paragraph::new(text).style(phase_style(state.phase)), area);
}

fn render_progress(frame: &mut Frame, area: Rect, state: &TuiState) {
    let label = if state.label.is_empty() {
        format!("{}%", state.percent)
    } else {
        format!("{}% {}", state.percent, state.label)
    };
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::NONE))
        .gauge_style(Style::default().fg(Color::Cyan))
        .percent(u16::from(state.percent.min(100)))
        .label(label);
    frame.render_widget(gauge, area);
}

fn service_line(row: &ServiceRow) -> Line<'_> {
    let color = tier_color(row.tier());
    Line::from(vec![
        Span::styled(format!("{} ", tier_symbol(row.tier())), Style::default().fg(color)),
        Span::styled(
            format!("{:<12}", row.name),
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        ),
        Span::styled(row.detail().to_string(), Style::default().fg(color)),
    ])
}

pub fn render_services(frame: &mut Frame, area: Rect, state: &TuiState) {
    let block = Block::default()
        .title("Services")
        .borders(Borders::TOP)
        .border_style(Style::default().fg(Color::DarkGray));
    let lines: Vec<Line> = state.services.iter().map(service_line).collect();
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_error(frame: &mut Frame, area: Rect, error: &ErrorInfo) {
    let mut lines = vec![Line::from(Span::styled(
        format!("Error: {}", error.message),
        Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
    ))];

    if let Some(ref suggestion) = error.suggestion {
        lines.push(Line::from(Span::styled(
            format!("Suggestion: {}", suggestion),
            Style::default().fg(Color::Yellow),
        )));
    }

    frame.render_widget(Paragraph::new(lines), area);
}

pub fn render_status_bar(frame: &mut Frame, area: Rect, state: &TuiState) {
    let text = match state.phase {
        SessionPhase::Complete => "Done. Press q to exit.".to_string(),
        SessionPhase::Services => {
            let (settled, total) = state.services_settled();
            format!("Checking services ({}/{})... q to quit", settled, total)
        }
        _ => "q to quit".to_string(),
    };
    frame.render_widget(
        Paragraph::new(text).style(Style::default().fg(Color::DarkGray)),
        area,
    );
}
