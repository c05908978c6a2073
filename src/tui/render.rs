/// Ratatui draw entry-point for Auralis.
/// Thin dispatcher. The message pane lives in chat.rs, the session list in sidebar.rs.
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
};
use unicode_width::UnicodeWidthStr;

use super::chat::{spinner_glyph, truncate};
use super::{AppState, AuthField, Focus, is_busy};
use crate::client::AuthMode;
use crate::controller::ChatController;

const LOGO: &str = r#"
   ▄▀█ █ █ █▀█ ▄▀█ █   █ █▀
   █▀█ █▄█ █▀▄ █▀█ █▄▄ █ ▄█
"#;

// ── Main draw entry point ─────────────────────────────────────────────────────

pub fn draw(f: &mut Frame, state: &AppState, ctl: &ChatController) {
    if ctl.state.authenticated {
        draw_chat(f, state, ctl);
    } else {
        draw_auth(f, state, ctl);
    }
}

fn draw_chat(f: &mut Frame, state: &AppState, ctl: &ChatController) {
    let area = f.area();

    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(28), Constraint::Min(0)])
        .split(area);
    super::sidebar::draw_sidebar(f, state, ctl, cols[0]);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(0),    // message log
            Constraint::Length(1), // status bar
            Constraint::Length(3), // input box
        ])
        .split(cols[1]);

    super::chat::draw_history(f, state, ctl, chunks[0]);
    draw_status_bar(f, state, ctl, chunks[1]);
    draw_input(f, state, ctl, chunks[2]);
}

// ── Sign-in screen ────────────────────────────────────────────────────────────

fn draw_auth(f: &mut Frame, state: &AppState, ctl: &ChatController) {
    let area = f.area();
    f.render_widget(Block::default().style(Style::default().bg(Color::Rgb(6, 6, 12))), area);

    let form = &state.auth;
    let width = 52.min(area.width);
    let height = 16.min(area.height);
    let card = Rect {
        x: area.x + area.width.saturating_sub(width) / 2,
        y: area.y + area.height.saturating_sub(height) / 2,
        width,
        height,
    };
    f.render_widget(Clear, card);

    let title = match form.mode {
        AuthMode::Login => " Sign in ",
        AuthMode::Signup => " Create account ",
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Rgb(110, 90, 200)))
        .title(Span::styled(title, Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)))
        .style(Style::default().bg(Color::Rgb(8, 8, 14)));
    let inner = block.inner(card);
    f.render_widget(block, card);

    let mut lines: Vec<Line> = LOGO
        .lines()
        .skip(1)
        .map(|l| Line::from(Span::styled(l.to_string(), Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))))
        .collect();
    lines.push(Line::from(Span::styled(
        format!("   {}", truncate(&state.endpoint, inner.width.saturating_sub(4) as usize)),
        Style::default().fg(Color::DarkGray),
    )));
    lines.push(Line::raw(""));

    let field_w = inner.width.saturating_sub(14) as usize;
    let masked = "•".repeat(form.password.chars().count());
    for (label, value, field) in [
        ("email   ", form.email.as_str(), AuthField::Email),
        ("password", masked.as_str(), AuthField::Password),
    ] {
        let active = form.field == field;
        let (marker, label_fg) = if active { ("❯", Color::Cyan) } else { (" ", Color::Rgb(100, 95, 150)) };
        // keep the tail visible while typing
        let shown: String = if value.width() > field_w {
            value.chars().rev().take(field_w).collect::<Vec<_>>().into_iter().rev().collect()
        } else {
            value.to_string()
        };
        lines.push(Line::from(vec![
            Span::styled(format!(" {marker} "), Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
            Span::styled(label, Style::default().fg(label_fg)),
            Span::raw("  "),
            Span::styled(shown, Style::default().fg(Color::White)),
        ]));
    }
    lines.push(Line::raw(""));

    if ctl.state.authenticating {
        lines.push(Line::from(Span::styled(
            format!("   {} {}…", spinner_glyph(state.spinner_tick), form.mode.label()),
            Style::default().fg(Color::Cyan),
        )));
    } else if !ctl.state.auth_error.is_empty() {
        lines.push(Line::from(Span::styled(
            format!("   {}", ctl.state.auth_error),
            Style::default().fg(Color::Red),
        )));
    } else {
        lines.push(Line::raw(""));
    }
    lines.push(Line::raw(""));

    let toggle_hint = match form.mode {
        AuthMode::Login => "Ctrl+S sign up instead",
        AuthMode::Signup => "Ctrl+S sign in instead",
    };
    lines.push(Line::from(Span::styled(
        format!("   Enter submit · Tab field · {toggle_hint} · Esc quit"),
        Style::default().fg(Color::Rgb(70, 70, 90)),
    )));

    f.render_widget(Paragraph::new(lines).wrap(Wrap { trim: false }), inner);
}

// ── Status bar ────────────────────────────────────────────────────────────────

fn draw_status_bar(f: &mut Frame, state: &AppState, ctl: &ChatController, area: Rect) {
    let s = &ctl.state;

    // Animated spinner glyph in status bar while anything is in flight
    let (status_glyph, status_color) = if is_busy(ctl) {
        (spinner_glyph(state.spinner_tick), Color::Cyan)
    } else if !s.error_text.is_empty() {
        ("✗", Color::Red)
    } else {
        ("▲", Color::White)
    };

    let activity = if s.sending {
        "waiting for reply…"
    } else if s.creating {
        "creating session…"
    } else if s.loading_history {
        "loading history…"
    } else if s.loading_directory {
        "loading sessions…"
    } else if ctl.is_revealing() {
        "replying…"
    } else {
        ""
    };

    let mut spans = vec![
        Span::raw(" "),
        Span::styled(status_glyph, Style::default().fg(status_color).add_modifier(Modifier::BOLD)),
        Span::styled(" auralis", Style::default().fg(Color::White).add_modifier(Modifier::BOLD)),
        Span::raw("  "),
        Span::styled(state.profile.clone(), Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::styled("  ·  ", Style::default().fg(Color::DarkGray)),
        Span::styled(truncate(&state.endpoint, 28), Style::default().fg(Color::DarkGray)),
    ];
    if !activity.is_empty() {
        spans.push(Span::styled(format!("  {activity}"), Style::default().fg(Color::Cyan)));
    }
    if !s.error_text.is_empty() {
        spans.push(Span::styled(
            format!("  {}", s.error_text),
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ));
    } else {
        spans.push(Span::styled(
            "  Ctrl+N new  Ctrl+R reload  Ctrl+L logout",
            Style::default().fg(Color::Rgb(55, 50, 90)),
        ));
    }

    let bar_style = if s.sending {
        Style::default().bg(Color::Rgb(15, 15, 25))
    } else {
        Style::default().bg(Color::Rgb(10, 10, 18))
    };
    f.render_widget(Paragraph::new(Line::from(spans)).style(bar_style), area);
}

// ── Input box ─────────────────────────────────────────────────────────────────

fn draw_input(f: &mut Frame, state: &AppState, ctl: &ChatController, area: Rect) {
    let s = &ctl.state;
    let (border_color, prompt_color, prompt_char) = if state.focus == Focus::Sidebar {
        (Color::Rgb(40, 40, 60), Color::DarkGray, "◈")
    } else if s.sending {
        (Color::Rgb(40, 40, 60), Color::DarkGray, "·")
    } else if s.active_session.is_none() {
        (Color::Rgb(40, 40, 60), Color::DarkGray, "❯")
    } else {
        (Color::Rgb(60, 60, 80), Color::Cyan, "❯")
    };

    let prompt_span = Span::styled(
        format!("  {prompt_char} "),
        Style::default().fg(prompt_color).add_modifier(Modifier::BOLD),
    );

    let content_span = if s.input.is_empty() {
        let hint = if state.focus == Focus::Sidebar {
            "↑↓ choose · Enter open · Esc back"
        } else if s.active_session.is_none() {
            "select a session first · Tab sessions · Ctrl+N new chat"
        } else {
            "message · Enter send · Tab sessions · PgUp/PgDn scroll"
        };
        Span::styled(hint, Style::default().fg(Color::Rgb(70, 70, 90)))
    } else {
        Span::styled(s.input.clone(), Style::default().fg(Color::White))
    };

    let block = Block::default()
        .borders(Borders::TOP)
        .border_style(Style::default().fg(border_color))
        .style(Style::default().bg(Color::Rgb(8, 8, 14)));

    let paragraph = Paragraph::new(Line::from(vec![prompt_span, content_span]))
        .block(block)
        .wrap(Wrap { trim: false });
    f.render_widget(paragraph, area);

    // Position cursor at the actual edit cursor, not end of string
    if state.focus == Focus::Input {
        // prompt is "  ❯ ", 4 visible cols
        let prompt_width: u16 = 4;
        let before = &s.input[..state.cursor.min(s.input.len())];
        let cursor_x = area.x + prompt_width + before.width() as u16;
        let cursor_y = area.y + 1; // +1 for top border
        if cursor_x < area.x + area.width {
            f.set_cursor_position((cursor_x, cursor_y));
        }
    }
}
