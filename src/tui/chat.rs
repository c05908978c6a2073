/// Message pane rendering: build_items, draw_history, spinner, utilities.
use ratatui::{
    Frame,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, List, ListItem},
};
use unicode_width::UnicodeWidthStr;

use super::AppState;
use crate::controller::ChatController;
use crate::history::{Message, ROLE_ASSISTANT, ROLE_SYSTEM, ROLE_USER};

// ── Spinner ────────────────────────────────────────────────────────────────────

pub const SPINNER_GLYPHS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

pub fn spinner_glyph(tick: u32) -> &'static str {
    SPINNER_GLYPHS[(tick as usize) % SPINNER_GLYPHS.len()]
}

const CARET: &str = "▌";

// ── History items builder ──────────────────────────────────────────────────────

pub fn build_items(ctl: &ChatController, term_width: u16) -> Vec<ListItem<'static>> {
    let s = &ctl.state;
    let mut items: Vec<ListItem<'static>> = Vec::new();

    if s.log.is_empty() {
        let hint = if s.active_session.is_none() {
            if s.sessions.is_empty() && !s.loading_directory {
                "no chats yet · Ctrl+N to start one"
            } else {
                "no session selected · Tab to pick one · Ctrl+N for a new chat"
            }
        } else if s.loading_history {
            "loading history…"
        } else {
            "say hello"
        };
        items.push(ListItem::new(Line::raw("")));
        items.push(ListItem::new(Line::from(Span::styled(
            format!("  {hint}"),
            Style::default().fg(Color::Rgb(70, 70, 90)).add_modifier(Modifier::ITALIC),
        ))));
        return items;
    }

    // the placeholder currently being revealed is always the newest assistant entry
    let revealing = ctl.is_revealing().then(|| s.log.iter().rposition(|m| m.role == ROLE_ASSISTANT)).flatten();

    for (i, msg) in s.log.iter().enumerate() {
        match msg.role.as_str() {
            ROLE_USER => push_user(&mut items, msg, term_width),
            ROLE_SYSTEM => push_system(&mut items, msg),
            _ => push_labelled(&mut items, msg, term_width, revealing == Some(i)),
        }
    }
    items
}

fn push_user(items: &mut Vec<ListItem<'static>>, msg: &Message, term_width: u16) {
    // Bubble colours
    let bg       = Color::Rgb(28, 26, 52);
    let border   = Color::Rgb(110, 90, 200);
    let label_fg = Color::Rgb(160, 140, 255);
    let text_fg  = Color::Rgb(235, 232, 255);
    let body_style = Style::default().fg(text_fg).bg(bg);
    let edge_style = Style::default().fg(border).bg(bg);

    // 2 chars left margin, 1 right margin
    let inner_w = (term_width as usize).saturating_sub(3).max(10);
    let top_dashes = "─".repeat(inner_w.saturating_sub(4 + 5));
    items.push(ListItem::new(Line::from(vec![
        Span::raw("  "),
        Span::styled("╭─ ", edge_style),
        Span::styled("you", Style::default().fg(label_fg).bg(bg).add_modifier(Modifier::BOLD)),
        Span::styled(format!(" {top_dashes}╮"), edge_style),
    ])));

    let wrap_width = inner_w.saturating_sub(2).max(10);
    let raw_lines: Vec<&str> = if msg.content.is_empty() { vec![""] } else { msg.content.lines().collect() };
    for line in raw_lines.iter().flat_map(|l| wrap_text(l, wrap_width)) {
        items.push(ListItem::new(Line::from(vec![
            Span::raw("  "),
            Span::styled("│ ", edge_style),
            Span::styled(line, body_style),
        ])));
    }

    let bot_dashes = "─".repeat(inner_w.saturating_sub(2));
    items.push(ListItem::new(Line::from(vec![
        Span::raw("  "),
        Span::styled(format!("╰{bot_dashes}╯"), edge_style),
    ])));
    items.push(ListItem::new(Line::raw("")));
}

fn push_system(items: &mut Vec<ListItem<'static>>, msg: &Message) {
    let color = if msg.content.starts_with('⚠') { Color::Rgb(230, 120, 80) } else { Color::Yellow };
    for line in msg.content.lines() {
        items.push(ListItem::new(Line::from(vec![
            Span::raw("  "),
            Span::styled(line.to_string(), Style::default().fg(color)),
        ])));
    }
    items.push(ListItem::new(Line::raw("")));
}

/// Assistant replies, plus any role the server invents, under a role label.
fn push_labelled(items: &mut Vec<ListItem<'static>>, msg: &Message, term_width: u16, revealing: bool) {
    let (label, label_fg, text_fg) = if msg.role == ROLE_ASSISTANT {
        ("auralis".to_string(), Color::Rgb(0, 210, 210), Color::Rgb(210, 230, 255))
    } else {
        (msg.role.clone(), Color::Rgb(120, 120, 150), Color::Rgb(170, 170, 190))
    };
    let indent = label.width() + 4;
    let wrap_width = (term_width as usize).saturating_sub(indent).max(20);

    let mut lines: Vec<String> = if msg.content.is_empty() {
        vec![String::new()]
    } else {
        msg.content.lines().flat_map(|l| wrap_text(l, wrap_width)).collect()
    };
    if revealing {
        if let Some(last) = lines.last_mut() {
            last.push_str(CARET);
        }
    }

    for (n, w) in lines.into_iter().enumerate() {
        let lead = if n == 0 {
            vec![
                Span::raw("  "),
                Span::styled(label.clone(), Style::default().fg(label_fg).add_modifier(Modifier::BOLD)),
                Span::raw("  "),
            ]
        } else {
            vec![Span::raw(" ".repeat(indent))]
        };
        let mut spans = lead;
        spans.push(Span::styled(w, Style::default().fg(text_fg)));
        items.push(ListItem::new(Line::from(spans)));
    }
    items.push(ListItem::new(Line::raw("")));
}

// ── Draw functions ─────────────────────────────────────────────────────────────

pub fn draw_history(f: &mut Frame, state: &AppState, ctl: &ChatController, area: Rect) {
    let all_items = build_items(ctl, area.width);
    let total = all_items.len();
    let visible = area.height as usize;

    let skip = if total > visible {
        (total - visible).saturating_sub(state.scroll)
    } else {
        0
    };

    let sliced: Vec<ListItem<'static>> = all_items.into_iter().skip(skip).collect();
    let list = List::new(sliced)
        .block(Block::default().style(Style::default().bg(Color::Rgb(8, 8, 14))));
    f.render_widget(list, area);
}

// ── Utilities ──────────────────────────────────────────────────────────────────

/// Word-wrap a single line of text to `max_width` columns.
/// Splits on whitespace; a word wider than max_width gets a line to itself.
pub fn wrap_text(text: &str, max_width: usize) -> Vec<String> {
    if text.is_empty() {
        return vec![String::new()];
    }
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_width = 0usize;

    for word in text.split_whitespace() {
        let word_width = word.width();
        if current_width == 0 {
            current.push_str(word);
            current_width = word_width;
        } else if current_width + 1 + word_width <= max_width {
            current.push(' ');
            current.push_str(word);
            current_width += 1 + word_width;
        } else {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
            current_width = word_width;
        }
    }
    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

/// Cut to `max` columns, marking the cut with an ellipsis.
pub fn truncate(text: &str, max: usize) -> String {
    if text.width() <= max {
        return text.to_string();
    }
    let mut out = String::new();
    let mut w = 0;
    for c in text.chars() {
        let cw = unicode_width::UnicodeWidthChar::width(c).unwrap_or(0);
        if w + cw + 1 > max {
            break;
        }
        out.push(c);
        w += cw;
    }
    out.push('…');
    out
}
