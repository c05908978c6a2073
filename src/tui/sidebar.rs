/// Session sidebar: left panel listing the server's sessions.
use ratatui::{
    Frame,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem},
};

use super::chat::{spinner_glyph, truncate};
use super::{AppState, Focus};
use crate::controller::ChatController;

pub fn draw_sidebar(f: &mut Frame, state: &AppState, ctl: &ChatController, area: Rect) {
    let s = &ctl.state;
    let focused = state.focus == Focus::Sidebar;
    let border_color = if focused { Color::Cyan } else { Color::Rgb(40, 38, 60) };

    let block = Block::default()
        .borders(Borders::RIGHT)
        .border_style(Style::default().fg(border_color))
        .style(Style::default().bg(Color::Rgb(6, 6, 12)));

    let inner = block.inner(area);
    f.render_widget(block, area);

    let w = inner.width as usize;
    let mut items: Vec<ListItem<'static>> = Vec::new();

    // Header
    let ctrl_hint = if s.loading_directory {
        format!(" {}", spinner_glyph(state.spinner_tick))
    } else if focused {
        " Esc=exit".to_string()
    } else {
        " Tab=focus".to_string()
    };
    let header_pad = w.saturating_sub(9 + ctrl_hint.chars().count());
    items.push(ListItem::new(Line::from(vec![
        Span::styled(" Sessions", Style::default().fg(Color::Rgb(100, 95, 150)).add_modifier(Modifier::BOLD)),
        Span::styled(" ".repeat(header_pad), Style::default()),
        Span::styled(ctrl_hint, Style::default().fg(Color::Rgb(50, 47, 75))),
    ])));
    items.push(ListItem::new(Line::from(vec![
        Span::styled("─".repeat(w), Style::default().fg(Color::Rgb(35, 33, 55))),
    ])));

    if s.sessions.is_empty() {
        let empty = if s.loading_directory { " loading…" } else { " no sessions" };
        items.push(ListItem::new(Line::from(vec![
            Span::styled(empty, Style::default().fg(Color::Rgb(50, 47, 75))),
        ])));
    } else {
        for (i, entry) in s.sessions.iter().enumerate() {
            let selected = focused && i == state.sidebar_selected;
            let is_current = s.active_session.as_deref() == Some(entry.id.as_str());

            // current session = cyan; selected (focused) = bright highlight
            let (bg, bullet_fg, name_fg) = if is_current && selected {
                (Color::Rgb(20, 40, 50), Color::Cyan, Color::Cyan)
            } else if is_current {
                (Color::Rgb(10, 22, 30), Color::Cyan, Color::Cyan)
            } else if selected {
                (Color::Rgb(28, 26, 48), Color::Rgb(160, 155, 220), Color::White)
            } else {
                (Color::Reset, Color::Rgb(60, 57, 90), Color::Rgb(150, 145, 190))
            };

            let bullet = if is_current { "●" } else { "○" };
            let name = truncate(entry.label(), w.saturating_sub(4));
            let gap = w.saturating_sub(3 + unicode_width::UnicodeWidthStr::width(name.as_str()));
            let modifier = if is_current { Modifier::BOLD } else { Modifier::empty() };
            items.push(ListItem::new(Line::from(vec![
                Span::styled(format!(" {bullet} "), Style::default().fg(bullet_fg).bg(bg)),
                Span::styled(name, Style::default().fg(name_fg).bg(bg).add_modifier(modifier)),
                Span::styled(" ".repeat(gap), Style::default().bg(bg)),
            ])));
        }
    }

    // Footer hint
    let footer = if s.creating { " [+] creating…" } else { " [+] New  Ctrl+N" };
    items.push(ListItem::new(Line::raw("")));
    items.push(ListItem::new(Line::from(vec![
        Span::styled(footer, Style::default().fg(Color::Rgb(55, 52, 80))),
    ])));

    f.render_widget(List::new(items), inner);
}
