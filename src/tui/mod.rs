/// Ratatui-based TUI for Auralis.
///
/// Architecture:
///   main task:     event loop over crossterm keyboard events + ControllerEvent drain
///   request tasks: tokio::spawn'd by the controller, post results back via UnboundedSender
///
/// Layout (signed in):
///   ┌──────────┬─────────────────────────────────────┐
///   │ sessions │  message log (scrollable, Min(0))   │
///   │          ├─────────────────────────────────────┤
///   │          │  status bar (1 line)                │
///   │          ├─────────────────────────────────────┤
///   │          │  input box (3 lines, fixed)         │
///   └──────────┴─────────────────────────────────────┘
pub mod render;
pub mod chat;
pub mod sidebar;

use std::io;
use std::sync::Arc;

use anyhow::Result;
use crossterm::{
    event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use futures_util::StreamExt;
use ratatui::{Terminal, backend::CrosstermBackend};
use tokio::sync::mpsc;
use tracing::info;

use crate::client::{AuthMode, HttpApi};
use crate::config::ResolvedConfig;
use crate::controller::{ChatController, ControllerEvent};
use crate::store::AuthStore;

// ── Focus ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Focus {
    #[default]
    Input,
    Sidebar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthField {
    #[default]
    Email,
    Password,
}

// ── Auth form ─────────────────────────────────────────────────────────────────

pub struct AuthForm {
    pub mode: AuthMode,
    pub email: String,
    pub password: String,
    pub field: AuthField,
}

impl Default for AuthForm {
    fn default() -> Self {
        Self {
            mode: AuthMode::Login,
            email: String::new(),
            password: String::new(),
            field: AuthField::Email,
        }
    }
}

impl AuthForm {
    fn active_field(&mut self) -> &mut String {
        match self.field {
            AuthField::Email => &mut self.email,
            AuthField::Password => &mut self.password,
        }
    }

    fn next_field(&mut self) {
        self.field = match self.field {
            AuthField::Email => AuthField::Password,
            AuthField::Password => AuthField::Email,
        };
    }
}

// ── View state ────────────────────────────────────────────────────────────────

/// Purely presentational state. Everything about sessions and messages
/// lives in the controller.
pub struct AppState {
    pub focus: Focus,
    pub cursor: usize, // byte offset in the controller's input buffer
    pub scroll: usize, // lines scrolled up in the log
    pub sidebar_selected: usize,
    /// Incremented every 120ms while something is in flight
    pub spinner_tick: u32,
    pub profile: String,
    pub endpoint: String,
    pub auth: AuthForm,
}

impl AppState {
    pub fn new(resolved: &ResolvedConfig) -> Self {
        Self {
            focus: Focus::Input,
            cursor: 0,
            scroll: 0,
            sidebar_selected: 0,
            spinner_tick: 0,
            profile: resolved.profile_name.clone(),
            endpoint: resolved.endpoint.clone(),
            auth: AuthForm::default(),
        }
    }

    /// Reconcile view-only state after the controller changed underneath it.
    fn sync(&mut self, ctl: &ChatController) {
        let s = &ctl.state;
        self.cursor = self.cursor.min(s.input.len());
        if s.authenticated {
            self.auth.password.clear();
        } else {
            self.focus = Focus::Input;
        }
        if self.sidebar_selected >= s.sessions.len() {
            self.sidebar_selected = s.sessions.len().saturating_sub(1);
        }
        if s.sessions.is_empty() && self.focus == Focus::Sidebar {
            self.focus = Focus::Input;
        }
    }
}

fn is_busy(ctl: &ChatController) -> bool {
    let s = &ctl.state;
    s.authenticating
        || s.loading_directory
        || s.loading_history
        || s.creating
        || s.sending
        || ctl.is_revealing()
}

// ── Terminal setup / teardown ─────────────────────────────────────────────────

fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    Ok(Terminal::new(backend)?)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) {
    let _ = disable_raw_mode();
    let _ = execute!(terminal.backend_mut(), LeaveAlternateScreen);
    let _ = terminal.show_cursor();
}

// ── Main TUI run loop ─────────────────────────────────────────────────────────

pub async fn run(resolved: ResolvedConfig) -> Result<()> {
    let mut terminal = setup_terminal()?;

    // Panic hook: restore terminal before printing panic
    let orig_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        orig_hook(info);
    }));

    let result = event_loop(&mut terminal, resolved).await;

    restore_terminal(&mut terminal);
    result
}

async fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    resolved: ResolvedConfig,
) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<ControllerEvent>();

    let api = Arc::new(HttpApi::new(resolved.endpoint.clone(), resolved.request_timeout)?);
    let store = AuthStore::open(resolved.state_path());
    let mut ctl = ChatController::new(api, store, resolved.controller_options(), tx);
    let mut state = AppState::new(&resolved);

    info!(endpoint = %resolved.endpoint, profile = %resolved.profile_name, "tui start");
    ctl.start();

    let mut crossterm_events = EventStream::new();
    let mut ticker = tokio::time::interval(tokio::time::Duration::from_millis(120));

    terminal.draw(|f| render::draw(f, &state, &ctl))?;

    loop {
        tokio::select! {
            // ── Animation tick ────────────────────────────────────────────────
            _ = ticker.tick() => {
                if is_busy(&ctl) {
                    state.spinner_tick = state.spinner_tick.wrapping_add(1);
                    terminal.draw(|f| render::draw(f, &state, &ctl))?;
                }
            }

            // ── Controller events (request results, reveal ticks) ─────────────
            Some(ev) = rx.recv() => {
                ctl.apply(ev);
                state.sync(&ctl);
                terminal.draw(|f| render::draw(f, &state, &ctl))?;
            }

            // ── Keyboard/resize events ────────────────────────────────────────
            Some(Ok(ev)) = crossterm_events.next() => {
                if let Event::Key(key) = ev {
                    if key.kind == KeyEventKind::Press && !handle_key(key, &mut state, &mut ctl) {
                        break;
                    }
                    state.sync(&ctl);
                }
                terminal.draw(|f| render::draw(f, &state, &ctl))?;
            }
        }
    }

    // dropping the controller stops a pending reveal timer
    drop(ctl);
    info!("tui exit");
    Ok(())
}

// ── Key handler ───────────────────────────────────────────────────────────────

/// Returns false when the user asked to quit.
fn handle_key(key: KeyEvent, state: &mut AppState, ctl: &mut ChatController) -> bool {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    if ctrl && key.code == KeyCode::Char('c') {
        return false;
    }
    if ctl.state.authenticated {
        handle_chat_key(key, state, ctl)
    } else {
        handle_auth_key(key, state, ctl)
    }
}

fn handle_auth_key(key: KeyEvent, state: &mut AppState, ctl: &mut ChatController) -> bool {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let form = &mut state.auth;
    match key.code {
        KeyCode::Esc => return false,
        KeyCode::Char('s') if ctrl => {
            form.mode = form.mode.toggled();
            ctl.state.auth_error.clear();
        }
        KeyCode::Tab | KeyCode::BackTab | KeyCode::Up | KeyCode::Down => form.next_field(),
        KeyCode::Enter => {
            if form.field == AuthField::Email {
                form.field = AuthField::Password;
            } else if !ctl.state.authenticating {
                match form.mode {
                    AuthMode::Login => ctl.login(&form.email, &form.password),
                    AuthMode::Signup => ctl.signup(&form.email, &form.password),
                }
            }
        }
        KeyCode::Backspace => {
            form.active_field().pop();
        }
        KeyCode::Char('u') if ctrl => form.active_field().clear(),
        KeyCode::Char(c) if !ctrl => form.active_field().push(c),
        _ => {}
    }
    true
}

fn handle_chat_key(key: KeyEvent, state: &mut AppState, ctl: &mut ChatController) -> bool {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

    // ── Global chords ─────────────────────────────────────────────────────────
    match key.code {
        KeyCode::Char('n') if ctrl => {
            ctl.create_session();
            state.focus = Focus::Input;
            state.scroll = 0;
            return true;
        }
        KeyCode::Char('r') if ctrl => {
            ctl.load_directory();
            return true;
        }
        KeyCode::Char('l') if ctrl => {
            ctl.logout();
            state.scroll = 0;
            return true;
        }
        KeyCode::Tab => {
            state.focus = match state.focus {
                Focus::Input if !ctl.state.sessions.is_empty() => {
                    state.sidebar_selected = active_index(ctl).unwrap_or(0);
                    Focus::Sidebar
                }
                _ => Focus::Input,
            };
            return true;
        }
        KeyCode::PageUp => {
            state.scroll = state.scroll.saturating_add(10);
            return true;
        }
        KeyCode::PageDown => {
            state.scroll = state.scroll.saturating_sub(10);
            return true;
        }
        _ => {}
    }

    // ── Sidebar focused navigation ────────────────────────────────────────────
    if state.focus == Focus::Sidebar {
        match key.code {
            KeyCode::Up => {
                state.sidebar_selected = state.sidebar_selected.saturating_sub(1);
            }
            KeyCode::Down => {
                if state.sidebar_selected + 1 < ctl.state.sessions.len() {
                    state.sidebar_selected += 1;
                }
            }
            KeyCode::Enter => {
                if let Some(s) = ctl.state.sessions.get(state.sidebar_selected) {
                    let id = s.id.clone();
                    ctl.select_session(&id);
                    state.scroll = 0;
                }
                state.focus = Focus::Input;
            }
            KeyCode::Esc => state.focus = Focus::Input,
            // Any char typed while sidebar is focused: unfocus and pass through
            KeyCode::Char(_) => {
                state.focus = Focus::Input;
                return handle_input_key(key, state, ctl);
            }
            _ => {}
        }
        return true;
    }

    if key.code == KeyCode::Esc {
        return false;
    }
    handle_input_key(key, state, ctl)
}

fn handle_input_key(key: KeyEvent, state: &mut AppState, ctl: &mut ChatController) -> bool {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let input = &mut ctl.state.input;
    let cursor = &mut state.cursor;
    *cursor = (*cursor).min(input.len());

    match key.code {
        KeyCode::Enter => {
            if ctl.state.can_send() {
                ctl.submit_input();
                state.cursor = 0;
                state.scroll = 0;
            }
        }
        KeyCode::Backspace if ctrl => input_delete_word(input, cursor),
        KeyCode::Backspace => input_backspace(input, cursor),
        KeyCode::Delete => input_delete_forward(input, cursor),
        KeyCode::Char('w') if ctrl => input_delete_word(input, cursor),
        KeyCode::Char('u') if ctrl => {
            input.clear();
            *cursor = 0;
        }
        KeyCode::Left if ctrl => *cursor = word_left(input, *cursor),
        KeyCode::Right if ctrl => *cursor = word_right(input, *cursor),
        KeyCode::Left => *cursor = prev_char_boundary(input, *cursor),
        KeyCode::Right => *cursor = next_char_boundary(input, *cursor),
        KeyCode::Home => *cursor = 0,
        KeyCode::End => *cursor = input.len(),
        KeyCode::Char(c) if !ctrl => {
            input.insert(*cursor, c);
            *cursor += c.len_utf8();
        }
        _ => {}
    }
    true
}

fn active_index(ctl: &ChatController) -> Option<usize> {
    let active = ctl.state.active_session.as_deref()?;
    ctl.state.sessions.iter().position(|s| s.id == active)
}

// ── Input editing helpers ─────────────────────────────────────────────────────

/// Remove the character immediately before the cursor (UTF-8 safe).
fn input_backspace(input: &mut String, cursor: &mut usize) {
    if *cursor == 0 {
        return;
    }
    let prev = prev_char_boundary(input, *cursor);
    input.drain(prev..*cursor);
    *cursor = prev;
}

/// Delete the character at the cursor position.
fn input_delete_forward(input: &mut String, cursor: &mut usize) {
    if *cursor >= input.len() {
        return;
    }
    let next = next_char_boundary(input, *cursor);
    input.drain(*cursor..next);
}

/// Delete the word immediately before the cursor (stops at whitespace boundary).
fn input_delete_word(input: &mut String, cursor: &mut usize) {
    if *cursor == 0 {
        return;
    }
    let start = word_left(input, *cursor);
    input.drain(start..*cursor);
    *cursor = start;
}

fn prev_char_boundary(s: &str, pos: usize) -> usize {
    s[..pos.min(s.len())]
        .char_indices()
        .next_back()
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn next_char_boundary(s: &str, pos: usize) -> usize {
    s[pos.min(s.len())..]
        .chars()
        .next()
        .map(|c| pos + c.len_utf8())
        .unwrap_or(s.len())
}

/// Jump to the start of the previous word (skip trailing spaces, then the word).
fn word_left(s: &str, mut pos: usize) -> usize {
    let bytes = s.as_bytes();
    while pos > 0 && bytes[pos - 1].is_ascii_whitespace() {
        pos -= 1;
    }
    while pos > 0 && !bytes[pos - 1].is_ascii_whitespace() {
        pos -= 1;
    }
    pos
}

/// Jump past the end of the next word to the right.
fn word_right(s: &str, mut pos: usize) -> usize {
    let bytes = s.as_bytes();
    let len = s.len();
    while pos < len && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    while pos < len && !bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    pos
}
