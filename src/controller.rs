/// Session/message synchronization controller.
///
/// Owns every piece of state the view renders (`ChatState`) and is the only
/// thing that mutates it. Network calls run as spawned tasks that post a
/// `ControllerEvent` back over the channel; the event loop hands each event
/// to `apply`, one at a time. Every guarded result carries the ticket it was
/// issued with and is dropped if a newer operation of its class has started.
///
/// Session switches (select, create, vanished session, logout) also fence
/// off the in-flight send and stop the reveal timer, so a reply meant for the
/// previous session can't land in the new log.
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::client::{AuthMode, ChatApi, Reply, SessionRef};
use crate::error::ApiError;
use crate::guard::{OpClass, RequestGuard, Ticket};
use crate::history::{self, Message, Pending, ROLE_SYSTEM, ROLE_USER};
use crate::reveal::{RevealCursor, RevealTimer};
use crate::store::AuthStore;

pub const MSG_SELECT_FIRST: &str = "Please select a session first.";
pub const MSG_SESSION_GONE: &str = "This session no longer exists.";
pub const MSG_EMPTY_REPLY: &str = "Empty reply from server.";
pub const MSG_SEND_FAILED: &str = "⚠ Message failed to send.";
pub const MSG_SIGNED_OUT: &str = "Your session has expired. Please sign in again.";

// ── Options ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Title sent when creating a session
    pub default_title: String,
    /// Characters revealed per tick
    pub reveal_chunk: usize,
    pub reveal_interval: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            default_title: "New chat".to_string(),
            reveal_chunk: 3,
            reveal_interval: Duration::from_millis(24),
        }
    }
}

// ── Events ────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ControllerEvent {
    AuthFinished { epoch: u64, result: Result<String, ApiError> },
    DirectoryLoaded { ticket: Ticket, result: Result<Vec<SessionRef>, ApiError> },
    SessionCreated { epoch: u64, result: Result<SessionRef, ApiError> },
    HistoryLoaded { ticket: Ticket, session_id: String, result: Result<Vec<Message>, ApiError> },
    SendFinished { ticket: Ticket, optimistic_id: String, result: Result<Reply, ApiError> },
    RevealTick { generation: u64 },
}

// ── View state ────────────────────────────────────────────────────────────────

/// Everything the view reads. Only the controller writes it.
#[derive(Debug, Default)]
pub struct ChatState {
    pub authenticated: bool,
    pub authenticating: bool,
    /// Shown on the sign-in screen
    pub auth_error: String,

    pub sessions: Vec<SessionRef>,
    pub active_session: Option<String>,
    pub log: Vec<Message>,
    pub input: String,
    /// The single current error line
    pub error_text: String,

    pub loading_directory: bool,
    pub loading_history: bool,
    pub creating: bool,
    pub sending: bool,
}

impl ChatState {
    pub fn can_send(&self) -> bool {
        self.active_session.is_some() && !self.sending && !self.input.trim().is_empty()
    }
}

// ── Controller ────────────────────────────────────────────────────────────────

pub struct ChatController {
    api: Arc<dyn ChatApi>,
    store: AuthStore,
    options: ControllerOptions,
    tx: UnboundedSender<ControllerEvent>,
    guard: RequestGuard,
    /// Bumped on login/logout; results from an older epoch are dropped
    auth_epoch: u64,
    reveal: RevealTimer,
    cursor: Option<RevealCursor>,
    /// Optimistic user messages whose send hasn't settled yet
    pending: Vec<Pending>,
    pub state: ChatState,
}

impl ChatController {
    pub fn new(
        api: Arc<dyn ChatApi>,
        store: AuthStore,
        options: ControllerOptions,
        tx: UnboundedSender<ControllerEvent>,
    ) -> Self {
        let state = ChatState {
            active_session: store.active_session().map(str::to_string),
            ..ChatState::default()
        };
        Self {
            api,
            store,
            options,
            tx,
            guard: RequestGuard::default(),
            auth_epoch: 0,
            reveal: RevealTimer::default(),
            cursor: None,
            pending: Vec::new(),
            state,
        }
    }

    /// Pick up where the last run left off: with a stored credential, go
    /// straight to loading the directory.
    pub fn start(&mut self) {
        if self.store.credential().is_some() {
            self.state.authenticated = true;
            self.load_directory();
        } else {
            self.state.authenticated = false;
        }
    }

    pub fn is_revealing(&self) -> bool {
        self.cursor.is_some() && self.reveal.is_active()
    }

    fn credential(&self) -> Option<String> {
        self.store.credential().map(str::to_string)
    }

    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ControllerEvent> + Send + 'static,
    {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            // receiver gone means the view shut down; nothing left to update
            let _ = tx.send(fut.await);
        });
    }

    fn persist_active(&mut self, id: Option<&str>) {
        let result = match id {
            Some(id) => self.store.set_active_session(id),
            None => self.store.clear_active_session(),
        };
        if let Err(e) = result {
            warn!(error = %e, "failed to persist active session");
        }
    }

    // ── Auth ──────────────────────────────────────────────────────────────────

    pub fn login(&mut self, email: &str, password: &str) {
        self.authenticate(AuthMode::Login, email, password);
    }

    pub fn signup(&mut self, email: &str, password: &str) {
        self.authenticate(AuthMode::Signup, email, password);
    }

    fn authenticate(&mut self, mode: AuthMode, email: &str, password: &str) {
        let email = email.trim().to_string();
        if email.is_empty() || password.is_empty() {
            self.state.auth_error = "Email and password are required.".to_string();
            return;
        }
        self.state.authenticating = true;
        self.state.auth_error.clear();

        let api = self.api.clone();
        let epoch = self.auth_epoch;
        let password = password.to_string();
        info!(?mode, "authenticating");
        self.spawn(async move {
            let result = api.authenticate(mode, &email, &password).await;
            ControllerEvent::AuthFinished { epoch, result }
        });
    }

    /// Drop the credential and every piece of session state. Used for the
    /// explicit logout intent and for any 401.
    pub fn logout(&mut self) {
        info!("logging out");
        if let Err(e) = self.store.clear_all() {
            warn!(error = %e, "failed to clear stored credential");
        }
        self.guard.invalidate_all();
        self.auth_epoch += 1;
        self.stop_reveal();
        self.pending.clear();
        self.state = ChatState::default();
    }

    fn expire(&mut self) {
        self.logout();
        self.state.auth_error = MSG_SIGNED_OUT.to_string();
    }

    // ── Directory ─────────────────────────────────────────────────────────────

    pub fn load_directory(&mut self) {
        let ticket = self.guard.issue(OpClass::Directory);
        self.state.loading_directory = true;
        self.state.error_text.clear();
        debug!(?ticket, "load directory");

        let api = self.api.clone();
        let auth = self.credential();
        self.spawn(async move {
            let result = api.list_sessions(auth.as_deref()).await;
            ControllerEvent::DirectoryLoaded { ticket, result }
        });
    }

    fn on_directory(&mut self, ticket: Ticket, result: Result<Vec<SessionRef>, ApiError>) {
        if !self.guard.is_current(ticket) {
            debug!(?ticket, "stale directory result dropped");
            return;
        }
        self.state.loading_directory = false;

        let list = match result {
            Ok(list) => list,
            Err(e) if e.is_unauthorized() => return self.expire(),
            Err(e) => {
                warn!(error = %e, status = ?e.status(), code = e.code(), "directory load failed");
                self.state.error_text = e.message();
                return;
            }
        };

        let previous = self.state.active_session.clone();
        let mut next = self.store.active_session().map(str::to_string);
        if next.as_ref().is_some_and(|id| !list.iter().any(|s| &s.id == id)) {
            debug!(stale = ?next, "persisted session not in directory");
            next = None;
            self.persist_active(None);
        }
        if next.is_none() {
            next = list.first().map(|s| s.id.clone());
        }
        self.state.sessions = list;

        let changed = next != previous;
        if changed {
            self.persist_active(next.as_deref());
            self.switch_to(next.clone());
        }

        match next {
            Some(id) => self.load_history(&id),
            None => self.load_history(""),
        }
    }

    /// Create a session and make it active without waiting for a reload.
    pub fn create_session(&mut self) {
        self.state.error_text.clear();
        self.state.creating = true;

        let api = self.api.clone();
        let auth = self.credential();
        let title = self.options.default_title.clone();
        let epoch = self.auth_epoch;
        self.spawn(async move {
            let result = api.create_session(auth.as_deref(), &title).await;
            ControllerEvent::SessionCreated { epoch, result }
        });
    }

    fn on_created(&mut self, epoch: u64, result: Result<SessionRef, ApiError>) {
        if epoch != self.auth_epoch {
            return;
        }
        self.state.creating = false;

        let created = match result {
            Ok(s) => s,
            Err(e) if e.is_unauthorized() => return self.expire(),
            Err(e) => {
                warn!(error = %e, status = ?e.status(), code = e.code(), "create session failed");
                self.state.error_text = e.message();
                return;
            }
        };
        info!(id = %created.id, "session created");

        let entry = SessionRef {
            title: created.title.or_else(|| Some(self.options.default_title.clone())),
            id: created.id,
        };
        let id = entry.id.clone();
        self.state.sessions.retain(|s| s.id != id);
        self.state.sessions.insert(0, entry);

        self.persist_active(Some(&id));
        self.switch_to(Some(id));
        // a fresh session has no history, and a directory listed before it
        // existed would drop it; fence off both
        self.guard.invalidate(OpClass::History);
        self.state.loading_history = false;
        self.guard.invalidate(OpClass::Directory);
        self.state.loading_directory = false;
        self.state.input.clear();
    }

    /// User picked a session: switch immediately, then fetch its history.
    pub fn select_session(&mut self, id: &str) {
        let id = crate::store::normalize(Some(id));
        self.persist_active(id.as_deref());
        self.switch_to(id.clone());
        self.load_history(id.as_deref().unwrap_or(""));
    }

    /// Point the view at `id`, abandoning anything tied to the previous
    /// session: its log, its in-flight send and its reveal.
    fn switch_to(&mut self, id: Option<String>) {
        debug!(from = ?self.state.active_session, to = ?id, "switch session");
        self.state.active_session = id;
        self.state.log.clear();
        self.state.error_text.clear();
        self.guard.invalidate(OpClass::Send);
        self.state.sending = false;
        self.pending.clear();
        self.stop_reveal();
    }

    // ── History ───────────────────────────────────────────────────────────────

    pub fn load_history(&mut self, session_id: &str) {
        if session_id.is_empty() {
            self.guard.invalidate(OpClass::History);
            self.state.loading_history = false;
            self.state.log.clear();
            return;
        }

        let ticket = self.guard.issue(OpClass::History);
        self.state.loading_history = true;
        self.state.error_text.clear();
        debug!(?ticket, %session_id, "load history");

        let api = self.api.clone();
        let auth = self.credential();
        let session_id = session_id.to_string();
        self.spawn(async move {
            let result = api.fetch_history(auth.as_deref(), &session_id).await;
            ControllerEvent::HistoryLoaded { ticket, session_id, result }
        });
    }

    fn on_history(&mut self, ticket: Ticket, session_id: String, result: Result<Vec<Message>, ApiError>) {
        if !self.guard.is_current(ticket) {
            debug!(?ticket, %session_id, "stale history result dropped");
            return;
        }
        self.state.loading_history = false;

        match result {
            Ok(server) => {
                self.state.log = history::merge_pending(server, &self.pending);
                self.state.error_text.clear();
                if let Some(c) = &self.cursor {
                    // the placeholder was replaced by the server's copy
                    if !self.state.log.iter().any(|m| m.id == c.message_id) {
                        self.stop_reveal();
                    }
                }
            }
            Err(e) if e.is_unauthorized() => self.expire(),
            Err(ApiError::NotFound { .. }) => {
                info!(%session_id, "session vanished remotely");
                self.persist_active(None);
                self.switch_to(None);
                self.state.error_text = MSG_SESSION_GONE.to_string();
            }
            Err(e) => {
                warn!(error = %e, status = ?e.status(), code = e.code(), %session_id, "history load failed");
                self.state.error_text = e.message();
            }
        }
    }

    // ── Send ──────────────────────────────────────────────────────────────────

    pub fn send_message(&mut self, text: &str) {
        let content = text.trim().to_string();
        if content.is_empty() {
            return;
        }
        let Some(session_id) = self.state.active_session.clone() else {
            self.state.error_text = MSG_SELECT_FIRST.to_string();
            return;
        };

        let ticket = self.guard.issue(OpClass::Send);
        self.state.sending = true;
        self.state.error_text.clear();

        // optimistic, never rolled back
        let optimistic = Message::local(ROLE_USER, content.clone());
        let optimistic_id = optimistic.id.clone();
        self.pending.push(Pending::new(optimistic.clone(), &self.state.log));
        self.state.log.push(optimistic);
        self.state.input.clear();
        debug!(?ticket, %session_id, "send");

        let api = self.api.clone();
        let auth = self.credential();
        self.spawn(async move {
            let result = api.send_message(auth.as_deref(), &session_id, &content).await;
            ControllerEvent::SendFinished { ticket, optimistic_id, result }
        });
    }

    /// Convenience for the view: send whatever is in the input buffer.
    pub fn submit_input(&mut self) {
        if !self.state.can_send() {
            return;
        }
        let text = std::mem::take(&mut self.state.input);
        self.send_message(&text);
    }

    fn on_sent(&mut self, ticket: Ticket, optimistic_id: String, result: Result<Reply, ApiError>) {
        // settled either way; the server now has it or never will
        self.pending.retain(|p| p.message.id != optimistic_id);

        if !self.guard.is_current(ticket) {
            debug!(?ticket, "stale send result dropped");
            return;
        }

        match result {
            Ok(reply) if reply.content.is_empty() => {
                self.state.error_text = MSG_EMPTY_REPLY.to_string();
            }
            Ok(reply) => self.start_reveal(reply),
            Err(e) if e.is_unauthorized() => return self.expire(),
            Err(e) => {
                warn!(error = %e, status = ?e.status(), code = e.code(), "send failed");
                self.state.error_text = e.message();
                self.state.log.push(Message::local(ROLE_SYSTEM, MSG_SEND_FAILED));
            }
        }
        self.state.sending = false;
    }

    // ── Reveal ────────────────────────────────────────────────────────────────

    fn start_reveal(&mut self, reply: Reply) {
        // a reveal still running is finished off instantly before the next
        if let Some(prev) = self.cursor.take() {
            let full = prev.full_text().to_string();
            self.set_content(&prev.message_id, &full);
        }

        let placeholder = Message::local(&reply.role, String::new());
        let id = placeholder.id.clone();
        self.state.log.push(placeholder);
        self.cursor = Some(RevealCursor::new(id, reply.content, self.options.reveal_chunk));
        self.reveal.start(self.options.reveal_interval, self.tx.clone(), |generation| {
            ControllerEvent::RevealTick { generation }
        });
    }

    fn on_reveal_tick(&mut self, generation: u64) {
        if self.reveal.current() != Some(generation) {
            return;
        }
        let Some(cursor) = self.cursor.as_mut() else {
            self.reveal.stop();
            return;
        };
        let id = cursor.message_id.clone();
        let prefix = cursor.advance().to_string();
        let done = cursor.is_done();

        if !self.set_content(&id, &prefix) || done {
            self.stop_reveal();
        }
    }

    fn stop_reveal(&mut self) {
        self.reveal.stop();
        self.cursor = None;
    }

    /// Returns false if the message is no longer in the log.
    fn set_content(&mut self, id: &str, content: &str) -> bool {
        match self.state.log.iter_mut().find(|m| m.id == id) {
            Some(m) => {
                m.content = content.to_string();
                true
            }
            None => false,
        }
    }

    // ── Event dispatch ────────────────────────────────────────────────────────

    pub fn apply(&mut self, ev: ControllerEvent) {
        match ev {
            ControllerEvent::AuthFinished { epoch, result } => self.on_auth(epoch, result),
            ControllerEvent::DirectoryLoaded { ticket, result } => self.on_directory(ticket, result),
            ControllerEvent::SessionCreated { epoch, result } => self.on_created(epoch, result),
            ControllerEvent::HistoryLoaded { ticket, session_id, result } => {
                self.on_history(ticket, session_id, result)
            }
            ControllerEvent::SendFinished { ticket, optimistic_id, result } => {
                self.on_sent(ticket, optimistic_id, result)
            }
            ControllerEvent::RevealTick { generation } => self.on_reveal_tick(generation),
        }
    }

    fn on_auth(&mut self, epoch: u64, result: Result<String, ApiError>) {
        if epoch != self.auth_epoch {
            return;
        }
        self.state.authenticating = false;
        match result {
            Ok(token) => {
                if let Err(e) = self.store.set_credential(&token) {
                    warn!(error = %e, "failed to persist credential");
                }
                self.auth_epoch += 1;
                self.state.authenticated = true;
                self.state.auth_error.clear();
                info!("signed in");
                self.load_directory();
            }
            Err(e) => {
                self.state.auth_error = e.message();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::mpsc::{self, UnboundedReceiver};
    use tokio::sync::oneshot;

    use crate::history::ROLE_ASSISTANT;

    // ── Scripted fake API ─────────────────────────────────────────────────────
    //
    // Every call parks on a oneshot until the test answers it, so tests pick
    // the completion order explicitly.

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Auth(AuthMode, String),
        List,
        Create(String),
        History(String),
        Send(String, String),
    }

    enum Answer {
        Token(String),
        Sessions(Vec<SessionRef>),
        Created(SessionRef),
        History(Vec<Message>),
        Reply(Reply),
        Err(ApiError),
    }

    #[derive(Default)]
    struct FakeApi {
        parked: Mutex<Vec<(Call, oneshot::Sender<Answer>)>>,
        seen_auth: Mutex<Vec<Option<String>>>,
    }

    impl FakeApi {
        async fn park(&self, call: Call, auth: Option<&str>) -> Answer {
            let (tx, rx) = oneshot::channel();
            self.seen_auth.lock().unwrap().push(auth.map(str::to_string));
            self.parked.lock().unwrap().push((call, tx));
            rx.await.unwrap_or(Answer::Err(ApiError::Transport("dropped".into())))
        }

        fn answer(&self, call: &Call, answer: Answer) {
            let mut parked = self.parked.lock().unwrap();
            let pos = parked
                .iter()
                .position(|(c, _)| c == call)
                .unwrap_or_else(|| panic!("no parked call {call:?}; have {:?}", parked.iter().map(|p| &p.0).collect::<Vec<_>>()));
            let (_, tx) = parked.remove(pos);
            let _ = tx.send(answer);
        }

        fn calls(&self) -> Vec<Call> {
            self.parked.lock().unwrap().iter().map(|(c, _)| c.clone()).collect()
        }
    }

    fn unexpected<T>(a: Answer) -> Result<T, ApiError> {
        match a {
            Answer::Err(e) => Err(e),
            _ => panic!("answer of the wrong kind"),
        }
    }

    #[async_trait]
    impl ChatApi for FakeApi {
        async fn authenticate(&self, mode: AuthMode, email: &str, _password: &str) -> Result<String, ApiError> {
            match self.park(Call::Auth(mode, email.to_string()), None).await {
                Answer::Token(t) => Ok(t),
                other => unexpected(other),
            }
        }
        async fn list_sessions(&self, auth: Option<&str>) -> Result<Vec<SessionRef>, ApiError> {
            match self.park(Call::List, auth).await {
                Answer::Sessions(s) => Ok(s),
                other => unexpected(other),
            }
        }
        async fn create_session(&self, auth: Option<&str>, title: &str) -> Result<SessionRef, ApiError> {
            match self.park(Call::Create(title.to_string()), auth).await {
                Answer::Created(s) => Ok(s),
                other => unexpected(other),
            }
        }
        async fn fetch_history(&self, auth: Option<&str>, session_id: &str) -> Result<Vec<Message>, ApiError> {
            match self.park(Call::History(session_id.to_string()), auth).await {
                Answer::History(h) => Ok(h),
                other => unexpected(other),
            }
        }
        async fn send_message(&self, auth: Option<&str>, session_id: &str, text: &str) -> Result<Reply, ApiError> {
            match self.park(Call::Send(session_id.to_string(), text.to_string()), auth).await {
                Answer::Reply(r) => Ok(r),
                other => unexpected(other),
            }
        }
    }

    // ── Harness ───────────────────────────────────────────────────────────────

    struct Harness {
        api: Arc<FakeApi>,
        c: ChatController,
        rx: UnboundedReceiver<ControllerEvent>,
    }

    impl Harness {
        fn new(token: Option<&str>, active: Option<&str>) -> Self {
            let mut store = AuthStore::in_memory();
            if let Some(t) = token {
                store.set_credential(t).unwrap();
            }
            if let Some(a) = active {
                store.set_active_session(a).unwrap();
            }
            let api = Arc::new(FakeApi::default());
            let (tx, rx) = mpsc::unbounded_channel();
            let c = ChatController::new(api.clone(), store, ControllerOptions::default(), tx);
            Self { api, c, rx }
        }

        /// Let spawned tasks run, then feed every posted event to the controller.
        async fn pump(&mut self) {
            for _ in 0..8 {
                tokio::task::yield_now().await;
                while let Ok(ev) = self.rx.try_recv() {
                    self.c.apply(ev);
                }
            }
        }

        async fn answer(&mut self, call: Call, answer: Answer) {
            self.api.answer(&call, answer);
            self.pump().await;
        }

        /// Signed in with sessions a, b loaded and `a` active with empty history.
        async fn ready() -> Self {
            let mut h = Self::new(Some("tok"), None);
            h.c.start();
            h.pump().await;
            h.answer(Call::List, Answer::Sessions(sessions(&["a", "b"]))).await;
            h.answer(Call::History("a".into()), Answer::History(vec![])).await;
            h
        }
    }

    fn sessions(ids: &[&str]) -> Vec<SessionRef> {
        ids.iter().map(|id| SessionRef { id: id.to_string(), title: None }).collect()
    }

    fn msg(role: &str, content: &str) -> Message {
        Message::local(role, content)
    }

    fn contents(log: &[Message]) -> Vec<(&str, &str)> {
        log.iter().map(|m| (m.role.as_str(), m.content.as_str())).collect()
    }

    fn reply(text: &str) -> Answer {
        Answer::Reply(Reply { role: ROLE_ASSISTANT.into(), content: text.into() })
    }

    fn unauthorized() -> ApiError {
        ApiError::Unauthorized { code: "UNAUTHORIZED".into(), message: "Invalid token".into() }
    }

    // ── Directory ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn stale_persisted_session_falls_back_to_first() {
        let mut h = Harness::new(Some("tok"), Some("c"));
        h.c.start();
        h.pump().await;
        assert!(h.c.state.loading_directory);

        h.answer(Call::List, Answer::Sessions(sessions(&["a", "b"]))).await;
        assert_eq!(h.c.state.active_session.as_deref(), Some("a"));
        assert_eq!(h.c.store.active_session(), Some("a"));
        assert!(!h.c.state.loading_directory);
        assert_eq!(h.api.calls(), vec![Call::History("a".into())]);
    }

    #[tokio::test]
    async fn persisted_session_in_list_is_kept() {
        let mut h = Harness::new(Some("tok"), Some("b"));
        h.c.start();
        h.pump().await;
        h.answer(Call::List, Answer::Sessions(sessions(&["a", "b"]))).await;
        assert_eq!(h.c.state.active_session.as_deref(), Some("b"));
        assert_eq!(h.api.calls(), vec![Call::History("b".into())]);
    }

    #[tokio::test]
    async fn empty_directory_leaves_no_active_session() {
        let mut h = Harness::new(Some("tok"), Some("x"));
        h.c.start();
        h.pump().await;
        h.answer(Call::List, Answer::Sessions(vec![])).await;
        assert_eq!(h.c.state.active_session, None);
        assert_eq!(h.c.store.active_session(), None);
        assert!(h.c.state.log.is_empty());
        assert!(h.api.calls().is_empty());
    }

    #[tokio::test]
    async fn directory_error_keeps_prior_state() {
        let mut h = Harness::ready().await;
        h.c.load_directory();
        h.pump().await;
        h.answer(
            Call::List,
            Answer::Err(ApiError::Status { status: 500, code: "INTERNAL_ERROR".into(), message: "Something went wrong.".into() }),
        )
        .await;
        assert_eq!(h.c.state.error_text, "Something went wrong.");
        assert_eq!(h.c.state.sessions.len(), 2);
        assert_eq!(h.c.state.active_session.as_deref(), Some("a"));
        assert!(!h.c.state.loading_directory);
    }

    #[tokio::test]
    async fn only_last_directory_load_applies() {
        let mut h = Harness::ready().await;
        h.c.load_directory();
        h.c.load_directory();
        h.pump().await;
        // both parked; answer the newest first, then the older one
        let parked = h.api.parked.lock().unwrap().len();
        assert_eq!(parked, 2);
        {
            let mut p = h.api.parked.lock().unwrap();
            let (_, newest) = p.remove(1);
            let _ = newest.send(Answer::Sessions(sessions(&["a", "z"])));
        }
        h.pump().await;
        h.answer(Call::List, Answer::Sessions(sessions(&["q"]))).await;
        let ids: Vec<_> = h.c.state.sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "z"]);
    }

    // ── Create / select ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn created_session_is_prepended_and_active() {
        let mut h = Harness::ready().await;
        h.c.state.log.push(msg(ROLE_USER, "old"));
        h.c.state.input = "draft".into();
        h.c.create_session();
        h.pump().await;
        h.answer(
            Call::Create("New chat".into()),
            Answer::Created(SessionRef { id: "n".into(), title: None }),
        )
        .await;

        assert_eq!(h.c.state.sessions[0].id, "n");
        assert_eq!(h.c.state.sessions[0].label(), "New chat");
        assert_eq!(h.c.state.active_session.as_deref(), Some("n"));
        assert_eq!(h.c.store.active_session(), Some("n"));
        assert!(h.c.state.log.is_empty());
        assert!(h.c.state.input.is_empty());
        // no directory reload, no history fetch
        assert!(h.api.calls().is_empty());
    }

    #[tokio::test]
    async fn directory_listed_before_create_cannot_drop_new_session() {
        let mut h = Harness::ready().await;
        h.c.load_directory();
        h.c.create_session();
        h.pump().await;
        h.answer(
            Call::Create("New chat".into()),
            Answer::Created(SessionRef { id: "n".into(), title: None }),
        )
        .await;
        assert!(!h.c.state.loading_directory);

        h.answer(Call::List, Answer::Sessions(sessions(&["a", "b"]))).await;
        let ids: Vec<_> = h.c.state.sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["n", "a", "b"]);
        assert_eq!(h.c.state.active_session.as_deref(), Some("n"));
        assert_eq!(h.c.store.active_session(), Some("n"));
        assert!(h.api.calls().is_empty());
    }

    #[tokio::test]
    async fn malformed_create_changes_nothing() {
        let mut h = Harness::ready().await;
        h.c.create_session();
        h.pump().await;
        h.answer(
            Call::Create("New chat".into()),
            Answer::Err(ApiError::Malformed("Server did not return a session id.".into())),
        )
        .await;
        assert_eq!(h.c.state.error_text, "Server did not return a session id.");
        assert_eq!(h.c.state.sessions.len(), 2);
        assert_eq!(h.c.state.active_session.as_deref(), Some("a"));
        assert!(!h.c.state.creating);
    }

    #[tokio::test]
    async fn select_switches_before_history_arrives() {
        let mut h = Harness::ready().await;
        h.c.state.log.push(msg(ROLE_USER, "in a"));
        h.c.select_session("b");
        assert_eq!(h.c.state.active_session.as_deref(), Some("b"));
        assert_eq!(h.c.store.active_session(), Some("b"));
        assert!(h.c.state.log.is_empty());
        assert!(h.c.state.loading_history);

        h.pump().await;
        h.answer(Call::History("b".into()), Answer::History(vec![msg(ROLE_USER, "in b")])).await;
        assert_eq!(contents(&h.c.state.log), vec![("user", "in b")]);
        assert!(!h.c.state.loading_history);
    }

    // ── History ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn overlapping_history_loads_last_issued_wins() {
        let mut h = Harness::ready().await;
        h.c.select_session("s1");
        h.c.select_session("s2");
        h.c.select_session("s3");
        h.pump().await;

        h.answer(Call::History("s1".into()), Answer::History(vec![msg(ROLE_USER, "one")])).await;
        assert!(h.c.state.log.is_empty());
        assert!(h.c.state.loading_history, "stale result must not clear loading");

        h.answer(Call::History("s3".into()), Answer::History(vec![msg(ROLE_USER, "three")])).await;
        h.answer(Call::History("s2".into()), Answer::Err(ApiError::Transport("boom".into()))).await;

        assert_eq!(contents(&h.c.state.log), vec![("user", "three")]);
        assert!(!h.c.state.loading_history);
        assert!(h.c.state.error_text.is_empty());
    }

    #[tokio::test]
    async fn vanished_session_clears_active() {
        let mut h = Harness::ready().await;
        h.c.select_session("b");
        h.pump().await;
        h.answer(
            Call::History("b".into()),
            Answer::Err(ApiError::NotFound { code: "NOT_FOUND".into(), message: "Session not found".into() }),
        )
        .await;
        assert_eq!(h.c.state.active_session, None);
        assert_eq!(h.c.store.active_session(), None);
        assert!(h.c.state.log.is_empty());
        assert_eq!(h.c.state.error_text, MSG_SESSION_GONE);
        // still signed in
        assert!(h.c.state.authenticated);
    }

    #[tokio::test]
    async fn history_error_keeps_log() {
        let mut h = Harness::ready().await;
        h.c.state.log.push(msg(ROLE_USER, "keep me"));
        h.c.load_history("a");
        h.pump().await;
        h.answer(Call::History("a".into()), Answer::Err(ApiError::Transport("Could not reach the server".into()))).await;
        assert_eq!(contents(&h.c.state.log), vec![("user", "keep me")]);
        assert_eq!(h.c.state.error_text, "Could not reach the server");
        assert!(!h.c.state.loading_history);
    }

    #[tokio::test]
    async fn empty_id_clears_log_synchronously() {
        let mut h = Harness::ready().await;
        h.c.state.log.push(msg(ROLE_USER, "x"));
        h.c.load_history("");
        assert!(h.c.state.log.is_empty());
        h.pump().await;
        assert!(h.api.calls().is_empty());
    }

    #[tokio::test]
    async fn reload_during_send_keeps_optimistic_message() {
        let mut h = Harness::ready().await;
        h.c.send_message("hello");
        h.c.load_history("a");
        h.pump().await;
        h.answer(
            Call::History("a".into()),
            Answer::History(vec![msg(ROLE_USER, "earlier"), msg(ROLE_ASSISTANT, "sure")]),
        )
        .await;
        assert_eq!(
            contents(&h.c.state.log),
            vec![("user", "earlier"), ("assistant", "sure"), ("user", "hello")]
        );
        assert!(h.c.state.sending);
    }

    #[tokio::test]
    async fn repeated_line_survives_reload_before_server_stores_it() {
        let mut h = Harness::ready().await;
        h.c.load_history("a");
        h.pump().await;
        let earlier = vec![msg(ROLE_USER, "hi"), msg(ROLE_ASSISTANT, "hello")];
        h.answer(Call::History("a".into()), Answer::History(earlier.clone())).await;

        h.c.send_message("hi");
        h.c.load_history("a");
        h.pump().await;
        h.answer(Call::History("a".into()), Answer::History(earlier)).await;
        assert_eq!(
            contents(&h.c.state.log),
            vec![("user", "hi"), ("assistant", "hello"), ("user", "hi")]
        );
    }

    // ── Send ──────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn send_appends_user_message_immediately() {
        let mut h = Harness::ready().await;
        h.c.state.input = "  hi there  ".into();
        h.c.submit_input();
        assert_eq!(contents(&h.c.state.log), vec![("user", "hi there")]);
        assert!(h.c.state.input.is_empty());
        assert!(h.c.state.sending);

        h.pump().await;
        assert_eq!(h.api.calls(), vec![Call::Send("a".into(), "hi there".into())]);
        assert_eq!(h.api.seen_auth.lock().unwrap().last().cloned().flatten().as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn blank_send_is_noop() {
        let mut h = Harness::ready().await;
        h.c.send_message("   ");
        assert!(h.c.state.log.is_empty());
        assert!(!h.c.state.sending);
    }

    #[tokio::test]
    async fn send_without_session_asks_to_select() {
        let mut h = Harness::new(Some("tok"), None);
        h.c.send_message("hi");
        assert_eq!(h.c.state.error_text, MSG_SELECT_FIRST);
        assert!(h.c.state.log.is_empty());
    }

    #[tokio::test]
    async fn failed_send_keeps_user_message_and_adds_one_notice() {
        let mut h = Harness::ready().await;
        h.c.state.log.push(msg(ROLE_ASSISTANT, "earlier"));
        h.c.send_message("hi");
        h.pump().await;
        h.answer(
            Call::Send("a".into(), "hi".into()),
            Answer::Err(ApiError::Status { status: 429, code: "RATE_LIMITED".into(), message: "Too many requests".into() }),
        )
        .await;

        assert_eq!(
            contents(&h.c.state.log),
            vec![("assistant", "earlier"), ("user", "hi"), ("system", MSG_SEND_FAILED)]
        );
        assert_eq!(h.c.state.error_text, "Too many requests");
        assert!(!h.c.state.sending);
        assert!(!h.c.is_revealing());
    }

    #[tokio::test]
    async fn empty_reply_is_an_error_without_placeholder() {
        let mut h = Harness::ready().await;
        h.c.send_message("hi");
        h.pump().await;
        h.answer(Call::Send("a".into(), "hi".into()), reply("")).await;
        assert_eq!(contents(&h.c.state.log), vec![("user", "hi")]);
        assert_eq!(h.c.state.error_text, MSG_EMPTY_REPLY);
        assert!(!h.c.state.sending);
        assert!(!h.c.is_revealing());
    }

    #[tokio::test(start_paused = true)]
    async fn reply_is_revealed_in_steps() {
        let mut h = Harness::ready().await;
        h.c.send_message("hi");
        h.pump().await;
        h.answer(Call::Send("a".into(), "hi".into()), reply("ok")).await;

        assert_eq!(contents(&h.c.state.log), vec![("user", "hi"), ("assistant", "")]);
        assert!(h.c.is_revealing());
        assert!(!h.c.state.sending);

        tokio::time::sleep(Duration::from_millis(25)).await;
        h.pump().await;
        assert_eq!(contents(&h.c.state.log)[1], ("assistant", "ok"));
        assert!(!h.c.is_revealing());
        assert!(!h.c.reveal.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn longer_reply_advances_three_chars_per_tick() {
        let mut h = Harness::ready().await;
        h.c.send_message("hi");
        h.pump().await;
        h.answer(Call::Send("a".into(), "hi".into()), reply("abcdefg")).await;

        let mut seen = Vec::new();
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(25)).await;
            h.pump().await;
            seen.push(h.c.state.log[1].content.clone());
        }
        assert_eq!(seen, vec!["abc", "abcdef", "abcdefg"]);
        assert!(!h.c.is_revealing());
    }

    #[tokio::test(start_paused = true)]
    async fn second_reveal_finishes_first() {
        let mut h = Harness::ready().await;
        h.c.send_message("one");
        h.pump().await;
        h.answer(Call::Send("a".into(), "one".into()), reply("first reply text")).await;
        tokio::time::sleep(Duration::from_millis(25)).await;
        h.pump().await;
        assert_eq!(h.c.state.log[1].content, "fir");

        h.c.send_message("two");
        h.pump().await;
        h.answer(Call::Send("a".into(), "two".into()), reply("ok")).await;
        // the first placeholder jumped to its full text; only one timer left
        assert_eq!(h.c.state.log[1].content, "first reply text");
        assert_eq!(h.c.state.log[3].content, "");

        tokio::time::sleep(Duration::from_millis(100)).await;
        h.pump().await;
        assert_eq!(
            contents(&h.c.state.log),
            vec![("user", "one"), ("assistant", "first reply text"), ("user", "two"), ("assistant", "ok")]
        );
        assert!(!h.c.reveal.is_active());
    }

    #[tokio::test]
    async fn send_result_after_switch_is_dropped() {
        let mut h = Harness::ready().await;
        h.c.send_message("for a");
        h.pump().await;
        h.c.select_session("b");
        h.pump().await;
        h.answer(Call::History("b".into()), Answer::History(vec![])).await;

        h.answer(Call::Send("a".into(), "for a".into()), reply("late")).await;
        assert!(h.c.state.log.is_empty());
        assert!(!h.c.is_revealing());
        assert!(!h.c.state.sending);
    }

    #[tokio::test]
    async fn older_send_cannot_clear_newer_sending_flag() {
        let mut h = Harness::ready().await;
        h.c.send_message("one");
        h.c.send_message("two");
        h.pump().await;
        h.answer(Call::Send("a".into(), "one".into()), Answer::Err(ApiError::Transport("x".into()))).await;
        assert!(h.c.state.sending);
        // stale failure adds no notice
        assert_eq!(contents(&h.c.state.log), vec![("user", "one"), ("user", "two")]);
    }

    #[tokio::test(start_paused = true)]
    async fn switching_mid_reveal_stops_timer() {
        let mut h = Harness::ready().await;
        h.c.send_message("hi");
        h.pump().await;
        h.answer(Call::Send("a".into(), "hi".into()), reply("a long reply")).await;
        assert!(h.c.reveal.is_active());
        h.c.select_session("b");
        assert!(!h.c.reveal.is_active());
        assert!(!h.c.is_revealing());
    }

    // ── Auth ──────────────────────────────────────────────────────────────────

    fn assert_signed_out(h: &Harness) {
        assert!(!h.c.state.authenticated);
        assert_eq!(h.c.store.credential(), None);
        assert_eq!(h.c.store.active_session(), None);
        assert!(h.c.state.sessions.is_empty());
        assert!(h.c.state.log.is_empty());
        assert_eq!(h.c.state.active_session, None);
        assert!(!h.c.state.sending);
        assert!(!h.c.state.loading_history);
        assert!(!h.c.state.creating);
        assert_eq!(h.c.state.auth_error, MSG_SIGNED_OUT);
    }

    #[tokio::test]
    async fn unauthorized_send_logs_out() {
        let mut h = Harness::ready().await;
        h.c.state.log.push(msg(ROLE_USER, "x"));
        h.c.send_message("hi");
        h.pump().await;
        h.answer(Call::Send("a".into(), "hi".into()), Answer::Err(unauthorized())).await;
        assert_signed_out(&h);
    }

    #[tokio::test]
    async fn unauthorized_directory_logs_out() {
        let mut h = Harness::new(Some("tok"), Some("a"));
        h.c.start();
        h.pump().await;
        h.answer(Call::List, Answer::Err(unauthorized())).await;
        assert_signed_out(&h);
    }

    #[tokio::test]
    async fn unauthorized_history_logs_out() {
        let mut h = Harness::ready().await;
        h.c.state.log.push(msg(ROLE_USER, "x"));
        h.c.select_session("b");
        h.pump().await;
        h.answer(Call::History("b".into()), Answer::Err(unauthorized())).await;
        assert_signed_out(&h);
    }

    #[tokio::test]
    async fn unauthorized_create_logs_out() {
        let mut h = Harness::ready().await;
        h.c.state.log.push(msg(ROLE_USER, "x"));
        h.c.create_session();
        h.pump().await;
        h.answer(Call::Create("New chat".into()), Answer::Err(unauthorized())).await;
        assert_signed_out(&h);
    }

    #[tokio::test]
    async fn results_after_logout_are_ignored() {
        let mut h = Harness::ready().await;
        h.c.load_history("a");
        h.c.create_session();
        h.pump().await;
        h.c.logout();
        h.answer(Call::History("a".into()), Answer::History(vec![msg(ROLE_USER, "ghost")])).await;
        h.answer(
            Call::Create("New chat".into()),
            Answer::Created(SessionRef { id: "n".into(), title: None }),
        )
        .await;
        assert!(h.c.state.log.is_empty());
        assert!(h.c.state.sessions.is_empty());
        assert_eq!(h.c.state.active_session, None);
    }

    #[tokio::test]
    async fn login_stores_credential_and_loads_directory() {
        let mut h = Harness::new(None, None);
        h.c.start();
        assert!(!h.c.state.authenticated);

        h.c.authenticate(AuthMode::Login, "me@example.com", "pw");
        assert!(h.c.state.authenticating);
        h.pump().await;
        h.answer(Call::Auth(AuthMode::Login, "me@example.com".into()), Answer::Token("fresh".into())).await;

        assert!(h.c.state.authenticated);
        assert_eq!(h.c.store.credential(), Some("fresh"));
        assert_eq!(h.api.calls(), vec![Call::List]);
    }

    #[tokio::test]
    async fn rejected_login_stays_signed_out() {
        let mut h = Harness::new(None, None);
        h.c.authenticate(AuthMode::Login, "me@example.com", "bad");
        h.pump().await;
        h.answer(
            Call::Auth(AuthMode::Login, "me@example.com".into()),
            Answer::Err(ApiError::Unauthorized { code: "UNAUTHORIZED".into(), message: "Invalid email or password".into() }),
        )
        .await;
        assert!(!h.c.state.authenticated);
        assert!(!h.c.state.authenticating);
        assert_eq!(h.c.state.auth_error, "Invalid email or password");
    }

    #[tokio::test]
    async fn missing_credentials_are_rejected_locally() {
        let mut h = Harness::new(None, None);
        h.c.authenticate(AuthMode::Signup, " ", "pw");
        assert!(!h.c.state.authenticating);
        assert!(!h.c.state.auth_error.is_empty());
        h.pump().await;
        assert!(h.api.calls().is_empty());
    }
}
