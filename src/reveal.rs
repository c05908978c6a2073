/// Incremental reveal of an already-complete assistant reply.
///
/// `RevealTimer` owns a repeating tokio task that posts one tick event per
/// period; the receiver advances a `RevealCursor` and rewrites the
/// placeholder message with the prefix so far. At most one timer runs per
/// owner: `start` stops the previous task first, and dropping the owner
/// stops whatever is pending.
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

#[derive(Default)]
pub struct RevealTimer {
    handle: Option<JoinHandle<()>>,
    generation: u64,
}

impl RevealTimer {
    /// Stop any running timer and start a new one. Each tick sends
    /// `tick(generation)`; the returned generation identifies this timer so
    /// ticks already queued from an older one can be told apart.
    pub fn start<E, F>(&mut self, period: Duration, tx: UnboundedSender<E>, tick: F) -> u64
    where
        E: Send + 'static,
        F: Fn(u64) -> E + Send + 'static,
    {
        self.stop();
        self.generation += 1;
        let generation = self.generation;
        debug!(generation, ?period, "reveal timer start");

        self.handle = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if tx.send(tick(generation)).is_err() {
                    break; // receiver gone
                }
            }
        }));
        generation
    }

    pub fn stop(&mut self) {
        if let Some(h) = self.handle.take() {
            h.abort();
            debug!(generation = self.generation, "reveal timer stop");
        }
    }

    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Generation of the running timer, if any.
    pub fn current(&self) -> Option<u64> {
        self.handle.as_ref().map(|_| self.generation)
    }
}

impl Drop for RevealTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Cursor ────────────────────────────────────────────────────────────────────

/// Walks a reply in fixed-size character steps.
#[derive(Debug, Clone)]
pub struct RevealCursor {
    pub message_id: String,
    text: String,
    /// Characters revealed so far
    shown: usize,
    total: usize,
    step: usize,
}

impl RevealCursor {
    pub fn new(message_id: String, text: String, step: usize) -> Self {
        let total = text.chars().count();
        Self { message_id, text, shown: 0, total, step: step.max(1) }
    }

    /// Move forward one step, clamped to the end. Returns the visible prefix.
    pub fn advance(&mut self) -> &str {
        self.shown = (self.shown + self.step).min(self.total);
        self.prefix()
    }

    pub fn prefix(&self) -> &str {
        let end = self
            .text
            .char_indices()
            .nth(self.shown)
            .map(|(i, _)| i)
            .unwrap_or(self.text.len());
        &self.text[..end]
    }

    pub fn full_text(&self) -> &str {
        &self.text
    }

    pub fn is_done(&self) -> bool {
        self.shown >= self.total
    }
}
