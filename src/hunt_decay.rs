//! Per-class decay timers.
//!
//! A partial progress value falls back to 0 unless it is refreshed within the
//! decay delay. Each class has at most one pending timer; scheduling again
//! replaces it, cancelling removes it.
//!
//! Two implementations:
//! - [`TokioDecayTimers`]: real timers on the tokio runtime. Expiry is delivered
//!   as a [`DecayElapsed`] message into the pipeline's event channel, so the
//!   decay itself still runs on the single processing task.
//! - [`VirtualDecayTimers`]: deadlines against frame timestamps, used for
//!   replay and tests.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

/// Cancellable, keyed, one-shot deferred decay.
pub trait DecayScheduler {
    /// (Re)arm the timer for `class_id`, replacing any pending one.
    fn schedule(&mut self, class_id: &str, now: DateTime<Utc>, delay: Duration);
    /// Drop the pending timer for `class_id`, if any.
    fn cancel(&mut self, class_id: &str);
    /// Drop every pending timer.
    fn cancel_all(&mut self);
    /// Number of armed timers.
    fn pending(&self) -> usize;
}

// ─── Tokio timers ────────────────────────────────────────────────────────────

/// Message sent when a tokio decay timer fires.
#[derive(Debug, Clone, PartialEq)]
pub struct DecayElapsed {
    pub class_id: String,
    pub ticket:   u64,
}

struct ArmedTimer {
    ticket: u64,
    handle: AbortHandle,
}

/// Tokio-backed timers. Must be used from within a tokio runtime.
pub struct TokioDecayTimers<M> {
    events:      flume::Sender<M>,
    armed:       HashMap<String, ArmedTimer>,
    next_ticket: u64,
}

impl<M> TokioDecayTimers<M>
where
    M: From<DecayElapsed> + Send + 'static,
{
    pub fn new(events: flume::Sender<M>) -> Self {
        Self {
            events,
            armed: HashMap::new(),
            next_ticket: 0,
        }
    }

    /// Consume an expiry message. Returns `true` if it belongs to the timer
    /// that is still armed for the class; stale expiries (replaced or cancelled
    /// after firing) return `false` and must be ignored.
    pub fn acknowledge(&mut self, elapsed: &DecayElapsed) -> bool {
        match self.armed.get(&elapsed.class_id) {
            Some(armed) if armed.ticket == elapsed.ticket => {
                self.armed.remove(&elapsed.class_id);
                true
            }
            _ => {
                trace!("Stale decay #{} for {} ignored", elapsed.ticket, elapsed.class_id);
                false
            }
        }
    }
}

impl<M> DecayScheduler for TokioDecayTimers<M>
where
    M: From<DecayElapsed> + Send + 'static,
{
    fn schedule(&mut self, class_id: &str, _now: DateTime<Utc>, delay: Duration) {
        self.cancel(class_id);

        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let tx = self.events.clone();
        let message = DecayElapsed {
            class_id: class_id.to_string(),
            ticket,
        };
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send_async(M::from(message)).await;
        });

        self.armed.insert(
            class_id.to_string(),
            ArmedTimer {
                ticket,
                handle: task.abort_handle(),
            },
        );
    }

    fn cancel(&mut self, class_id: &str) {
        if let Some(armed) = self.armed.remove(class_id) {
            armed.handle.abort();
        }
    }

    fn cancel_all(&mut self) {
        if !self.armed.is_empty() {
            debug!("Cancelling {} decay timers", self.armed.len());
        }
        for (_, armed) in self.armed.drain() {
            armed.handle.abort();
        }
    }

    fn pending(&self) -> usize {
        self.armed.len()
    }
}

impl<M> Drop for TokioDecayTimers<M> {
    fn drop(&mut self) {
        for (_, armed) in self.armed.drain() {
            armed.handle.abort();
        }
    }
}

// ─── Virtual timers ──────────────────────────────────────────────────────────

/// Deadline bookkeeping in frame time. Nothing fires on its own; the owner
/// polls [`VirtualDecayTimers::take_due`] as time advances.
#[derive(Debug, Default)]
pub struct VirtualDecayTimers {
    deadlines: HashMap<String, DateTime<Utc>>,
}

impl VirtualDecayTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return every class whose deadline is at or before `now`,
    /// earliest first.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let mut due: Vec<(DateTime<Utc>, String)> = self
            .deadlines
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(class, at)| (*at, class.clone()))
            .collect();
        due.sort();
        for (_, class) in &due {
            self.deadlines.remove(class);
        }
        due.into_iter().map(|(_, class)| class).collect()
    }

    pub fn deadline(&self, class_id: &str) -> Option<DateTime<Utc>> {
        self.deadlines.get(class_id).copied()
    }
}

impl DecayScheduler for VirtualDecayTimers {
    fn schedule(&mut self, class_id: &str, now: DateTime<Utc>, delay: Duration) {
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
        let at = now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.deadlines.insert(class_id.to_string(), at);
    }

    fn cancel(&mut self, class_id: &str) {
        self.deadlines.remove(class_id);
    }

    fn cancel_all(&mut self) {
        self.deadlines.clear();
    }

    fn pending(&self) -> usize {
        self.deadlines.len()
    }
}
