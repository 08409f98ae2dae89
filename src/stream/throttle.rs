//! Throttled forwarding of accumulated reply content
//!
//! Every `chunk` envelope grows the accumulated reply, but rendering each
//! one would flood the store. [`UpdateScheduler`] enforces a minimum gap
//! between applied updates. A chunk that arrives too early is not dropped:
//! the scheduler waits out the remainder of the interval and then applies
//! it before the next chunk is read. `done` bypasses the gap entirely.

use std::time::Duration;

use tokio::time::Instant;

use crate::session::{MessageId, SessionId};

/// Default minimum interval between applied updates
pub const DEFAULT_MIN_UPDATE_INTERVAL: Duration = Duration::from_millis(30);

/// Transient per-request state for one streamed reply
///
/// Dropped when the turn ends, whether by `done`, by error, or by fallback
/// handoff.
#[derive(Debug, Clone)]
pub struct StreamCursor {
    /// Session owning the target message
    pub session_id: SessionId,
    /// Message being filled
    pub message_id: MessageId,
    accumulated: String,
    last_emit: Option<Instant>,
    pending_flush: bool,
}

impl StreamCursor {
    /// Start a cursor for an empty placeholder message
    pub fn new(session_id: SessionId, message_id: MessageId) -> Self {
        Self {
            session_id,
            message_id,
            accumulated: String::new(),
            last_emit: None,
            pending_flush: false,
        }
    }

    /// Append a fragment to the accumulated reply
    pub fn push(&mut self, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        self.accumulated.push_str(fragment);
        self.pending_flush = true;
    }

    /// Everything received so far
    pub fn accumulated(&self) -> &str {
        &self.accumulated
    }

    /// Whether content has been received that was not yet applied
    pub fn has_pending(&self) -> bool {
        self.pending_flush
    }

    /// When the last update was applied
    pub fn last_emit(&self) -> Option<Instant> {
        self.last_emit
    }

    fn mark_applied(&mut self, at: Instant) {
        self.last_emit = Some(at);
        self.pending_flush = false;
    }
}

/// Decision for a freshly accumulated value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// Apply the update immediately
    Now,
    /// Wait this long, then apply
    After(Duration),
}

/// Rate limiter for content updates
#[derive(Debug, Clone, Copy)]
pub struct UpdateScheduler {
    min_interval: Duration,
}

impl UpdateScheduler {
    /// Create a scheduler with the given minimum gap between updates
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval }
    }

    /// Minimum gap between applied updates
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Decide how to pace an update at time `now`
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use chatwire::session::{MessageId, SessionId};
    /// use chatwire::stream::throttle::{Pacing, StreamCursor, UpdateScheduler};
    ///
    /// let scheduler = UpdateScheduler::new(Duration::from_millis(30));
    /// let cursor = StreamCursor::new(SessionId::new(), MessageId::new());
    /// assert_eq!(scheduler.pace(&cursor, tokio::time::Instant::now()), Pacing::Now);
    /// ```
    pub fn pace(&self, cursor: &StreamCursor, now: Instant) -> Pacing {
        match cursor.last_emit {
            None => Pacing::Now,
            Some(last) => {
                let elapsed = now.saturating_duration_since(last);
                if elapsed >= self.min_interval {
                    Pacing::Now
                } else {
                    Pacing::After(self.min_interval - elapsed)
                }
            }
        }
    }

    /// Apply the cursor's accumulated content, honouring the interval
    ///
    /// Suspends for the remainder of the interval when called too soon.
    /// The caller must not read the next chunk until this returns; wrapping
    /// the call in a cancellation `select!` drops the pending wait.
    pub async fn offer<F>(&self, cursor: &mut StreamCursor, mut apply: F)
    where
        F: FnMut(&str),
    {
        if !cursor.has_pending() {
            return;
        }

        if let Pacing::After(wait) = self.pace(cursor, Instant::now()) {
            tokio::time::sleep(wait).await;
        }

        apply(cursor.accumulated());
        cursor.mark_applied(Instant::now());
    }

    /// Apply the accumulated content unconditionally
    ///
    /// Used on `done`: the final rendered content must equal everything
    /// received, regardless of timing.
    pub fn flush<F>(&self, cursor: &mut StreamCursor, mut apply: F)
    where
        F: FnMut(&str),
    {
        apply(cursor.accumulated());
        cursor.mark_applied(Instant::now());
    }
}

impl Default for UpdateScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_UPDATE_INTERVAL)
    }
}
