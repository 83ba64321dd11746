//! Cancellable one-shot timers that fire by posting an event

use std::collections::HashMap;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::event::{Event, EventSender};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

pub trait Timers {
    /// Post `event` after `delay` unless cancelled first
    fn schedule(&mut self, delay: Duration, event: Event) -> TimerId;

    /// Cancel a pending timer; unknown or already-fired ids are ignored
    fn cancel(&mut self, id: TimerId);
}

/// Timers backed by tokio tasks; must be used from inside a runtime
pub struct TokioTimers {
    events: EventSender,
    next_id: u64,
    pending: HashMap<TimerId, JoinHandle<()>>,
}

impl TokioTimers {
    pub fn new(events: EventSender) -> Self {
        Self {
            events,
            next_id: 0,
            pending: HashMap::new(),
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.values().filter(|h| !h.is_finished()).count()
    }
}

impl Timers for TokioTimers {
    fn schedule(&mut self, delay: Duration, event: Event) -> TimerId {
        self.pending.retain(|_, handle| !handle.is_finished());

        self.next_id += 1;
        let id = TimerId(self.next_id);
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(event);
        });
        self.pending.insert(id, handle);
        tracing::trace!(timer = id.0, ?delay, "timer scheduled");
        id
    }

    fn cancel(&mut self, id: TimerId) {
        if let Some(handle) = self.pending.remove(&id) {
            handle.abort();
            tracing::trace!(timer = id.0, "timer cancelled");
        }
    }
}

impl Drop for TokioTimers {
    fn drop(&mut self) {
        for (_, handle) in self.pending.drain() {
            handle.abort();
        }
    }
}
