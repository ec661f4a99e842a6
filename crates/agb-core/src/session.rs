//! Working memory for in-flight booking conversations.
//!
//! Sessions live in a TTL-indexed arena keyed by conversation id: every read
//! or write slides the expiry forward, `sweep` evicts expired entries as an
//! explicit, testable operation, and a background task calls it on an
//! interval for long-running processes. Nothing here is durable; a session
//! lost to a restart just means the user starts the dialogue over.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    domain::{ConversationId, ServiceId, SlotOffer},
    ports::Clock,
};

/// Dialogue position. `idle` is the absence of a session; `done`/`aborted`
/// clear it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    AwaitService,
    AwaitWhen,
    AwaitSlot,
    AwaitNamePhone,
}

/// Per-conversation scratch state collected across turns.
#[derive(Clone, Debug)]
pub struct BookingSession {
    pub step: Step,
    pub service_id: Option<ServiceId>,
    pub service_name: Option<String>,
    pub duration_min: Option<u32>,
    /// Date the last slot search ran for; reused when re-searching after a
    /// booking conflict.
    pub search_date: Option<NaiveDate>,
    /// Last list shown to the user; selections index into this.
    pub offers: Vec<SlotOffer>,
    pub chosen: Option<usize>,
    pub full_name: Option<String>,
    pub phone: Option<String>,
}

impl BookingSession {
    pub fn new(step: Step) -> Self {
        Self {
            step,
            service_id: None,
            service_name: None,
            duration_min: None,
            search_date: None,
            offers: Vec::new(),
            chosen: None,
            full_name: None,
            phone: None,
        }
    }

    /// The slot instant behind the user's chosen index.
    pub fn chosen_start(&self) -> Option<DateTime<Utc>> {
        let idx = self.chosen?;
        self.offers.iter().find(|o| o.index == idx).map(|o| o.start)
    }
}

struct Entry {
    session: BookingSession,
    expires_at: DateTime<Utc>,
}

/// TTL arena for booking sessions.
pub struct SessionStore {
    ttl: Duration,
    inner: Mutex<HashMap<ConversationId, Entry>>,
}

impl SessionStore {
    pub fn new(ttl: StdDuration) -> Self {
        Self {
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::minutes(30)),
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch a live session, sliding its expiry. Expired entries are removed
    /// on contact and read as absent.
    pub async fn get(&self, id: &ConversationId, now: DateTime<Utc>) -> Option<BookingSession> {
        let mut inner = self.inner.lock().await;
        match inner.get_mut(id) {
            Some(entry) if entry.expires_at > now => {
                entry.expires_at = now + self.ttl;
                Some(entry.session.clone())
            }
            Some(_) => {
                inner.remove(id);
                None
            }
            None => None,
        }
    }

    /// Insert or replace, resetting the TTL.
    pub async fn put(&self, id: ConversationId, session: BookingSession, now: DateTime<Utc>) {
        let mut inner = self.inner.lock().await;
        inner.insert(
            id,
            Entry {
                session,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Drop a session on completion or abort.
    pub async fn clear(&self, id: &ConversationId) {
        self.inner.lock().await.remove(id);
    }

    /// Evict every expired entry; returns how many were removed.
    pub async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut inner = self.inner.lock().await;
        let before = inner.len();
        inner.retain(|_, entry| entry.expires_at > now);
        before - inner.len()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

/// Periodic sweeper for long-running processes. Cancel the returned token to
/// stop it.
pub fn spawn_sweeper(
    store: Arc<SessionStore>,
    clock: Arc<dyn Clock>,
    interval: StdDuration,
) -> CancellationToken {
    let token = CancellationToken::new();
    let loop_token = token.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        loop {
            tokio::select! {
              _ = loop_token.cancelled() => break,
              _ = tick.tick() => {
                let removed = store.sweep(clock.now()).await;
                if removed > 0 {
                    tracing::debug!(removed, "expired booking sessions evicted");
                }
              }
            }
        }
    });
    token
}
