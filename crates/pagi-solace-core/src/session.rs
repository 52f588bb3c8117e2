//! Session store: per-conversation turn history and canned-response step counter.
//!
//! Sessions live in a `DashMap` keyed by an opaque UUID. Each slot carries its own async
//! mutex, which the pipeline holds for the whole turn so history stays in interaction
//! order. Eviction is explicit: idle TTL plus a cap on live sessions (oldest `last_seen` goes first).

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub const DEFAULT_MAX_SESSIONS: usize = 10_000;

/// One exchange: user message and bot reply. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub user: String,
    pub bot: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    New,
    Active,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// Rotation index for canned responses. Advanced only on flagged messages.
    pub step: usize,
    history: Vec<Turn>,
}

impl Session {
    pub fn new(id: String) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            step: 0,
            history: Vec::new(),
        }
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn push_turn(&mut self, user: impl Into<String>, bot: impl Into<String>) {
        self.history.push(Turn {
            user: user.into(),
            bot: bot.into(),
        });
    }

    pub fn state(&self) -> SessionState {
        if self.history.is_empty() {
            SessionState::New
        } else {
            SessionState::Active
        }
    }
}

/// Store entry: the session behind its turn lock, plus a lock-free recency stamp.
pub struct SessionSlot {
    id: String,
    last_seen_ms: AtomicI64,
    session: Mutex<Session>,
}

impl SessionSlot {
    fn new(id: String) -> Self {
        Self {
            last_seen_ms: AtomicI64::new(now_ms()),
            session: Mutex::new(Session::new(id.clone())),
            id,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn touch(&self) {
        self.last_seen_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub fn last_seen_ms(&self) -> i64 {
        self.last_seen_ms.load(Ordering::Relaxed)
    }

    /// Acquire the turn lock. Held across filtering, generation and history append.
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, Session> {
        self.session.lock().await
    }

    fn idle_for(&self, now: i64) -> Duration {
        Duration::from_millis((now - self.last_seen_ms()).max(0) as u64)
    }
}

/// Get/create/evict seam for session state. `get` returns `None` for unknown or expired ids.
pub trait SessionStore: Send + Sync {
    fn get(&self, id: &str) -> Option<Arc<SessionSlot>>;
    fn create(&self) -> Arc<SessionSlot>;
    fn active_count(&self) -> usize;
    /// Drop sessions idle past the TTL. Returns how many were removed.
    fn evict_expired(&self) -> usize;
}

pub struct InMemorySessionStore {
    sessions: DashMap<String, Arc<SessionSlot>>,
    ttl: Option<Duration>,
    max_sessions: usize,
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new(None, DEFAULT_MAX_SESSIONS)
    }
}

impl InMemorySessionStore {
    pub fn new(ttl: Option<Duration>, max_sessions: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
            max_sessions: max_sessions.max(1),
        }
    }

    fn is_expired(&self, slot: &SessionSlot, now: i64) -> bool {
        self.ttl.map(|ttl| slot.idle_for(now) > ttl).unwrap_or(false)
    }

    fn evict_least_recent(&self) {
        let oldest = self
            .sessions
            .iter()
            .min_by_key(|e| e.value().last_seen_ms())
            .map(|e| e.key().clone());
        if let Some(id) = oldest {
            self.sessions.remove(&id);
            tracing::info!(target: "pagi::solace::session", session_id = %id, "session evicted (capacity)");
        }
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, id: &str) -> Option<Arc<SessionSlot>> {
        let slot = self.sessions.get(id).map(|e| Arc::clone(e.value()))?;
        if self.is_expired(&slot, now_ms()) {
            self.sessions.remove(id);
            tracing::info!(target: "pagi::solace::session", session_id = %id, "session expired on lookup");
            return None;
        }
        slot.touch();
        Some(slot)
    }

    fn create(&self) -> Arc<SessionSlot> {
        while self.sessions.len() >= self.max_sessions {
            self.evict_least_recent();
        }
        let id = uuid::Uuid::new_v4().to_string();
        let slot = Arc::new(SessionSlot::new(id.clone()));
        self.sessions.insert(id, Arc::clone(&slot));
        slot
    }

    fn active_count(&self) -> usize {
        self.sessions.len()
    }

    fn evict_expired(&self) -> usize {
        if self.ttl.is_none() {
            return 0;
        }
        let now = now_ms();
        let before = self.sessions.len();
        self.sessions.retain(|_, slot| !self.is_expired(slot, now));
        before.saturating_sub(self.sessions.len())
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
