// In-process coordination store
//
// Linearizable by construction (one mutex around all state). Expired sessions
// are reaped lazily at the start of every call, using tokio's clock so tests
// can drive time with `tokio::time::pause`/`advance`.

use super::{CoordinationStore, KvPair, SessionEntry};
use crate::{
    lease::{ExpiryBehavior, LeaseId, DEFAULT_LOCK_DELAY},
    Error, Result,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

#[derive(Debug)]
struct Session {
    entry: SessionEntry,
    deadline: Instant,
}

#[derive(Debug, Default)]
struct State {
    sessions: HashMap<LeaseId, Session>,
    kv: HashMap<String, KvPair>,
    /// key -> instant before which acquisition is refused
    lock_delays: HashMap<String, Instant>,
}

/// Call counters, for asserting cleanup behaviour
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub created: usize,
    pub renewed: usize,
    pub destroyed: usize,
    pub acquire_attempts: usize,
}

#[derive(Debug, Default)]
struct Counters {
    created: AtomicUsize,
    renewed: AtomicUsize,
    destroyed: AtomicUsize,
    acquire_attempts: AtomicUsize,
}

#[derive(Debug)]
pub struct InMemoryStore {
    state: Mutex<State>,
    lock_delay: Duration,
    unavailable: AtomicBool,
    /// Delay added before every call is served
    latency: Mutex<Duration>,
    counters: Counters,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_lock_delay(DEFAULT_LOCK_DELAY)
    }

    /// Store whose sessions default to the given lock-delay
    pub fn with_lock_delay(lock_delay: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            lock_delay,
            unavailable: AtomicBool::new(false),
            latency: Mutex::new(Duration::ZERO),
            counters: Counters::default(),
        }
    }

    /// Simulate losing (or regaining) connectivity to the store
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Simulate a slow round trip to the store
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            created: self.counters.created.load(Ordering::SeqCst),
            renewed: self.counters.renewed.load(Ordering::SeqCst),
            destroyed: self.counters.destroyed.load(Ordering::SeqCst),
            acquire_attempts: self.counters.acquire_attempts.load(Ordering::SeqCst),
        }
    }

    /// Number of sessions the store currently considers alive
    pub fn active_sessions(&self) -> usize {
        let mut state = self.state.lock();
        self.reap(&mut state, Instant::now());
        state.sessions.len()
    }

    /// Wait out the simulated latency, then fail if the store is unreachable
    async fn round_trip(&self) -> Result<()> {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            sleep(latency).await;
        }
        self.check_available()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::StoreUnavailable("connection refused".to_string()));
        }
        Ok(())
    }

    fn reap(&self, state: &mut State, now: Instant) {
        state.lock_delays.retain(|_, until| *until > now);

        let expired: Vec<LeaseId> = state
            .sessions
            .iter()
            .filter(|(_, session)| session.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for id in expired {
            debug!("session {} expired", id);
            self.invalidate(state, &id, now);
        }
    }

    /// Drop a session and apply its expiry behavior to every record it owns
    fn invalidate(&self, state: &mut State, id: &LeaseId, now: Instant) {
        let Some(session) = state.sessions.remove(id) else {
            return;
        };
        let lock_delay = session.entry.lock_delay.unwrap_or(self.lock_delay);

        let owned: Vec<String> = state
            .kv
            .values()
            .filter(|pair| pair.session.as_ref() == Some(id))
            .map(|pair| pair.key.clone())
            .collect();

        for key in owned {
            match session.entry.behavior {
                ExpiryBehavior::Delete => {
                    state.kv.remove(&key);
                }
                ExpiryBehavior::Release => {
                    if let Some(pair) = state.kv.get_mut(&key) {
                        pair.session = None;
                    }
                }
            }
            if !lock_delay.is_zero() {
                state.lock_delays.insert(key, now + lock_delay);
            }
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordinationStore for InMemoryStore {
    async fn session_create(&self, entry: &SessionEntry) -> Result<LeaseId> {
        self.round_trip().await?;
        let now = Instant::now();
        let mut state = self.state.lock();
        self.reap(&mut state, now);

        let id = LeaseId(uuid::Uuid::new_v4().to_string());
        state.sessions.insert(
            id.clone(),
            Session {
                entry: entry.clone(),
                deadline: now + entry.ttl,
            },
        );
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn session_renew(&self, id: &LeaseId, ttl: Duration) -> Result<()> {
        self.round_trip().await?;
        let now = Instant::now();
        let mut state = self.state.lock();
        self.reap(&mut state, now);

        let session = state
            .sessions
            .get_mut(id)
            .ok_or_else(|| Error::LeaseAlreadyInvalid { lease_id: id.clone() })?;
        session.deadline = now + ttl;
        self.counters.renewed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn session_destroy(&self, id: &LeaseId) -> Result<()> {
        self.round_trip().await?;
        let now = Instant::now();
        let mut state = self.state.lock();
        self.reap(&mut state, now);

        self.counters.destroyed.fetch_add(1, Ordering::SeqCst);
        if !state.sessions.contains_key(id) {
            return Err(Error::LeaseAlreadyInvalid { lease_id: id.clone() });
        }
        self.invalidate(&mut state, id, now);
        Ok(())
    }

    async fn kv_acquire(&self, pair: &KvPair) -> Result<bool> {
        self.round_trip().await?;
        let now = Instant::now();
        let mut state = self.state.lock();
        self.reap(&mut state, now);
        self.counters.acquire_attempts.fetch_add(1, Ordering::SeqCst);

        let session = pair.session.clone().ok_or(Error::NoLease)?;
        if !state.sessions.contains_key(&session) {
            return Err(Error::LeaseAlreadyInvalid { lease_id: session });
        }

        // reap has already dropped elapsed delays
        if state.lock_delays.contains_key(&pair.key) {
            return Ok(false);
        }

        match state.kv.get_mut(&pair.key) {
            Some(existing) => {
                if matches!(&existing.session, Some(owner) if *owner != session) {
                    return Ok(false);
                }
                // Free, or already ours: bind and refresh the value
                existing.value = pair.value.clone();
                existing.session = Some(session);
                Ok(true)
            }
            None => {
                state.kv.insert(pair.key.clone(), pair.clone());
                Ok(true)
            }
        }
    }

    async fn kv_get(&self, key: &str) -> Result<Option<KvPair>> {
        self.round_trip().await?;
        let mut state = self.state.lock();
        self.reap(&mut state, Instant::now());
        Ok(state.kv.get(key).cloned())
    }
}
