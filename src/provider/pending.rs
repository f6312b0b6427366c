//! Handshakes waiting for a second-factor challenge.
//!
//! One entry per session; a new `Required` handshake in the same session replaces
//! the previous one. Entries hold the verified wire payload and signature, not a
//! parsed handshake, so completion re-verifies from scratch.

use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use uuid::Uuid;

pub const DEFAULT_PENDING_TTL_SECONDS: u64 = 10 * 60;

#[derive(Clone, Debug)]
pub struct PendingHandshake {
    pub challenge_id: Uuid,
    pub wire: String,
    pub signature: String,
    pub host: String,
    /// Unix microseconds; only a challenge answered after this counts.
    pub created_at_micros: i64,
    created_at: Instant,
}

#[derive(Debug)]
pub struct PendingHandshakes {
    ttl: Duration,
    entries: Mutex<HashMap<String, PendingHandshake>>,
}

impl PendingHandshakes {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Stash a verified payload for `session_key`, replacing any earlier entry.
    pub async fn store(
        &self,
        session_key: &str,
        wire: &str,
        signature: &str,
        host: &str,
    ) -> PendingHandshake {
        let pending = PendingHandshake {
            challenge_id: Uuid::new_v4(),
            wire: wire.to_string(),
            signature: signature.to_string(),
            host: host.to_string(),
            created_at_micros: unix_now_micros(),
            created_at: Instant::now(),
        };
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| entry.created_at.elapsed() < self.ttl);
        entries.insert(session_key.to_string(), pending.clone());
        pending
    }

    /// Live entry for `session_key` if its challenge id matches.
    pub async fn peek(&self, session_key: &str, challenge_id: Uuid) -> Option<PendingHandshake> {
        let entries = self.entries.lock().await;
        entries
            .get(session_key)
            .filter(|entry| entry.challenge_id == challenge_id)
            .filter(|entry| entry.created_at.elapsed() < self.ttl)
            .cloned()
    }

    /// Remove and return the entry if the challenge id matches and it is live.
    pub async fn take(&self, session_key: &str, challenge_id: Uuid) -> Option<PendingHandshake> {
        let mut entries = self.entries.lock().await;
        if entries
            .get(session_key)
            .is_some_and(|entry| entry.challenge_id == challenge_id)
        {
            entries
                .remove(session_key)
                .filter(|entry| entry.created_at.elapsed() < self.ttl)
        } else {
            None
        }
    }

    pub async fn discard(&self, session_key: &str) {
        self.entries.lock().await.remove(session_key);
    }

    /// Number of stashed entries, live or not yet pruned.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

impl Default for PendingHandshakes {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_PENDING_TTL_SECONDS))
    }
}

/// Wall clock in unix microseconds, the unit of `second_factor_confirmed_at`.
#[must_use]
pub fn unix_now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            i64::try_from(elapsed.as_micros()).unwrap_or(i64::MAX)
        })
}
