//! Single-use ledger for request nonces.
//!
//! A nonce is consumed when a response payload is issued for it. Entries are
//! forgotten after the TTL, so a nonce older than the TTL is the external site's
//! responsibility to reject.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub const DEFAULT_NONCE_TTL_SECONDS: u64 = 10 * 60;

#[derive(Debug)]
pub struct NonceLedger {
    ttl: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl NonceLedger {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mark `nonce` as used. Returns `false` if it was already used within the TTL.
    pub async fn consume(&self, host: &str, nonce: &str) -> bool {
        let key = format!("{host}\n{nonce}");
        let mut seen = self.seen.lock().await;
        seen.retain(|_, used_at| used_at.elapsed() < self.ttl);
        if seen.contains_key(&key) {
            return false;
        }
        seen.insert(key, Instant::now());
        true
    }

    pub async fn len(&self) -> usize {
        self.seen.lock().await.len()
    }
}

impl Default for NonceLedger {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_NONCE_TTL_SECONDS))
    }
}
