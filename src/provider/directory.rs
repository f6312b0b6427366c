//! Session lookup seam.
//!
//! The session cookie belongs to the surrounding site. The provider only reads
//! it: the raw token is hashed and resolved to an identity plus the ceremony
//! flags the gate needs. Ending a session is the one write, used by logout.

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::identity::Identity;
use crate::sso::SessionContext;

/// Identity and gate context for a live session.
#[derive(Clone, Debug)]
pub struct SessionSnapshot {
    pub identity: Identity,
    pub context: SessionContext,
}

#[async_trait]
pub trait SessionDirectory: Send + Sync {
    /// Resolve a hashed session token. `Ok(None)` for unknown or expired sessions.
    async fn lookup(&self, token_hash: &[u8]) -> Result<Option<SessionSnapshot>>;

    async fn end_session(&self, token_hash: &[u8]) -> Result<()>;
}

/// Hash a session token so raw values are never used as lookup keys.
#[must_use]
pub fn hash_session_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// In-process directory for embedding and tests.
#[derive(Debug, Default)]
pub struct MemorySessionDirectory {
    sessions: Mutex<HashMap<Vec<u8>, SessionSnapshot>>,
}

impl MemorySessionDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, token: &str, snapshot: SessionSnapshot) {
        self.sessions
            .lock()
            .await
            .insert(hash_session_token(token), snapshot);
    }

    /// Record a successful second-factor challenge at `confirmed_at` (unix microseconds).
    /// Returns `false` when the session does not exist.
    pub async fn confirm_second_factor(&self, token: &str, confirmed_at: i64) -> bool {
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(&hash_session_token(token)) {
            Some(snapshot) => {
                snapshot.context.second_factor_confirmed_at = Some(confirmed_at);
                true
            }
            None => false,
        }
    }

    pub async fn contains(&self, token: &str) -> bool {
        self.sessions
            .lock()
            .await
            .contains_key(&hash_session_token(token))
    }
}

#[async_trait]
impl SessionDirectory for MemorySessionDirectory {
    async fn lookup(&self, token_hash: &[u8]) -> Result<Option<SessionSnapshot>> {
        Ok(self.sessions.lock().await.get(token_hash).cloned())
    }

    async fn end_session(&self, token_hash: &[u8]) -> Result<()> {
        self.sessions.lock().await.remove(token_hash);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::identity::tests::bilbo;

    #[test]
    fn hash_session_token_stable() {
        assert_eq!(hash_session_token("token"), hash_session_token("token"));
        assert_ne!(hash_session_token("token"), hash_session_token("other"));
        assert_eq!(hash_session_token("token").len(), 32);
    }

    #[tokio::test]
    async fn memory_directory_lookup_and_end() -> Result<()> {
        let directory = MemorySessionDirectory::new();
        directory
            .insert(
                "session-token",
                SessionSnapshot {
                    identity: bilbo(),
                    context: SessionContext::default(),
                },
            )
            .await;

        let hash = hash_session_token("session-token");
        let found = directory.lookup(&hash).await?;
        assert_eq!(
            found.map(|snapshot| snapshot.identity.username),
            Some("bilbo".to_string())
        );
        let missing = directory.lookup(&hash_session_token("nope")).await?;
        assert!(missing.is_none());

        assert!(directory.confirm_second_factor("session-token", 42).await);
        assert_eq!(
            directory
                .lookup(&hash)
                .await?
                .and_then(|snapshot| snapshot.context.second_factor_confirmed_at),
            Some(42)
        );

        directory.end_session(&hash).await?;
        assert!(!directory.contains("session-token").await);
        assert!(!directory.confirm_second_factor("session-token", 43).await);
        Ok(())
    }
}
