//! Provider configuration and shared request state.

use std::sync::Arc;
use std::time::Duration;

use super::{
    directory::SessionDirectory,
    pending::{PendingHandshakes, DEFAULT_PENDING_TTL_SECONDS},
};
use crate::sso::{nonce::DEFAULT_NONCE_TTL_SECONDS, ConnectProvider, NonceLedger};

pub const DEFAULT_LOGIN_URL: &str = "/login";
pub const DEFAULT_SECOND_FACTOR_URL: &str = "/session/2fa";
pub const DEFAULT_SESSION_COOKIE_NAME: &str = "_sso_provider_session";
pub const SSO_PROVIDER_PATH: &str = "/session/sso_provider";
pub const SSO_PROVIDER_COMPLETE_PATH: &str = "/session/sso_provider/complete";

#[derive(Clone, Debug)]
pub struct ProviderConfig {
    login_url: String,
    second_factor_url: String,
    session_cookie_name: String,
    pending_ttl_seconds: u64,
    nonce_ttl_seconds: u64,
}

impl ProviderConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            login_url: DEFAULT_LOGIN_URL.to_string(),
            second_factor_url: DEFAULT_SECOND_FACTOR_URL.to_string(),
            session_cookie_name: DEFAULT_SESSION_COOKIE_NAME.to_string(),
            pending_ttl_seconds: DEFAULT_PENDING_TTL_SECONDS,
            nonce_ttl_seconds: DEFAULT_NONCE_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_login_url(mut self, url: String) -> Self {
        self.login_url = url;
        self
    }

    #[must_use]
    pub fn with_second_factor_url(mut self, url: String) -> Self {
        self.second_factor_url = url;
        self
    }

    #[must_use]
    pub fn with_session_cookie_name(mut self, name: String) -> Self {
        self.session_cookie_name = name;
        self
    }

    #[must_use]
    pub fn with_pending_ttl_seconds(mut self, seconds: u64) -> Self {
        self.pending_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_nonce_ttl_seconds(mut self, seconds: u64) -> Self {
        self.nonce_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn login_url(&self) -> &str {
        &self.login_url
    }

    #[must_use]
    pub fn second_factor_url(&self) -> &str {
        &self.second_factor_url
    }

    #[must_use]
    pub fn session_cookie_name(&self) -> &str {
        &self.session_cookie_name
    }

    #[must_use]
    pub fn pending_ttl_seconds(&self) -> u64 {
        self.pending_ttl_seconds
    }

    #[must_use]
    pub fn nonce_ttl_seconds(&self) -> u64 {
        self.nonce_ttl_seconds
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ProviderState {
    config: ProviderConfig,
    provider: ConnectProvider,
    directory: Arc<dyn SessionDirectory>,
    pending: PendingHandshakes,
    nonces: NonceLedger,
}

impl ProviderState {
    pub fn new(
        config: ProviderConfig,
        provider: ConnectProvider,
        directory: Arc<dyn SessionDirectory>,
    ) -> Self {
        let pending = PendingHandshakes::new(Duration::from_secs(config.pending_ttl_seconds()));
        let nonces = NonceLedger::new(Duration::from_secs(config.nonce_ttl_seconds()));
        Self {
            config,
            provider,
            directory,
            pending,
            nonces,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    #[must_use]
    pub fn provider(&self) -> &ConnectProvider {
        &self.provider
    }

    pub(crate) fn directory(&self) -> &dyn SessionDirectory {
        self.directory.as_ref()
    }

    #[must_use]
    pub fn pending(&self) -> &PendingHandshakes {
        &self.pending
    }

    #[must_use]
    pub fn nonces(&self) -> &NonceLedger {
        &self.nonces
    }
}
