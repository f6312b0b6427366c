//! Per-host shared secrets for trusted external sites.

use anyhow::{anyhow, Result};
use secrecy::SecretString;

use super::error::SsoError;

/// Read-only registry built once from configuration.
///
/// Hosts match by exact string equality after lowercasing. There is no wildcard
/// or suffix matching.
#[derive(Clone, Debug, Default)]
pub struct SecretRegistry {
    enabled: bool,
    entries: Vec<(String, SecretString)>,
}

impl SecretRegistry {
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            entries: Vec::new(),
        }
    }

    /// Parse a `host|secret` list, one entry per line.
    ///
    /// # Errors
    /// Returns an error for a line without `|`, an empty host or secret, or a
    /// host listed twice. The error names the line number, never the secret.
    pub fn parse(enabled: bool, text: &str) -> Result<Self> {
        let mut registry = Self::new(enabled);
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (host, secret) = line
                .split_once('|')
                .ok_or_else(|| anyhow!("provider secret line {} is not host|secret", index + 1))?;
            registry
                .insert(host, secret)
                .map_err(|err| anyhow!("provider secret line {}: {err}", index + 1))?;
        }
        Ok(registry)
    }

    /// Add one entry.
    ///
    /// # Errors
    /// Returns an error if the host or secret is empty or the host already exists.
    pub fn insert(&mut self, host: &str, secret: &str) -> Result<()> {
        let host = normalize_host(host);
        if host.is_empty() {
            return Err(anyhow!("empty host"));
        }
        if secret.trim().is_empty() {
            return Err(anyhow!("empty secret for host {host}"));
        }
        if self.entries.iter().any(|(known, _)| *known == host) {
            return Err(anyhow!("duplicate host {host}"));
        }
        self.entries
            .push((host, SecretString::from(secret.trim().to_string())));
        Ok(())
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Look up the secret for `host`.
    ///
    /// # Errors
    /// Returns `SecretNotFound` when no entry matches exactly.
    pub fn secret_for(&self, host: &str) -> Result<&SecretString, SsoError> {
        let host = normalize_host(host);
        self.entries
            .iter()
            .find(|(known, _)| *known == host)
            .map(|(_, secret)| secret)
            .ok_or(SsoError::SecretNotFound)
    }

    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(host, _)| host.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn normalize_host(host: &str) -> String {
    host.trim().to_ascii_lowercase()
}
