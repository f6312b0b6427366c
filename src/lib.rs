//! # sso-provider (DiscourseConnect identity provider)
//!
//! `sso-provider` lets trusted external sites authenticate users against this
//! site's session using the DiscourseConnect protocol.
//!
//! ## Protocol
//!
//! A site sends `sso` (base64 of a URL-encoded payload) and `sig` (hex
//! HMAC-SHA256 of `sso` under a secret shared with that site). The provider
//! verifies the signature, answers with a payload signed under the same secret,
//! and redirects back to the site's `return_sso_url`.
//!
//! ## Second factor
//!
//! A site may set `require_2fa=true`. Unless the session already confirmed a
//! second factor at login, the user is sent through a challenge first, and the
//! response then carries `confirmed_2fa=true`. Users without an enrolled factor
//! get a `403` asking them to enroll one.
//!
//! ## Configuration
//!
//! The provider is off by default. Secrets are configured per host as
//! `host|secret` lines, either on the command line or in Vault KV.

pub mod cli;
pub mod provider;
pub mod sso;
pub mod vault;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_user_agent() {
        assert!(APP_USER_AGENT.starts_with("sso-provider/"));
    }
}
