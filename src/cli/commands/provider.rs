use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};

use crate::provider::{
    pending::DEFAULT_PENDING_TTL_SECONDS,
    state::{DEFAULT_LOGIN_URL, DEFAULT_SECOND_FACTOR_URL, DEFAULT_SESSION_COOKIE_NAME},
};
use crate::sso::nonce::DEFAULT_NONCE_TTL_SECONDS;

pub const ARG_ENABLE: &str = "enable-discourse-connect-provider";
pub const ARG_SECRETS: &str = "discourse-connect-provider-secrets";
pub const ARG_LOGIN_URL: &str = "login-url";
pub const ARG_SECOND_FACTOR_URL: &str = "second-factor-url";
pub const ARG_SESSION_COOKIE_NAME: &str = "session-cookie-name";
pub const ARG_PENDING_TTL_SECONDS: &str = "pending-ttl-seconds";
pub const ARG_NONCE_TTL_SECONDS: &str = "nonce-ttl-seconds";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ENABLE)
                .long(ARG_ENABLE)
                .help("Allow trusted sites to authenticate against this site")
                .env("SSO_PROVIDER_ENABLE_DISCOURSE_CONNECT_PROVIDER")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_SECRETS)
                .long(ARG_SECRETS)
                .help("Shared secret per trusted host as host|secret (repeatable)")
                .long_help(
                    "Shared secret per trusted host as host|secret. Repeat the flag, or put one entry per line in the environment variable. Prefer the environment or Vault so secrets stay out of the process list.",
                )
                .env("SSO_PROVIDER_DISCOURSE_CONNECT_PROVIDER_SECRETS")
                .hide_env_values(true)
                .value_delimiter('\n')
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new(ARG_LOGIN_URL)
                .long(ARG_LOGIN_URL)
                .help("Where anonymous users are sent to log in")
                .env("SSO_PROVIDER_LOGIN_URL")
                .default_value(DEFAULT_LOGIN_URL),
        )
        .arg(
            Arg::new(ARG_SECOND_FACTOR_URL)
                .long(ARG_SECOND_FACTOR_URL)
                .help("Second factor challenge page")
                .env("SSO_PROVIDER_SECOND_FACTOR_URL")
                .default_value(DEFAULT_SECOND_FACTOR_URL),
        )
        .arg(
            Arg::new(ARG_SESSION_COOKIE_NAME)
                .long(ARG_SESSION_COOKIE_NAME)
                .help("Name of the site session cookie")
                .env("SSO_PROVIDER_SESSION_COOKIE_NAME")
                .default_value(DEFAULT_SESSION_COOKIE_NAME),
        )
        .arg(
            Arg::new(ARG_PENDING_TTL_SECONDS)
                .long(ARG_PENDING_TTL_SECONDS)
                .help("How long a handshake waits for its second factor challenge, in seconds")
                .env("SSO_PROVIDER_PENDING_TTL_SECONDS")
                .default_value("600")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_NONCE_TTL_SECONDS)
                .long(ARG_NONCE_TTL_SECONDS)
                .help("How long a used nonce is remembered, in seconds")
                .env("SSO_PROVIDER_NONCE_TTL_SECONDS")
                .default_value("600")
                .value_parser(clap::value_parser!(u64)),
        )
}

#[derive(Debug, Clone)]
pub struct Options {
    pub enabled: bool,
    pub secrets: Vec<String>,
    pub login_url: String,
    pub second_factor_url: String,
    pub session_cookie_name: String,
    pub pending_ttl_seconds: u64,
    pub nonce_ttl_seconds: u64,
}

impl Options {
    /// # Errors
    /// Returns an error if an argument with a default value is missing.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        Ok(Self {
            enabled: matches.get_flag(ARG_ENABLE),
            secrets: matches
                .get_many::<String>(ARG_SECRETS)
                .map(|values| values.cloned().collect())
                .unwrap_or_default(),
            login_url: matches
                .get_one::<String>(ARG_LOGIN_URL)
                .cloned()
                .context("missing argument: --login-url")?,
            second_factor_url: matches
                .get_one::<String>(ARG_SECOND_FACTOR_URL)
                .cloned()
                .context("missing argument: --second-factor-url")?,
            session_cookie_name: matches
                .get_one::<String>(ARG_SESSION_COOKIE_NAME)
                .cloned()
                .context("missing argument: --session-cookie-name")?,
            pending_ttl_seconds: matches
                .get_one::<u64>(ARG_PENDING_TTL_SECONDS)
                .copied()
                .unwrap_or(DEFAULT_PENDING_TTL_SECONDS),
            nonce_ttl_seconds: matches
                .get_one::<u64>(ARG_NONCE_TTL_SECONDS)
                .copied()
                .unwrap_or(DEFAULT_NONCE_TTL_SECONDS),
        })
    }
}
