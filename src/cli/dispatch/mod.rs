//! Command-line argument dispatch.
//!
//! Maps validated CLI arguments to the action to run.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{provider, vault};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let provider_opts = provider::Options::parse(matches)?;
    let vault_opts = vault::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        enable_discourse_connect_provider: provider_opts.enabled,
        discourse_connect_provider_secrets: provider_opts.secrets,
        login_url: provider_opts.login_url,
        second_factor_url: provider_opts.second_factor_url,
        session_cookie_name: provider_opts.session_cookie_name,
        pending_ttl_seconds: provider_opts.pending_ttl_seconds,
        nonce_ttl_seconds: provider_opts.nonce_ttl_seconds,
        vault_url: vault_opts.url,
        vault_role_id: vault_opts.role_id,
        vault_secret_id: vault_opts.secret_id,
        vault_wrapped_token: vault_opts.wrapped_token,
        vault_kv_mount: vault_opts.kv_mount,
        vault_kv_path: vault_opts.kv_path,
    }))
}
