use crate::{
    cli::globals::GlobalArgs,
    provider::{self, PgSessionDirectory, ProviderConfig, ProviderState},
    sso::{ConnectProvider, SecretRegistry},
    vault,
};
use anyhow::{anyhow, Context, Result};
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub enable_discourse_connect_provider: bool,
    pub discourse_connect_provider_secrets: Vec<String>,
    pub login_url: String,
    pub second_factor_url: String,
    pub session_cookie_name: String,
    pub pending_ttl_seconds: u64,
    pub nonce_ttl_seconds: u64,
    pub vault_url: Option<String>,
    pub vault_role_id: Option<String>,
    pub vault_secret_id: Option<String>,
    pub vault_wrapped_token: Option<String>,
    pub vault_kv_mount: String,
    pub vault_kv_path: String,
}

impl std::fmt::Debug for Args {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Args")
            .field("port", &self.port)
            .field(
                "enable_discourse_connect_provider",
                &self.enable_discourse_connect_provider,
            )
            .field(
                "discourse_connect_provider_secrets",
                &format!(
                    "*** ({} entries)",
                    self.discourse_connect_provider_secrets.len()
                ),
            )
            .field("login_url", &self.login_url)
            .field("second_factor_url", &self.second_factor_url)
            .field("session_cookie_name", &self.session_cookie_name)
            .field("pending_ttl_seconds", &self.pending_ttl_seconds)
            .field("nonce_ttl_seconds", &self.nonce_ttl_seconds)
            .field("vault_url", &self.vault_url)
            .field("vault_role_id", &self.vault_role_id)
            .field(
                "vault_secret_id",
                &self.vault_secret_id.as_ref().map(|_| "***"),
            )
            .field(
                "vault_wrapped_token",
                &self.vault_wrapped_token.as_ref().map(|_| "***"),
            )
            .field("vault_kv_mount", &self.vault_kv_mount)
            .field("vault_kv_path", &self.vault_kv_path)
            .finish_non_exhaustive()
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the secret list is invalid, Vault or the database cannot be
/// reached, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let secrets = load_provider_secrets(&args).await?;
    let registry = SecretRegistry::parse(
        args.enable_discourse_connect_provider,
        secrets.expose_secret(),
    )
    .context("Invalid DiscourseConnect provider secrets")?;

    if registry.enabled() && registry.is_empty() {
        warn!("DiscourseConnect provider is enabled but no secrets are configured");
    }
    info!(
        enabled = registry.enabled(),
        hosts = registry.len(),
        "Loaded DiscourseConnect provider secrets"
    );

    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&args.dsn)
        .await
        .context("Failed to connect to database")?;

    let config = ProviderConfig::new()
        .with_login_url(args.login_url)
        .with_second_factor_url(args.second_factor_url)
        .with_session_cookie_name(args.session_cookie_name)
        .with_pending_ttl_seconds(args.pending_ttl_seconds)
        .with_nonce_ttl_seconds(args.nonce_ttl_seconds);

    let state = Arc::new(ProviderState::new(
        config,
        ConnectProvider::new(registry),
        Arc::new(PgSessionDirectory::new(pool)),
    ));

    provider::new(args.port, state).await
}

/// Secret list as newline-separated `host|secret` entries, from Vault when a
/// Vault URL is configured, otherwise from the command line.
async fn load_provider_secrets(args: &Args) -> Result<SecretString> {
    let Some(vault_url) = &args.vault_url else {
        return Ok(SecretString::from(
            args.discourse_connect_provider_secrets.join("\n"),
        ));
    };

    if !args.discourse_connect_provider_secrets.is_empty() {
        warn!("Secrets from the command line are ignored when --vault-url is set");
    }

    let mut globals = GlobalArgs::new(vault_url.clone());
    let role_id = args
        .vault_role_id
        .as_deref()
        .ok_or_else(|| anyhow!("Vault role-id is required"))?;

    // If vault wrapped token try to unwrap, otherwise use secret-id.
    let vault_token = if let Some(wrapped) = &args.vault_wrapped_token {
        let secret_id = vault::unwrap(&globals.vault_url, wrapped).await?;
        let (token, _) = vault::approle_login(&globals.vault_url, &secret_id, role_id).await?;
        token
    } else {
        let secret_id = args
            .vault_secret_id
            .as_deref()
            .ok_or_else(|| anyhow!("Vault secret-id is required"))?;
        let (token, _) = vault::approle_login(&globals.vault_url, secret_id, role_id).await?;
        token
    };

    globals.set_token(SecretString::from(vault_token));

    debug!("Global args: {:?}", globals);

    vault::kv::read_provider_secrets(&globals, &args.vault_kv_mount, &args.vault_kv_path)
        .await
        .context("Failed to load DiscourseConnect provider secrets from Vault")
}
