use anyhow::Result;
use clap::{Arg, ArgGroup, Command};

pub const ARG_VAULT_URL: &str = "vault-url";
pub const ARG_VAULT_ROLE_ID: &str = "vault-role-id";
pub const ARG_VAULT_SECRET_ID: &str = "vault-secret-id";
pub const ARG_VAULT_WRAPPED_TOKEN: &str = "vault-wrapped-token";
pub const ARG_VAULT_KV_MOUNT: &str = "vault-kv-mount";
pub const ARG_VAULT_KV_PATH: &str = "vault-kv-path";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_VAULT_URL)
                .long(ARG_VAULT_URL)
                .help("Vault approle login URL, example: https://vault.tld:8200/v1/auth/<approle>/login")
                .long_help(
                    "Vault approle login URL. When set, the provider secret list is read from Vault KV instead of --discourse-connect-provider-secrets.",
                )
                .env("SSO_PROVIDER_VAULT_URL"),
        )
        .arg(
            Arg::new(ARG_VAULT_ROLE_ID)
                .long(ARG_VAULT_ROLE_ID)
                .help("Vault role id (required with --vault-url)")
                .env("SSO_PROVIDER_VAULT_ROLE_ID"),
        )
        .arg(
            Arg::new(ARG_VAULT_SECRET_ID)
                .long(ARG_VAULT_SECRET_ID)
                .help("Vault secret id (required with --vault-url unless using wrapped token)")
                .env("SSO_PROVIDER_VAULT_SECRET_ID")
                .conflicts_with(ARG_VAULT_WRAPPED_TOKEN),
        )
        .arg(
            Arg::new(ARG_VAULT_WRAPPED_TOKEN)
                .long(ARG_VAULT_WRAPPED_TOKEN)
                .help("Vault wrapped secret id")
                .env("SSO_PROVIDER_VAULT_WRAPPED_TOKEN"),
        )
        .arg(
            Arg::new(ARG_VAULT_KV_MOUNT)
                .long(ARG_VAULT_KV_MOUNT)
                .help("Vault KV-v2 mount path for provider secrets")
                .env("SSO_PROVIDER_VAULT_KV_MOUNT")
                .default_value("secret/sso-provider"),
        )
        .arg(
            Arg::new(ARG_VAULT_KV_PATH)
                .long(ARG_VAULT_KV_PATH)
                .help("Vault KV-v2 secret path for provider secrets")
                .env("SSO_PROVIDER_VAULT_KV_PATH")
                .default_value("config"),
        )
        .group(
            ArgGroup::new("vault-auth")
                .args([
                    ARG_VAULT_ROLE_ID,
                    ARG_VAULT_SECRET_ID,
                    ARG_VAULT_WRAPPED_TOKEN,
                ])
                .multiple(true),
        )
}

#[derive(Debug, Clone)]
pub struct Options {
    pub url: Option<String>,
    pub role_id: Option<String>,
    pub secret_id: Option<String>,
    pub wrapped_token: Option<String>,
    pub kv_mount: String,
    pub kv_path: String,
}

impl Options {
    /// # Errors
    /// Returns an error if `--vault-url` is set without the credentials it needs.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        let options = Self {
            url: matches.get_one::<String>(ARG_VAULT_URL).cloned(),
            role_id: matches.get_one::<String>(ARG_VAULT_ROLE_ID).cloned(),
            secret_id: matches.get_one::<String>(ARG_VAULT_SECRET_ID).cloned(),
            wrapped_token: matches.get_one::<String>(ARG_VAULT_WRAPPED_TOKEN).cloned(),
            kv_mount: matches
                .get_one::<String>(ARG_VAULT_KV_MOUNT)
                .cloned()
                .unwrap_or_else(|| "secret/sso-provider".to_string()),
            kv_path: matches
                .get_one::<String>(ARG_VAULT_KV_PATH)
                .cloned()
                .unwrap_or_else(|| "config".to_string()),
        };

        if options.url.is_some() {
            if options.role_id.is_none() {
                anyhow::bail!("missing required argument: --{ARG_VAULT_ROLE_ID}");
            }
            if options.secret_id.is_none() && options.wrapped_token.is_none() {
                anyhow::bail!(
                    "missing required argument: --{ARG_VAULT_SECRET_ID} or --{ARG_VAULT_WRAPPED_TOKEN}"
                );
            }
        }

        Ok(options)
    }
}
