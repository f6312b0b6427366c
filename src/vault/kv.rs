use crate::{cli::globals::GlobalArgs, vault, APP_USER_AGENT};
use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{info_span, instrument, Instrument};

pub const PROVIDER_SECRETS_FIELD: &str = "discourse_connect_provider_secrets";

#[instrument(skip(globals))]
/// Read the newline-separated `host|secret` list from a KV v2 secret.
/// # Errors
/// Returns an error if the Vault request fails or the field is missing.
pub async fn read_provider_secrets(
    globals: &GlobalArgs,
    kv_mount: &str,
    kv_path: &str,
) -> Result<SecretString> {
    let client = Client::builder().user_agent(APP_USER_AGENT).build()?;
    let path = format!("/v1/{kv_mount}/data/{kv_path}");
    let url = vault::endpoint_url(&globals.vault_url, &path)?;

    let span = info_span!(
        "vault.kv.read",
        http.method = "GET",
        url = %url
    );
    let response = client
        .get(&url)
        .header("X-Vault-Token", globals.vault_token.expose_secret())
        .send()
        .instrument(span)
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(anyhow!("vault kv read failed: {status} {body}"));
    }

    let json: Value = response.json().await?;
    provider_secrets_from_response(&json)
}

fn provider_secrets_from_response(json: &Value) -> Result<SecretString> {
    let field = json
        .get("data")
        .and_then(|data| data.get("data"))
        .and_then(|data| data.get(PROVIDER_SECRETS_FIELD))
        .context("provider secrets missing from vault response")?;

    // Either one string with an entry per line, or an array of entries.
    match field {
        Value::String(text) => Ok(SecretString::from(text.clone())),
        Value::Array(entries) => {
            let lines = entries
                .iter()
                .map(|entry| {
                    entry
                        .as_str()
                        .ok_or_else(|| anyhow!("provider secret entries must be strings"))
                })
                .collect::<Result<Vec<&str>>>()?;
            Ok(SecretString::from(lines.join("\n")))
        }
        _ => Err(anyhow!("provider secrets must be a string or an array")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn secrets_from_string_field() -> Result<()> {
        let json = json!({
            "data": { "data": { PROVIDER_SECRETS_FIELD: "a.com|one\nb.com|two" } }
        });
        let secrets = provider_secrets_from_response(&json)?;
        assert_eq!(secrets.expose_secret(), "a.com|one\nb.com|two");
        Ok(())
    }

    #[test]
    fn secrets_from_array_field() -> Result<()> {
        let json = json!({
            "data": { "data": { PROVIDER_SECRETS_FIELD: ["a.com|one", "b.com|two"] } }
        });
        let secrets = provider_secrets_from_response(&json)?;
        assert_eq!(secrets.expose_secret(), "a.com|one\nb.com|two");
        Ok(())
    }

    #[test]
    fn missing_or_invalid_field_is_an_error() {
        let missing = json!({ "data": { "data": {} } });
        let number = json!({ "data": { "data": { PROVIDER_SECRETS_FIELD: 42 } } });
        let mixed = json!({ "data": { "data": { PROVIDER_SECRETS_FIELD: ["a.com|one", 1] } } });
        for json in [missing, number, mixed] {
            assert!(provider_secrets_from_response(&json).is_err(), "{json}");
        }
    }
}
