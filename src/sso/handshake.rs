//! One DiscourseConnect handshake, parsed from a signed payload.
//!
//! Inbound: `from_request` / `from_payload` check the provider flag, resolve the
//! secret for the return host, decode, verify, and only then read fields.
//! Outbound: `to_response_payload` is the only way a response payload is built;
//! it always leads with the request nonce.

use secrecy::SecretString;
use std::sync::Arc;
use url::{form_urlencoded, Url};

use super::{
    codec::{decode, encode, PayloadFields},
    error::SsoError,
    secrets::SecretRegistry,
    signer::{HmacSha256Signer, PayloadSigner},
};

pub const FIELD_NONCE: &str = "nonce";
pub const FIELD_RETURN_SSO_URL: &str = "return_sso_url";
pub const FIELD_REQUIRE_2FA: &str = "require_2fa";
pub const FIELD_LOGOUT: &str = "logout";

/// The only accepted truthy token; anything else, including absence, is false.
pub const TRUTHY: &str = "true";

/// A flag is set iff present and exactly `"true"`.
#[must_use]
pub fn parse_flag(value: Option<&str>) -> bool {
    value == Some(TRUTHY)
}

/// Secret registry plus the signer used for every handshake.
#[derive(Clone, Debug)]
pub struct ConnectProvider {
    registry: Arc<SecretRegistry>,
    signer: Arc<dyn PayloadSigner>,
}

impl ConnectProvider {
    #[must_use]
    pub fn new(registry: SecretRegistry) -> Self {
        Self::with_signer(registry, Arc::new(HmacSha256Signer))
    }

    #[must_use]
    pub fn with_signer(registry: SecretRegistry, signer: Arc<dyn PayloadSigner>) -> Self {
        Self {
            registry: Arc::new(registry),
            signer,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &SecretRegistry {
        &self.registry
    }

    #[must_use]
    pub fn signer(&self) -> &Arc<dyn PayloadSigner> {
        &self.signer
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.registry.enabled()
    }
}

#[derive(Clone, Debug)]
pub struct SsoHandshake {
    nonce: String,
    return_sso_url: Url,
    host: String,
    shared_secret: SecretString,
    require_2fa: bool,
    logout: bool,
    extra: PayloadFields,
    signer: Arc<dyn PayloadSigner>,
}

impl SsoHandshake {
    /// Start a handshake on the requesting side (trusted site or tests).
    ///
    /// # Errors
    /// Returns `InvalidHandshake` for an empty nonce or a return URL that is not
    /// an absolute http(s) URL with a host.
    pub fn new(
        nonce: impl Into<String>,
        return_sso_url: &str,
        shared_secret: SecretString,
    ) -> Result<Self, SsoError> {
        let nonce = nonce.into();
        if nonce.is_empty() {
            return Err(SsoError::InvalidHandshake("missing nonce"));
        }
        let (return_sso_url, host) = parse_return_url(return_sso_url)?;
        Ok(Self {
            nonce,
            return_sso_url,
            host,
            shared_secret,
            require_2fa: false,
            logout: false,
            extra: PayloadFields::new(),
            signer: Arc::new(HmacSha256Signer),
        })
    }

    #[must_use]
    pub fn with_require_2fa(mut self, require_2fa: bool) -> Self {
        self.require_2fa = require_2fa;
        self
    }

    #[must_use]
    pub fn with_logout(mut self, logout: bool) -> Self {
        self.logout = logout;
        self
    }

    /// Add a passthrough field. Recognized keys are ignored here; use the
    /// dedicated setters instead.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        if !is_recognized(&key) {
            self.extra.set(key, value);
        }
        self
    }

    #[must_use]
    pub fn with_signer(mut self, signer: Arc<dyn PayloadSigner>) -> Self {
        self.signer = signer;
        self
    }

    /// Parse an inbound request, resolving the secret from the host of the
    /// payload's `return_sso_url`.
    ///
    /// # Errors
    /// Same as [`SsoHandshake::from_payload`]. The provider flag is checked before
    /// the payload is looked at.
    pub fn from_request(
        provider: &ConnectProvider,
        wire: &str,
        signature: &str,
    ) -> Result<Self, SsoError> {
        if !provider.enabled() {
            return Err(SsoError::ProviderDisabled);
        }
        let host = return_host_hint(wire)?;
        Self::from_payload(provider, wire, signature, &host)
    }

    /// Verify and materialize a handshake for `host`.
    ///
    /// # Errors
    /// `ProviderDisabled` before anything else, then `SecretNotFound`,
    /// `MalformedPayload`, `SignatureMismatch`, and finally `InvalidHandshake`
    /// for a missing nonce, a bad return URL, or a return URL on another host.
    pub fn from_payload(
        provider: &ConnectProvider,
        wire: &str,
        signature: &str,
        host: &str,
    ) -> Result<Self, SsoError> {
        if !provider.enabled() {
            return Err(SsoError::ProviderDisabled);
        }
        let secret = provider.registry().secret_for(host)?;
        let mut fields = decode(wire)?;
        if !provider.signer().verify(wire, signature, secret) {
            return Err(SsoError::SignatureMismatch);
        }

        let nonce = fields
            .remove(FIELD_NONCE)
            .filter(|nonce| !nonce.is_empty())
            .ok_or(SsoError::InvalidHandshake("missing nonce"))?;
        let raw_url = fields
            .remove(FIELD_RETURN_SSO_URL)
            .ok_or(SsoError::InvalidHandshake("missing return_sso_url"))?;
        let (return_sso_url, url_host) = parse_return_url(&raw_url)?;
        if url_host != host.trim().to_ascii_lowercase() {
            return Err(SsoError::InvalidHandshake(
                "return_sso_url host does not match secret host",
            ));
        }
        let require_2fa = parse_flag(fields.remove(FIELD_REQUIRE_2FA).as_deref());
        let logout = parse_flag(fields.remove(FIELD_LOGOUT).as_deref());

        Ok(Self {
            nonce,
            return_sso_url,
            host: url_host,
            shared_secret: secret.clone(),
            require_2fa,
            logout,
            extra: fields,
            signer: Arc::clone(provider.signer()),
        })
    }

    #[must_use]
    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    #[must_use]
    pub fn return_sso_url(&self) -> &Url {
        &self.return_sso_url
    }

    /// Lowercased host of `return_sso_url`, the key the secret was resolved by.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn require_2fa(&self) -> bool {
        self.require_2fa
    }

    #[must_use]
    pub fn logout(&self) -> bool {
        self.logout
    }

    /// Fields that are not recognized by the handshake, in payload order.
    #[must_use]
    pub fn extra(&self) -> &PayloadFields {
        &self.extra
    }

    /// Build the signed request payload a trusted site sends to the provider.
    #[must_use]
    pub fn to_request_payload(&self) -> (String, String) {
        let mut fields = PayloadFields::new()
            .with(FIELD_NONCE, self.nonce.as_str())
            .with(FIELD_RETURN_SSO_URL, self.return_sso_url.as_str());
        if self.require_2fa {
            fields.set(FIELD_REQUIRE_2FA, TRUTHY);
        }
        if self.logout {
            fields.set(FIELD_LOGOUT, TRUTHY);
        }
        for (key, value) in self.extra.iter() {
            fields.set(key, value);
        }
        self.sign_fields(&fields)
    }

    /// `sso=…&sig=…` for the request payload.
    #[must_use]
    pub fn to_query(&self) -> String {
        let (wire, signature) = self.to_request_payload();
        form_urlencoded::Serializer::new(String::new())
            .append_pair("sso", &wire)
            .append_pair("sig", &signature)
            .finish()
    }

    /// Sign `nonce` followed by `results`. A `nonce` key in `results` is dropped.
    #[must_use]
    pub fn to_response_payload(&self, results: &PayloadFields) -> (String, String) {
        let mut fields = PayloadFields::new().with(FIELD_NONCE, self.nonce.as_str());
        for (key, value) in results.iter().filter(|(key, _)| *key != FIELD_NONCE) {
            fields.set(key, value);
        }
        self.sign_fields(&fields)
    }

    /// `return_sso_url` with the signed response appended as `sso` and `sig`.
    #[must_use]
    pub fn response_url(&self, results: &PayloadFields) -> Url {
        let (wire, signature) = self.to_response_payload(results);
        let mut url = self.return_sso_url.clone();
        url.query_pairs_mut()
            .append_pair("sso", &wire)
            .append_pair("sig", &signature);
        url
    }

    fn sign_fields(&self, fields: &PayloadFields) -> (String, String) {
        let wire = encode(fields);
        let signature = self.signer.sign(&wire, &self.shared_secret);
        (wire, signature)
    }
}

fn is_recognized(key: &str) -> bool {
    matches!(
        key,
        FIELD_NONCE | FIELD_RETURN_SSO_URL | FIELD_REQUIRE_2FA | FIELD_LOGOUT
    )
}

fn parse_return_url(raw: &str) -> Result<(Url, String), SsoError> {
    let url = Url::parse(raw).map_err(|_| SsoError::InvalidHandshake("invalid return_sso_url"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(SsoError::InvalidHandshake("invalid return_sso_url"));
    }
    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .map(str::to_ascii_lowercase)
        .ok_or(SsoError::InvalidHandshake("invalid return_sso_url"))?;
    Ok((url, host))
}

/// Host of `return_sso_url` read from an unverified payload; used only to pick
/// the secret that the payload is then verified against.
fn return_host_hint(wire: &str) -> Result<String, SsoError> {
    let fields = decode(wire)?;
    let raw = fields
        .get(FIELD_RETURN_SSO_URL)
        .ok_or(SsoError::InvalidHandshake("missing return_sso_url"))?;
    parse_return_url(raw).map(|(_, host)| host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SSO_SECRET: &str = "mysecretmyprecious";

    fn provider() -> ConnectProvider {
        let registry = SecretRegistry::parse(true, &format!("hobbit-shire.com|{SSO_SECRET}"))
            .unwrap_or_default();
        ConnectProvider::new(registry)
    }

    fn sso() -> Result<SsoHandshake, SsoError> {
        Ok(SsoHandshake::new(
            "mysecurenonce",
            "http://hobbit-shire.com/sso",
            SecretString::from(SSO_SECRET),
        )?
        .with_require_2fa(true))
    }

    #[derive(Debug, Default)]
    struct CountingSigner {
        verifications: AtomicUsize,
    }

    impl PayloadSigner for CountingSigner {
        fn sign(&self, wire: &str, secret: &SecretString) -> String {
            HmacSha256Signer.sign(wire, secret)
        }

        fn verify(&self, wire: &str, signature_hex: &str, secret: &SecretString) -> bool {
            self.verifications.fetch_add(1, Ordering::SeqCst);
            HmacSha256Signer.verify(wire, signature_hex, secret)
        }
    }

    #[test]
    fn parse_flag_accepts_only_true() {
        assert!(parse_flag(Some("true")));
        for value in ["1", "TRUE", "True", "yes", "", "false", " true"] {
            assert!(!parse_flag(Some(value)), "{value}");
        }
        assert!(!parse_flag(None));
    }

    #[test]
    fn signed_payload_from_registered_host_verifies() -> Result<(), SsoError> {
        let (wire, sig) = sso()?.to_request_payload();
        let handshake = SsoHandshake::from_payload(&provider(), &wire, &sig, "hobbit-shire.com")?;
        assert_eq!(handshake.nonce(), "mysecurenonce");
        assert_eq!(
            handshake.return_sso_url().as_str(),
            "http://hobbit-shire.com/sso"
        );
        assert!(handshake.require_2fa());
        assert!(!handshake.logout());
        assert!(handshake.extra().is_empty());
        Ok(())
    }

    #[test]
    fn same_payload_claiming_other_host_fails_resolution() -> Result<(), SsoError> {
        let (wire, sig) = sso()?.to_request_payload();
        let err = SsoHandshake::from_payload(&provider(), &wire, &sig, "mordor.com").err();
        assert_eq!(err, Some(SsoError::SecretNotFound));
        Ok(())
    }

    #[test]
    fn from_request_resolves_return_url_host() -> Result<(), SsoError> {
        let (wire, sig) = sso()?.to_request_payload();
        let handshake = SsoHandshake::from_request(&provider(), &wire, &sig)?;
        assert_eq!(handshake.host(), "hobbit-shire.com");
        Ok(())
    }

    #[test]
    fn host_mismatch_after_verification_is_invalid() -> Result<(), SsoError> {
        // Same secret registered for two hosts; the payload's return URL names one.
        let registry = SecretRegistry::parse(
            true,
            &format!("hobbit-shire.com|{SSO_SECRET}\nmordor.com|{SSO_SECRET}"),
        )
        .unwrap_or_default();
        let (wire, sig) = sso()?.to_request_payload();
        let err =
            SsoHandshake::from_payload(&ConnectProvider::new(registry), &wire, &sig, "mordor.com")
                .err();
        assert!(matches!(err, Some(SsoError::InvalidHandshake(_))));
        Ok(())
    }

    #[test]
    fn flipped_signature_is_rejected() -> Result<(), SsoError> {
        let (wire, sig) = sso()?.to_request_payload();
        let mut flipped: Vec<char> = sig.chars().collect();
        flipped[0] = if flipped[0] == 'a' { 'b' } else { 'a' };
        let flipped: String = flipped.into_iter().collect();
        let err = SsoHandshake::from_request(&provider(), &wire, &flipped).err();
        assert_eq!(err, Some(SsoError::SignatureMismatch));
        Ok(())
    }

    #[test]
    fn disabled_provider_fails_before_verification() -> Result<(), SsoError> {
        let signer = Arc::new(CountingSigner::default());
        let registry = SecretRegistry::parse(false, &format!("hobbit-shire.com|{SSO_SECRET}"))
            .unwrap_or_default();
        let provider = ConnectProvider::with_signer(registry, signer.clone());
        let (wire, sig) = sso()?.to_request_payload();

        assert_eq!(
            SsoHandshake::from_request(&provider, &wire, &sig).err(),
            Some(SsoError::ProviderDisabled)
        );
        assert_eq!(
            SsoHandshake::from_payload(&provider, &wire, &sig, "hobbit-shire.com").err(),
            Some(SsoError::ProviderDisabled)
        );
        assert_eq!(signer.verifications.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[test]
    fn enabled_provider_verifies_once() -> Result<(), SsoError> {
        let signer = Arc::new(CountingSigner::default());
        let registry = SecretRegistry::parse(true, &format!("hobbit-shire.com|{SSO_SECRET}"))
            .unwrap_or_default();
        let provider = ConnectProvider::with_signer(registry, signer.clone());
        let (wire, sig) = sso()?.to_request_payload();
        SsoHandshake::from_request(&provider, &wire, &sig)?;
        assert_eq!(signer.verifications.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn missing_nonce_is_invalid() {
        let secret = SecretString::from(SSO_SECRET);
        let wire = encode(
            &PayloadFields::new().with(FIELD_RETURN_SSO_URL, "http://hobbit-shire.com/sso"),
        );
        let sig = super::super::signer::sign(&wire, &secret);
        assert_eq!(
            SsoHandshake::from_request(&provider(), &wire, &sig).err(),
            Some(SsoError::InvalidHandshake("missing nonce"))
        );
    }

    #[test]
    fn missing_return_url_is_invalid() {
        let wire = encode(&PayloadFields::new().with(FIELD_NONCE, "abc"));
        assert_eq!(
            SsoHandshake::from_request(&provider(), &wire, "00").err(),
            Some(SsoError::InvalidHandshake("missing return_sso_url"))
        );
    }

    #[test]
    fn relative_or_foreign_scheme_return_url_is_invalid() {
        let secret = SecretString::from(SSO_SECRET);
        for url in ["/sso", "javascript:alert(1)", "ftp://hobbit-shire.com/sso"] {
            let result = SsoHandshake::new("n", url, secret.clone());
            assert!(result.is_err(), "{url}");
        }
        let empty_nonce = SsoHandshake::new("", "http://hobbit-shire.com/sso", secret);
        assert!(empty_nonce.is_err());
    }

    #[test]
    fn garbage_payload_is_malformed() {
        assert_eq!(
            SsoHandshake::from_payload(&provider(), "%%%", "00", "hobbit-shire.com").err(),
            Some(SsoError::MalformedPayload)
        );
    }

    #[test]
    fn unrecognized_flag_values_are_false() -> Result<(), SsoError> {
        let secret = SecretString::from(SSO_SECRET);
        let wire = encode(
            &PayloadFields::new()
                .with(FIELD_NONCE, "n")
                .with(FIELD_RETURN_SSO_URL, "http://hobbit-shire.com/sso")
                .with(FIELD_REQUIRE_2FA, "1")
                .with(FIELD_LOGOUT, "yes")
                .with("custom.team", "fellowship"),
        );
        let sig = super::super::signer::sign(&wire, &secret);
        let handshake = SsoHandshake::from_request(&provider(), &wire, &sig)?;
        assert!(!handshake.require_2fa());
        assert!(!handshake.logout());
        assert_eq!(handshake.extra().get("custom.team"), Some("fellowship"));
        Ok(())
    }

    #[test]
    fn response_payload_echoes_nonce() -> Result<(), SsoError> {
        let (wire, sig) = sso()?.to_request_payload();
        let handshake = SsoHandshake::from_request(&provider(), &wire, &sig)?;
        let results = PayloadFields::new()
            .with(FIELD_NONCE, "forged")
            .with("username", "bilbo");
        let (response, response_sig) = handshake.to_response_payload(&results);

        let decoded = decode(&response)?;
        assert_eq!(decoded.get(FIELD_NONCE), Some("mysecurenonce"));
        assert_eq!(decoded.get("username"), Some("bilbo"));
        assert_eq!(decoded.iter().next(), Some((FIELD_NONCE, "mysecurenonce")));
        assert!(super::super::signer::verify(
            &response,
            &response_sig,
            &SecretString::from(SSO_SECRET)
        ));
        Ok(())
    }

    #[test]
    fn response_url_keeps_existing_query() -> Result<(), SsoError> {
        let handshake = SsoHandshake::new(
            "n",
            "https://hobbit-shire.com/session/sso_login?lang=en",
            SecretString::from(SSO_SECRET),
        )?;
        let url = handshake.response_url(&PayloadFields::new());
        let keys: Vec<String> = url.query_pairs().map(|(k, _)| k.into_owned()).collect();
        assert_eq!(keys, vec!["lang", "sso", "sig"]);
        Ok(())
    }

    #[test]
    fn to_query_carries_sso_and_sig() -> Result<(), SsoError> {
        let handshake = sso()?;
        let query = handshake.to_query();
        let pairs: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let (wire, sig) = handshake.to_request_payload();
        assert_eq!(
            pairs,
            vec![("sso".to_string(), wire), ("sig".to_string(), sig)]
        );
        Ok(())
    }
}
