//! DiscourseConnect action: turns a verified handshake plus the gate decision into
//! a redirect.
//!
//! The gate is evaluated once per request and the result is dispatched exactly
//! once to one of the four outcomes below. Nonces are consumed only when a signed
//! response is produced, so a challenge round trip does not burn the nonce early.

use thiserror::Error;
use tracing::{info, instrument, warn};
use url::{form_urlencoded, Url};
use uuid::Uuid;

use super::{
    identity::{Guardian, Identity},
    pending::PendingHandshake,
    state::{ProviderState, SSO_PROVIDER_COMPLETE_PATH},
};
use crate::sso::{
    handshake::TRUTHY, resume_after_challenge, skip_second_factor_auth, SessionContext,
    SkipOutcome, SkipReason, SsoError, SsoHandshake,
};

pub const FIELD_CONFIRMED_2FA: &str = "confirmed_2fa";

#[derive(Debug, Error)]
pub enum ActionError {
    #[error(transparent)]
    Sso(#[from] SsoError),
    #[error("session directory failure: {0}")]
    Directory(#[source] anyhow::Error),
}

/// Where the client goes next.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ActionResponse {
    /// Signed response appended to `return_sso_url`.
    SsoRedirect(Url),
    /// Session ended; back to `return_sso_url` without a payload.
    LogoutRedirect(Url),
    LoginRequired(String),
    ChallengeRequired {
        location: String,
        challenge_id: Uuid,
        description: String,
    },
}

impl ActionResponse {
    #[must_use]
    pub fn location(&self) -> String {
        match self {
            Self::SsoRedirect(url) | Self::LogoutRedirect(url) => url.to_string(),
            Self::LoginRequired(location) | Self::ChallengeRequired { location, .. } => {
                location.clone()
            }
        }
    }
}

pub struct DiscourseConnectAction<'a, G: Guardian + ?Sized> {
    state: &'a ProviderState,
    guardian: &'a G,
    session: SessionContext,
    token_hash: Option<Vec<u8>>,
}

impl<'a, G: Guardian + ?Sized> DiscourseConnectAction<'a, G> {
    /// `token_hash` is the hashed session cookie, absent for anonymous requests.
    pub fn new(
        state: &'a ProviderState,
        guardian: &'a G,
        session: SessionContext,
        token_hash: Option<Vec<u8>>,
    ) -> Self {
        Self {
            state,
            guardian,
            session,
            token_hash,
        }
    }

    /// Handle `GET /session/sso_provider`. `return_path` is the request path and
    /// query, used to come back here after login.
    #[instrument(skip_all)]
    pub async fn handle(
        &self,
        wire: &str,
        signature: &str,
        return_path: &str,
    ) -> Result<ActionResponse, ActionError> {
        let handshake = SsoHandshake::from_request(self.state.provider(), wire, signature)?;
        let decision =
            skip_second_factor_auth(&handshake, self.guardian.current_user(), &self.session);

        match decision.outcome {
            SkipOutcome::Skip => {
                self.second_factor_auth_skipped(&handshake, decision.reason, return_path)
                    .await
            }
            SkipOutcome::Required => match self.guardian.current_user() {
                Some(user) if user.has_second_factors_enabled() => {
                    self.second_factor_auth_required(&handshake, wire, signature)
                        .await
                }
                _ => Err(self.no_second_factors_enabled(&handshake).into()),
            },
            SkipOutcome::AlreadyCompleted => {
                Err(SsoError::InvalidHandshake("challenge was never issued").into())
            }
        }
    }

    /// Handle `GET /session/sso_provider/complete?challenge=<id>`.
    #[instrument(skip_all, fields(challenge_id = %challenge_id))]
    pub async fn complete(&self, challenge_id: Uuid) -> Result<ActionResponse, ActionError> {
        let (Some(_), Some(session_key)) = (self.guardian.current_user(), self.session_key())
        else {
            let challenge = challenge_id.to_string();
            let return_path = append_query(
                SSO_PROVIDER_COMPLETE_PATH,
                &[("challenge", challenge.as_str())],
            );
            return Ok(self.login_required(&return_path));
        };

        let pending = self
            .state
            .pending()
            .peek(&session_key, challenge_id)
            .await
            .ok_or(SsoError::InvalidHandshake("unknown or expired challenge"))?;

        let decision = resume_after_challenge(pending.created_at_micros, &self.session);
        match decision.outcome {
            SkipOutcome::AlreadyCompleted => {
                let pending = self
                    .state
                    .pending()
                    .take(&session_key, challenge_id)
                    .await
                    .ok_or(SsoError::InvalidHandshake("unknown or expired challenge"))?;
                self.second_factor_auth_completed(&pending).await
            }
            SkipOutcome::Required => Ok(self.challenge_redirect(&pending)),
            SkipOutcome::Skip => {
                Err(SsoError::InvalidHandshake("unexpected skip on completion").into())
            }
        }
    }

    async fn second_factor_auth_skipped(
        &self,
        handshake: &SsoHandshake,
        reason: SkipReason,
        return_path: &str,
    ) -> Result<ActionResponse, ActionError> {
        match reason {
            SkipReason::NoCurrentUser => Ok(self.login_required(return_path)),
            SkipReason::IsLogout => {
                if let Some(token_hash) = &self.token_hash {
                    self.state
                        .directory()
                        .end_session(token_hash)
                        .await
                        .map_err(ActionError::Directory)?;
                }
                if let Some(session_key) = self.session_key() {
                    self.state.pending().discard(&session_key).await;
                }
                info!(
                    host = handshake.host(),
                    "ended session on DiscourseConnect logout"
                );
                Ok(ActionResponse::LogoutRedirect(handshake.return_sso_url().clone()))
            }
            SkipReason::NotRequiredByRequest | SkipReason::ConfirmedDuringLogin => {
                let user = self
                    .guardian
                    .current_user()
                    .ok_or(SsoError::InvalidHandshake("no current user"))?;
                self.issue_response(handshake, user, self.session.confirmed_2fa_during_login)
                    .await
            }
            SkipReason::NeedsChallenge | SkipReason::ChallengePassed => {
                Err(SsoError::InvalidHandshake("unexpected skip reason").into())
            }
        }
    }

    async fn second_factor_auth_required(
        &self,
        handshake: &SsoHandshake,
        wire: &str,
        signature: &str,
    ) -> Result<ActionResponse, ActionError> {
        let session_key = self
            .session_key()
            .ok_or(SsoError::InvalidHandshake("no session for challenge"))?;
        let pending = self
            .state
            .pending()
            .store(&session_key, wire, signature, handshake.host())
            .await;
        info!(
            host = handshake.host(),
            challenge_id = %pending.challenge_id,
            "second factor challenge required"
        );
        Ok(self.challenge_redirect(&pending))
    }

    async fn second_factor_auth_completed(
        &self,
        pending: &PendingHandshake,
    ) -> Result<ActionResponse, ActionError> {
        let handshake = SsoHandshake::from_payload(
            self.state.provider(),
            &pending.wire,
            &pending.signature,
            &pending.host,
        )?;
        let user = self
            .guardian
            .current_user()
            .ok_or(SsoError::InvalidHandshake("no current user"))?;
        self.issue_response(&handshake, user, true).await
    }

    fn no_second_factors_enabled(&self, handshake: &SsoHandshake) -> SsoError {
        warn!(
            host = handshake.host(),
            "second factor required but none enrolled"
        );
        SsoError::NoSecondFactorAvailable
    }

    async fn issue_response(
        &self,
        handshake: &SsoHandshake,
        user: &Identity,
        confirmed_2fa: bool,
    ) -> Result<ActionResponse, ActionError> {
        if !self
            .state
            .nonces()
            .consume(handshake.host(), handshake.nonce())
            .await
        {
            return Err(SsoError::InvalidHandshake("nonce already used").into());
        }

        let mut claims = user.claims();
        if confirmed_2fa {
            claims.set(FIELD_CONFIRMED_2FA, TRUTHY);
        }
        info!(
            host = handshake.host(),
            username = user.username.as_str(),
            confirmed_2fa,
            "issued DiscourseConnect response"
        );
        Ok(ActionResponse::SsoRedirect(handshake.response_url(&claims)))
    }

    fn login_required(&self, return_path: &str) -> ActionResponse {
        ActionResponse::LoginRequired(append_query(
            self.state.config().login_url(),
            &[("return_path", return_path)],
        ))
    }

    fn challenge_redirect(&self, pending: &PendingHandshake) -> ActionResponse {
        let challenge_id = pending.challenge_id.to_string();
        let callback = append_query(
            SSO_PROVIDER_COMPLETE_PATH,
            &[("challenge", challenge_id.as_str())],
        );
        let description = format!(
            "{} is asking you to confirm your second factor",
            pending.host
        );
        let location = append_query(
            self.state.config().second_factor_url(),
            &[
                ("challenge", challenge_id.as_str()),
                ("callback", callback.as_str()),
                ("description", description.as_str()),
            ],
        );
        ActionResponse::ChallengeRequired {
            location,
            challenge_id: pending.challenge_id,
            description,
        }
    }

    fn session_key(&self) -> Option<String> {
        self.token_hash.as_deref().map(hex::encode)
    }
}

/// Append query parameters to an absolute or site-relative URL.
pub(crate) fn append_query(base: &str, params: &[(&str, &str)]) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish();
    if query.is_empty() {
        return base.to_string();
    }
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}{query}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{
        directory::{hash_session_token, MemorySessionDirectory, SessionSnapshot},
        identity::{tests::bilbo, SecondFactorMethod, SessionGuardian},
        pending::unix_now_micros,
        state::ProviderConfig,
    };
    use crate::sso::{codec::decode, ConnectProvider, SecretRegistry};
    use secrecy::SecretString;
    use std::sync::Arc;

    const SSO_URL: &str = "http://hobbit-shire.com/sso";
    const SSO_SECRET: &str = "mysecretmyprecious";
    const TOKEN: &str = "session-token";

    fn state(directory: Arc<MemorySessionDirectory>) -> anyhow::Result<ProviderState> {
        let registry = SecretRegistry::parse(true, &format!("hobbit-shire.com|{SSO_SECRET}"))?;
        Ok(ProviderState::new(
            ProviderConfig::new(),
            ConnectProvider::new(registry),
            directory,
        ))
    }

    fn request(nonce: &str, require_2fa: bool, logout: bool) -> Result<(String, String), SsoError> {
        let handshake = SsoHandshake::new(nonce, SSO_URL, SecretString::from(SSO_SECRET))?
            .with_require_2fa(require_2fa)
            .with_logout(logout);
        Ok(handshake.to_request_payload())
    }

    fn response_fields(url: &Url) -> anyhow::Result<crate::sso::PayloadFields> {
        let wire = url
            .query_pairs()
            .find(|(key, _)| key == "sso")
            .map(|(_, value)| value.into_owned())
            .ok_or_else(|| anyhow::anyhow!("missing sso"))?;
        Ok(decode(&wire)?)
    }

    #[test]
    fn append_query_respects_existing_query() {
        assert_eq!(
            append_query("/login", &[("return_path", "/a?b=c")]),
            "/login?return_path=%2Fa%3Fb%3Dc"
        );
        assert_eq!(
            append_query("/2fa?x=1", &[("challenge", "id")]),
            "/2fa?x=1&challenge=id"
        );
        assert_eq!(append_query("/login", &[]), "/login");
    }

    #[tokio::test]
    async fn skip_when_not_required_issues_claims() -> anyhow::Result<()> {
        let state = state(Arc::new(MemorySessionDirectory::new()))?;
        let guardian = SessionGuardian::new(Some(bilbo()));
        let action = DiscourseConnectAction::new(
            &state,
            &guardian,
            SessionContext::default(),
            Some(hash_session_token(TOKEN)),
        );
        let (wire, sig) = request("mysecurenonce", false, false)?;

        let url = match action.handle(&wire, &sig, "/session/sso_provider").await? {
            ActionResponse::SsoRedirect(url) => url,
            other => panic!("expected sso redirect, got {other:?}"),
        };
        assert!(url.as_str().starts_with(SSO_URL));
        let fields = response_fields(&url)?;
        assert_eq!(fields.iter().next(), Some(("nonce", "mysecurenonce")));
        assert_eq!(fields.get("username"), Some("bilbo"));
        assert!(!fields.contains_key(FIELD_CONFIRMED_2FA));
        Ok(())
    }

    #[tokio::test]
    async fn confirmed_during_login_marks_response() -> anyhow::Result<()> {
        let state = state(Arc::new(MemorySessionDirectory::new()))?;
        let guardian = SessionGuardian::new(Some(bilbo()));
        let session = SessionContext {
            confirmed_2fa_during_login: true,
            second_factor_confirmed_at: None,
        };
        let action = DiscourseConnectAction::new(
            &state,
            &guardian,
            session,
            Some(hash_session_token(TOKEN)),
        );
        let (wire, sig) = request("n1", true, false)?;

        let ActionResponse::SsoRedirect(url) = action.handle(&wire, &sig, "/").await? else {
            panic!("expected sso redirect");
        };
        assert_eq!(
            response_fields(&url)?.get(FIELD_CONFIRMED_2FA),
            Some("true")
        );
        Ok(())
    }

    #[tokio::test]
    async fn anonymous_goes_to_login() -> anyhow::Result<()> {
        let state = state(Arc::new(MemorySessionDirectory::new()))?;
        let guardian = SessionGuardian::anonymous();
        let action =
            DiscourseConnectAction::new(&state, &guardian, SessionContext::default(), None);
        let (wire, sig) = request("n1", true, false)?;

        let response = action.handle(&wire, &sig, "/session/sso_provider?sso=x").await?;
        assert_eq!(
            response,
            ActionResponse::LoginRequired(
                "/login?return_path=%2Fsession%2Fsso_provider%3Fsso%3Dx".to_string()
            )
        );
        // Nonce is untouched and still usable after login.
        assert_eq!(state.nonces().len().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn logout_ends_session() -> anyhow::Result<()> {
        let directory = Arc::new(MemorySessionDirectory::new());
        directory
            .insert(
                TOKEN,
                SessionSnapshot {
                    identity: bilbo(),
                    context: SessionContext::default(),
                },
            )
            .await;
        let state = state(directory.clone())?;
        let guardian = SessionGuardian::new(Some(bilbo()));
        let action = DiscourseConnectAction::new(
            &state,
            &guardian,
            SessionContext::default(),
            Some(hash_session_token(TOKEN)),
        );
        let (wire, sig) = request("n1", true, true)?;

        let response = action.handle(&wire, &sig, "/").await?;
        assert_eq!(
            response,
            ActionResponse::LogoutRedirect(Url::parse(SSO_URL)?)
        );
        assert!(!directory.contains(TOKEN).await);
        Ok(())
    }

    #[tokio::test]
    async fn required_then_completed() -> anyhow::Result<()> {
        let state = state(Arc::new(MemorySessionDirectory::new()))?;
        let guardian = SessionGuardian::new(Some(bilbo()));
        let token_hash = hash_session_token(TOKEN);
        let action = DiscourseConnectAction::new(
            &state,
            &guardian,
            SessionContext::default(),
            Some(token_hash.clone()),
        );
        let (wire, sig) = request("n1", true, false)?;

        let (location, challenge_id, description) = match action.handle(&wire, &sig, "/").await? {
            ActionResponse::ChallengeRequired {
                location,
                challenge_id,
                description,
            } => (location, challenge_id, description),
            other => panic!("expected challenge, got {other:?}"),
        };
        assert!(location.starts_with("/session/2fa?challenge="));
        assert!(location.contains("callback=%2Fsession%2Fsso_provider%2Fcomplete"));
        assert!(location.contains("description=hobbit-shire.com+is+asking"));
        assert_eq!(
            description,
            "hobbit-shire.com is asking you to confirm your second factor"
        );

        // Not yet confirmed: the challenge is re-issued and the stash kept.
        let retry = action.complete(challenge_id).await?;
        assert!(matches!(
            retry,
            ActionResponse::ChallengeRequired { challenge_id: id, .. } if id == challenge_id
        ));

        let confirmed = SessionContext {
            confirmed_2fa_during_login: false,
            second_factor_confirmed_at: Some(i64::MAX),
        };
        let action = DiscourseConnectAction::new(&state, &guardian, confirmed, Some(token_hash));
        let ActionResponse::SsoRedirect(url) = action.complete(challenge_id).await? else {
            panic!("expected sso redirect");
        };
        let fields = response_fields(&url)?;
        assert_eq!(fields.get("nonce"), Some("n1"));
        assert_eq!(fields.get(FIELD_CONFIRMED_2FA), Some("true"));

        // Stash is single use.
        let again = action.complete(challenge_id).await;
        assert!(matches!(
            again,
            Err(ActionError::Sso(SsoError::InvalidHandshake(_)))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn required_without_factors_is_forbidden() -> anyhow::Result<()> {
        let state = state(Arc::new(MemorySessionDirectory::new()))?;
        let mut user = bilbo();
        user.second_factors = vec![SecondFactorMethod::BackupCodes];
        let guardian = SessionGuardian::new(Some(user));
        let action = DiscourseConnectAction::new(
            &state,
            &guardian,
            SessionContext::default(),
            Some(hash_session_token(TOKEN)),
        );
        let (wire, sig) = request("n1", true, false)?;

        let result = action.handle(&wire, &sig, "/").await;
        assert!(matches!(
            result,
            Err(ActionError::Sso(SsoError::NoSecondFactorAvailable))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn replayed_nonce_is_rejected() -> anyhow::Result<()> {
        let state = state(Arc::new(MemorySessionDirectory::new()))?;
        let guardian = SessionGuardian::new(Some(bilbo()));
        let action = DiscourseConnectAction::new(
            &state,
            &guardian,
            SessionContext::default(),
            Some(hash_session_token(TOKEN)),
        );
        let (wire, sig) = request("n1", false, false)?;

        action.handle(&wire, &sig, "/").await?;
        let replay = action.handle(&wire, &sig, "/").await;
        assert!(matches!(
            replay,
            Err(ActionError::Sso(SsoError::InvalidHandshake("nonce already used")))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn confirmation_before_challenge_does_not_complete() -> anyhow::Result<()> {
        let state = state(Arc::new(MemorySessionDirectory::new()))?;
        let guardian = SessionGuardian::new(Some(bilbo()));
        // Confirmed in the same second the challenge is issued, but before it.
        let session = SessionContext {
            confirmed_2fa_during_login: false,
            second_factor_confirmed_at: Some(unix_now_micros()),
        };
        let action = DiscourseConnectAction::new(
            &state,
            &guardian,
            session,
            Some(hash_session_token(TOKEN)),
        );
        let (wire, sig) = request("n1", true, false)?;

        let challenge_id = match action.handle(&wire, &sig, "/").await? {
            ActionResponse::ChallengeRequired { challenge_id, .. } => challenge_id,
            other => panic!("expected challenge, got {other:?}"),
        };

        let response = action.complete(challenge_id).await?;
        assert!(matches!(
            response,
            ActionResponse::ChallengeRequired { challenge_id: id, .. } if id == challenge_id
        ));
        assert_eq!(state.pending().len().await, 1);
        assert_eq!(state.nonces().len().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn tampered_signature_stashes_nothing() -> anyhow::Result<()> {
        let state = state(Arc::new(MemorySessionDirectory::new()))?;
        let guardian = SessionGuardian::new(Some(bilbo()));
        let action = DiscourseConnectAction::new(
            &state,
            &guardian,
            SessionContext::default(),
            Some(hash_session_token(TOKEN)),
        );
        let (wire, _) = request("n1", true, false)?;
        let (_, other_sig) = request("n2", true, false)?;

        let result = action.handle(&wire, &other_sig, "/").await;
        assert!(matches!(
            result,
            Err(ActionError::Sso(SsoError::SignatureMismatch))
        ));
        assert_eq!(state.pending().len().await, 0);
        assert_eq!(state.nonces().len().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn completion_without_session_asks_for_login() -> anyhow::Result<()> {
        let state = state(Arc::new(MemorySessionDirectory::new()))?;
        let guardian = SessionGuardian::anonymous();
        let action =
            DiscourseConnectAction::new(&state, &guardian, SessionContext::default(), None);
        let id = Uuid::nil();

        let response = action.complete(id).await?;
        assert_eq!(
            response.location(),
            format!("/login?return_path=%2Fsession%2Fsso_provider%2Fcomplete%3Fchallenge%3D{id}")
        );
        Ok(())
    }
}
