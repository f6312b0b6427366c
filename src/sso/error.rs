use axum::http::StatusCode;
use thiserror::Error;

/// Terminal failures for a single handshake attempt. None are retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SsoError {
    #[error("discourse connect provider is disabled")]
    ProviderDisabled,
    #[error("no provider secret configured for host")]
    SecretNotFound,
    #[error("malformed sso payload")]
    MalformedPayload,
    #[error("sso signature mismatch")]
    SignatureMismatch,
    #[error("invalid handshake: {0}")]
    InvalidHandshake(&'static str),
    #[error("no second factor available for the current user")]
    NoSecondFactorAvailable,
}

pub const SSO_NOT_AVAILABLE: &str = "SSO not available for this site";
pub const SSO_INVALID_REQUEST: &str = "invalid SSO request";
pub const SSO_ENROLL_SECOND_FACTOR: &str =
    "This site requires a second factor. Enroll a second factor in your account settings, then try signing in again.";

impl SsoError {
    /// Message safe to return to the client; never names hosts or the failing check.
    #[must_use]
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::ProviderDisabled | Self::SecretNotFound => SSO_NOT_AVAILABLE,
            Self::MalformedPayload | Self::SignatureMismatch | Self::InvalidHandshake(_) => {
                SSO_INVALID_REQUEST
            }
            Self::NoSecondFactorAvailable => SSO_ENROLL_SECOND_FACTOR,
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::ProviderDisabled | Self::SecretNotFound => StatusCode::NOT_FOUND,
            Self::MalformedPayload | Self::SignatureMismatch | Self::InvalidHandshake(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::NoSecondFactorAvailable => StatusCode::FORBIDDEN,
        }
    }
}
