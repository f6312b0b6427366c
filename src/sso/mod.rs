//! DiscourseConnect provider protocol.
//!
//! Flow Overview:
//! 1) A trusted site redirects the user here with `sso` (base64 payload) and `sig`
//!    (hex HMAC-SHA256 of the payload).
//! 2) The provider flag is checked, the secret is resolved for the host of the
//!    payload's `return_sso_url`, and the signature is verified in constant time.
//! 3) The gate decides whether the second-factor challenge may be skipped.
//! 4) A response payload carrying the request nonce is signed with the same secret
//!    and appended to `return_sso_url`.
//!
//! Security boundaries:
//! - Nothing in a payload is read before its signature verifies, except the return
//!   host used to pick the secret, which is checked again after verification.
//! - Secrets are held as `SecretString` and never logged.

pub mod codec;
pub mod error;
pub mod gate;
pub mod handshake;
pub mod nonce;
pub mod secrets;
pub mod signer;

pub use codec::PayloadFields;
pub use error::SsoError;
pub use gate::{
    resume_after_challenge, skip_second_factor_auth, SecondFactorSkipDecision, SessionContext,
    SkipOutcome, SkipReason,
};
pub use handshake::{ConnectProvider, SsoHandshake};
pub use nonce::NonceLedger;
pub use secrets::SecretRegistry;
pub use signer::{HmacSha256Signer, PayloadSigner};
