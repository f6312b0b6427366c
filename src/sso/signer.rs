//! HMAC-SHA256 signing of wire payloads.
//!
//! The MAC covers the base64 blob exactly as transported, not the decoded
//! fields. Signatures are lowercase hex.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use std::fmt::Debug;

type HmacSha256 = Hmac<Sha256>;

/// Signs and verifies wire payloads with a shared secret.
pub trait PayloadSigner: Debug + Send + Sync {
    fn sign(&self, wire: &str, secret: &SecretString) -> String;
    fn verify(&self, wire: &str, signature_hex: &str, secret: &SecretString) -> bool;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct HmacSha256Signer;

impl PayloadSigner for HmacSha256Signer {
    fn sign(&self, wire: &str, secret: &SecretString) -> String {
        sign(wire, secret)
    }

    fn verify(&self, wire: &str, signature_hex: &str, secret: &SecretString) -> bool {
        verify(wire, signature_hex, secret)
    }
}

fn mac_for(wire: &str, secret: &SecretString) -> HmacSha256 {
    #[allow(clippy::expect_used)]
    let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(wire.as_bytes());
    mac
}

#[must_use]
pub fn sign(wire: &str, secret: &SecretString) -> String {
    hex::encode(mac_for(wire, secret).finalize().into_bytes())
}

/// Recompute the MAC and compare in constant time.
///
/// A signature that is not valid hex or has the wrong length fails without
/// revealing which byte differed.
#[must_use]
pub fn verify(wire: &str, signature_hex: &str, secret: &SecretString) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    mac_for(wire, secret).verify_slice(&expected).is_ok()
}
