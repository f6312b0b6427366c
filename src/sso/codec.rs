//! Wire format for SSO payloads: a URL-encoded query string, base64 encoded.
//!
//! Encoding is deterministic for a given field order, which keeps signatures
//! reproducible when a payload is rebuilt from the same fields.

use base64ct::{Base64, Encoding};
use url::form_urlencoded;

use super::error::SsoError;

/// Ordered string-to-string mapping carried inside a payload.
///
/// Keys are unique; `set` on an existing key replaces the value in place so the
/// original position (and therefore the encoding) is kept.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PayloadFields {
    entries: Vec<(String, String)>,
}

impl PayloadFields {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PayloadFields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut fields = Self::new();
        for (key, value) in iter {
            fields.set(key, value);
        }
        fields
    }
}

/// Serialize fields as a query string and base64 encode the bytes.
#[must_use]
pub fn encode(fields: &PayloadFields) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(fields.iter())
        .finish();
    Base64::encode_string(query.as_bytes())
}

/// Decode a wire payload back into its fields.
///
/// ASCII whitespace inside the blob is ignored so line-wrapped base64 from
/// older encoders is accepted. A repeated key keeps its last value.
///
/// # Errors
/// Returns `MalformedPayload` if the blob is not base64 or the decoded bytes are
/// not a UTF-8 query string.
pub fn decode(wire: &str) -> Result<PayloadFields, SsoError> {
    let compact: String = wire.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if compact.is_empty() {
        return Err(SsoError::MalformedPayload);
    }
    let bytes = Base64::decode_vec(&compact).map_err(|_| SsoError::MalformedPayload)?;
    let query = std::str::from_utf8(&bytes).map_err(|_| SsoError::MalformedPayload)?;
    Ok(form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect())
}
