//! Acting identity as seen by the provider.
//!
//! The guardian only answers "who is acting"; permission internals stay with the
//! surrounding system.

use uuid::Uuid;

use crate::sso::PayloadFields;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SecondFactorMethod {
    Totp,
    SecurityKey,
    BackupCodes,
}

impl SecondFactorMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Totp => "totp",
            Self::SecurityKey => "security_key",
            Self::BackupCodes => "backup_codes",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "totp" => Some(Self::Totp),
            "security_key" => Some(Self::SecurityKey),
            "backup_codes" => Some(Self::BackupCodes),
            _ => None,
        }
    }

    /// Backup codes only recover an account; they cannot stand alone as a factor.
    #[must_use]
    pub fn is_primary(self) -> bool {
        matches!(self, Self::Totp | Self::SecurityKey)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Identity {
    pub user_id: Uuid,
    pub username: String,
    pub name: Option<String>,
    pub email: String,
    pub admin: bool,
    pub moderator: bool,
    pub groups: Vec<String>,
    pub second_factors: Vec<SecondFactorMethod>,
}

impl Identity {
    #[must_use]
    pub fn has_second_factors_enabled(&self) -> bool {
        self.second_factors.iter().any(|method| method.is_primary())
    }

    /// Claims written into the response payload, in a fixed order.
    #[must_use]
    pub fn claims(&self) -> PayloadFields {
        let mut fields = PayloadFields::new()
            .with("external_id", self.user_id.to_string())
            .with("username", self.username.as_str())
            .with("email", self.email.as_str());
        if let Some(name) = self.name.as_deref().filter(|name| !name.is_empty()) {
            fields.set("name", name);
        }
        fields.set("admin", bool_str(self.admin));
        fields.set("moderator", bool_str(self.moderator));
        if !self.groups.is_empty() {
            fields.set("groups", self.groups.join(","));
        }
        fields
    }
}

fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

/// Source of the acting identity for one request.
pub trait Guardian: Send + Sync {
    fn current_user(&self) -> Option<&Identity>;

    fn is_anonymous(&self) -> bool {
        self.current_user().is_none()
    }
}

/// Guardian backed by the session cookie of the current request.
#[derive(Clone, Debug, Default)]
pub struct SessionGuardian {
    user: Option<Identity>,
}

impl SessionGuardian {
    #[must_use]
    pub fn new(user: Option<Identity>) -> Self {
        Self { user }
    }

    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }
}

impl Guardian for SessionGuardian {
    fn current_user(&self) -> Option<&Identity> {
        self.user.as_ref()
    }
}
