pub mod health;
pub use self::health::health;

pub mod sso_provider;
pub use self::sso_provider::{sso_provider, sso_provider_complete};
