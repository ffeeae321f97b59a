//! Identity provider backed by configuration.

use tempo_core::config::EngineConfig;
use tempo_core::error::{Result, TempoError};
use tempo_core::session::IdentityProvider;

/// Environment variable that overrides the configured owner id.
pub const OWNER_ENV_VAR: &str = "TEMPO_OWNER_ID";

/// An identity fixed at construction. `None` means nobody is signed in.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    owner_id: Option<String>,
}

impl StaticIdentity {
    pub fn signed_in(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: Some(owner_id.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self { owner_id: None }
    }

    /// Resolves from `TEMPO_OWNER_ID`, falling back to `config.owner_id`.
    pub fn from_env_or_config(config: &EngineConfig) -> Self {
        let from_env = std::env::var(OWNER_ENV_VAR)
            .ok()
            .filter(|v| !v.trim().is_empty());
        Self {
            owner_id: from_env.or_else(|| config.owner_id.clone()),
        }
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_owner_id(&self) -> Result<String> {
        self.owner_id
            .clone()
            .ok_or_else(|| TempoError::auth("no authenticated identity"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous_is_auth_error() {
        let err = StaticIdentity::anonymous().current_owner_id().unwrap_err();
        assert!(err.is_auth());
    }

    #[test]
    fn test_signed_in() {
        let identity = StaticIdentity::signed_in("alice");
        assert_eq!(identity.current_owner_id().unwrap(), "alice");
    }

    #[test]
    fn test_config_fallback() {
        let config = EngineConfig {
            owner_id: Some("from-config".to_string()),
            ..Default::default()
        };
        if std::env::var(OWNER_ENV_VAR).is_err() {
            let identity = StaticIdentity::from_env_or_config(&config);
            assert_eq!(identity.current_owner_id().unwrap(), "from-config");
        }
    }
}
