//! Environment-driven configuration.
//!
//! Secrets and endpoint selectors are read once at process start and cached
//! for the lifetime of the process. Sensitive values are only ever provided
//! via environment variables, never via config files committed to the repo.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::env;

/// LLM provider the Ghost Council deliberates through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAi { api_key: String },
    Anthropic { api_key: String },
    Ollama { base_url: String },
    /// No provider configured. The council still runs, loudly, in mock mode.
    Mock,
}

impl LlmProvider {
    pub fn is_mock(&self) -> bool {
        matches!(self, LlmProvider::Mock)
    }
}

/// Council-facing provider selection.
#[derive(Debug, Clone)]
pub struct CouncilProviderConfig {
    pub provider: LlmProvider,
}

impl CouncilProviderConfig {
    /// Selection order: OpenAI key, Anthropic key, Ollama endpoint, mock.
    pub fn from_env() -> Self {
        let provider = if let Ok(key) = env::var("OPENAI_API_KEY") {
            LlmProvider::OpenAi { api_key: key }
        } else if let Ok(key) = env::var("ANTHROPIC_API_KEY") {
            LlmProvider::Anthropic { api_key: key }
        } else if let Ok(url) = env::var("OLLAMA_BASE_URL") {
            LlmProvider::Ollama { base_url: url }
        } else {
            tracing::warn!(
                "no LLM provider configured - Ghost Council running in MOCK mode; \
                 set OPENAI_API_KEY, ANTHROPIC_API_KEY or OLLAMA_BASE_URL"
            );
            LlmProvider::Mock
        };
        Self { provider }
    }
}

/// Top-level configuration for the compliance and diagnosis services.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ForgeConfig {
    /// Secret for bearer token verification. Required.
    #[serde(default)]
    pub jwt_secret: Option<String>,
    /// Shared store URL for the distributed token blacklist. Optional.
    #[serde(default)]
    pub redis_url: Option<String>,
    /// Bootstrap password for the seeded admin account. Optional.
    #[serde(default)]
    pub seed_admin_password: Option<String>,
}

impl ForgeConfig {
    /// Layered load: optional `config/forge.{toml,yaml}` file defaults with
    /// environment variables taking precedence.
    pub fn load() -> Self {
        let file_defaults: ForgeConfig = config::Config::builder()
            .add_source(config::File::with_name("config/forge").required(false))
            .build()
            .ok()
            .and_then(|settings| settings.try_deserialize().ok())
            .unwrap_or_default();

        let env = Self::from_env();
        Self {
            jwt_secret: env.jwt_secret.or(file_defaults.jwt_secret),
            redis_url: env.redis_url.or(file_defaults.redis_url),
            seed_admin_password: env
                .seed_admin_password
                .or(file_defaults.seed_admin_password),
        }
    }

    /// Load from environment. `COMPLIANCE_JWT_SECRET` wins over
    /// `JWT_SECRET_KEY`; `REDIS_URL` wins over `COMPLIANCE_REDIS_URL`.
    pub fn from_env() -> Self {
        Self {
            jwt_secret: env::var("COMPLIANCE_JWT_SECRET")
                .or_else(|_| env::var("JWT_SECRET_KEY"))
                .ok(),
            redis_url: env::var("REDIS_URL")
                .or_else(|_| env::var("COMPLIANCE_REDIS_URL"))
                .ok(),
            seed_admin_password: env::var("SEED_ADMIN_PASSWORD").ok(),
        }
    }

    /// The signing secret, or a fatal error if it was never configured.
    /// Token verification cannot start without it.
    pub fn require_jwt_secret(&self) -> Result<&str> {
        self.jwt_secret.as_deref().ok_or_else(|| {
            Error::fatal(
                "JWT secret not configured. Set COMPLIANCE_JWT_SECRET or JWT_SECRET_KEY.",
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_secret_is_fatal() {
        let config = ForgeConfig::default();
        let err = config.require_jwt_secret().unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Fatal);
    }

    #[test]
    fn configured_secret_is_returned() {
        let config = ForgeConfig {
            jwt_secret: Some("s3cret".into()),
            ..Default::default()
        };
        assert_eq!(config.require_jwt_secret().unwrap(), "s3cret");
    }
}
