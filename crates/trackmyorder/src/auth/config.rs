//! Authentication configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Role;

/// Minimum accepted length for the HS256 signing secret.
const MIN_SECRET_LEN: usize = 32;

/// Default lifetime of minted staff tokens (12 hours).
const DEFAULT_TOKEN_TTL_SECS: i64 = 12 * 3600;

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Enable development mode (accepts `dev:<id>` tokens for `dev_staff`).
    pub dev_mode: bool,

    /// JWT secret for HS256. Supports `env:VAR_NAME`.
    /// REQUIRED when dev_mode is false.
    pub jwt_secret: Option<String>,

    /// Lifetime of tokens minted by `issue-token`, in seconds.
    pub token_ttl_secs: i64,

    /// Staff accounts available in dev mode.
    pub dev_staff: Vec<StaffAccount>,

    /// Allowed CORS origins.
    pub allowed_origins: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            dev_mode: false,
            jwt_secret: None,
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            dev_staff: Vec::new(),
            allowed_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

impl AuthConfig {
    /// Resolve the JWT secret, expanding `env:VAR_NAME` syntax.
    pub fn resolve_jwt_secret(&self) -> Result<Option<String>, ConfigValidationError> {
        match &self.jwt_secret {
            None => Ok(None),
            Some(value) => match value.strip_prefix("env:") {
                Some(var_name) => match std::env::var(var_name) {
                    Ok(secret) if !secret.is_empty() => Ok(Some(secret)),
                    Ok(_) => Err(ConfigValidationError::EnvVarEmpty(var_name.to_string())),
                    Err(_) => Err(ConfigValidationError::EnvVarNotFound(var_name.to_string())),
                },
                None => Ok(Some(value.clone())),
            },
        }
    }

    /// Validate the configuration for the current mode.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.token_ttl_secs <= 0 {
            return Err(ConfigValidationError::InvalidTokenTtl);
        }

        if self.dev_mode {
            return Ok(());
        }

        match self.resolve_jwt_secret()? {
            None => Err(ConfigValidationError::MissingJwtSecret),
            Some(secret) if secret.len() < MIN_SECRET_LEN => {
                Err(ConfigValidationError::JwtSecretTooShort)
            }
            Some(_) => Ok(()),
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigValidationError {
    #[error(
        "JWT secret is required when dev_mode is false. Set auth.jwt_secret or TRACKMYORDER__AUTH__JWT_SECRET."
    )]
    MissingJwtSecret,

    #[error("JWT secret must be at least 32 characters long.")]
    JwtSecretTooShort,

    #[error("auth.token_ttl_secs must be positive.")]
    InvalidTokenTtl,

    #[error("Environment variable '{0}' not found (referenced via env:{0} in config).")]
    EnvVarNotFound(String),

    #[error("Environment variable '{0}' is empty (referenced via env:{0} in config).")]
    EnvVarEmpty(String),
}

/// Staff identity used for dev-mode logins and token minting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaffAccount {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub permissions: Vec<String>,
}
