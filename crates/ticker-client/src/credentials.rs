// ABOUTME: Credential provider capability injected into the HTTP backends.
// ABOUTME: Replaces ambient global token lookup with an explicit dependency.

use crate::error::CredentialError;
use async_trait::async_trait;

/// Source of the bearer token attached to backend requests.
///
/// Injected into the transport and store rather than read from module
/// globals, so tests and alternate deployments can supply their own.
#[async_trait]
pub trait CredentialProvider: Send + Sync + 'static {
    async fn bearer_token(&self) -> Result<String, CredentialError>;
}

/// A fixed token known at construction time.
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticToken")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl CredentialProvider for StaticToken {
    async fn bearer_token(&self) -> Result<String, CredentialError> {
        Ok(self.token.clone())
    }
}

/// A token read from an environment variable on each use.
#[derive(Debug)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl CredentialProvider for EnvToken {
    async fn bearer_token(&self) -> Result<String, CredentialError> {
        std::env::var(&self.var)
            .map_err(|_| CredentialError::Lookup(format!("{} is not set", self.var)))
    }
}
