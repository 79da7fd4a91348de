//! Parameter store access.

use crate::error::Result;
use async_trait::async_trait;

/// A resolved secret. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        SecretValue(value.into())
    }

    /// Borrow the plaintext.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretValue(***)")
    }
}

/// Read-only access to decrypted parameters.
///
/// Implementations always request decryption and must fail with
/// [`HarnessError::Resolution`](crate::HarnessError::Resolution) when the parameter is
/// missing, undecryptable or empty.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn resolve(&self, parameter_name: &str, region: &str) -> Result<SecretValue>;
}
