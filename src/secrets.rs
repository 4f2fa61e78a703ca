//! Credential references.
//!
//! Host records never hold a password or key passphrase directly. They hold a
//! [`SecretRef`] naming where the secret lives, and a [`SecretResolver`]
//! turns it into a [`SensitiveString`] at session creation time.
//!
//! ```rust
//! use unitfleet::secrets::SecretRef;
//!
//! let r: SecretRef = "env:WEB1_SSH_PASSWORD".parse().unwrap();
//! assert_eq!(r, SecretRef::Env("WEB1_SSH_PASSWORD".into()));
//! assert_eq!(r.to_string(), "env:WEB1_SSH_PASSWORD");
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Where a secret can be found.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SecretRef {
    /// An environment variable of the managing process
    Env(String),
    /// A file readable by the managing process
    File(PathBuf),
}

impl fmt::Display for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretRef::Env(var) => write!(f, "env:{}", var),
            SecretRef::File(path) => write!(f, "file:{}", path.display()),
        }
    }
}

impl FromStr for SecretRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |message: &str| Error::Secret {
            reference: s.to_string(),
            message: message.to_string(),
        };
        match s.split_once(':') {
            Some(("env", var)) if !var.is_empty() => Ok(SecretRef::Env(var.to_string())),
            Some(("file", path)) if !path.is_empty() => Ok(SecretRef::File(PathBuf::from(path))),
            Some(("env" | "file", _)) => Err(invalid("empty location")),
            _ => Err(invalid("expected 'env:<VAR>' or 'file:<path>'")),
        }
    }
}

impl Serialize for SecretRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SecretRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A string that is redacted in `Debug` and `Display` output.
#[derive(Clone, PartialEq, Eq)]
pub struct SensitiveString(String);

impl SensitiveString {
    /// Wrap a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the underlying value.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SensitiveString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SensitiveString([REDACTED])")
    }
}

impl fmt::Display for SensitiveString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Resolves secret references into values.
pub trait SecretResolver: Send + Sync {
    /// Look up the secret a reference points at.
    fn resolve(&self, reference: &SecretRef) -> Result<SensitiveString>;
}

/// Resolves `env:` from the process environment and `file:` from disk.
#[derive(Debug, Clone, Default)]
pub struct DefaultResolver;

impl SecretResolver for DefaultResolver {
    fn resolve(&self, reference: &SecretRef) -> Result<SensitiveString> {
        match reference {
            SecretRef::Env(var) => std::env::var(var)
                .map(SensitiveString::new)
                .map_err(|e| Error::Secret {
                    reference: reference.to_string(),
                    message: e.to_string(),
                }),
            SecretRef::File(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| Error::Secret {
                    reference: reference.to_string(),
                    message: e.to_string(),
                })?;
                Ok(SensitiveString::new(content.trim_end_matches(['\r', '\n'])))
            }
        }
    }
}

/// Fixed secrets keyed by reference, for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    values: HashMap<SecretRef, SensitiveString>,
}

impl StaticResolver {
    /// Create an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a value for a reference.
    pub fn with(mut self, reference: SecretRef, value: impl Into<String>) -> Self {
        self.values.insert(reference, SensitiveString::new(value));
        self
    }
}

impl SecretResolver for StaticResolver {
    fn resolve(&self, reference: &SecretRef) -> Result<SensitiveString> {
        self.values.get(reference).cloned().ok_or_else(|| Error::Secret {
            reference: reference.to_string(),
            message: "no value registered".to_string(),
        })
    }
}
