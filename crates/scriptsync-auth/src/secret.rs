//! Redacting wrapper for the OAuth client secret

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// The client secret from the app registration.
///
/// Formats as `[REDACTED]` wherever Debug or Display would otherwise
/// print it, serializes as the bare string so the registration file
/// stays plain JSON, and zeroes its memory on drop.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw secret, for token endpoint request bodies only.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}
