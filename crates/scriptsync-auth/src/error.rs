//! Error types for credential and session operations

use std::path::PathBuf;

/// Errors from credential storage and OAuth session operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No app registration on disk; interactive setup has never run.
    #[error("no app registration at {}", .0.display())]
    ConfigMissing(PathBuf),

    /// No stored token record; the authorization flow has never completed.
    #[error("not authenticated: no token record at {}", .0.display())]
    Unauthenticated(PathBuf),

    #[error("authorization code exchange failed: {0}")]
    ExchangeFailed(String),

    /// The stored grant can no longer produce a usable access token.
    /// Terminal for automated recovery; the user must re-run the
    /// interactive authorization flow.
    #[error("reauthorization required: {0}")]
    ReauthorizationRequired(String),

    /// The token endpoint rejected the presented grant (`invalid_grant`
    /// body or a 401/403 status). Recoverable when another process has
    /// rotated the refresh token under us, so the session layer handles
    /// this before it ever escalates to `ReauthorizationRequired`.
    #[error("grant rejected by token endpoint: {0}")]
    InvalidGrant(String),

    #[error("HTTP transport failure: {0}")]
    Transport(String),

    #[error("credential parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
