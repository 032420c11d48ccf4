//! Error types for project operations

use scriptsync_auth as auth;

/// Errors from remote project operations.
///
/// `ReauthorizationRequired` is the only kind that should send a
/// long-lived caller back to the interactive authorization flow; every
/// other kind is a per-call failure that leaves the session usable.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Reading project state failed. `get_project` folds any failing read
    /// into this so a caller never observes a partial snapshot.
    #[error("fetching project {project_id} failed: {cause}")]
    FetchFailed { project_id: String, cause: String },

    /// The service did not accept a content replacement.
    #[error("update of project {project_id} rejected: {cause}")]
    UpdateRejected { project_id: String, cause: String },

    /// Non-success response with no more specific mapping.
    #[error("{operation} returned {status}: {message}")]
    Service {
        operation: &'static str,
        status: u16,
        message: String,
    },

    /// The service rejects our bearer token even after a refresh, or the
    /// refresh itself found the grant dead.
    #[error("reauthorization required: {0}")]
    ReauthorizationRequired(String),

    #[error("{operation} transport failure: {reason}")]
    Transport {
        operation: &'static str,
        reason: String,
    },

    /// The call was abandoned before a response arrived (timeout or abort).
    #[error("{operation} canceled before completion")]
    Canceled { operation: &'static str },

    #[error("{operation} returned an undecodable body: {reason}")]
    Decode {
        operation: &'static str,
        reason: String,
    },

    /// Credential-layer failure underneath the project operations.
    #[error(transparent)]
    Auth(auth::Error),
}

impl Error {
    /// Whether recovery requires re-running the interactive flow.
    pub fn requires_reauthorization(&self) -> bool {
        matches!(self, Error::ReauthorizationRequired(_))
    }
}

impl From<auth::Error> for Error {
    fn from(e: auth::Error) -> Self {
        match e {
            auth::Error::ReauthorizationRequired(reason) => Error::ReauthorizationRequired(reason),
            other => Error::Auth(other),
        }
    }
}

/// Result alias for project operations.
pub type Result<T> = std::result::Result<T, Error>;
