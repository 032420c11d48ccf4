//! Remote script project client
//!
//! Typed operations over a user's script projects: listing, snapshot
//! reads, full-content replacement, remote execution, and deployments.
//! Authentication is delegated to a shared `scriptsync_auth::AuthSession`;
//! this crate never sees a refresh token or client secret, only bearer
//! tokens minted per call.

pub mod client;
pub mod error;
pub mod types;

pub use client::ProjectClient;
pub use error::{Error, Result};
pub use types::{
    Deployment, DeploymentConfig, ExecutionOutcome, FileKind, Page, ProjectFile, ProjectSnapshot,
    ProjectSummary, Version,
};
