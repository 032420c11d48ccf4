//! Google OAuth credential management for scriptsync
//!
//! App registration and token storage, authorization URL construction,
//! code exchange/refresh, and the session layer that keeps a valid
//! bearer token on hand. Nothing here depends on the CLI binary, so the
//! whole credential lifecycle is testable in isolation.
//!
//! Credential flow:
//! 1. Setup writes the app registration via `CredentialStore::save_registration()`
//! 2. User authorizes in a browser via `AuthSession::authorization_url()`
//! 3. `AuthSession::exchange_code()` turns the one-time code into a stored
//!    `TokenRecord`
//! 4. `AuthSession::authorized_session()` hands out bearer tokens,
//!    refreshing stale ones behind a process-wide lock
//! 5. API clients call `AuthSession::refresh_rejected()` when the service
//!    rejects a bearer mid-flight

pub mod constants;
pub mod error;
pub mod secret;
pub mod session;
pub mod store;
pub mod token;

pub use constants::*;
pub use error::{Error, Result};
pub use secret::Secret;
pub use session::{AuthSession, AuthorizedSession, SessionStatus, build_authorization_url};
pub use store::{AppRegistration, CredentialStore, TokenRecord};
pub use token::{TokenResponse, exchange_code, refresh_token};
