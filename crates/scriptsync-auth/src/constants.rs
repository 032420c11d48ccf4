//! Google OAuth and storage constants
//!
//! Endpoint URLs and scope set for the Google OAuth client, plus the
//! on-disk layout of the credential directory. None of these are secrets;
//! the actual secrets (client secret, access/refresh tokens) live in the
//! credential store.

use std::time::Duration;

/// Authorization endpoint (the consent page the user visits in a browser)
pub const AUTHORIZE_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Token endpoint for code exchange and token refresh
pub const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

/// OAuth scopes required for script project access.
/// `script.projects` covers metadata and content, `script.deployments`
/// covers versions and deployments, and `drive.metadata.readonly` is what
/// lets the Drive files endpoint enumerate script projects.
pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/script.projects",
    "https://www.googleapis.com/auth/script.deployments",
    "https://www.googleapis.com/auth/drive.metadata.readonly",
];

/// How long before nominal expiry a token is already treated as stale.
/// Covers clock drift and request latency so a token never dies in flight.
pub const REFRESH_SKEW: Duration = Duration::from_secs(60);

/// Environment variable overriding the credential directory
pub const CONFIG_DIR_ENV: &str = "SCRIPTSYNC_CONFIG_DIR";

/// Default credential directory name under the user's home
pub const CONFIG_DIR_NAME: &str = ".scriptsync";

/// App registration file name inside the credential directory
pub const CONFIG_FILE: &str = "config.json";

/// Token record file name inside the credential directory
pub const TOKEN_FILE: &str = "tokens.json";
