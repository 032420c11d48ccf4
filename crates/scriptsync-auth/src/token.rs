//! Token endpoint requests
//!
//! The two grants this client ever presents: exchanging a pasted
//! authorization code for the first token record, and trading a refresh
//! token for a new access token once that record goes stale. Each is a
//! form-encoded POST. The endpoint URL is a parameter rather than a
//! baked-in constant so the session can point at a local server under
//! test.

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::store::AppRegistration;

/// What the token endpoint returns for either grant.
///
/// `expires_in` counts seconds from the response, not an absolute time;
/// storage converts it to a unix millisecond deadline. `refresh_token`
/// is absent on refresh responses unless the server rotates it, and
/// absent on exchange when the consent did not grant offline access.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Access token lifetime in seconds
    pub expires_in: u64,
    /// Granted scopes, space-delimited on the wire
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "Bearer".into()
}

impl TokenResponse {
    /// Granted scopes as a list.
    pub fn scopes(&self) -> Vec<String> {
        self.scope
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_owned)
            .collect()
    }
}

/// Exchange an authorization code for tokens (completing the interactive
/// flow). The confidential client authenticates with its client secret;
/// the redirect URI must match the one the code was issued against.
///
/// Never retried: an authorization code is single-use, and replaying one
/// the server already consumed gets the grant family revoked.
pub async fn exchange_code(
    client: &reqwest::Client,
    endpoint: &str,
    registration: &AppRegistration,
    code: &str,
) -> Result<TokenResponse> {
    let response = client
        .post(endpoint)
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", registration.client_id.as_str()),
            ("client_secret", registration.client_secret.expose()),
            ("redirect_uri", registration.redirect_uri.as_str()),
        ])
        .send()
        .await
        .map_err(|e| Error::Transport(format!("token exchange request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::ExchangeFailed(format!(
            "token endpoint returned {status}: {body}"
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::ExchangeFailed(format!("invalid token response: {e}")))
}

/// Refresh an access token using a refresh token.
///
/// A 400 carrying `invalid_grant` or a 401/403 status means the refresh
/// token is revoked, expired, or already rotated away; those come back as
/// `InvalidGrant` so the session can check whether another process holds
/// a newer grant. Every other failure is transport-level and worth
/// retrying later with the same token.
pub async fn refresh_token(
    client: &reqwest::Client,
    endpoint: &str,
    registration: &AppRegistration,
    refresh: &str,
) -> Result<TokenResponse> {
    let response = client
        .post(endpoint)
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh),
            ("client_id", registration.client_id.as_str()),
            ("client_secret", registration.client_secret.expose()),
        ])
        .send()
        .await
        .map_err(|e| Error::Transport(format!("token refresh request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        if status.as_u16() == 401 || status.as_u16() == 403 || body.contains("invalid_grant") {
            return Err(Error::InvalidGrant(format!(
                "refresh token rejected ({status}): {body}"
            )));
        }

        return Err(Error::Transport(format!(
            "token refresh returned {status}: {body}"
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::Parse(format!("invalid refresh response: {e}")))
}
