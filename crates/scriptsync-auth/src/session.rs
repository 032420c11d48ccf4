//! OAuth session lifecycle
//!
//! Owns the credential lifecycle end to end:
//! 1. `authorization_url` builds the consent URL the user visits
//! 2. `exchange_code` turns the one-time authorization code into a stored
//!    token record
//! 3. `authorized_session` hands out a currently-valid bearer token,
//!    refreshing a stale one first
//! 4. `refresh_rejected` force-refreshes after the remote service rejects
//!    a bearer token mid-flight
//!
//! No token state is cached in memory. Every decision re-reads the store,
//! so two processes sharing a token file converge on the latest refresh
//! instead of clobbering each other's rotated grants.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::constants::{AUTHORIZE_ENDPOINT, REFRESH_SKEW, SCOPES, TOKEN_ENDPOINT};
use crate::error::{Error, Result};
use crate::store::{AppRegistration, CredentialStore, TokenRecord};
use crate::token::{self, TokenResponse};

/// A currently-valid bearer token ready for API calls.
///
/// Opaque handle produced by [`AuthSession::authorized_session`]. API
/// clients see only the bearer string, never the refresh token or client
/// secret.
#[derive(Clone)]
pub struct AuthorizedSession {
    access_token: String,
}

impl AuthorizedSession {
    pub fn bearer_token(&self) -> &str {
        &self.access_token
    }
}

impl std::fmt::Debug for AuthorizedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizedSession")
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

/// Where the stored credential stands, for callers that report rather
/// than act. Computed without side effects; no refresh is attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    /// No token record stored; the interactive flow has never completed.
    AwaitingAuthorization,
    /// Access token valid for roughly `remaining` more.
    Authorized { remaining: Duration },
    /// Access token stale; recoverable without user interaction only if
    /// a refresh token is stored.
    Expired { refreshable: bool },
}

/// OAuth session over a credential store.
///
/// Cheap to construct; holds no token state of its own. Concurrent
/// refresh attempts within one process collapse into a single token
/// endpoint call via the internal lock.
pub struct AuthSession {
    registration: AppRegistration,
    store: CredentialStore,
    http: reqwest::Client,
    token_endpoint: String,
    refresh_skew: Duration,
    // Serializes refresh attempts so concurrent callers share one grant
    refresh_lock: Mutex<()>,
}

impl AuthSession {
    pub fn new(
        registration: AppRegistration,
        store: CredentialStore,
        http: reqwest::Client,
    ) -> Self {
        Self {
            registration,
            store,
            http,
            token_endpoint: TOKEN_ENDPOINT.to_string(),
            refresh_skew: REFRESH_SKEW,
            refresh_lock: Mutex::new(()),
        }
    }

    /// Point the session at a different token endpoint. Tests use this to
    /// run against a local server.
    pub fn with_token_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.token_endpoint = endpoint.into();
        self
    }

    /// Override how long before nominal expiry a token counts as stale.
    pub fn with_refresh_skew(mut self, skew: Duration) -> Self {
        self.refresh_skew = skew;
        self
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Build the authorization URL the user must visit in a browser.
    ///
    /// Pure construction from the registration and the fixed scope set;
    /// calling it twice yields the identical URL. `access_type=offline`
    /// plus `prompt=consent` make the subsequent exchange return a
    /// refresh token.
    pub fn authorization_url(&self) -> String {
        build_authorization_url(&self.registration)
    }

    /// Exchange the one-time authorization code and persist the result.
    ///
    /// Overwrites any previously stored record; re-running the flow is
    /// how a user recovers from a dead grant.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenRecord> {
        let response =
            token::exchange_code(&self.http, &self.token_endpoint, &self.registration, code)
                .await?;
        let record = record_from_response(response, None, now_millis());
        if record.refresh_token.is_none() {
            warn!("token endpoint granted no refresh token; session will die at expiry");
        }
        self.store.save_token(&record).await?;
        info!(scopes = record.scope.len(), "authorization code exchanged");
        Ok(record)
    }

    /// Produce a currently-valid bearer token, refreshing first if the
    /// stored one is stale.
    ///
    /// The decision procedure:
    /// 1. Load the record from disk (no record means `Unauthenticated`)
    /// 2. If the access token expires more than the skew from now, use it
    /// 3. Otherwise refresh, persist, and use the replacement
    pub async fn authorized_session(&self) -> Result<AuthorizedSession> {
        let record = self.store.load_token().await?;
        if record.is_fresh(now_millis(), self.skew_millis()) {
            return Ok(AuthorizedSession {
                access_token: record.access_token,
            });
        }

        debug!("access token stale, refreshing");
        let refreshed = self.refresh_collapsing(&record.access_token).await?;
        Ok(AuthorizedSession {
            access_token: refreshed.access_token,
        })
    }

    /// Force-refresh after the remote service rejected `rejected_access`.
    ///
    /// Freshness by the clock is ignored for the rejected token itself:
    /// the service's 401 outranks our arithmetic. If the stored record has
    /// already moved past the rejected token (a concurrent caller or
    /// another process refreshed), that replacement is returned without
    /// burning a second grant.
    pub async fn refresh_rejected(&self, rejected_access: &str) -> Result<AuthorizedSession> {
        let refreshed = self.refresh_collapsing(rejected_access).await?;
        Ok(AuthorizedSession {
            access_token: refreshed.access_token,
        })
    }

    /// Whether a stored credential can still produce a valid access token
    /// without re-running the interactive flow.
    pub async fn is_authenticated(&self) -> bool {
        match self.store.load_token().await {
            Ok(record) => {
                record.is_fresh(now_millis(), self.skew_millis()) || record.refresh_token.is_some()
            }
            Err(_) => false,
        }
    }

    /// Report where the stored credential stands without touching the
    /// token endpoint.
    pub async fn status(&self) -> Result<SessionStatus> {
        let record = match self.store.load_token().await {
            Ok(record) => record,
            Err(Error::Unauthenticated(_)) => return Ok(SessionStatus::AwaitingAuthorization),
            Err(e) => return Err(e),
        };

        let now = now_millis();
        if record.is_fresh(now, self.skew_millis()) {
            Ok(SessionStatus::Authorized {
                remaining: Duration::from_millis(record.expiry_date.saturating_sub(now)),
            })
        } else {
            Ok(SessionStatus::Expired {
                refreshable: record.refresh_token.is_some(),
            })
        }
    }

    // One refresh, serialized across concurrent callers.
    //
    // The lock is held across reload + refresh + persist. Whoever waited
    // on the lock re-reads the store first: if the record already moved
    // past `stale_access` and is fresh, the winner's refresh is reused
    // instead of spending another grant (refresh tokens can rotate, so a
    // double refresh risks invalidating the one just stored).
    async fn refresh_collapsing(&self, stale_access: &str) -> Result<TokenRecord> {
        let _guard = self.refresh_lock.lock().await;

        let current = self.store.load_token().await?;
        if current.access_token != stale_access && current.is_fresh(now_millis(), self.skew_millis())
        {
            debug!("token already refreshed by a concurrent caller");
            return Ok(current);
        }

        let Some(refresh) = current.refresh_token.clone() else {
            return Err(Error::ReauthorizationRequired(
                "stored token is expired and carries no refresh token".into(),
            ));
        };

        match token::refresh_token(&self.http, &self.token_endpoint, &self.registration, &refresh)
            .await
        {
            Ok(response) => self.persist_refreshed(response, &current).await,
            Err(Error::InvalidGrant(reason)) => self.retry_after_invalid_grant(&refresh, reason).await,
            Err(other) => Err(other),
        }
    }

    // An invalid_grant rejection can mean another process rotated the
    // refresh token after we read ours. Reload from disk: a fresh record
    // wins outright, a different refresh token earns exactly one retry,
    // and anything else means the grant family is truly dead.
    async fn retry_after_invalid_grant(
        &self,
        used_refresh: &str,
        reason: String,
    ) -> Result<TokenRecord> {
        let reloaded = self.store.load_token().await?;
        match next_after_invalid_grant(&reloaded, used_refresh, now_millis(), self.skew_millis()) {
            GrantRetry::UseReloaded => {
                debug!("disk record refreshed by another process, using it");
                Ok(reloaded)
            }
            GrantRetry::RetryWith(other_refresh) => {
                warn!("refresh token rotated by another process, retrying once");
                match token::refresh_token(
                    &self.http,
                    &self.token_endpoint,
                    &self.registration,
                    &other_refresh,
                )
                .await
                {
                    Ok(response) => self.persist_refreshed(response, &reloaded).await,
                    Err(Error::InvalidGrant(second)) => Err(Error::ReauthorizationRequired(second)),
                    Err(other) => Err(other),
                }
            }
            GrantRetry::GiveUp => Err(Error::ReauthorizationRequired(reason)),
        }
    }

    async fn persist_refreshed(
        &self,
        response: TokenResponse,
        previous: &TokenRecord,
    ) -> Result<TokenRecord> {
        let record = record_from_response(response, Some(previous), now_millis());
        self.store.save_token(&record).await?;
        info!("token refresh succeeded");
        Ok(record)
    }

    fn skew_millis(&self) -> u64 {
        self.refresh_skew.as_millis() as u64
    }
}

/// Build the authorization URL for a registration.
///
/// `access_type=offline` and `prompt=consent` force the consent screen and
/// a refresh token on every approval, so re-running the flow always yields
/// a refreshable credential.
pub fn build_authorization_url(registration: &AppRegistration) -> String {
    format!(
        "{AUTHORIZE_ENDPOINT}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent",
        urlencoding::encode(&registration.client_id),
        urlencoding::encode(&registration.redirect_uri),
        urlencoding::encode(&SCOPES.join(" ")),
    )
}

/// Decision after the token endpoint rejects a refresh grant.
#[derive(Debug, PartialEq)]
enum GrantRetry {
    /// The on-disk record is already fresh; use it as-is.
    UseReloaded,
    /// The on-disk refresh token differs from the rejected one; another
    /// process rotated it. Retry once with the newer token.
    RetryWith(String),
    /// Nothing changed on disk; the grant is dead.
    GiveUp,
}

fn next_after_invalid_grant(
    reloaded: &TokenRecord,
    used_refresh: &str,
    now_millis: u64,
    skew_millis: u64,
) -> GrantRetry {
    if reloaded.is_fresh(now_millis, skew_millis) {
        return GrantRetry::UseReloaded;
    }
    match &reloaded.refresh_token {
        Some(other) if other != used_refresh => GrantRetry::RetryWith(other.clone()),
        _ => GrantRetry::GiveUp,
    }
}

/// Build the record to store from a token endpoint response.
///
/// The server omits `refresh_token` and `scope` on most refreshes, so
/// those carry forward from the previous record rather than being
/// dropped.
fn record_from_response(
    response: TokenResponse,
    previous: Option<&TokenRecord>,
    now_millis: u64,
) -> TokenRecord {
    let scopes = response.scopes();
    TokenRecord {
        refresh_token: response
            .refresh_token
            .clone()
            .or_else(|| previous.and_then(|p| p.refresh_token.clone())),
        scope: if scopes.is_empty() {
            previous.map(|p| p.scope.clone()).unwrap_or_default()
        } else {
            scopes
        },
        token_type: response.token_type.clone(),
        expiry_date: now_millis + response.expires_in * 1000,
        access_token: response.access_token,
    }
}

/// Current wall clock as unix milliseconds.
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
