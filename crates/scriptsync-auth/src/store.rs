//! Durable storage for the app registration and token record
//!
//! Two JSON files under a per-user credential directory: `config.json`
//! (the OAuth app registration, written once by setup) and `tokens.json`
//! (the token record, overwritten wholesale on every exchange and refresh).
//! All writes use atomic temp-file + rename so a crash mid-write never
//! leaves a truncated file behind.
//!
//! There is no in-memory cache. Every load re-reads disk, so separate
//! processes sharing a credential directory observe each other's refreshes.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{CONFIG_DIR_ENV, CONFIG_DIR_NAME, CONFIG_FILE, TOKEN_FILE};
use crate::error::{Error, Result};
use crate::secret::Secret;

/// OAuth client registration for this installation.
///
/// Loaded at process start and never mutated afterwards. The client secret
/// is redacted in Debug output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppRegistration {
    pub client_id: String,
    pub client_secret: Secret,
    pub redirect_uri: String,
    /// Where the token record lives. Relative paths resolve against the
    /// credential directory.
    pub token_path: PathBuf,
}

/// Stored OAuth tokens.
///
/// `expiry_date` is a unix timestamp in milliseconds (absolute, not a
/// delta). Computed at storage time from the token endpoint's `expires_in`
/// seconds delta plus the current time. A record with no refresh token
/// becomes permanently unusable once the access token expires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Bearer token presented on API calls
    pub access_token: String,
    /// Refresh token, only granted when the consent included offline access
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Granted scopes
    #[serde(default)]
    pub scope: Vec<String>,
    pub token_type: String,
    /// Absolute expiry, unix milliseconds
    pub expiry_date: u64,
}

impl TokenRecord {
    /// Whether the access token is still usable at `now_millis`, treating
    /// anything within `skew_millis` of expiry as already stale.
    pub fn is_fresh(&self, now_millis: u64, skew_millis: u64) -> bool {
        now_millis + skew_millis < self.expiry_date
    }
}

/// Locator for the two credential files.
///
/// Holds paths only; reads and writes go straight to disk on every call.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    config_path: PathBuf,
    token_path: PathBuf,
}

impl CredentialStore {
    /// Store rooted at the default per-user location:
    /// `$SCRIPTSYNC_CONFIG_DIR` if set, otherwise `~/.scriptsync`.
    pub fn from_env() -> Result<Self> {
        let dir = match std::env::var_os(CONFIG_DIR_ENV) {
            Some(dir) => PathBuf::from(dir),
            None => dirs::home_dir()
                .ok_or_else(|| Error::Io("cannot determine home directory".into()))?
                .join(CONFIG_DIR_NAME),
        };
        Ok(Self::at(dir))
    }

    /// Store rooted at an explicit credential directory.
    pub fn at(config_dir: impl Into<PathBuf>) -> Self {
        let dir = config_dir.into();
        Self {
            config_path: dir.join(CONFIG_FILE),
            token_path: dir.join(TOKEN_FILE),
        }
    }

    /// Rebind the token file location, typically from a loaded
    /// registration's `token_path`. Relative paths resolve against the
    /// credential directory.
    pub fn with_token_path(mut self, path: &Path) -> Self {
        self.token_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            match self.config_path.parent() {
                Some(dir) => dir.join(path),
                None => path.to_path_buf(),
            }
        };
        self
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn token_path(&self) -> &Path {
        &self.token_path
    }

    /// Load the app registration, or `ConfigMissing` if setup never ran.
    pub async fn load_registration(&self) -> Result<AppRegistration> {
        let contents = match tokio::fs::read_to_string(&self.config_path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::ConfigMissing(self.config_path.clone()));
            }
            Err(e) => {
                return Err(Error::Io(format!(
                    "reading {}: {e}",
                    self.config_path.display()
                )));
            }
        };
        serde_json::from_str(&contents)
            .map_err(|e| Error::Parse(format!("parsing {}: {e}", self.config_path.display())))
    }

    /// Persist the app registration. Only interactive setup calls this.
    pub async fn save_registration(&self, registration: &AppRegistration) -> Result<()> {
        write_atomic(&self.config_path, registration).await
    }

    /// Load the token record, or `Unauthenticated` if the authorization
    /// flow has never completed.
    pub async fn load_token(&self) -> Result<TokenRecord> {
        let contents = match tokio::fs::read_to_string(&self.token_path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::Unauthenticated(self.token_path.clone()));
            }
            Err(e) => {
                return Err(Error::Io(format!(
                    "reading {}: {e}",
                    self.token_path.display()
                )));
            }
        };
        serde_json::from_str(&contents)
            .map_err(|e| Error::Parse(format!("parsing {}: {e}", self.token_path.display())))
    }

    /// Replace the stored token record wholesale.
    pub async fn save_token(&self, record: &TokenRecord) -> Result<()> {
        write_atomic(&self.token_path, record).await
    }
}

/// Write a JSON document to a file atomically.
///
/// Serializes to a temp file in the target's directory and renames it
/// into place, so an interrupted write never leaves a partial file
/// behind. Credential files hold OAuth secrets, so the temp file drops
/// to 0600 before the rename. The parent directory is created on first
/// use.
async fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| Error::Parse(format!("serializing {}: {e}", path.display())))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io(format!("{} has no parent directory", path.display())))?;
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| Error::Io(format!("creating {}: {e}", dir.display())))?;

    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("credential");
    // Pid plus a per-process sequence number: concurrent writers never
    // share a temp file, and the rename step stays atomic either way.
    static TMP_SEQ: AtomicU64 = AtomicU64::new(0);
    let tmp_path = dir.join(format!(
        ".{name}.tmp.{}.{}",
        std::process::id(),
        TMP_SEQ.fetch_add(1, Ordering::Relaxed)
    ));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp file: {e}")))?;

    // Owner read/write only (unix)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp file: {e}")))?;

    debug!(path = %path.display(), "persisted credential file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_registration() -> AppRegistration {
        AppRegistration {
            client_id: "cid-123.apps.googleusercontent.com".into(),
            client_secret: Secret::new("cs-topsecret"),
            redirect_uri: "http://localhost:8787/callback".into(),
            token_path: PathBuf::from("tokens.json"),
        }
    }

    fn test_token(suffix: &str) -> TokenRecord {
        TokenRecord {
            access_token: format!("at_{suffix}"),
            refresh_token: Some(format!("rt_{suffix}")),
            scope: vec!["https://www.googleapis.com/auth/script.projects".into()],
            token_type: "Bearer".into(),
            expiry_date: 1735500000000,
        }
    }

    static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    #[test]
    fn from_env_honors_directory_override() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env(CONFIG_DIR_ENV, "/tmp/scriptsync-env-test") };
        let store = CredentialStore::from_env().unwrap();
        assert_eq!(
            store.config_path(),
            Path::new("/tmp/scriptsync-env-test/config.json")
        );
        assert_eq!(
            store.token_path(),
            Path::new("/tmp/scriptsync-env-test/tokens.json")
        );
        unsafe { remove_env(CONFIG_DIR_ENV) };
    }

    #[tokio::test]
    async fn roundtrip_save_load_token() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::at(dir.path());

        store.save_token(&test_token("1")).await.unwrap();
        let loaded = store.load_token().await.unwrap();
        assert_eq!(loaded, test_token("1"));
    }

    #[tokio::test]
    async fn roundtrip_save_load_registration() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::at(dir.path());

        store.save_registration(&test_registration()).await.unwrap();
        let loaded = store.load_registration().await.unwrap();
        assert_eq!(loaded.client_id, "cid-123.apps.googleusercontent.com");
        assert_eq!(loaded.client_secret.expose(), "cs-topsecret");
        assert_eq!(loaded.redirect_uri, "http://localhost:8787/callback");
        assert_eq!(loaded.token_path, PathBuf::from("tokens.json"));
    }

    #[tokio::test]
    async fn missing_token_file_is_unauthenticated() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::at(dir.path());

        let err = store.load_token().await.unwrap_err();
        assert!(matches!(err, Error::Unauthenticated(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn missing_registration_is_config_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::at(dir.path());

        let err = store.load_registration().await.unwrap_err();
        assert!(matches!(err, Error::ConfigMissing(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn corrupt_token_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::at(dir.path());

        tokio::fs::write(store.token_path(), b"{not json")
            .await
            .unwrap();
        let err = store.load_token().await.unwrap_err();
        assert!(matches!(err, Error::Parse(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn save_token_replaces_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::at(dir.path());

        store.save_token(&test_token("old")).await.unwrap();
        let mut replacement = test_token("new");
        replacement.refresh_token = None;
        store.save_token(&replacement).await.unwrap();

        let loaded = store.load_token().await.unwrap();
        assert_eq!(loaded.access_token, "at_new");
        // No merging with the previous record
        assert_eq!(loaded.refresh_token, None);
    }

    #[tokio::test]
    async fn config_json_uses_camel_case_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::at(dir.path());

        store.save_registration(&test_registration()).await.unwrap();
        let raw = tokio::fs::read_to_string(store.config_path()).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        for key in ["clientId", "clientSecret", "redirectUri", "tokenPath"] {
            assert!(value.get(key).is_some(), "missing key {key} in {raw}");
        }
    }

    #[tokio::test]
    async fn tokens_json_uses_snake_case_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::at(dir.path());

        store.save_token(&test_token("1")).await.unwrap();
        let raw = tokio::fs::read_to_string(store.token_path()).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        for key in [
            "access_token",
            "refresh_token",
            "scope",
            "token_type",
            "expiry_date",
        ] {
            assert!(value.get(key).is_some(), "missing key {key} in {raw}");
        }
        assert!(value["scope"].is_array());
        assert!(value["expiry_date"].is_u64());
    }

    #[tokio::test]
    async fn record_without_refresh_token_omits_the_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::at(dir.path());

        let mut record = test_token("1");
        record.refresh_token = None;
        store.save_token(&record).await.unwrap();

        let raw = tokio::fs::read_to_string(store.token_path()).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(value.get("refresh_token").is_none());

        // And loading it back yields None, not an error
        let loaded = store.load_token().await.unwrap();
        assert_eq!(loaded.refresh_token, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn token_file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::at(dir.path());
        store.save_token(&test_token("1")).await.unwrap();

        let metadata = tokio::fs::metadata(store.token_path()).await.unwrap();
        let mode = metadata.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "token file must be 0600, got {mode:o}");
    }

    #[tokio::test]
    async fn with_token_path_resolves_relative_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            CredentialStore::at(dir.path()).with_token_path(Path::new("alt/creds.json"));
        assert_eq!(store.token_path(), dir.path().join("alt/creds.json"));
    }

    #[tokio::test]
    async fn with_token_path_keeps_absolute_paths() {
        let dir = tempfile::tempdir().unwrap();
        let alt = tempfile::tempdir().unwrap();
        let absolute = alt.path().join("tokens.json");

        let store = CredentialStore::at(dir.path()).with_token_path(&absolute);
        assert_eq!(store.token_path(), absolute);
    }

    #[tokio::test]
    async fn save_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::at(dir.path().join("nested/config"));

        store.save_token(&test_token("1")).await.unwrap();
        assert!(store.token_path().exists());
    }

    #[tokio::test]
    async fn parallel_saves_leave_a_complete_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(CredentialStore::at(dir.path()));

        let mut handles = vec![];
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.save_token(&test_token(&i.to_string())).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        // Whatever write won, the file is a complete valid record
        let loaded = store.load_token().await.unwrap();
        assert!(loaded.access_token.starts_with("at_"));
    }

    #[test]
    fn is_fresh_respects_skew() {
        let record = test_token("1");
        let expiry = record.expiry_date;

        // Well before expiry
        assert!(record.is_fresh(expiry - 120_000, 60_000));
        // Inside the skew window counts as stale
        assert!(!record.is_fresh(expiry - 30_000, 60_000));
        // Exactly at the skew boundary is stale
        assert!(!record.is_fresh(expiry - 60_000, 60_000));
        // Past expiry
        assert!(!record.is_fresh(expiry + 1, 60_000));
    }
}
