//! Typed operations against remote script projects
//!
//! Every call acquires a bearer token from the shared `AuthSession`,
//! sends, and on a 401/403 refreshes once and resends; a second rejection
//! is terminal for that call. `get_project` is the one bounded fan-out:
//! the metadata and content reads run concurrently and join. No other
//! retries or timeouts live here; the injected `reqwest::Client` owns
//! transport policy, and 5xx/network failures surface to the caller.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use scriptsync_auth::AuthSession;

use crate::error::{Error, Result};
use crate::types::{
    Deployment, ExecutionOutcome, Page, ProjectFile, ProjectSnapshot, ProjectSummary, Version,
};

/// Script service base URL
const SCRIPT_BASE: &str = "https://script.googleapis.com";

/// Drive service base URL (project listing lives there, not in the
/// script service)
const DRIVE_BASE: &str = "https://www.googleapis.com";

/// Drive MIME type identifying script projects
const SCRIPT_MIME_TYPE: &str = "application/vnd.google-apps.script";

/// Default manifest file name inside a deployment config
const MANIFEST_FILE_NAME: &str = "appsscript";

/// Client for one user's script projects.
///
/// Holds no per-project state; one instance serves any number of
/// projects. Cheap to share behind the `Arc`ed session.
pub struct ProjectClient {
    auth: Arc<AuthSession>,
    http: reqwest::Client,
    script_base: String,
    drive_base: String,
}

impl ProjectClient {
    pub fn new(auth: Arc<AuthSession>, http: reqwest::Client) -> Self {
        Self {
            auth,
            http,
            script_base: SCRIPT_BASE.to_string(),
            drive_base: DRIVE_BASE.to_string(),
        }
    }

    /// Point the client at different service roots. Tests use this to run
    /// against a local server.
    pub fn with_base_urls(
        mut self,
        script_base: impl Into<String>,
        drive_base: impl Into<String>,
    ) -> Self {
        self.script_base = script_base.into();
        self.drive_base = drive_base.into();
        self
    }

    /// List one page of the user's script projects.
    ///
    /// Pure pagination pass-through: the caller owns the cursor loop.
    /// `query` narrows by project title.
    pub async fn list_projects(
        &self,
        page_size: u32,
        page_token: Option<&str>,
        query: Option<&str>,
    ) -> Result<Page> {
        let url = format!("{}/drive/v3/files", self.drive_base);
        let mut params: Vec<(&str, String)> = vec![
            ("pageSize", page_size.to_string()),
            ("q", drive_query(query)),
            (
                "fields",
                "files(id,name,createdTime,modifiedTime),nextPageToken".into(),
            ),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token.into()));
        }

        let response = self
            .send_authorized("list_projects", |http| http.get(&url).query(&params))
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Service {
                operation: "list_projects",
                status: status.as_u16(),
                message: body_text(response).await,
            });
        }

        let listing: DriveFileList = read_json("list_projects", response).await?;
        Ok(Page {
            projects: listing
                .files
                .into_iter()
                .map(|f| ProjectSummary {
                    script_id: f.id,
                    title: f.name,
                    created_at: f.created_time,
                    updated_at: f.modified_time,
                })
                .collect(),
            next_page_token: listing.next_page_token,
        })
    }

    /// Fetch a point-in-time snapshot of a project.
    ///
    /// Metadata and content are read concurrently and joined; if either
    /// read fails the whole call fails and no partial snapshot escapes.
    pub async fn get_project(&self, project_id: &str) -> Result<ProjectSnapshot> {
        debug!(project_id, "fetching project snapshot");
        let (metadata, content) = tokio::try_join!(
            self.fetch_metadata("get_project", project_id),
            self.fetch_content(project_id)
        )
        .map_err(|e| fold_fetch(project_id, e))?;

        Ok(ProjectSnapshot {
            project_id: metadata.script_id,
            title: metadata.title,
            created_at: metadata.create_time,
            updated_at: metadata.update_time,
            files: content.files,
        })
    }

    /// Replace the project's entire file set.
    ///
    /// Full-replace semantics: files absent from `files` are deleted
    /// remotely. After the service accepts the replacement, metadata is
    /// re-read once so the returned snapshot carries service-normalized
    /// timestamps; if that follow-up read fails the error is a fetch
    /// problem, because the replacement itself already stood.
    pub async fn update_project(
        &self,
        project_id: &str,
        files: Vec<ProjectFile>,
    ) -> Result<ProjectSnapshot> {
        let url = format!("{}/v1/projects/{project_id}/content", self.script_base);
        let body = UpdateContentRequest { files: &files };

        let response = self
            .send_authorized("update_project", |http| http.put(&url).json(&body))
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::UpdateRejected {
                project_id: project_id.into(),
                cause: format!("{status}: {}", body_text(response).await),
            });
        }

        let accepted: ContentBundle = read_json("update_project", response).await?;
        info!(project_id, files = accepted.files.len(), "content replaced");

        let metadata = self
            .fetch_metadata("update_project", project_id)
            .await
            .map_err(|e| fold_fetch(project_id, e))?;

        Ok(ProjectSnapshot {
            project_id: metadata.script_id,
            title: metadata.title,
            created_at: metadata.create_time,
            updated_at: metadata.update_time,
            files: accepted.files,
        })
    }

    /// Execute a function in the project and report how it went.
    ///
    /// A script-level failure rides back inside a 2xx envelope and becomes
    /// [`ExecutionOutcome::Failed`], not an `Err`. `dev_mode` runs the
    /// saved (undeployed) content.
    pub async fn run_function(
        &self,
        project_id: &str,
        function: &str,
        parameters: Vec<serde_json::Value>,
        dev_mode: bool,
    ) -> Result<ExecutionOutcome> {
        let url = format!("{}/v1/scripts/{project_id}:run", self.script_base);
        let body = serde_json::json!({
            "function": function,
            "parameters": parameters,
            "devMode": dev_mode,
        });

        let response = self
            .send_authorized("run_function", |http| http.post(&url).json(&body))
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Service {
                operation: "run_function",
                status: status.as_u16(),
                message: body_text(response).await,
            });
        }

        let operation: Operation = read_json("run_function", response).await?;
        Ok(match operation.error {
            Some(e) => {
                warn!(project_id, function, code = e.code, "remote execution failed");
                ExecutionOutcome::Failed {
                    code: e.code,
                    message: e.message,
                    details: e.details,
                }
            }
            None => ExecutionOutcome::Completed {
                return_value: operation.response.and_then(|r| r.result),
            },
        })
    }

    /// Create an immutable numbered version of the current content.
    pub async fn create_version(
        &self,
        project_id: &str,
        description: Option<&str>,
    ) -> Result<Version> {
        let url = format!("{}/v1/projects/{project_id}/versions", self.script_base);
        let body = match description {
            Some(d) => serde_json::json!({"description": d}),
            None => serde_json::json!({}),
        };

        let response = self
            .send_authorized("create_version", |http| http.post(&url).json(&body))
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Service {
                operation: "create_version",
                status: status.as_u16(),
                message: body_text(response).await,
            });
        }

        let version: Version = read_json("create_version", response).await?;
        info!(project_id, version = version.version_number, "version created");
        Ok(version)
    }

    /// Deploy a version of the project.
    ///
    /// With no `version_number` a fresh version is created from the
    /// current content first. The manifest file name defaults to the
    /// service's standard `appsscript`.
    pub async fn create_deployment(
        &self,
        project_id: &str,
        version_number: Option<u32>,
        description: Option<&str>,
        manifest_file_name: Option<&str>,
    ) -> Result<Deployment> {
        let version = match version_number {
            Some(v) => v,
            None => {
                self.create_version(project_id, description)
                    .await?
                    .version_number
            }
        };

        let url = format!("{}/v1/projects/{project_id}/deployments", self.script_base);
        let body = serde_json::json!({
            "versionNumber": version,
            "manifestFileName": manifest_file_name.unwrap_or(MANIFEST_FILE_NAME),
            "description": description.unwrap_or_default(),
        });

        let response = self
            .send_authorized("create_deployment", |http| http.post(&url).json(&body))
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Service {
                operation: "create_deployment",
                status: status.as_u16(),
                message: body_text(response).await,
            });
        }

        let deployment: Deployment = read_json("create_deployment", response).await?;
        info!(
            project_id,
            deployment = %deployment.deployment_id,
            version,
            "deployment created"
        );
        Ok(deployment)
    }

    async fn fetch_metadata(
        &self,
        operation: &'static str,
        project_id: &str,
    ) -> Result<ProjectMetadata> {
        let url = format!("{}/v1/projects/{project_id}", self.script_base);
        let response = self
            .send_authorized(operation, |http| http.get(&url))
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Service {
                operation,
                status: status.as_u16(),
                message: body_text(response).await,
            });
        }
        read_json(operation, response).await
    }

    async fn fetch_content(&self, project_id: &str) -> Result<ContentBundle> {
        let url = format!("{}/v1/projects/{project_id}/content", self.script_base);
        let response = self
            .send_authorized("get_project", |http| http.get(&url))
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Service {
                operation: "get_project",
                status: status.as_u16(),
                message: body_text(response).await,
            });
        }
        read_json("get_project", response).await
    }

    // One authorized round trip. On a 401/403 the bearer is refreshed
    // once (collapsed with concurrent rejections by the session) and the
    // request resent; a second rejection means the refreshed credential
    // is no good either, which only a new interactive flow can fix.
    async fn send_authorized<F>(&self, operation: &'static str, build: F) -> Result<reqwest::Response>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let session = self.auth.authorized_session().await?;
        let response = build(&self.http)
            .bearer_auth(session.bearer_token())
            .send()
            .await
            .map_err(|e| transport_error(operation, e))?;

        let status = response.status().as_u16();
        if status != 401 && status != 403 {
            return Ok(response);
        }

        debug!(operation, status, "bearer rejected, refreshing once");
        let refreshed = self.auth.refresh_rejected(session.bearer_token()).await?;
        let retried = build(&self.http)
            .bearer_auth(refreshed.bearer_token())
            .send()
            .await
            .map_err(|e| transport_error(operation, e))?;

        let retried_status = retried.status().as_u16();
        if retried_status == 401 || retried_status == 403 {
            let body = body_text(retried).await;
            return Err(Error::ReauthorizationRequired(format!(
                "{operation} still unauthorized after refresh ({retried_status}): {body}"
            )));
        }
        Ok(retried)
    }
}

/// Drive search clause selecting script projects, narrowed by title when
/// a query is given. Single quotes and backslashes in the term are
/// escaped per the Drive query grammar.
fn drive_query(query: Option<&str>) -> String {
    let base = format!("mimeType='{SCRIPT_MIME_TYPE}'");
    match query {
        Some(term) => {
            let escaped = term.replace('\\', "\\\\").replace('\'', "\\'");
            format!("{base} and name contains '{escaped}'")
        }
        None => base,
    }
}

// Read failures fold into FetchFailed so no caller ever sees half a
// snapshot. Credential-layer failures are not read failures and keep
// their own kind.
fn fold_fetch(project_id: &str, e: Error) -> Error {
    match e {
        Error::ReauthorizationRequired(_) | Error::Auth(_) => e,
        other => Error::FetchFailed {
            project_id: project_id.into(),
            cause: other.to_string(),
        },
    }
}

fn transport_error(operation: &'static str, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Canceled { operation }
    } else {
        Error::Transport {
            operation,
            reason: e.to_string(),
        }
    }
}

async fn body_text(response: reqwest::Response) -> String {
    response
        .text()
        .await
        .unwrap_or_else(|_| String::from("<no body>"))
}

async fn read_json<T: DeserializeOwned>(
    operation: &'static str,
    response: reqwest::Response,
) -> Result<T> {
    response.json::<T>().await.map_err(|e| Error::Decode {
        operation,
        reason: e.to_string(),
    })
}

#[derive(Serialize)]
struct UpdateContentRequest<'a> {
    files: &'a [ProjectFile],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectMetadata {
    script_id: String,
    title: String,
    #[serde(default)]
    create_time: Option<String>,
    #[serde(default)]
    update_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBundle {
    #[serde(default)]
    files: Vec<ProjectFile>,
}

/// Execution envelope: either `response.result` or a structured `error`.
#[derive(Debug, Deserialize)]
struct Operation {
    #[serde(default)]
    error: Option<OperationError>,
    #[serde(default)]
    response: Option<OperationResponse>,
}

#[derive(Debug, Deserialize)]
struct OperationError {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
    #[serde(default)]
    details: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OperationResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    #[serde(default)]
    created_time: Option<String>,
    #[serde(default)]
    modified_time: Option<String>,
}
