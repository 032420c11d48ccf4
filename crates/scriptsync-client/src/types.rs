//! Domain types for remote script projects

use serde::{Deserialize, Serialize};

/// What a project file contains, using the service's wire spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileKind {
    /// Executable script source
    ServerJs,
    /// HTML for user-facing pages
    Html,
    /// The project manifest (exactly one per project, named `appsscript`)
    Json,
}

impl FileKind {
    /// Local file extension used when projects are written to disk.
    pub fn extension(self) -> &'static str {
        match self {
            FileKind::ServerJs => "js",
            FileKind::Html => "html",
            FileKind::Json => "json",
        }
    }

    /// Inverse of [`extension`](Self::extension) for reading a local
    /// directory back into a file list.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "js" | "gs" => Some(FileKind::ServerJs),
            "html" => Some(FileKind::Html),
            "json" => Some(FileKind::Json),
            _ => None,
        }
    }
}

/// One file inside a script project. `name` carries no extension; the
/// kind determines how it materializes locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectFile {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
    #[serde(default)]
    pub source: String,
}

/// Point-in-time view of a project: metadata joined with content.
///
/// No lock is held while reading; concurrent external edits are possible
/// and undetected. Timestamps are the service's RFC 3339 strings.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectSnapshot {
    pub project_id: String,
    pub title: String,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub files: Vec<ProjectFile>,
}

/// Listing entry for one script project.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectSummary {
    pub script_id: String,
    pub title: String,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

/// One page of a project listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub projects: Vec<ProjectSummary>,
    /// Opaque cursor for the next page, absent on the last one
    pub next_page_token: Option<String>,
}

/// Result of executing a remote function.
///
/// `Failed` is a successful transport round trip whose payload encodes a
/// script-level failure; transport problems never produce an outcome and
/// surface on the error channel instead.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Completed {
        return_value: Option<serde_json::Value>,
    },
    Failed {
        code: i32,
        message: String,
        details: Vec<serde_json::Value>,
    },
}

impl ExecutionOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, ExecutionOutcome::Failed { .. })
    }
}

/// An immutable numbered version of a project's content.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    pub version_number: u32,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub create_time: Option<String>,
}

/// A deployment of a specific version.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub deployment_id: String,
    #[serde(default)]
    pub deployment_config: Option<DeploymentConfig>,
    #[serde(default)]
    pub update_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConfig {
    #[serde(default)]
    pub script_id: Option<String>,
    #[serde(default)]
    pub version_number: Option<u32>,
    #[serde(default)]
    pub manifest_file_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}
