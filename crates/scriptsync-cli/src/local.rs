//! Local materialization of project files
//!
//! Maps the remote file list onto a flat directory and back:
//! `SERVER_JS` becomes `.js`, `HTML` becomes `.html`, `JSON` becomes
//! `.json`. Reading accepts the legacy `.gs` spelling for script
//! source. Only the top level of the directory is considered.

use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::debug;

use scriptsync_client::{FileKind, ProjectFile};

/// Write a project's files into `dir`, creating it if missing. Returns
/// the local names written, in the remote listing's order. Names that
/// are not plain file names are refused rather than resolved.
pub async fn write_project(dir: &Path, files: &[ProjectFile]) -> Result<Vec<String>> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;

    let mut written = Vec::with_capacity(files.len());
    for file in files {
        // Remote names must stay plain file names; a separator would land
        // the write outside `dir`.
        if file.name.is_empty() || file.name.contains('/') || file.name.contains('\\') {
            bail!("refusing project file name {:?}", file.name);
        }
        let name = local_name(file);
        let path = dir.join(&name);
        tokio::fs::write(&path, file.source.as_bytes())
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        debug!(path = %path.display(), "wrote project file");
        written.push(name);
    }
    Ok(written)
}

/// Read a directory back into a file list, skipping subdirectories and
/// files whose extension maps to no kind.
pub async fn read_project(dir: &Path) -> Result<Vec<ProjectFile>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("reading {}", dir.display()))?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let path = entry.path();
        let Some((name, kind)) = classify(&path) else {
            debug!(path = %path.display(), "skipping non-project file");
            continue;
        };
        let source = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        files.push(ProjectFile { name, kind, source });
    }

    // Directory iteration order is platform-dependent; sort so repeated
    // pushes of the same tree send the identical request body.
    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

fn local_name(file: &ProjectFile) -> String {
    format!("{}.{}", file.name, file.kind.extension())
}

/// Split a local path into (remote name, kind). `None` means the file
/// does not belong in a project.
fn classify(path: &Path) -> Option<(String, FileKind)> {
    let stem = path.file_stem()?.to_str()?;
    let ext = path.extension()?.to_str()?;
    let kind = FileKind::from_extension(ext)?;
    Some((stem.to_string(), kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, kind: FileKind, source: &str) -> ProjectFile {
        ProjectFile {
            name: name.to_string(),
            kind,
            source: source.to_string(),
        }
    }

    #[test]
    fn local_names_follow_kind() {
        assert_eq!(
            local_name(&file("Code", FileKind::ServerJs, "")),
            "Code.js"
        );
        assert_eq!(local_name(&file("index", FileKind::Html, "")), "index.html");
        assert_eq!(
            local_name(&file("appsscript", FileKind::Json, "")),
            "appsscript.json"
        );
    }

    #[test]
    fn classify_accepts_legacy_gs_extension() {
        let got = classify(Path::new("/tmp/p/Macros.gs"));
        assert_eq!(got, Some(("Macros".to_string(), FileKind::ServerJs)));
    }

    #[test]
    fn classify_rejects_unmapped_extensions() {
        assert_eq!(classify(Path::new("/tmp/p/notes.txt")), None);
        assert_eq!(classify(Path::new("/tmp/p/README")), None);
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let files = vec![
            file("appsscript", FileKind::Json, "{\"timeZone\":\"Etc/UTC\"}"),
            file("Code", FileKind::ServerJs, "function main() {}"),
            file("sidebar", FileKind::Html, "<p>hi</p>"),
        ];

        let written = write_project(dir.path(), &files).await.unwrap();
        assert_eq!(written, vec!["appsscript.json", "Code.js", "sidebar.html"]);

        let mut read_back = read_project(dir.path()).await.unwrap();
        read_back.sort_by(|a, b| a.name.cmp(&b.name));
        let mut expected = files.clone();
        expected.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(read_back, expected);
    }

    #[tokio::test]
    async fn read_skips_directories_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Code.js"), "function f() {}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a project file").unwrap();
        std::fs::create_dir(dir.path().join("build")).unwrap();
        std::fs::write(dir.path().join("build").join("nested.js"), "ignored").unwrap();

        let files = read_project(dir.path()).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "Code");
        assert_eq!(files[0].kind, FileKind::ServerJs);
    }

    #[tokio::test]
    async fn read_reports_sorted_by_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("zeta.js"), "z").unwrap();
        std::fs::write(dir.path().join("alpha.js"), "a").unwrap();
        std::fs::write(dir.path().join("Middle.html"), "m").unwrap();

        let files = read_project(dir.path()).await.unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["Middle", "alpha", "zeta"]);
    }

    #[tokio::test]
    async fn write_rejects_names_that_escape_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("project");

        let traversal = vec![file("../evil", FileKind::ServerJs, "x")];
        let err = write_project(&target, &traversal).await.unwrap_err();
        assert!(err.to_string().contains("../evil"), "got {err:#}");
        assert!(!dir.path().join("evil.js").exists());

        let stray = dir.path().join("stray");
        let absolute = vec![file(stray.to_str().unwrap(), FileKind::Html, "x")];
        write_project(&target, &absolute).await.unwrap_err();
        assert!(!dir.path().join("stray.html").exists());
    }

    #[tokio::test]
    async fn write_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out").join("deep");
        let files = vec![file("Code", FileKind::ServerJs, "x")];

        write_project(&target, &files).await.unwrap();
        let body = std::fs::read_to_string(target.join("Code.js")).unwrap();
        assert_eq!(body, "x");
    }

    #[tokio::test]
    async fn gs_files_push_as_server_js() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Legacy.gs"), "function g() {}").unwrap();

        let files = read_project(dir.path()).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].kind, FileKind::ServerJs);
        assert_eq!(files[0].name, "Legacy");
    }
}
