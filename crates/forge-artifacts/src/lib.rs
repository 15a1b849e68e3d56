// SPDX-License-Identifier: MIT OR Apache-2.0
//! Output collection, manifest construction, and bundle packaging.
//!
//! `build_bundle` is the terminal step of a job: it walks `outputs/`,
//! records every file's hash in a manifest, and zips a deterministic
//! archive alongside the raw manifest for callers that want it unpacked.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Errors raised while collecting outputs or building a bundle.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    /// Underlying filesystem operation failed.
    #[error("artifact io error at {path}: {source}")]
    Io {
        /// Path the failing operation targeted.
        path: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// Writing the ZIP archive failed.
    #[error("zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

fn io_err(path: &Path, source: std::io::Error) -> ArtifactError {
    ArtifactError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// One file recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Path relative to `outputs/`, using `/` separators.
    pub path: String,
    /// File size in bytes.
    pub size_bytes: u64,
    /// SHA-256 hex digest of the file's contents.
    pub sha256: String,
}

/// The manifest written to `bundle/manifest.json` and as the final entry
/// in `bundle/result.zip`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// The job this bundle belongs to.
    pub job_id: String,
    /// The coding-agent session that produced the outputs, if one was bound.
    pub session_id: Option<String>,
    /// When the manifest was generated.
    pub generated_at: DateTime<Utc>,
    /// Every collected output file, in the order [`collect_output_entries`]
    /// returned them (lexicographic by relative path).
    pub files: Vec<ManifestEntry>,
}

/// Recursively walks `outputs_dir`, returning every file's manifest entry
/// sorted lexicographically by relative path.
pub fn collect_output_entries(outputs_dir: &Path) -> Result<Vec<ManifestEntry>, ArtifactError> {
    let mut paths: Vec<PathBuf> = WalkDir::new(outputs_dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.path().to_path_buf())
        .collect();
    paths.sort();

    let mut entries = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = std::fs::read(&path).map_err(|e| io_err(&path, e))?;
        let relative = path
            .strip_prefix(outputs_dir)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace(std::path::MAIN_SEPARATOR, "/");
        entries.push(ManifestEntry {
            path: relative,
            size_bytes: bytes.len() as u64,
            sha256: hex_digest(&Sha256::digest(&bytes)),
        });
    }
    Ok(entries)
}

/// Builds the manifest for a job's outputs, stamping `generated_at` with
/// the caller-supplied timestamp (so callers can keep bundle generation
/// deterministic in tests).
#[must_use]
pub fn build_manifest(
    job_id: &str,
    session_id: Option<&str>,
    files: Vec<ManifestEntry>,
    generated_at: DateTime<Utc>,
) -> Manifest {
    Manifest {
        job_id: job_id.to_string(),
        session_id: session_id.map(str::to_string),
        generated_at,
        files,
    }
}

/// Writes `bundle/manifest.json` and `bundle/result.zip` for a job
/// workspace and returns the zip's path plus the manifest that was
/// written.
///
/// Archive entry order: every file under `outputs/**` (lexicographic),
/// then `job/execution-plan.json`, `job/request.md`, and
/// `logs/opencode-last-message.md` when each exists, then `manifest.json`
/// at the archive root.
pub fn build_bundle(
    workspace_root: &Path,
    bundle_dir: &Path,
    job_id: &str,
    session_id: Option<&str>,
    generated_at: DateTime<Utc>,
) -> Result<(PathBuf, Manifest), ArtifactError> {
    let outputs_dir = workspace_root.join("outputs");
    let entries = collect_output_entries(&outputs_dir)?;
    let manifest = build_manifest(job_id, session_id, entries.clone(), generated_at);

    std::fs::create_dir_all(bundle_dir).map_err(|e| io_err(bundle_dir, e))?;

    let manifest_path = bundle_dir.join("manifest.json");
    let manifest_json = serde_json::to_vec_pretty(&manifest).unwrap_or_default();
    std::fs::write(&manifest_path, &manifest_json).map_err(|e| io_err(&manifest_path, e))?;

    let zip_path = bundle_dir.join("result.zip");
    let zip_file = std::fs::File::create(&zip_path).map_err(|e| io_err(&zip_path, e))?;
    let mut zip = zip::ZipWriter::new(zip_file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    for entry in &entries {
        let source = outputs_dir.join(&entry.path);
        let bytes = std::fs::read(&source).map_err(|e| io_err(&source, e))?;
        zip.start_file(&entry.path, options)?;
        zip.write_all(&bytes).map_err(|e| io_err(&zip_path, e))?;
    }

    for (relative, absolute) in [
        (
            "job/execution-plan.json",
            workspace_root.join("job/execution-plan.json"),
        ),
        ("job/request.md", workspace_root.join("job/request.md")),
        (
            "logs/opencode-last-message.md",
            workspace_root.join("logs/opencode-last-message.md"),
        ),
    ] {
        if absolute.is_file() {
            let bytes = std::fs::read(&absolute).map_err(|e| io_err(&absolute, e))?;
            zip.start_file(relative, options)?;
            zip.write_all(&bytes).map_err(|e| io_err(&zip_path, e))?;
        }
    }

    zip.start_file("manifest.json", options)?;
    zip.write_all(&manifest_json).map_err(|e| io_err(&zip_path, e))?;
    zip.finish()?;

    Ok((zip_path, manifest))
}

fn hex_digest(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(s, "{b:02x}").expect("writing to a String cannot fail");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn collect_output_entries_sorts_lexicographically_and_hashes() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("b.txt"), b"b").unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"a").unwrap();
        let entries = collect_output_entries(tmp.path()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, "a.txt");
        assert_eq!(entries[1].path, "b.txt");
        assert_eq!(entries[0].sha256, hex_digest(&Sha256::digest(b"a")));
    }

    #[test]
    fn collect_output_entries_walks_nested_directories() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("charts")).unwrap();
        std::fs::write(tmp.path().join("charts/trend.png"), b"png").unwrap();
        std::fs::write(tmp.path().join("report.md"), b"# report").unwrap();
        let entries = collect_output_entries(tmp.path()).unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, ["charts/trend.png", "report.md"]);
    }

    #[test]
    fn build_bundle_writes_manifest_and_zip_with_expected_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("outputs")).unwrap();
        std::fs::create_dir_all(root.join("job")).unwrap();
        std::fs::create_dir_all(root.join("logs")).unwrap();
        std::fs::write(root.join("outputs/report.md"), b"# Report").unwrap();
        std::fs::write(root.join("job/execution-plan.json"), b"{}").unwrap();
        std::fs::write(root.join("job/request.md"), b"do the thing\n").unwrap();
        // logs/opencode-last-message.md deliberately absent.

        let bundle_dir = root.join("bundle");
        let (zip_path, manifest) =
            build_bundle(root, &bundle_dir, "job-1", Some("sess-1"), fixed_time()).unwrap();

        assert!(zip_path.is_file());
        assert!(bundle_dir.join("manifest.json").is_file());
        assert_eq!(manifest.job_id, "job-1");
        assert_eq!(manifest.files.len(), 1);

        let zip_file = std::fs::File::open(&zip_path).unwrap();
        let mut archive = zip::ZipArchive::new(zip_file).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert_eq!(
            names,
            [
                "report.md",
                "job/execution-plan.json",
                "job/request.md",
                "manifest.json",
            ]
        );
    }

    #[test]
    fn build_bundle_includes_last_message_when_present() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("outputs")).unwrap();
        std::fs::create_dir_all(root.join("job")).unwrap();
        std::fs::create_dir_all(root.join("logs")).unwrap();
        std::fs::write(root.join("outputs/slides.pptx"), b"PK").unwrap();
        std::fs::write(root.join("job/execution-plan.json"), b"{}").unwrap();
        std::fs::write(root.join("job/request.md"), b"build slides\n").unwrap();
        std::fs::write(root.join("logs/opencode-last-message.md"), b"done").unwrap();

        let bundle_dir = root.join("bundle");
        let (zip_path, _manifest) =
            build_bundle(root, &bundle_dir, "job-2", None, fixed_time()).unwrap();

        let zip_file = std::fs::File::open(&zip_path).unwrap();
        let mut archive = zip::ZipArchive::new(zip_file).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert!(names.contains(&"logs/opencode-last-message.md".to_string()));
    }
}
