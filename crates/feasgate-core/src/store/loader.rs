//! Manifest loading: a directory of per-repository documents into a catalog.
//!
//! Each file parses independently. A malformed file is recorded as a
//! [`ManifestLoadError`] and skipped; its siblings still load. A missing
//! directory is an empty corpus, not an error.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::errors::{GateError, GateResult, ManifestLoadError};
use crate::models::RepositoryManifest;

pub const MANIFEST_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Outcome of loading a manifest directory.
#[derive(Clone, Debug, Default)]
pub struct LoadedManifests {
    /// Successfully parsed manifests, sorted by repository name.
    pub manifests: Vec<RepositoryManifest>,
    /// File each manifest was read from, index-aligned with `manifests`.
    /// Empty for corpora assembled in memory.
    pub sources: Vec<PathBuf>,
    /// One entry per file that failed to load.
    pub errors: Vec<ManifestLoadError>,
    /// SHA-256 over every manifest file read, in file-name order.
    pub digest: String,
}

impl LoadedManifests {
    pub fn repo_names(&self) -> Vec<String> {
        self.manifests.iter().map(|m| m.repo_name.clone()).collect()
    }

    /// Each manifest with the file it came from, or `<repo_name>` when the
    /// manifest was not read from disk.
    pub fn with_sources(&self) -> impl Iterator<Item = (PathBuf, &RepositoryManifest)> {
        self.manifests.iter().enumerate().map(|(i, manifest)| {
            let source = self
                .sources
                .get(i)
                .cloned()
                .unwrap_or_else(|| PathBuf::from(&manifest.repo_name));
            (source, manifest)
        })
    }
}

/// Whether `path` looks like a manifest document by extension.
pub fn is_manifest_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| MANIFEST_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Manifest files in the top level of `dir`, in file-name order.
pub fn manifest_paths(dir: &Path) -> Vec<PathBuf> {
    if !dir.is_dir() {
        return Vec::new();
    }
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(e) => {
                warn!("Skipping unreadable manifest entry: {e}");
                None
            }
        })
        .filter(|e| e.file_type().is_file() && is_manifest_file(e.path()))
        .map(|e| e.into_path())
        .collect()
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Parse one manifest document. `path` names the file for defaults and errors.
pub fn parse_manifest(content: &str, path: &Path) -> GateResult<RepositoryManifest> {
    let stem = file_stem(path);
    if content.trim().is_empty() {
        return Ok(RepositoryManifest::new(&stem));
    }

    let parsed: Option<RepositoryManifest> = if is_json(path) {
        let value: serde_json::Value =
            serde_json::from_str(content).map_err(|e| GateError::manifest(path, e.to_string()))?;
        match value {
            serde_json::Value::Null => None,
            serde_json::Value::Object(_) => Some(
                serde_json::from_value(value)
                    .map_err(|e| GateError::manifest(path, e.to_string()))?,
            ),
            _ => return Err(GateError::manifest(path, "expected a mapping at the top level")),
        }
    } else {
        let value: serde_yaml::Value =
            serde_yaml::from_str(content).map_err(|e| GateError::manifest(path, e.to_string()))?;
        match value {
            serde_yaml::Value::Null => None,
            serde_yaml::Value::Mapping(_) => Some(
                serde_yaml::from_value(value)
                    .map_err(|e| GateError::manifest(path, e.to_string()))?,
            ),
            _ => return Err(GateError::manifest(path, "expected a mapping at the top level")),
        }
    };

    let mut manifest = parsed.unwrap_or_default();
    if manifest.repo_name.trim().is_empty() {
        manifest.repo_name = stem;
    }
    Ok(manifest)
}

/// Read and parse a single manifest file.
pub fn load_manifest(path: &Path) -> GateResult<RepositoryManifest> {
    let content = std::fs::read_to_string(path)?;
    parse_manifest(&content, path)
}

/// Load every manifest in `dir`. Failures are collected, never fatal.
pub fn load_all_manifests(dir: &Path) -> LoadedManifests {
    let paths = manifest_paths(dir);
    let mut hasher = Sha256::new();
    let mut loaded: Vec<(PathBuf, RepositoryManifest)> = Vec::with_capacity(paths.len());
    let mut errors = Vec::new();

    for path in &paths {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                let err = GateError::from(e);
                warn!("Failed to read manifest {}: {err}", path.display());
                errors.push(ManifestLoadError::new(path, &err));
                continue;
            }
        };
        hasher.update(file_stem(path).as_bytes());
        hasher.update([0u8]);
        hasher.update(&bytes);

        let result = std::str::from_utf8(&bytes)
            .map_err(|e| GateError::manifest(path, format!("not valid UTF-8: {e}")))
            .and_then(|content| parse_manifest(content, path));
        match result {
            Ok(manifest) => {
                debug!(
                    "Loaded manifest {} ({} entries)",
                    manifest.repo_name,
                    manifest.entry_count()
                );
                loaded.push((path.clone(), manifest));
            }
            Err(err) => {
                warn!("Skipping malformed manifest: {err}");
                errors.push(ManifestLoadError::new(path, &err));
            }
        }
    }

    loaded.sort_by(|a, b| a.1.repo_name.cmp(&b.1.repo_name));
    let (sources, manifests): (Vec<PathBuf>, Vec<RepositoryManifest>) = loaded.into_iter().unzip();
    let digest = format!("{:x}", hasher.finalize());
    info!(
        "Loaded {} manifests from {} ({} errors, digest {})",
        manifests.len(),
        dir.display(),
        errors.len(),
        &digest[..12]
    );

    LoadedManifests {
        manifests,
        sources,
        errors,
        digest,
    }
}
