//! Manifest discovery from a single source.
//!
//! A source is an `http(s)://` URL, a local YAML file, or a local directory
//! whose `*.yaml` files are read recursively. A document with a top-level
//! `manifests:` key is an index; its entries are inline manifests or
//! pointers that are followed relative to the document they appear in.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

use ukpack_core::error::{PackError, Result};

use super::types::Manifest;

/// Upper bound on index-of-index nesting.
const MAX_POINTER_DEPTH: usize = 8;

/// Whether `source` names a remote location.
pub fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Resolve `pointer` relative to the document at `base`.
pub fn resolve_location(base: &str, pointer: &str) -> String {
    if is_remote(pointer) || Path::new(pointer).is_absolute() {
        return pointer.to_string();
    }
    let pointer = pointer.trim_start_matches("./");

    if is_remote(base) {
        let dir = match base.rfind('/') {
            Some(idx) if idx > "https://".len() => &base[..idx],
            _ => base,
        };
        return format!("{}/{}", dir.trim_end_matches('/'), pointer);
    }

    let base = Path::new(base);
    let dir = if base.is_dir() {
        base
    } else {
        base.parent().unwrap_or(Path::new("."))
    };
    dir.join(pointer).to_string_lossy().into_owned()
}

/// Collect every manifest reachable from `source`.
///
/// Manifests without an `origin` are stamped with `source`. Failing to read
/// the source itself is `SourceUnreachable`; a broken pointer further down
/// is logged and skipped.
pub async fn find_manifests_from_source(source: &str) -> Result<Vec<Manifest>> {
    let mut manifests = Vec::new();
    let mut visited = HashSet::new();
    let mut queue: VecDeque<(String, usize)> = VecDeque::new();

    for location in expand_local_dir(source)? {
        queue.push_back((location, 0));
    }

    let mut first = true;
    while let Some((location, depth)) = queue.pop_front() {
        if !visited.insert(visit_key(&location)) {
            continue;
        }

        let parsed = match read_location(&location).await {
            Ok(document) => parse_document(&document, &location),
            Err(e) => Err(e),
        };
        let entries = match parsed {
            Ok(entries) => entries,
            Err(e) if first => {
                return Err(PackError::SourceUnreachable {
                    source_name: source.to_string(),
                    message: e.to_string(),
                })
            }
            Err(e) => {
                tracing::warn!(location = %location, error = %e, "Skipping unreadable manifest");
                continue;
            }
        };
        first = false;

        for mut manifest in entries {
            if manifest.is_pointer() {
                if depth + 1 > MAX_POINTER_DEPTH {
                    tracing::warn!(
                        location = %location,
                        pointer = %manifest.manifest,
                        "Manifest pointers nested too deeply"
                    );
                    continue;
                }
                queue.push_back((resolve_location(&location, &manifest.manifest), depth + 1));
                continue;
            }
            if !manifest.has_safe_name() {
                tracing::warn!(
                    location = %location,
                    name = %manifest.name.escape_debug(),
                    "Ignoring manifest with an unusable name"
                );
                continue;
            }
            if manifest.origin.is_empty() {
                manifest.origin = source.to_string();
            }
            manifests.push(manifest);
        }
    }

    tracing::debug!(source = %source, count = manifests.len(), "Found manifests");
    Ok(manifests)
}

/// A local directory expands to its YAML files (depth-first, sorted); any
/// other source is returned as-is.
fn expand_local_dir(source: &str) -> Result<Vec<String>> {
    if is_remote(source) || !Path::new(source).is_dir() {
        return Ok(vec![source.to_string()]);
    }

    let mut files = Vec::new();
    collect_yaml_files(Path::new(source), &mut files).map_err(|e| PackError::SourceUnreachable {
        source_name: source.to_string(),
        message: e.to_string(),
    })?;
    Ok(files
        .into_iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect())
}

fn collect_yaml_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)?.collect::<std::io::Result<_>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_yaml_files(&path, out)?;
        } else if matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        ) {
            out.push(path);
        }
    }
    Ok(())
}

fn visit_key(location: &str) -> String {
    if is_remote(location) {
        return location.to_string();
    }
    std::fs::canonicalize(location)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| location.to_string())
}

async fn read_location(location: &str) -> Result<String> {
    if !is_remote(location) {
        return Ok(tokio::fs::read_to_string(location).await?);
    }

    tracing::info!(url = %location, "Fetching manifest");
    let response = reqwest::get(location)
        .await
        .map_err(|e| PackError::Other(format!("GET {}: {}", location, e)))?;
    if !response.status().is_success() {
        return Err(PackError::Other(format!(
            "GET {}: HTTP {}",
            location,
            response.status().as_u16()
        )));
    }
    response
        .text()
        .await
        .map_err(|e| PackError::Other(format!("GET {}: {}", location, e)))
}

/// Parse a document as either an index (`manifests:` key) or one manifest.
fn parse_document(document: &str, location: &str) -> Result<Vec<Manifest>> {
    let value: serde_yaml::Value = serde_yaml::from_str(document).map_err(|e| {
        PackError::Serialization(format!("{}: {}", location, e))
    })?;

    let Some(mapping) = value.as_mapping() else {
        tracing::warn!(location = %location, "Ignoring non-mapping manifest document");
        return Ok(Vec::new());
    };

    if let Some(entries) = mapping.get("manifests") {
        let entries: Vec<Manifest> = serde_yaml::from_value(entries.clone())
            .map_err(|e| PackError::Serialization(format!("{}: {}", location, e)))?;
        return Ok(entries);
    }

    let manifest: Manifest = serde_yaml::from_value(value)
        .map_err(|e| PackError::Serialization(format!("{}: {}", location, e)))?;
    Ok(vec![manifest])
}
