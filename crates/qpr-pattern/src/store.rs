// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pattern Loader (spec §4.5): reads a directory of pattern files, validates
//! each against the populated Capability Registry, and builds the `by_id`
//! and router indexes. Reloads swap the whole snapshot atomically; a failed
//! reload leaves the previous snapshot untouched.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use qpr_capability::CapabilityRegistry;
use qpr_core::content_hash;
use qpr_router::RouteEntry;
use thiserror::Error;

use crate::types::Pattern;
use crate::validate::{validate, ValidationError};

/// Errors that can occur while loading or reloading the pattern directory.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The directory could not be read.
    #[error("failed to read pattern directory {path}: {source}")]
    Directory {
        /// Path that failed to read.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// A pattern file failed to parse as JSON.
    #[error("failed to parse pattern file {path}: {source}")]
    Parse {
        /// Path of the offending file.
        path: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
    /// A pattern failed schema validation.
    #[error("pattern validation failed: {0:?}")]
    Validation(Vec<ValidationError>),
    /// Two pattern files declared the same `id`.
    #[error("duplicate pattern id '{0}'")]
    DuplicateId(String),
}

/// A loaded pattern plus its derived metadata.
#[derive(Clone)]
pub struct LoadedPattern {
    /// The parsed document.
    pub pattern: Arc<Pattern>,
    /// Content hash of the canonical serialization, used for fingerprints
    /// and for detecting pattern edits across reloads.
    pub content_hash: String,
}

struct Snapshot {
    by_id: HashMap<String, LoadedPattern>,
    route_index: Vec<RouteEntry>,
}

/// Process-wide, reloadable pattern index (spec §5 "Pattern index
/// (read-mostly, reloadable): access through a snapshot pointer swapped
/// atomically").
pub struct PatternStore {
    snapshot: Mutex<Arc<Snapshot>>,
}

impl PatternStore {
    /// Load patterns from `dir` for the first time.
    pub fn load(dir: &Path, registry: &CapabilityRegistry) -> Result<Self, LoadError> {
        let snapshot = build_snapshot(dir, registry)?;
        Ok(Self {
            snapshot: Mutex::new(Arc::new(snapshot)),
        })
    }

    /// Reload patterns from `dir`. On success, the new snapshot replaces the
    /// old one atomically. On failure, the previous snapshot is left
    /// intact and the error is returned (spec §4.5 "reloadable").
    pub fn reload(&self, dir: &Path, registry: &CapabilityRegistry) -> Result<(), LoadError> {
        let snapshot = build_snapshot(dir, registry)?;
        let mut guard = self.snapshot.lock().expect("pattern snapshot mutex poisoned");
        *guard = Arc::new(snapshot);
        Ok(())
    }

    /// Look up a pattern by id.
    pub fn by_id(&self, id: &str) -> Option<LoadedPattern> {
        let guard = self.snapshot.lock().expect("pattern snapshot mutex poisoned");
        guard.by_id.get(id).cloned()
    }

    /// All loaded pattern ids, sorted.
    pub fn list_ids(&self) -> Vec<String> {
        let guard = self.snapshot.lock().expect("pattern snapshot mutex poisoned");
        let mut ids: Vec<String> = guard.by_id.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// A snapshot of the router index, suitable for a [`qpr_router`] matcher
    /// call. Cloned out from under the lock so callers don't hold it.
    pub fn route_index(&self) -> Vec<RouteEntry> {
        let guard = self.snapshot.lock().expect("pattern snapshot mutex poisoned");
        guard.route_index.clone()
    }

    /// Number of loaded patterns.
    pub fn len(&self) -> usize {
        let guard = self.snapshot.lock().expect("pattern snapshot mutex poisoned");
        guard.by_id.len()
    }

    /// `true` if no patterns are loaded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn build_snapshot(dir: &Path, registry: &CapabilityRegistry) -> Result<Snapshot, LoadError> {
    let entries = fs::read_dir(dir).map_err(|source| LoadError::Directory {
        path: dir.display().to_string(),
        source,
    })?;

    let mut by_id = HashMap::new();
    let mut route_index = Vec::new();

    let mut paths: Vec<_> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect();
    paths.sort();

    for path in paths {
        let raw = fs::read_to_string(&path).map_err(|source| LoadError::Directory {
            path: path.display().to_string(),
            source,
        })?;
        let pattern: Pattern = serde_json::from_str(&raw).map_err(|source| LoadError::Parse {
            path: path.display().to_string(),
            source,
        })?;

        validate(&pattern, registry).map_err(LoadError::Validation)?;

        if by_id.contains_key(&pattern.id) {
            return Err(LoadError::DuplicateId(pattern.id.clone()));
        }

        let hash = content_hash(&pattern).expect("Pattern always serializes to JSON");

        let tags: BTreeSet<String> = pattern.tags.iter().cloned().collect();
        let categories: BTreeSet<String> = pattern.category.iter().cloned().collect();
        route_index.push(RouteEntry {
            pattern_id: pattern.id.clone(),
            tags,
            categories,
            description: pattern.description.clone(),
            embedding: None,
        });

        by_id.insert(
            pattern.id.clone(),
            LoadedPattern {
                pattern: Arc::new(pattern),
                content_hash: hash,
            },
        );
    }

    Ok(Snapshot { by_id, route_index })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use qpr_core::{RequestContext, Value};
    use qpr_error::RuntimeError;
    use tempfile::tempdir;

    struct EchoAgent;

    #[async_trait]
    impl qpr_capability::Agent for EchoAgent {
        fn name(&self) -> &str {
            "EchoAgent"
        }
        fn capabilities(&self) -> Vec<String> {
            vec!["test.echo".to_string()]
        }
        async fn invoke(&self, _c: &str, _ctx: &RequestContext, args: &Value) -> Result<Value, RuntimeError> {
            Ok(args.clone())
        }
    }

    fn registry() -> CapabilityRegistry {
        let mut r = CapabilityRegistry::new();
        r.register(Arc::new(EchoAgent)).unwrap();
        r
    }

    const ECHO_ONCE: &str = r#"{
        "id": "echo_once",
        "version": "1.0.0",
        "description": "echoes one value",
        "tags": ["echo"],
        "inputs": [{"name": "x", "type": "string", "required": true}],
        "outputs": {"result": "{{s1.v}}"},
        "steps": [
            {"name": "s1", "capability": "test.echo", "args": {"x": "{{inputs.x}}"}}
        ]
    }"#;

    #[test]
    fn loads_valid_pattern_directory() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("echo_once.json"), ECHO_ONCE).unwrap();
        let store = PatternStore::load(dir.path(), &registry()).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.by_id("echo_once").is_some());
        assert_eq!(store.list_ids(), vec!["echo_once".to_string()]);
    }

    #[test]
    fn reload_failure_preserves_previous_snapshot() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("echo_once.json"), ECHO_ONCE).unwrap();
        let store = PatternStore::load(dir.path(), &registry()).unwrap();

        fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        let err = store.reload(dir.path(), &registry());
        assert!(err.is_err());
        assert_eq!(store.len(), 1);
        assert!(store.by_id("echo_once").is_some());
    }

    #[test]
    fn reload_success_swaps_snapshot() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("echo_once.json"), ECHO_ONCE).unwrap();
        let store = PatternStore::load(dir.path(), &registry()).unwrap();

        let second = ECHO_ONCE.replace("echo_once", "echo_twice");
        fs::remove_file(dir.path().join("echo_once.json")).unwrap();
        fs::write(dir.path().join("echo_twice.json"), &second).unwrap();
        store.reload(dir.path(), &registry()).unwrap();

        assert_eq!(store.list_ids(), vec!["echo_twice".to_string()]);
        assert!(store.by_id("echo_once").is_none());
    }

    #[test]
    fn duplicate_id_across_files_is_rejected() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.json"), ECHO_ONCE).unwrap();
        fs::write(dir.path().join("b.json"), ECHO_ONCE).unwrap();
        let err = PatternStore::load(dir.path(), &registry()).unwrap_err();
        assert!(matches!(err, LoadError::DuplicateId(_)));
    }

    #[test]
    fn route_index_reflects_tags_and_description() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("echo_once.json"), ECHO_ONCE).unwrap();
        let store = PatternStore::load(dir.path(), &registry()).unwrap();
        let index = store.route_index();
        assert_eq!(index.len(), 1);
        assert!(index[0].tags.contains("echo"));
    }
}
