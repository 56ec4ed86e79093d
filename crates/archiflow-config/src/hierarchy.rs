// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use serde_json::Value;
use tracing::debug;

/// Directory holding a layer's config files.
const CONFIG_DIR: &str = ".archiflow";
const SETTINGS_FILE: &str = "settings.json";
const SETTINGS_LOCAL_FILE: &str = "settings.local.json";
const CONTEXT_FILE: &str = "ARCHIFLOW.md";
const CONTEXT_LOCAL_FILE: &str = "ARCHIFLOW.local.md";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Immutable view of the merged configuration with source provenance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigSnapshot {
    /// Deep-merged settings object (maps merge, scalars/arrays replace).
    pub settings: Value,
    /// Context markdown, concatenated lowest to highest precedence.
    pub context: String,
    /// Every file that contributed, in merge order.
    pub sources: Vec<PathBuf>,
}

impl ConfigSnapshot {
    /// Look up a setting by dot-separated path, e.g. `autoRefinement.threshold`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = &self.settings;
        for key in path.split('.') {
            current = current.as_object()?.get(key)?;
        }
        Some(current)
    }

    pub fn has_context(&self) -> bool {
        !self.context.trim().is_empty()
    }
}

/// A settings or context file the hierarchy knows about.  Missing files stay
/// in the list so that their later appearance (or disappearance) changes the
/// cache fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceKind {
    Settings,
    Context,
}

/// Per-path mtime fingerprint; `None` means the file does not exist.
type Fingerprint = Vec<Option<SystemTime>>;

struct CacheEntry {
    fingerprint: Fingerprint,
    snapshot: Arc<ConfigSnapshot>,
}

/// Layered configuration: global user directory, project directory, and
/// project-local overrides, merged in that order (later layers win).
///
/// Built-in framework defaults are *not* applied here; consumers fold in
/// their own defaults (and environment fallbacks) after consulting the
/// snapshot.
pub struct ConfigHierarchy {
    working_dir: PathBuf,
    global_dir: Option<PathBuf>,
    cache: Mutex<Option<CacheEntry>>,
}

impl ConfigHierarchy {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            global_dir: dirs::home_dir().map(|home| home.join(CONFIG_DIR)),
            cache: Mutex::new(None),
        }
    }

    /// Replace the global layer directory (tests point this at a tempdir so
    /// they never touch the real home directory).
    pub fn with_global_dir(mut self, global_dir: impl Into<PathBuf>) -> Self {
        self.global_dir = Some(global_dir.into());
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// All files this hierarchy would consult, lowest to highest precedence.
    fn known_paths(&self) -> Vec<(PathBuf, SourceKind)> {
        let project_dir = self.working_dir.join(CONFIG_DIR);
        let mut paths = Vec::new();
        if let Some(global) = &self.global_dir {
            paths.push((global.join(SETTINGS_FILE), SourceKind::Settings));
            paths.push((global.join(CONTEXT_FILE), SourceKind::Context));
        }
        paths.push((project_dir.join(SETTINGS_FILE), SourceKind::Settings));
        paths.push((project_dir.join(CONTEXT_FILE), SourceKind::Context));
        paths.push((project_dir.join(SETTINGS_LOCAL_FILE), SourceKind::Settings));
        paths.push((project_dir.join(CONTEXT_LOCAL_FILE), SourceKind::Context));
        paths
    }

    fn fingerprint(&self) -> Fingerprint {
        self.known_paths()
            .iter()
            .map(|(path, _)| path.metadata().and_then(|m| m.modified()).ok())
            .collect()
    }

    /// Merged snapshot, cached until any source file's mtime fingerprint
    /// changes (including appearance and deletion of files).
    pub fn load(&self) -> Result<Arc<ConfigSnapshot>, ConfigError> {
        self.load_with(false)
    }

    /// `load` with the cache bypassed.
    pub fn reload(&self) -> Result<Arc<ConfigSnapshot>, ConfigError> {
        self.load_with(true)
    }

    pub fn clear_cache(&self) {
        *self.cache.lock().unwrap() = None;
    }

    fn load_with(&self, force_reload: bool) -> Result<Arc<ConfigSnapshot>, ConfigError> {
        let fingerprint = self.fingerprint();
        if !force_reload {
            let cache = self.cache.lock().unwrap();
            if let Some(entry) = cache.as_ref() {
                if entry.fingerprint == fingerprint {
                    return Ok(Arc::clone(&entry.snapshot));
                }
            }
        }

        let snapshot = Arc::new(self.read_all()?);
        *self.cache.lock().unwrap() = Some(CacheEntry {
            fingerprint,
            snapshot: Arc::clone(&snapshot),
        });
        Ok(snapshot)
    }

    fn read_all(&self) -> Result<ConfigSnapshot, ConfigError> {
        let mut settings = Value::Object(serde_json::Map::new());
        let mut context_parts: Vec<String> = Vec::new();
        let mut sources = Vec::new();

        for (path, kind) in self.known_paths() {
            if !path.is_file() {
                continue;
            }
            debug!(path = %path.display(), "loading config layer");
            let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            match kind {
                SourceKind::Settings => {
                    let layer: Value =
                        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                            path: path.clone(),
                            source,
                        })?;
                    merge_json(&mut settings, layer);
                }
                SourceKind::Context => {
                    let trimmed = text.trim_end();
                    if !trimmed.is_empty() {
                        context_parts.push(trimmed.to_string());
                    }
                }
            }
            sources.push(path);
        }

        Ok(ConfigSnapshot {
            settings,
            context: context_parts.join("\n\n"),
            sources,
        })
    }
}

/// Deep-merge `src` into `dst`: maps merge recursively, scalars and arrays
/// from `src` replace.
fn merge_json(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Object(d), Value::Object(s)) => {
            for (key, value) in s {
                match d.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        d.insert(key, value);
                    }
                }
            }
        }
        (dst, src) => *dst = src,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    struct Layout {
        _tmp: tempfile::TempDir,
        workdir: PathBuf,
        global: PathBuf,
    }

    fn layout() -> Layout {
        let tmp = tempfile::tempdir().unwrap();
        let workdir = tmp.path().join("project");
        let global = tmp.path().join("home/.archiflow");
        fs::create_dir_all(workdir.join(".archiflow")).unwrap();
        fs::create_dir_all(&global).unwrap();
        Layout {
            _tmp: tmp,
            workdir,
            global,
        }
    }

    fn hierarchy(layout: &Layout) -> ConfigHierarchy {
        ConfigHierarchy::new(&layout.workdir).with_global_dir(&layout.global)
    }

    fn write(path: &Path, content: &str) {
        fs::write(path, content).unwrap();
    }

    #[test]
    fn empty_layout_yields_empty_snapshot() {
        let l = layout();
        let snap = hierarchy(&l).load().unwrap();
        assert_eq!(snap.settings, json!({}));
        assert_eq!(snap.context, "");
        assert!(snap.sources.is_empty());
    }

    #[test]
    fn project_settings_are_loaded() {
        let l = layout();
        write(
            &l.workdir.join(".archiflow/settings.json"),
            r#"{"agent": {"defaultModel": "test-model"}}"#,
        );
        let snap = hierarchy(&l).load().unwrap();
        assert_eq!(
            snap.get("agent.defaultModel").and_then(Value::as_str),
            Some("test-model")
        );
        assert_eq!(snap.sources.len(), 1);
    }

    #[test]
    fn project_local_wins_over_project() {
        let l = layout();
        write(
            &l.workdir.join(".archiflow/settings.json"),
            r#"{"autoRefinement": {"enabled": false, "threshold": 7}}"#,
        );
        write(
            &l.workdir.join(".archiflow/settings.local.json"),
            r#"{"autoRefinement": {"enabled": true}}"#,
        );
        let snap = hierarchy(&l).load().unwrap();
        // Local overrides the scalar it names...
        assert_eq!(
            snap.get("autoRefinement.enabled").and_then(Value::as_bool),
            Some(true)
        );
        // ...and deep-merge keeps the sibling.
        assert_eq!(
            snap.get("autoRefinement.threshold").and_then(Value::as_f64),
            Some(7.0)
        );
    }

    #[test]
    fn project_wins_over_global() {
        let l = layout();
        write(&l.global.join("settings.json"), r#"{"a": 1, "b": 1}"#);
        write(&l.workdir.join(".archiflow/settings.json"), r#"{"b": 2}"#);
        let snap = hierarchy(&l).load().unwrap();
        assert_eq!(snap.get("a").and_then(Value::as_i64), Some(1));
        assert_eq!(snap.get("b").and_then(Value::as_i64), Some(2));
    }

    #[test]
    fn arrays_replace_rather_than_merge() {
        let l = layout();
        write(&l.workdir.join(".archiflow/settings.json"), r#"{"x": [1, 2, 3]}"#);
        write(
            &l.workdir.join(".archiflow/settings.local.json"),
            r#"{"x": [9]}"#,
        );
        let snap = hierarchy(&l).load().unwrap();
        assert_eq!(snap.get("x").unwrap(), &json!([9]));
    }

    #[test]
    fn context_concatenates_in_order_with_blank_lines() {
        let l = layout();
        write(&l.global.join("ARCHIFLOW.md"), "# Global\n");
        write(&l.workdir.join(".archiflow/ARCHIFLOW.md"), "# Project\n");
        write(
            &l.workdir.join(".archiflow/ARCHIFLOW.local.md"),
            "# Local\n",
        );
        let snap = hierarchy(&l).load().unwrap();
        assert_eq!(snap.context, "# Global\n\n# Project\n\n# Local");
        assert_eq!(snap.sources.len(), 3);
        assert!(snap.has_context());
    }

    #[test]
    fn malformed_settings_fail_loudly_with_path() {
        let l = layout();
        let path = l.workdir.join(".archiflow/settings.json");
        write(&path, "{not json");
        let err = hierarchy(&l).load().unwrap_err();
        assert!(err.to_string().contains("settings.json"), "{err}");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn load_is_cached_until_a_file_changes() {
        let l = layout();
        let path = l.workdir.join(".archiflow/settings.json");
        write(&path, r#"{"v": 1}"#);
        let h = hierarchy(&l);

        let first = h.load().unwrap();
        let second = h.load().unwrap();
        assert!(Arc::ptr_eq(&first, &second), "second load must hit the cache");

        // Rewrite with a bumped mtime; the next load must observe the change.
        write(&path, r#"{"v": 2}"#);
        let f = fs::File::options().write(true).open(&path).unwrap();
        f.set_modified(SystemTime::now() + Duration::from_secs(5))
            .unwrap();

        let third = h.load().unwrap();
        assert_eq!(third.get("v").and_then(Value::as_i64), Some(2));
    }

    #[test]
    fn deleting_a_file_invalidates_the_cache() {
        let l = layout();
        let local = l.workdir.join(".archiflow/settings.local.json");
        write(&l.workdir.join(".archiflow/settings.json"), r#"{"k": "base"}"#);
        write(&local, r#"{"k": "override"}"#);
        let h = hierarchy(&l);
        assert_eq!(
            h.load().unwrap().get("k").and_then(Value::as_str),
            Some("override")
        );

        fs::remove_file(&local).unwrap();
        assert_eq!(
            h.load().unwrap().get("k").and_then(Value::as_str),
            Some("base")
        );
    }

    #[test]
    fn reload_bypasses_cache() {
        let l = layout();
        let h = hierarchy(&l);
        let first = h.load().unwrap();
        let second = h.reload().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(*first, *second);
    }

    #[test]
    fn clear_cache_forces_fresh_snapshot() {
        let l = layout();
        let h = hierarchy(&l);
        let first = h.load().unwrap();
        h.clear_cache();
        let second = h.load().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn dot_path_lookup_misses_return_none() {
        let l = layout();
        write(&l.workdir.join(".archiflow/settings.json"), r#"{"a": {"b": 1}}"#);
        let snap = hierarchy(&l).load().unwrap();
        assert!(snap.get("a.b.c").is_none());
        assert!(snap.get("missing").is_none());
    }
}
