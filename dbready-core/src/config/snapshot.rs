//! Immutable snapshot of the configuration environment.

use super::dotenv::{DotenvSearch, read_dotenv};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Environment variables captured once at startup.
///
/// This is the only place the crate reads the process environment. Everything
/// downstream receives a snapshot, so the same inputs always produce the same
/// resolution and tests never need to mutate global state.
#[derive(Clone, Default)]
pub struct EnvSnapshot {
    vars: BTreeMap<String, String>,
    dotenv_source: Option<PathBuf>,
}

impl std::fmt::Debug for EnvSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Values may hold secrets; keys only.
        f.debug_struct("EnvSnapshot")
            .field("keys", &self.vars.keys().collect::<Vec<_>>())
            .field("dotenv_source", &self.dotenv_source)
            .finish()
    }
}

impl EnvSnapshot {
    /// Captures the current process environment.
    ///
    /// Variables whose name or value is not valid UTF-8 are ignored.
    pub fn from_process() -> Self {
        let vars = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();
        Self {
            vars,
            dotenv_source: None,
        }
    }

    /// Builds a snapshot from explicit pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            dotenv_source: None,
        }
    }

    /// Process environment merged with the first `.env` file found from the
    /// current working directory.
    pub fn load() -> Self {
        Self::load_with(&DotenvSearch::from_process())
    }

    /// Process environment merged with the first `.env` file of `search`.
    pub fn load_with(search: &DotenvSearch) -> Self {
        let mut snapshot = Self::from_process();
        snapshot.merge_dotenv(search);
        snapshot
    }

    /// Merges the first `.env` file of `search` into this snapshot.
    ///
    /// Returns the path that was loaded. Keys already present are kept.
    pub fn merge_dotenv(&mut self, search: &DotenvSearch) -> Option<PathBuf> {
        let Some(path) = search.locate() else {
            tracing::warn!("No .env file found");
            return None;
        };

        match read_dotenv(&path) {
            Ok(pairs) => {
                let added = self.merge_missing(pairs);
                tracing::info!(
                    "Environment loaded from {} ({} new variables)",
                    path.display(),
                    added
                );
                self.dotenv_source = Some(path.clone());
                Some(path)
            }
            Err(e) => {
                tracing::warn!("Failed to load env file: {}", e);
                None
            }
        }
    }

    /// Inserts pairs whose key is not yet present. Returns how many were added.
    pub fn merge_missing<I>(&mut self, pairs: I) -> usize
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut added = 0;
        for (key, value) in pairs {
            if self.vars.contains_key(&key) {
                continue;
            }
            tracing::debug!("Set environment variable from file: {}", key);
            self.vars.insert(key, value);
            added += 1;
        }
        added
    }

    /// Returns a non-empty value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    /// Returns the first non-empty value among `keys`.
    pub fn first_of(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|key| self.get(key))
    }

    /// Whether `key` is defined at all, even with an empty value.
    pub fn is_set(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// Path of the `.env` file merged into this snapshot, if any.
    pub fn dotenv_source(&self) -> Option<&Path> {
        self.dotenv_source.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_never_overwrites_existing_values() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".env"),
            "FOO=\"bar\"\nDB_HOST=from-file\nSKIP=${HOME}/x\n",
        )
        .unwrap();

        let mut snapshot = EnvSnapshot::from_pairs([("DB_HOST", "from-process")]);
        let loaded = snapshot.merge_dotenv(&DotenvSearch::in_dir(dir.path()));

        assert_eq!(loaded, Some(dir.path().join(".env")));
        assert_eq!(snapshot.get("FOO"), Some("bar"));
        assert_eq!(snapshot.get("DB_HOST"), Some("from-process"));
        assert!(!snapshot.is_set("SKIP"));
        assert_eq!(snapshot.dotenv_source(), Some(dir.path().join(".env").as_path()));
    }

    #[test]
    fn test_empty_values_count_as_absent() {
        let snapshot = EnvSnapshot::from_pairs([("DB_HOST", ""), ("POSTGRES_HOST", "pg")]);
        assert_eq!(snapshot.get("DB_HOST"), None);
        assert!(snapshot.is_set("DB_HOST"));
        assert_eq!(snapshot.first_of(&["DB_HOST", "POSTGRES_HOST"]), Some("pg"));
    }

    #[test]
    fn test_from_process_captures_variables() {
        temp_env::with_vars([("DBREADY_SNAPSHOT_PROBE", Some("42"))], || {
            let snapshot = EnvSnapshot::from_process();
            assert_eq!(snapshot.get("DBREADY_SNAPSHOT_PROBE"), Some("42"));
        });
    }

    #[test]
    fn test_debug_hides_values() {
        let snapshot = EnvSnapshot::from_pairs([("DB_PASSWORD", "hunter2")]);
        let debug = format!("{:?}", snapshot);
        assert!(debug.contains("DB_PASSWORD"));
        assert!(!debug.contains("hunter2"));
    }
}
