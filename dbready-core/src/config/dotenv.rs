//! `.env` file discovery and parsing.
//!
//! Shell expansion is not supported: any line that would need it (`${...}`
//! or `$(...)`) is skipped entirely rather than half-interpreted.

use crate::{Result, error::DbReadyError};
use std::path::{Path, PathBuf};

/// Directory, relative to the working directory, searched first.
const PIPELINE_DIR: &str = "etl";

/// File name looked up in each search location.
const DOTENV_FILE: &str = ".env";

/// Where to look for a `.env` file.
///
/// Search order: `<working_dir>/etl/.env`, `<project_root>/.env`,
/// `<working_dir>/.env`. The first existing file wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DotenvSearch {
    /// Directory the process runs in
    pub working_dir: PathBuf,
    /// Root of the project the pipeline belongs to
    pub project_root: PathBuf,
}

impl DotenvSearch {
    /// Builds a search rooted at the current working directory.
    ///
    /// The project root is found with [`find_project_root`].
    pub fn from_process() -> Self {
        let working_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let project_root = find_project_root(&working_dir);
        Self {
            working_dir,
            project_root,
        }
    }

    /// Creates a search where both roots are the given directory.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            working_dir: dir.clone(),
            project_root: dir,
        }
    }

    /// Candidate paths in search order.
    pub fn candidates(&self) -> [PathBuf; 3] {
        [
            self.working_dir.join(PIPELINE_DIR).join(DOTENV_FILE),
            self.project_root.join(DOTENV_FILE),
            self.working_dir.join(DOTENV_FILE),
        ]
    }

    /// Returns the first candidate that exists.
    pub fn locate(&self) -> Option<PathBuf> {
        self.candidates().into_iter().find(|path| path.is_file())
    }
}

/// Files or directories that mark the top of a project checkout.
const PROJECT_MARKERS: [&str; 5] = [
    ".git",
    "docker-compose.yml",
    "docker-compose.yaml",
    "compose.yml",
    "compose.yaml",
];

/// Nearest ancestor of `start` (itself included) holding a project marker,
/// or `start` when none does.
pub fn find_project_root(start: &Path) -> PathBuf {
    start
        .ancestors()
        .find(|dir| PROJECT_MARKERS.iter().any(|marker| dir.join(marker).exists()))
        .unwrap_or(start)
        .to_path_buf()
}

/// Parses `.env` content into key/value pairs, in file order.
///
/// - empty lines and lines starting with `#` are skipped
/// - lines containing `${` or `$(` are skipped
/// - an `export ` prefix on the key is tolerated
/// - one pair of matching surrounding quotes is stripped from the value
pub fn parse_dotenv(content: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();

    for raw_line in content.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if line.contains("${") || line.contains("$(") {
            tracing::debug!("Skipping .env line that requires shell expansion");
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };

        let key = key.trim();
        let key = key.strip_prefix("export ").map_or(key, str::trim);
        if key.is_empty() {
            continue;
        }

        pairs.push((key.to_string(), unquote(value.trim()).to_string()));
    }

    pairs
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Reads and parses a `.env` file.
///
/// # Errors
/// Returns an I/O error if the file cannot be read.
pub fn read_dotenv(path: &Path) -> Result<Vec<(String, String)>> {
    let content = std::fs::read_to_string(path).map_err(|e| DbReadyError::Io {
        context: format!("Failed to read env file {}", path.display()),
        source: e,
    })?;
    Ok(parse_dotenv(&content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_strips_quotes() {
        let pairs = parse_dotenv("FOO=\"bar\"\nBAZ='qux'\nPLAIN=value\n");
        assert_eq!(
            pairs,
            vec![
                ("FOO".to_string(), "bar".to_string()),
                ("BAZ".to_string(), "qux".to_string()),
                ("PLAIN".to_string(), "value".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_skips_substitution_lines() {
        let pairs = parse_dotenv("DB_URL=postgres://${DB_USER}@host/db\nNOW=$(date)\nKEEP=1\n");
        assert_eq!(pairs, vec![("KEEP".to_string(), "1".to_string())]);
    }

    #[test]
    fn test_parse_skips_comments_and_blank_lines() {
        let pairs = parse_dotenv("# comment\n\n   \n  # indented comment\nA=1\nnot a pair\n=orphan\n");
        assert_eq!(pairs, vec![("A".to_string(), "1".to_string())]);
    }

    #[test]
    fn test_parse_keeps_equals_in_value_and_export_prefix() {
        let pairs = parse_dotenv("export DB_PASSWORD = a=b=c\n");
        assert_eq!(
            pairs,
            vec![("DB_PASSWORD".to_string(), "a=b=c".to_string())]
        );
    }

    #[test]
    fn test_parse_leaves_unmatched_quotes() {
        let pairs = parse_dotenv("A=\"open\nB=\"\n");
        assert_eq!(
            pairs,
            vec![
                ("A".to_string(), "\"open".to_string()),
                ("B".to_string(), "\"".to_string()),
            ]
        );
    }

    #[test]
    fn test_locate_prefers_pipeline_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("etl")).unwrap();
        std::fs::write(dir.path().join("etl/.env"), "A=pipeline\n").unwrap();
        std::fs::write(dir.path().join(".env"), "A=root\n").unwrap();

        let search = DotenvSearch::in_dir(dir.path());
        assert_eq!(search.locate(), Some(dir.path().join("etl/.env")));
    }

    #[test]
    fn test_locate_falls_back_to_working_dir() {
        let project = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        std::fs::write(work.path().join(".env"), "A=cwd\n").unwrap();

        let search = DotenvSearch {
            working_dir: work.path().to_path_buf(),
            project_root: project.path().to_path_buf(),
        };
        assert_eq!(search.locate(), Some(work.path().join(".env")));
    }

    #[test]
    fn test_project_root_is_nearest_marked_ancestor() {
        let checkout = tempfile::tempdir().unwrap();
        std::fs::create_dir(checkout.path().join(".git")).unwrap();
        std::fs::write(checkout.path().join(".env"), "A=root\n").unwrap();
        let nested = checkout.path().join("services/loader");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_project_root(&nested), checkout.path());

        let search = DotenvSearch {
            project_root: find_project_root(&nested),
            working_dir: nested,
        };
        assert_eq!(search.locate(), Some(checkout.path().join(".env")));
    }

    #[test]
    fn test_project_root_from_compose_file() {
        let checkout = tempfile::tempdir().unwrap();
        std::fs::write(checkout.path().join("docker-compose.yml"), "services: {}\n").unwrap();
        let scripts = checkout.path().join("scripts");
        std::fs::create_dir(&scripts).unwrap();

        assert_eq!(find_project_root(&scripts), checkout.path());
        assert_eq!(find_project_root(checkout.path()), checkout.path());
    }

    #[test]
    fn test_project_root_defaults_to_start() {
        let dir = tempfile::tempdir().unwrap();
        let start = dir.path().join("unmarked");
        std::fs::create_dir(&start).unwrap();
        assert_eq!(find_project_root(&start), start);
    }

    #[test]
    fn test_locate_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(DotenvSearch::in_dir(dir.path()).locate(), None);
    }
}
