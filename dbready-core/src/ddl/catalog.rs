//! DDL source discovery, header directives and execution ordering.
//!
//! Each SQL file in the DDL directory becomes a [`DdlUnit`] identified by its
//! file stem. Ordering is declared in header comments:
//!
//! ```sql
//! -- dbready:order 0
//! -- dbready:after steam_ddl_api
//! -- dbready:supersedes steam_ddl, steam_file_dimensions_ddl
//! ```
//!
//! Superseded units are skipped when their successor is present. The rest run
//! in topological order of their `after` edges; among units whose
//! predecessors are done, explicitly ordered units come first (ascending key),
//! then the remainder by identifier.

use super::clean::clean_ddl;
use crate::Result;
use crate::error::DbReadyError;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Directive prefix recognized in header comments.
const DIRECTIVE_PREFIX: &str = "dbready:";

/// Platforms recognized in source identifiers, in match order.
const KNOWN_PLATFORMS: [&str; 6] = ["steam", "sony", "epic", "gog", "nintendo", "xbox"];

/// Platform assigned to sources that name none.
pub const GENERIC_PLATFORM: &str = "generic";

/// Pipeline layer a DDL source belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    L0,
    L1,
}

impl std::fmt::Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::L0 => "l0",
            Self::L1 => "l1",
        })
    }
}

/// A loaded DDL source with its ordering metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DdlUnit {
    pub id: String,
    /// File the unit was loaded from, when it came from disk
    pub path: Option<PathBuf>,
    /// Cleaned source text
    #[serde(skip)]
    pub text: String,
    pub order: Option<i64>,
    pub after: Vec<String>,
    pub supersedes: Vec<String>,
    pub platform: String,
    pub layer: Layer,
}

impl DdlUnit {
    /// Parses a unit from raw source text.
    ///
    /// # Errors
    /// Returns a DDL source error for malformed directives.
    pub fn parse(id: impl Into<String>, raw: &str) -> Result<Self> {
        let id = id.into();
        let text = clean_ddl(raw);

        let mut order = None;
        let mut after = Vec::new();
        let mut supersedes = Vec::new();

        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            // Directives live in the leading comment block only
            let Some(comment) = trimmed.strip_prefix("--") else {
                break;
            };
            let Some(directive) = comment.trim().strip_prefix(DIRECTIVE_PREFIX) else {
                continue;
            };

            let (name, value) = directive
                .split_once(char::is_whitespace)
                .map_or((directive, ""), |(n, v)| (n, v.trim()));

            match name {
                "order" => {
                    let key = value.parse::<i64>().map_err(|_| {
                        DbReadyError::ddl_source(&id, format!("invalid order key '{}'", value))
                    })?;
                    order = Some(key);
                }
                "after" => after.extend(parse_list(value)),
                "supersedes" => supersedes.extend(parse_list(value)),
                other => {
                    return Err(DbReadyError::ddl_source(
                        &id,
                        format!("unknown directive '{}'", other),
                    ));
                }
            }
        }

        if after.contains(&id) {
            return Err(DbReadyError::ddl_source(&id, "source cannot run after itself"));
        }

        Ok(Self {
            platform: infer_platform(&id).to_string(),
            layer: infer_layer(&id),
            id,
            path: None,
            text,
            order,
            after,
            supersedes,
        })
    }

    /// Reads and parses a unit from `path`, identified by its file stem.
    ///
    /// # Errors
    /// Returns an I/O error if the file cannot be read, or a DDL source
    /// error for malformed directives.
    pub fn load(path: &Path) -> Result<Self> {
        let id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| {
                DbReadyError::configuration(format!("Invalid DDL file name: {}", path.display()))
            })?
            .to_string();

        let raw = std::fs::read_to_string(path).map_err(|e| DbReadyError::Io {
            context: format!("Failed to load DDL file {}", path.display()),
            source: e,
        })?;

        let mut unit = Self::parse(id, &raw)?;
        unit.path = Some(path.to_path_buf());
        tracing::debug!("Loaded and cleaned DDL file: {}", path.display());
        Ok(unit)
    }

    fn sort_key(&self) -> (bool, i64, String) {
        (self.order.is_none(), self.order.unwrap_or(0), self.id.clone())
    }
}

fn parse_list(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Platform named in a source identifier, or `generic`.
pub fn infer_platform(id: &str) -> &'static str {
    KNOWN_PLATFORMS
        .into_iter()
        .find(|platform| id.contains(platform))
        .unwrap_or(GENERIC_PLATFORM)
}

fn infer_layer(id: &str) -> Layer {
    if id.contains("l1") { Layer::L1 } else { Layer::L0 }
}

/// Whether a file name matches `*ddl*.sql`, `l0_*.sql` or `l1_*.sql`.
fn is_ddl_file_name(name: &str) -> bool {
    let Some(stem) = name.strip_suffix(".sql") else {
        return false;
    };
    stem.contains("ddl") || name.starts_with("l0_") || name.starts_with("l1_")
}

/// All DDL units of a source, keyed and cached by identifier.
#[derive(Debug, Clone)]
pub struct DdlCatalog {
    dir: Option<PathBuf>,
    units: BTreeMap<String, DdlUnit>,
}

impl DdlCatalog {
    /// Loads every DDL file in `dir`.
    ///
    /// # Errors
    /// Returns a configuration error if the directory is missing or holds no
    /// DDL files, and a DDL source error for malformed directives or
    /// dependency cycles.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(DbReadyError::configuration(format!(
                "DDL directory not found: {}",
                dir.display()
            )));
        }

        let entries = std::fs::read_dir(dir).map_err(|e| DbReadyError::Io {
            context: format!("Failed to read DDL directory {}", dir.display()),
            source: e,
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| DbReadyError::Io {
                context: format!("Failed to read DDL directory {}", dir.display()),
                source: e,
            })?;
            let path = entry.path();
            let matches = path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(is_ddl_file_name);
            if matches {
                paths.push(path);
            }
        }
        paths.sort();

        if paths.is_empty() {
            return Err(DbReadyError::configuration(format!(
                "No DDL files found in {}",
                dir.display()
            )));
        }

        let units = paths
            .iter()
            .map(|path| DdlUnit::load(path))
            .collect::<Result<Vec<_>>>()?;

        let mut catalog = Self::from_units(units)?;
        catalog.dir = Some(dir.to_path_buf());
        tracing::info!(
            "Found DDL files in {}: {:?}",
            dir.display(),
            catalog.units.keys().collect::<Vec<_>>()
        );
        Ok(catalog)
    }

    /// Builds a catalog from already parsed units.
    ///
    /// # Errors
    /// Returns a DDL source error for duplicate identifiers or dependency
    /// cycles.
    pub fn from_units(units: impl IntoIterator<Item = DdlUnit>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for unit in units {
            if map.contains_key(&unit.id) {
                return Err(DbReadyError::ddl_source(&unit.id, "duplicate source identifier"));
            }
            map.insert(unit.id.clone(), unit);
        }

        let catalog = Self {
            dir: None,
            units: map,
        };
        // Surface cycles before anything touches the database
        catalog.execution_plan()?;
        Ok(catalog)
    }

    /// Directory the catalog was loaded from.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn get(&self, id: &str) -> Option<&DdlUnit> {
        self.units.get(id)
    }

    pub fn units(&self) -> impl Iterator<Item = &DdlUnit> {
        self.units.values()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Identifiers superseded by a unit present in the catalog.
    pub fn superseded(&self) -> BTreeSet<&str> {
        self.units
            .values()
            .flat_map(|unit| unit.supersedes.iter())
            .filter(|id| self.units.contains_key(id.as_str()))
            .map(String::as_str)
            .collect()
    }

    /// Every active unit, in execution order.
    ///
    /// # Errors
    /// Returns a DDL source error if the `after` edges form a cycle.
    pub fn execution_plan(&self) -> Result<Vec<&DdlUnit>> {
        let superseded = self.superseded();
        let selected: BTreeSet<&str> = self
            .units
            .keys()
            .map(String::as_str)
            .filter(|id| !superseded.contains(id))
            .collect();
        self.order(&selected)
    }

    /// Units for `platforms` plus generic units and everything they must run
    /// after, in execution order.
    ///
    /// # Errors
    /// Returns a DDL source error if the `after` edges form a cycle.
    pub fn plan_for_platforms(&self, platforms: &[String]) -> Result<Vec<&DdlUnit>> {
        let superseded = self.superseded();
        let active = |id: &str| self.units.contains_key(id) && !superseded.contains(id);

        let mut selected: BTreeSet<&str> = self
            .units
            .values()
            .filter(|unit| active(unit.id.as_str()))
            .filter(|unit| {
                unit.platform == GENERIC_PLATFORM || platforms.iter().any(|p| *p == unit.platform)
            })
            .map(|unit| unit.id.as_str())
            .collect();

        // Predecessor closure
        let mut pending: Vec<&str> = selected.iter().copied().collect();
        while let Some(id) = pending.pop() {
            let Some(unit) = self.units.get(id) else {
                continue;
            };
            for pred in &unit.after {
                if active(pred.as_str()) && selected.insert(pred.as_str()) {
                    pending.push(pred.as_str());
                }
            }
        }

        self.order(&selected)
    }

    /// Kahn's algorithm over `selected`, ready set ordered by sort key.
    fn order(&self, selected: &BTreeSet<&str>) -> Result<Vec<&DdlUnit>> {
        let mut indegree: BTreeMap<&str, usize> = selected.iter().map(|id| (*id, 0)).collect();
        let mut successors: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

        for id in selected {
            let Some(unit) = self.units.get(*id) else {
                continue;
            };
            for pred in &unit.after {
                if selected.contains(pred.as_str()) {
                    successors.entry(pred.as_str()).or_default().push(*id);
                    *indegree.entry(*id).or_default() += 1;
                } else if !self.units.contains_key(pred) {
                    tracing::warn!(
                        "{} declares unknown predecessor {}; treating it as satisfied",
                        unit.id,
                        pred
                    );
                }
            }
        }

        let mut ready: BTreeSet<(bool, i64, String)> = indegree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .filter_map(|(id, _)| self.units.get(*id).map(DdlUnit::sort_key))
            .collect();

        let mut plan = Vec::with_capacity(selected.len());
        while let Some(key) = ready.pop_first() {
            let Some(unit) = self.units.get(&key.2) else {
                continue;
            };
            plan.push(unit);

            for next in successors.get(unit.id.as_str()).into_iter().flatten() {
                if let Some(degree) = indegree.get_mut(next) {
                    *degree -= 1;
                    if *degree == 0
                        && let Some(next_unit) = self.units.get(*next)
                    {
                        ready.insert(next_unit.sort_key());
                    }
                }
            }
        }

        if plan.len() < selected.len() {
            let stuck: Vec<&str> = indegree
                .iter()
                .filter(|(_, degree)| **degree > 0)
                .map(|(id, _)| *id)
                .collect();
            return Err(DbReadyError::ddl_source(
                stuck.join(", "),
                "dependency cycle detected",
            ));
        }

        Ok(plan)
    }
}
