//! Entry filters.
//!
//! A [`Filter`] is a pure predicate over an [`Entry`] snapshot; it never
//! touches the filesystem. A [`FilterSet`] is an ordered list of filters
//! ANDed together: an entry passes the chain iff it passes every filter,
//! so the order never changes the outcome.

use std::collections::HashSet;
use std::path::{Path, MAIN_SEPARATOR};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::entry::{Entry, EntryKind};
use crate::error::BackupError;
use crate::walker;

/// Reduces `path` to an absolute, native-separator form with a trailing
/// separator, the canonical shape for exclusion prefixes.
pub fn normalize_dir_prefix(path: &Path) -> Result<String, BackupError> {
    let abs = walker::absolute(path)?;
    let mut s: String = abs
        .to_string_lossy()
        .chars()
        .map(|c| if c == '/' || c == '\\' { MAIN_SEPARATOR } else { c })
        .collect();
    if !s.ends_with(MAIN_SEPARATOR) {
        s.push(MAIN_SEPARATOR);
    }
    Ok(s)
}

/// One semantic filter. Empty state always means "pass everything".
#[derive(Debug, Clone)]
pub enum Filter {
    /// Rejects entries living at or under any of the normalized prefixes.
    PathExclude { prefixes: Vec<String> },
    /// Accepts only entries whose kind name is in the set.
    TypeInclude { kinds: HashSet<String> },
    /// Accepts entries whose size lies in `[min, max]`; a bound of 0 is
    /// "unset" and `(0, 0)` passes everything.
    SizeRange { min: u64, max: u64 },
    /// Regex patterns evaluated against the terminal name. Excludes win
    /// over includes; non-empty includes require at least one match.
    Name {
        include: Vec<Regex>,
        exclude: Vec<Regex>,
    },
    /// Accepts entries whose mtime falls inside the window, when set.
    TimeRange { range: Option<(u64, u64)> },
    /// Accepts regular files whose extension is in the set; other kinds
    /// pass untouched.
    ExtensionInclude { extensions: Vec<String> },
}

fn lower_ext(ext: &str) -> String {
    ext.trim_start_matches('.').to_ascii_lowercase()
}

fn file_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(pos) if pos + 1 < name.len() => &name[pos + 1..],
        _ => "",
    }
}

impl Filter {
    pub fn path_exclude<I, P>(paths: I) -> Result<Filter, BackupError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut filter = Filter::PathExclude { prefixes: Vec::new() };
        for p in paths {
            filter.add_excluded_path(p.as_ref())?;
        }
        Ok(filter)
    }

    pub fn type_include<I: IntoIterator<Item = EntryKind>>(kinds: I) -> Filter {
        Filter::TypeInclude {
            kinds: kinds.into_iter().map(|k| k.name().to_string()).collect(),
        }
    }

    pub fn size_range(min: u64, max: u64) -> Filter {
        Filter::SizeRange { min, max }
    }

    /// Compiles name patterns. Invalid patterns fail here, at registration,
    /// never at match time.
    pub fn name_patterns(
        include: &[String],
        exclude: &[String],
    ) -> Result<Filter, BackupError> {
        let compile = |patterns: &[String]| -> Result<Vec<Regex>, BackupError> {
            patterns
                .iter()
                .map(|p| {
                    Regex::new(p).map_err(|e| BackupError::InvalidRegex {
                        pattern: p.clone(),
                        source: e,
                    })
                })
                .collect()
        };
        Ok(Filter::Name {
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    pub fn time_range(start: u64, end: u64) -> Filter {
        Filter::TimeRange { range: Some((start, end)) }
    }

    pub fn extension_include<I, S>(extensions: I) -> Filter
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Vec::new();
        for ext in extensions {
            let e = lower_ext(ext.as_ref());
            if !list.contains(&e) {
                list.push(e);
            }
        }
        Filter::ExtensionInclude { extensions: list }
    }

    /// Adds a prefix to a `PathExclude`; other variants ignore the call.
    pub fn add_excluded_path(&mut self, path: &Path) -> Result<(), BackupError> {
        if let Filter::PathExclude { prefixes } = self {
            let normalized = normalize_dir_prefix(path)?;
            if !prefixes.contains(&normalized) {
                prefixes.push(normalized);
            }
        }
        Ok(())
    }

    /// Removes a prefix from a `PathExclude`. Removing an absent prefix is
    /// a no-op success.
    pub fn remove_excluded_path(&mut self, path: &Path) -> Result<(), BackupError> {
        if let Filter::PathExclude { prefixes } = self {
            let normalized = normalize_dir_prefix(path)?;
            prefixes.retain(|p| *p != normalized);
        }
        Ok(())
    }

    /// True iff `path` normalizes to a member of the exclusion set.
    pub fn is_excluded(&self, path: &Path) -> Result<bool, BackupError> {
        match self {
            Filter::PathExclude { prefixes } => {
                let normalized = normalize_dir_prefix(path)?;
                Ok(prefixes.contains(&normalized))
            }
            _ => Ok(false),
        }
    }

    /// Whether `entry` passes this filter.
    pub fn matches(&self, entry: &Entry) -> bool {
        match self {
            Filter::PathExclude { prefixes } => {
                if prefixes.is_empty() {
                    return true;
                }
                // Non-directories are judged by their parent directory.
                let check_path = if entry.is_dir() {
                    entry.path.clone()
                } else {
                    match entry.path.parent() {
                        Some(p) => p.to_path_buf(),
                        None => return true,
                    }
                };
                let check = match normalize_dir_prefix(&check_path) {
                    Ok(c) => c,
                    Err(_) => return true,
                };
                !prefixes.iter().any(|p| check.starts_with(p.as_str()))
            }
            Filter::TypeInclude { kinds } => {
                kinds.is_empty() || kinds.contains(entry.kind.name())
            }
            Filter::SizeRange { min, max } => {
                if *min > 0 && entry.size < *min {
                    return false;
                }
                if *max > 0 && entry.size > *max {
                    return false;
                }
                true
            }
            Filter::Name { include, exclude } => {
                if exclude.iter().any(|re| re.is_match(&entry.name)) {
                    return false;
                }
                if !include.is_empty() {
                    return include.iter().any(|re| re.is_match(&entry.name));
                }
                true
            }
            Filter::TimeRange { range } => match range {
                None => true,
                Some((start, end)) => entry.mtime >= *start && entry.mtime <= *end,
            },
            Filter::ExtensionInclude { extensions } => {
                if extensions.is_empty() || entry.kind != EntryKind::Regular {
                    return true;
                }
                let ext = lower_ext(file_extension(&entry.name));
                extensions.contains(&ext)
            }
        }
    }

    /// Human-readable summary, used by CLI logging.
    pub fn description(&self) -> String {
        match self {
            Filter::PathExclude { prefixes } => {
                format!("path filter: {} excluded prefix(es): {}", prefixes.len(), prefixes.join(", "))
            }
            Filter::TypeInclude { kinds } => {
                if kinds.is_empty() {
                    "type filter: all kinds".to_string()
                } else {
                    let mut names: Vec<_> = kinds.iter().cloned().collect();
                    names.sort();
                    format!("type filter: {}", names.join(", "))
                }
            }
            Filter::SizeRange { min, max } => {
                if *min == 0 && *max == 0 {
                    "size filter: unbounded".to_string()
                } else {
                    format!("size filter: {} .. {} bytes", min, max)
                }
            }
            Filter::Name { include, exclude } => format!(
                "name filter: {} include / {} exclude pattern(s)",
                include.len(),
                exclude.len()
            ),
            Filter::TimeRange { range } => match range {
                None => "time filter: unbounded".to_string(),
                Some((s, e)) => format!("time filter: mtime in [{}, {}]", s, e),
            },
            Filter::ExtensionInclude { extensions } => {
                if extensions.is_empty() {
                    "extension filter: all extensions".to_string()
                } else {
                    format!("extension filter: .{}", extensions.join(", ."))
                }
            }
        }
    }
}

/// Ordered AND-composition of filters.
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    filters: Vec<Filter>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, filter: Filter) {
        self.filters.push(filter);
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Filter> {
        self.filters.iter()
    }

    pub fn matches(&self, entry: &Entry) -> bool {
        self.filters.iter().all(|f| f.matches(entry))
    }
}

/// Declarative filter description, loadable from JSON config.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FilterSpec {
    pub exclude_paths: Vec<String>,
    pub include_types: Vec<String>,
    pub min_size: u64,
    pub max_size: u64,
    pub name_include: Vec<String>,
    pub name_exclude: Vec<String>,
    pub mtime_start: Option<u64>,
    pub mtime_end: Option<u64>,
    pub extensions: Vec<String>,
}

impl FilterSpec {
    pub fn is_empty(&self) -> bool {
        *self == FilterSpec::default()
    }

    /// Compiles the spec into a runtime filter chain. Pattern errors
    /// surface here.
    pub fn compile(&self) -> Result<FilterSet, BackupError> {
        let mut set = FilterSet::new();
        if !self.exclude_paths.is_empty() {
            set.push(Filter::path_exclude(self.exclude_paths.iter().map(Path::new))?);
        }
        if !self.include_types.is_empty() {
            set.push(Filter::TypeInclude {
                kinds: self.include_types.iter().cloned().collect(),
            });
        }
        if self.min_size > 0 || self.max_size > 0 {
            set.push(Filter::size_range(self.min_size, self.max_size));
        }
        if !self.name_include.is_empty() || !self.name_exclude.is_empty() {
            set.push(Filter::name_patterns(&self.name_include, &self.name_exclude)?);
        }
        if let (Some(start), Some(end)) = (self.mtime_start, self.mtime_end) {
            set.push(Filter::time_range(start, end));
        }
        if !self.extensions.is_empty() {
            set.push(Filter::extension_include(self.extensions.iter()));
        }
        Ok(set)
    }
}
