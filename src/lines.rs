//! Mapping lines: one spreadsheet column, where it goes, and how its values
//! are matched.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::mapping_path::{self, MappingPath, PathToken};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchBehavior {
    #[default]
    IgnoreNever,
    IgnoreAlways,
    IgnoreWhenBlank,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnOptions {
    #[serde(default)]
    pub match_behavior: MatchBehavior,
    #[serde(default = "ColumnOptions::default_null_allowed")]
    pub null_allowed: bool,
    #[serde(default)]
    pub default: Option<String>,
}

impl ColumnOptions {
    pub const fn default_null_allowed() -> bool {
        true
    }

    pub fn is_default(&self) -> bool {
        *self == ColumnOptions::default()
    }
}

impl Default for ColumnOptions {
    fn default() -> Self {
        Self {
            match_behavior: MatchBehavior::IgnoreNever,
            null_allowed: true,
            default: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingLine {
    pub header_name: String,
    pub mapping_path: MappingPath,
    #[serde(default)]
    pub column_options: ColumnOptions,
}

impl MappingLine {
    pub fn new(header_name: impl Into<String>, mapping_path: MappingPath) -> Self {
        Self {
            header_name: header_name.into(),
            mapping_path,
            column_options: ColumnOptions::default(),
        }
    }

    pub fn unmapped(header_name: impl Into<String>) -> Self {
        Self::new(header_name, MappingPath::unmapped())
    }

    pub fn with_options(mut self, column_options: ColumnOptions) -> Self {
        self.column_options = column_options;
        self
    }

    pub fn is_mapped(&self) -> bool {
        self.mapping_path.is_complete()
    }
}

/// A column attached to a position in the upload plan rather than to a
/// spreadsheet index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitMappingPath {
    pub header_name: String,
    pub mapping_path: MappingPath,
    pub column_options: ColumnOptions,
}

impl From<SplitMappingPath> for MappingLine {
    fn from(split: SplitMappingPath) -> Self {
        MappingLine {
            header_name: split.header_name,
            mapping_path: split.mapping_path,
            column_options: split.column_options,
        }
    }
}

impl From<&MappingLine> for SplitMappingPath {
    fn from(line: &MappingLine) -> Self {
        SplitMappingPath {
            header_name: line.header_name.clone(),
            mapping_path: line.mapping_path.clone(),
            column_options: line.column_options.clone(),
        }
    }
}

/// Lookup of tokens that other columns already use directly after a given
/// path prefix.
pub trait MappedFields {
    fn mapped_tokens(&self, prefix: &[PathToken]) -> Vec<PathToken>;

    /// Every complete path already claimed by other columns.
    fn mapped_paths(&self) -> Vec<MappingPath> {
        Vec::new()
    }
}

impl<F> MappedFields for F
where
    F: Fn(&[PathToken]) -> Vec<PathToken>,
{
    fn mapped_tokens(&self, prefix: &[PathToken]) -> Vec<PathToken> {
        self(prefix)
    }
}

/// Nothing is mapped yet.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMappedFields;

impl MappedFields for NoMappedFields {
    fn mapped_tokens(&self, _prefix: &[PathToken]) -> Vec<PathToken> {
        Vec::new()
    }
}

/// [`MappedFields`] backed by the current set of lines, optionally ignoring
/// the line being edited.
#[derive(Debug, Clone, Copy)]
pub struct MappedLines<'a> {
    lines: &'a [MappingLine],
    exclude: Option<usize>,
}

impl<'a> MappedLines<'a> {
    pub fn new(lines: &'a [MappingLine]) -> Self {
        Self {
            lines,
            exclude: None,
        }
    }

    pub fn excluding(lines: &'a [MappingLine], line: usize) -> Self {
        Self {
            lines,
            exclude: Some(line),
        }
    }

    fn others(&self) -> impl Iterator<Item = &'a MappingLine> + '_ {
        self.lines
            .iter()
            .enumerate()
            .filter(move |(index, _)| Some(*index) != self.exclude)
            .map(|(_, line)| line)
    }
}

impl MappedFields for MappedLines<'_> {
    fn mapped_tokens(&self, prefix: &[PathToken]) -> Vec<PathToken> {
        let mut tokens: Vec<PathToken> = Vec::new();
        for line in self.others() {
            if !line.mapping_path.starts_with(prefix) {
                continue;
            }
            if let Some(token) = line.mapping_path.get(prefix.len())
                && !token.is_empty()
                && !tokens.contains(token)
            {
                tokens.push(token.clone());
            }
        }
        tokens
    }

    fn mapped_paths(&self) -> Vec<MappingPath> {
        self.others()
            .filter(|line| line.is_mapped())
            .map(|line| line.mapping_path.clone())
            .collect()
    }
}

/// Re-attaches decoded columns to spreadsheet headers. Headers the plan does
/// not mention become unmapped lines; plan columns whose header is missing
/// are dropped.
pub fn lines_for_headers(headers: &[String], split_paths: Vec<SplitMappingPath>) -> Vec<MappingLine> {
    let mut remaining: Vec<Option<SplitMappingPath>> = split_paths.into_iter().map(Some).collect();
    let lines = headers
        .iter()
        .map(|header| {
            remaining
                .iter()
                .position(|slot| matches!(slot, Some(split) if split.header_name == *header))
                .and_then(|position| remaining[position].take())
                .map(MappingLine::from)
                .unwrap_or_else(|| MappingLine::unmapped(header.clone()))
        })
        .collect();

    for orphan in remaining.into_iter().flatten() {
        warn!(
            "Upload plan maps column '{}' to {} but the dataset has no such header",
            orphan.header_name, orphan.mapping_path
        );
    }
    lines
}

/// Unmaps every line [`mapping_path::find_duplicates`] flags and returns the
/// affected indices.
pub fn deduplicate(lines: &mut [MappingLine], focused: Option<usize>) -> Vec<usize> {
    let paths: Vec<MappingPath> = lines.iter().map(|line| line.mapping_path.clone()).collect();
    let flagged = mapping_path::find_duplicates(&paths, focused);
    for index in &flagged {
        lines[*index].mapping_path = MappingPath::unmapped();
    }
    flagged
}
