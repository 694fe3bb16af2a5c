//! Mapping paths: the token model, the string codec, and the pure helpers
//! used to compare, deduplicate, and renumber paths.
//!
//! A path is an ordered list of [`PathToken`]s leading from a base table to a
//! column's destination. Paths are value types: every helper here returns a
//! new path and never mutates its input.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
    hash::{Hash, Hasher},
    str::FromStr,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const PATH_SEPARATOR: char = '.';
pub const EMPTY_TOKEN: &str = "0";
pub const TO_MANY_PREFIX: char = '#';
pub const TREE_RANK_PREFIX: char = '$';
pub const ANY_RANK_TOKEN: &str = "$-any";
pub const FORMATTED_FIELD: &str = "_formatted";

/// One step of a mapping path.
#[derive(Debug, Clone)]
pub enum PathToken {
    /// The path is not finished yet.
    Empty,
    /// A literal field or relationship name.
    Field(String),
    /// 1-based position inside a to-many relationship group.
    ToMany(usize),
    /// A named rank of a tree table.
    Rank(String),
    /// Wildcard standing for every rank of a tree table.
    AnyRank,
}

impl PathToken {
    pub fn field(name: impl Into<String>) -> Self {
        PathToken::Field(name.into())
    }

    pub fn rank(name: impl Into<String>) -> Self {
        PathToken::Rank(name.into())
    }

    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed == EMPTY_TOKEN {
            return PathToken::Empty;
        }
        if trimmed.eq_ignore_ascii_case(ANY_RANK_TOKEN) {
            return PathToken::AnyRank;
        }
        if let Some(index) = trimmed.strip_prefix(TO_MANY_PREFIX)
            && let Ok(index) = index.parse::<usize>()
            && index > 0
        {
            return PathToken::ToMany(index);
        }
        if let Some(rank) = trimmed.strip_prefix(TREE_RANK_PREFIX)
            && !rank.is_empty()
        {
            return PathToken::Rank(rank.to_string());
        }
        PathToken::Field(trimmed.to_string())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, PathToken::Empty)
    }

    pub fn is_to_many(&self) -> bool {
        matches!(self, PathToken::ToMany(_))
    }

    pub fn is_rank(&self) -> bool {
        matches!(self, PathToken::Rank(_) | PathToken::AnyRank)
    }

    pub fn is_formatted(&self) -> bool {
        matches!(self, PathToken::Field(name) if name.eq_ignore_ascii_case(FORMATTED_FIELD))
    }

    pub fn to_many_index(&self) -> Option<usize> {
        match self {
            PathToken::ToMany(index) => Some(*index),
            _ => None,
        }
    }

    pub fn field_name(&self) -> Option<&str> {
        match self {
            PathToken::Field(name) => Some(name),
            _ => None,
        }
    }

    pub fn rank_name(&self) -> Option<&str> {
        match self {
            PathToken::Rank(name) => Some(name),
            _ => None,
        }
    }

    fn key_bytes(&self) -> (u8, Option<&str>, usize) {
        match self {
            PathToken::Empty => (0, None, 0),
            PathToken::Field(name) => (1, Some(name), 0),
            PathToken::ToMany(index) => (2, None, *index),
            PathToken::Rank(name) => (3, Some(name), 0),
            PathToken::AnyRank => (4, None, 0),
        }
    }
}

impl PartialEq for PathToken {
    fn eq(&self, other: &Self) -> bool {
        let (left_kind, left_name, left_index) = self.key_bytes();
        let (right_kind, right_name, right_index) = other.key_bytes();
        left_kind == right_kind
            && left_index == right_index
            && match (left_name, right_name) {
                (Some(left), Some(right)) => left.eq_ignore_ascii_case(right),
                (None, None) => true,
                _ => false,
            }
    }
}

impl Eq for PathToken {}

impl Hash for PathToken {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let (kind, name, index) = self.key_bytes();
        kind.hash(state);
        index.hash(state);
        if let Some(name) = name {
            for byte in name.bytes() {
                byte.to_ascii_lowercase().hash(state);
            }
        }
    }
}

impl fmt::Display for PathToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathToken::Empty => f.write_str(EMPTY_TOKEN),
            PathToken::Field(name) => f.write_str(name),
            PathToken::ToMany(index) => write!(f, "{TO_MANY_PREFIX}{index}"),
            PathToken::Rank(name) => write!(f, "{TREE_RANK_PREFIX}{name}"),
            PathToken::AnyRank => f.write_str(ANY_RANK_TOKEN),
        }
    }
}

impl From<&str> for PathToken {
    fn from(value: &str) -> Self {
        PathToken::parse(value)
    }
}

/// Ordered token sequence locating a column within the schema graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MappingPath(Vec<PathToken>);

impl MappingPath {
    pub fn new(tokens: Vec<PathToken>) -> Self {
        Self(tokens)
    }

    /// The path of a column nobody has mapped yet.
    pub fn unmapped() -> Self {
        Self(vec![PathToken::Empty])
    }

    pub fn parse(raw: &str) -> Self {
        if raw.trim().is_empty() {
            return Self::default();
        }
        raw.split(PATH_SEPARATOR).map(PathToken::parse).collect()
    }

    pub fn tokens(&self) -> &[PathToken] {
        &self.0
    }

    pub fn into_tokens(self) -> Vec<PathToken> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PathToken> {
        self.0.get(index)
    }

    pub fn last(&self) -> Option<&PathToken> {
        self.0.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PathToken> {
        self.0.iter()
    }

    /// A path is complete once its last token is something other than the
    /// empty sentinel. A path with no tokens is never complete.
    pub fn is_complete(&self) -> bool {
        self.0.last().is_some_and(|token| !token.is_empty())
    }

    pub fn starts_with(&self, prefix: &[PathToken]) -> bool {
        self.0.len() >= prefix.len() && self.0[..prefix.len()] == *prefix
    }

    pub fn ends_with(&self, suffix: &[PathToken]) -> bool {
        self.0.len() >= suffix.len() && self.0[self.0.len() - suffix.len()..] == *suffix
    }

    pub fn prefix(&self, length: usize) -> MappingPath {
        Self(self.0[..length.min(self.0.len())].to_vec())
    }

    pub fn with(&self, token: PathToken) -> MappingPath {
        let mut tokens = self.0.clone();
        tokens.push(token);
        Self(tokens)
    }

    pub fn join(&self, tail: &[PathToken]) -> MappingPath {
        let mut tokens = Vec::with_capacity(self.0.len() + tail.len());
        tokens.extend_from_slice(&self.0);
        tokens.extend_from_slice(tail);
        Self(tokens)
    }

    pub fn replace(&self, index: usize, token: PathToken) -> MappingPath {
        let mut tokens = self.0.clone();
        if let Some(slot) = tokens.get_mut(index) {
            *slot = token;
        }
        Self(tokens)
    }

    /// Rewrites every to-many index to `#1` so that paths pointing into
    /// different rows of the same repeated group compare equal.
    pub fn canonicalize(&self) -> MappingPath {
        self.0
            .iter()
            .map(|token| match token {
                PathToken::ToMany(_) => PathToken::ToMany(1),
                other => other.clone(),
            })
            .collect()
    }

    /// Drops to-many indices, tree ranks and the formatted pseudo-field,
    /// leaving only the structural field chain.
    pub fn genericize(&self) -> MappingPath {
        self.0
            .iter()
            .filter(|token| !(token.is_to_many() || token.is_rank() || token.is_formatted()))
            .cloned()
            .collect()
    }

    /// Position of the right-most to-many token at or after `offset`.
    pub fn last_to_many_position(&self, offset: usize) -> Option<usize> {
        self.0
            .iter()
            .enumerate()
            .skip(offset)
            .rev()
            .find(|(_, token)| token.is_to_many())
            .map(|(position, _)| position)
    }

    /// Lowercased string form, used as a grouping key.
    pub fn key(&self) -> String {
        self.to_string().to_lowercase()
    }
}

impl fmt::Display for MappingPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (position, token) in self.0.iter().enumerate() {
            if position > 0 {
                write!(f, "{PATH_SEPARATOR}")?;
            }
            write!(f, "{token}")?;
        }
        Ok(())
    }
}

impl FromStr for MappingPath {
    type Err = std::convert::Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(MappingPath::parse(value))
    }
}

impl FromIterator<PathToken> for MappingPath {
    fn from_iter<I: IntoIterator<Item = PathToken>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<Vec<PathToken>> for MappingPath {
    fn from(tokens: Vec<PathToken>) -> Self {
        Self(tokens)
    }
}

impl<'a> IntoIterator for &'a MappingPath {
    type Item = &'a PathToken;
    type IntoIter = std::slice::Iter<'a, PathToken>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl Serialize for MappingPath {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(self.0.iter().map(ToString::to_string))
    }
}

impl<'de> Deserialize<'de> for MappingPath {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Vec::<String>::deserialize(deserializer)?;
        Ok(raw.iter().map(|token| PathToken::parse(token)).collect())
    }
}

/// Joins a path with the path separator.
pub fn to_string(path: &MappingPath) -> String {
    path.to_string()
}

/// Splits a string produced by [`to_string`] back into a path.
pub fn parse(raw: &str) -> MappingPath {
    MappingPath::parse(raw)
}

/// Returns the indices of lines that should be unmapped because another
/// line already resolves to the same complete path.
///
/// Within a group of identical paths the first occurrence wins. When the
/// group contains `focused` (the line the user just edited) and that line is
/// not the first occurrence, the focused line is kept and the first
/// occurrence is flagged in its place.
pub fn find_duplicates(paths: &[MappingPath], focused: Option<usize>) -> Vec<usize> {
    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (index, path) in paths.iter().enumerate() {
        if path.is_complete() {
            groups.entry(path.key()).or_default().push(index);
        }
    }

    let mut flagged = Vec::new();
    for indexes in groups.values().filter(|indexes| indexes.len() > 1) {
        match focused.filter(|line| indexes.contains(line)) {
            Some(line) if line != indexes[0] => flagged.push(indexes[0]),
            _ => flagged.extend_from_slice(&indexes[1..]),
        }
    }
    flagged.sort_unstable();
    flagged
}

/// Renumbers to-many indices so that, within every group of paths sharing
/// the same prefix, indices run contiguously from `#1` in their original
/// relative order. Shallower positions are rebased first so a shift
/// propagates into every deeper token that shares the shifted prefix.
pub fn rebase_to_many(paths: &[MappingPath]) -> Vec<MappingPath> {
    let mut rebased = paths.to_vec();
    let longest = rebased.iter().map(MappingPath::len).max().unwrap_or(0);

    for position in 0..longest {
        let mut groups: HashMap<String, BTreeSet<usize>> = HashMap::new();
        for path in &rebased {
            if let Some(PathToken::ToMany(index)) = path.get(position) {
                groups
                    .entry(prefix_key(path, position))
                    .or_default()
                    .insert(*index);
            }
        }
        if groups.is_empty() {
            continue;
        }

        let renumbering: HashMap<String, HashMap<usize, usize>> = groups
            .into_iter()
            .map(|(key, indexes)| {
                let mapping = indexes
                    .into_iter()
                    .enumerate()
                    .map(|(offset, index)| (index, offset + 1))
                    .collect();
                (key, mapping)
            })
            .collect();

        for path in &mut rebased {
            let Some(index) = path.get(position).and_then(PathToken::to_many_index) else {
                continue;
            };
            let replacement = renumbering
                .get(&prefix_key(path, position))
                .and_then(|mapping| mapping.get(&index))
                .copied();
            if let Some(new_index) = replacement
                && new_index != index
            {
                path.0[position] = PathToken::ToMany(new_index);
            }
        }
    }

    rebased
}

fn prefix_key(path: &MappingPath, length: usize) -> String {
    path.prefix(length).key()
}
