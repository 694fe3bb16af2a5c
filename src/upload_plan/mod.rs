//! Upload plan documents.
//!
//! An upload plan is the nested JSON form of a set of mapping lines: one
//! record per table reached, columns attached to the fields they fill.
//! [`build_plan`] turns lines into a plan and [`parse_plan`] turns a plan back
//! into lines.
//!
//! ```json
//! {
//!   "baseTableName": "collectionobject",
//!   "uploadable": {
//!     "uploadTable": {
//!       "wbcols": { "catalognumber": "Catalog Number" },
//!       "toOne": { "cataloger": { "mustMatchTable": { "wbcols": {}, "toOne": {}, "toMany": {} } } },
//!       "toMany": { "determinations": [ { "wbcols": {}, "toOne": {} } ] }
//!     }
//!   }
//! }
//! ```

mod build;
mod parse;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    lines::{ColumnOptions, MatchBehavior},
    schema::SchemaError,
};

pub use self::{
    build::build_plan,
    parse::{ParsedPlan, parse_plan},
};

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Unknown base table '{0}'")]
    UnknownBaseTable(String),
    #[error("Column '{header}' maps to invalid path '{path}': {source}")]
    InvalidPath {
        header: String,
        path: String,
        #[source]
        source: SchemaError,
    },
    #[error("Column '{header}' maps to '{path}', which does not end on a field")]
    IncompletePath { header: String, path: String },
    #[error("Column '{header}' uses the any-rank wildcard in '{path}'")]
    AnyRank { header: String, path: String },
    #[error("Column '{header}' maps to '{path}' without an index after a to-many relationship")]
    MissingToManyIndex { header: String, path: String },
    #[error("Column '{header}' maps to '{path}', nesting a to-many relationship inside another")]
    NestedToMany { header: String, path: String },
    #[error("Column '{header}' maps to '{path}', which continues past a tree rank's field")]
    PastTreeField { header: String, path: String },
    #[error("Columns '{first}' and '{second}' both map to '{path}'")]
    DuplicatePath {
        first: String,
        second: String,
        path: String,
    },
    #[error(
        "Relationship '{table}.{field}' is used as a column but table '{related}' has no identifier field"
    )]
    NoIdentifierField {
        table: String,
        field: String,
        related: String,
    },
    #[error("Table '{table}' is encoded as {found} but must be {expected}")]
    WrongRecordKind {
        table: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("Relationship '{table}.{field}' cannot be listed under '{section}'")]
    MisplacedRelationship {
        table: String,
        field: String,
        section: &'static str,
    },
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("Invalid upload plan JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPlan {
    pub base_table_name: String,
    pub uploadable: Uploadable,
}

impl UploadPlan {
    pub fn from_json_str(input: &str) -> Result<Self, PlanError> {
        Ok(serde_json::from_str(input)?)
    }

    pub fn to_json_string(&self) -> Result<String, PlanError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Uploadable {
    UploadTable(UploadTable),
    MustMatchTable(UploadTable),
    TreeRecord(TreeRecord),
    MustMatchTreeRecord(TreeRecord),
}

impl Uploadable {
    pub fn is_must_match(&self) -> bool {
        matches!(
            self,
            Uploadable::MustMatchTable(_) | Uploadable::MustMatchTreeRecord(_)
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UploadTable {
    #[serde(default)]
    pub wbcols: BTreeMap<String, ColumnDefinition>,
    /// Constant values some plans carry. Read but never interpreted or written.
    #[serde(default, rename = "static", skip_serializing)]
    pub static_values: Option<serde_json::Value>,
    #[serde(default, rename = "toOne")]
    pub to_one: BTreeMap<String, Uploadable>,
    #[serde(default, rename = "toMany")]
    pub to_many: BTreeMap<String, Vec<ToManyRecord>>,
}

/// One row of a to-many group. Records cannot hold further to-many groups,
/// so a `toMany` key here is a deserialization error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToManyRecord {
    #[serde(default)]
    pub wbcols: BTreeMap<String, ColumnDefinition>,
    #[serde(default, rename = "static", skip_serializing)]
    pub static_values: Option<serde_json::Value>,
    #[serde(default, rename = "toOne")]
    pub to_one: BTreeMap<String, Uploadable>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeRecord {
    #[serde(default)]
    pub ranks: BTreeMap<String, RankColumns>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RankColumns {
    /// Shorthand for a single column filling the rank's `name` field.
    Name(ColumnDefinition),
    Fields {
        #[serde(rename = "treeNodeCols")]
        tree_node_cols: BTreeMap<String, ColumnDefinition>,
    },
}

/// A header reference, with column options when they differ from the
/// defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnDefinition {
    Header(String),
    Detailed(ColumnDetails),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDetails {
    pub column: String,
    #[serde(default)]
    pub match_behavior: MatchBehavior,
    #[serde(default = "ColumnOptions::default_null_allowed")]
    pub null_allowed: bool,
    #[serde(default)]
    pub default: Option<String>,
}

impl ColumnDefinition {
    pub fn new(header: &str, options: &ColumnOptions) -> Self {
        if options.is_default() {
            return ColumnDefinition::Header(header.to_string());
        }
        ColumnDefinition::Detailed(ColumnDetails {
            column: header.to_string(),
            match_behavior: options.match_behavior,
            null_allowed: options.null_allowed,
            default: options.default.clone(),
        })
    }

    pub fn header(&self) -> &str {
        match self {
            ColumnDefinition::Header(header) => header,
            ColumnDefinition::Detailed(details) => &details.column,
        }
    }

    pub fn options(&self) -> ColumnOptions {
        match self {
            ColumnDefinition::Header(_) => ColumnOptions::default(),
            ColumnDefinition::Detailed(details) => ColumnOptions {
                match_behavior: details.match_behavior,
                null_allowed: details.null_allowed,
                default: details.default.clone(),
            },
        }
    }
}
