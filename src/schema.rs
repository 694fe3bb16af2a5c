//! Schema graph: tables, fields, relationships and tree ranks.
//!
//! This module owns the read-only data model every other component walks.
//! A [`SchemaDefinition`] is the hand-authored YAML shape; [`Schema`] is the
//! resolved arena where relationships point at tables through stable
//! [`TableId`] indices instead of references, so self-referencing trees and
//! mutually referencing tables need no shared ownership.
//!
//! ## Responsibilities
//!
//! - YAML loading and validation of the schema definition
//! - Label derivation for fields and tables that omit one
//! - Relationship cardinality helpers (to-many detection, index caps)
//! - Walking a [`MappingPath`] through the graph ([`Schema::resolve_path`])
//! - The [`AccessPolicy`] seam consulted by the navigator

use std::{collections::HashMap, fs::File, io::BufReader, path::Path};

use anyhow::{Context, Result};
use heck::ToTitleCase;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mapping_path::{MappingPath, PathToken};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Table '{0}' is defined more than once")]
    DuplicateTable(String),
    #[error("Table '{table}' defines field '{field}' more than once")]
    DuplicateField { table: String, field: String },
    #[error("Tree '{table}' defines rank '{rank}' more than once")]
    DuplicateRank { table: String, rank: String },
    #[error("Relationship '{table}.{field}' points at unknown table '{related}'")]
    UnknownRelatedTable {
        table: String,
        field: String,
        related: String,
    },
    #[error("Identifier field '{field}' of table '{table}' is not a literal field")]
    InvalidIdentifier { table: String, field: String },
    #[error("Unknown table '{0}'")]
    UnknownTable(String),
    #[error("Table '{table}' has no field named '{field}'")]
    UnknownField { table: String, field: String },
    #[error("Tree '{table}' has no rank named '{rank}'")]
    UnknownRank { table: String, rank: String },
    #[error("Unexpected token '{token}' at position {position} while walking table '{table}'")]
    UnexpectedToken {
        table: String,
        token: String,
        position: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(usize);

impl TableId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldRef {
    pub table: TableId,
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationshipType {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
    ZeroToOne,
}

impl RelationshipType {
    /// Zero-to-one relationships are stored like to-many ones with a
    /// single slot.
    pub fn is_to_many(self) -> bool {
        matches!(
            self,
            RelationshipType::OneToMany | RelationshipType::ManyToMany | RelationshipType::ZeroToOne
        )
    }

    pub fn max_to_many_index(self) -> Option<usize> {
        match self {
            RelationshipType::ZeroToOne | RelationshipType::OneToOne => Some(1),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RelationshipType::OneToOne => "one-to-one",
            RelationshipType::OneToMany => "one-to-many",
            RelationshipType::ManyToOne => "many-to-one",
            RelationshipType::ManyToMany => "many-to-many",
            RelationshipType::ZeroToOne => "zero-to-one",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableAction {
    Read,
    Create,
    Update,
    Delete,
}

/// Permission seam consulted before a relationship is offered.
pub trait AccessPolicy {
    fn can_access(&self, table: &str, action: TableAction) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn can_access(&self, _table: &str, _action: TableAction) -> bool {
        true
    }
}

impl<F> AccessPolicy for F
where
    F: Fn(&str, TableAction) -> bool,
{
    fn can_access(&self, table: &str, action: TableAction) -> bool {
        self(table, action)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub tables: Vec<TableDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub system: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier_field: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ranks: Vec<RankDefinition>,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankDefinition {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship: Option<RelationshipDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipDefinition {
    #[serde(rename = "type")]
    pub kind: RelationshipType,
    pub related: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_side: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Relationship {
    pub kind: RelationshipType,
    pub related: TableId,
    pub other_side: Option<String>,
}

#[derive(Debug, Clone)]
pub enum FieldKind {
    Literal,
    Relationship(Relationship),
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub label: String,
    pub required: bool,
    pub hidden: bool,
    pub read_only: bool,
    pub kind: FieldKind,
}

impl Field {
    pub fn is_relationship(&self) -> bool {
        matches!(self.kind, FieldKind::Relationship(_))
    }

    pub fn relationship(&self) -> Option<&Relationship> {
        match &self.kind {
            FieldKind::Relationship(relationship) => Some(relationship),
            FieldKind::Literal => None,
        }
    }

    pub fn is_to_many(&self) -> bool {
        self.relationship()
            .is_some_and(|relationship| relationship.kind.is_to_many())
    }
}

#[derive(Debug, Clone)]
pub struct Rank {
    pub id: i64,
    pub name: String,
    pub title: String,
}

#[derive(Debug, Clone)]
pub struct Table {
    pub id: TableId,
    pub name: String,
    pub label: String,
    pub system: bool,
    pub hidden: bool,
    pub identifier_field: Option<usize>,
    pub ranks: Vec<Rank>,
    pub fields: Vec<Field>,
}

impl Table {
    pub fn is_tree(&self) -> bool {
        !self.ranks.is_empty()
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|field| field.name.eq_ignore_ascii_case(name))
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.field_index(name).map(|index| &self.fields[index])
    }

    pub fn field_ref(&self, name: &str) -> Option<FieldRef> {
        self.field_index(name).map(|index| FieldRef {
            table: self.id,
            index,
        })
    }

    pub fn rank(&self, name: &str) -> Option<&Rank> {
        self.ranks
            .iter()
            .find(|rank| rank.name.eq_ignore_ascii_case(name))
    }

    pub fn identifier(&self) -> Option<&Field> {
        self.identifier_field.map(|index| &self.fields[index])
    }

    pub fn literal_fields(&self) -> impl Iterator<Item = (usize, &Field)> {
        self.fields
            .iter()
            .enumerate()
            .filter(|(_, field)| !field.is_relationship())
    }

    pub fn relationships(&self) -> impl Iterator<Item = (usize, &Field, &Relationship)> {
        self.fields
            .iter()
            .enumerate()
            .filter_map(|(index, field)| field.relationship().map(|rel| (index, field, rel)))
    }
}

/// What a resolved path expects next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextToken {
    Field,
    ToManyIndex,
    Rank,
    /// A literal field was reached; only the empty sentinel may follow.
    End,
}

#[derive(Debug, Clone)]
pub struct ResolvedHop {
    /// Table the token was interpreted against.
    pub table: TableId,
    /// Token with its case restored from the schema.
    pub token: PathToken,
    pub field: Option<FieldRef>,
}

#[derive(Debug, Clone)]
pub struct ResolvedPath {
    pub hops: Vec<ResolvedHop>,
    pub end_table: TableId,
    pub next: NextToken,
}

impl ResolvedPath {
    pub fn canonical_path(&self) -> MappingPath {
        self.hops.iter().map(|hop| hop.token.clone()).collect()
    }

    /// Field named by the final token, if that token is a field.
    pub fn tail_field(&self) -> Option<FieldRef> {
        self.hops.last().and_then(|hop| hop.field)
    }

    /// The relationship hop that precedes the final field token.
    pub fn parent_relationship(&self) -> Option<FieldRef> {
        let tail = self.hops.len().checked_sub(1)?;
        self.hops[..tail].iter().rev().find_map(|hop| hop.field)
    }
}

#[derive(Debug, Clone)]
pub struct Schema {
    tables: Vec<Table>,
    by_name: HashMap<String, TableId>,
}

impl Schema {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening schema file {path:?}"))?;
        let reader = BufReader::new(file);
        let definition: SchemaDefinition =
            serde_yaml::from_reader(reader).context("Parsing schema YAML")?;
        Schema::from_definition(definition)
            .with_context(|| format!("Validating schema from {path:?}"))
    }

    pub fn from_yaml_str(input: &str) -> Result<Self> {
        let definition: SchemaDefinition =
            serde_yaml::from_str(input).context("Parsing schema YAML")?;
        Ok(Schema::from_definition(definition)?)
    }

    pub fn from_definition(definition: SchemaDefinition) -> Result<Self, SchemaError> {
        let mut by_name = HashMap::with_capacity(definition.tables.len());
        for (index, table) in definition.tables.iter().enumerate() {
            if by_name
                .insert(table.name.to_lowercase(), TableId(index))
                .is_some()
            {
                return Err(SchemaError::DuplicateTable(table.name.clone()));
            }
        }

        let mut tables = Vec::with_capacity(definition.tables.len());
        for (index, table) in definition.tables.into_iter().enumerate() {
            tables.push(build_table(TableId(index), table, &by_name)?);
        }
        Ok(Schema { tables, by_name })
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.iter()
    }

    pub fn table(&self, id: TableId) -> &Table {
        &self.tables[id.0]
    }

    pub fn table_id(&self, name: &str) -> Option<TableId> {
        self.by_name.get(&name.to_lowercase()).copied()
    }

    pub fn require_table(&self, name: &str) -> Result<TableId, SchemaError> {
        self.table_id(name)
            .ok_or_else(|| SchemaError::UnknownTable(name.to_string()))
    }

    pub fn field(&self, reference: FieldRef) -> &Field {
        &self.tables[reference.table.0].fields[reference.index]
    }

    pub fn related_table(&self, reference: FieldRef) -> Option<&Table> {
        self.field(reference)
            .relationship()
            .map(|relationship| self.table(relationship.related))
    }

    /// Walks `path` from `base`, validating each token against the table it
    /// lands on. Walking stops at the first empty sentinel.
    pub fn resolve_path(
        &self,
        base: TableId,
        path: &MappingPath,
    ) -> Result<ResolvedPath, SchemaError> {
        let mut table = base;
        let mut next = if self.table(base).is_tree() {
            NextToken::Rank
        } else {
            NextToken::Field
        };
        let mut hops = Vec::with_capacity(path.len());

        for (position, token) in path.iter().enumerate() {
            let current = self.table(table);
            let unexpected = || SchemaError::UnexpectedToken {
                table: current.name.clone(),
                token: token.to_string(),
                position,
            };
            match token {
                PathToken::Empty => {
                    hops.push(ResolvedHop {
                        table,
                        token: PathToken::Empty,
                        field: None,
                    });
                    break;
                }
                PathToken::ToMany(index) => {
                    if next != NextToken::ToManyIndex {
                        return Err(unexpected());
                    }
                    hops.push(ResolvedHop {
                        table,
                        token: PathToken::ToMany(*index),
                        field: None,
                    });
                    next = if current.is_tree() {
                        NextToken::Rank
                    } else {
                        NextToken::Field
                    };
                }
                PathToken::Rank(name) => {
                    if next != NextToken::Rank {
                        return Err(unexpected());
                    }
                    let rank = current.rank(name).ok_or_else(|| SchemaError::UnknownRank {
                        table: current.name.clone(),
                        rank: name.clone(),
                    })?;
                    hops.push(ResolvedHop {
                        table,
                        token: PathToken::Rank(rank.name.clone()),
                        field: None,
                    });
                    next = NextToken::Field;
                }
                PathToken::AnyRank => {
                    if next != NextToken::Rank {
                        return Err(unexpected());
                    }
                    hops.push(ResolvedHop {
                        table,
                        token: PathToken::AnyRank,
                        field: None,
                    });
                    next = NextToken::Field;
                }
                PathToken::Field(name) => {
                    if next != NextToken::Field {
                        return Err(unexpected());
                    }
                    let reference =
                        current
                            .field_ref(name)
                            .ok_or_else(|| SchemaError::UnknownField {
                                table: current.name.clone(),
                                field: name.clone(),
                            })?;
                    let field = self.field(reference);
                    hops.push(ResolvedHop {
                        table,
                        token: PathToken::Field(field.name.clone()),
                        field: Some(reference),
                    });
                    next = match field.relationship() {
                        None => NextToken::End,
                        Some(relationship) => {
                            table = relationship.related;
                            if relationship.kind.is_to_many() {
                                NextToken::ToManyIndex
                            } else if self.table(table).is_tree() {
                                NextToken::Rank
                            } else {
                                NextToken::Field
                            }
                        }
                    };
                }
            }
        }

        Ok(ResolvedPath {
            hops,
            end_table: table,
            next,
        })
    }
}

fn build_table(
    id: TableId,
    definition: TableDefinition,
    by_name: &HashMap<String, TableId>,
) -> Result<Table, SchemaError> {
    let mut fields: Vec<Field> = Vec::with_capacity(definition.fields.len());
    for field in definition.fields {
        if fields
            .iter()
            .any(|existing| existing.name.eq_ignore_ascii_case(&field.name))
        {
            return Err(SchemaError::DuplicateField {
                table: definition.name.clone(),
                field: field.name,
            });
        }
        let kind = match field.relationship {
            None => FieldKind::Literal,
            Some(relationship) => {
                let related = by_name
                    .get(&relationship.related.to_lowercase())
                    .copied()
                    .ok_or_else(|| SchemaError::UnknownRelatedTable {
                        table: definition.name.clone(),
                        field: field.name.clone(),
                        related: relationship.related.clone(),
                    })?;
                FieldKind::Relationship(Relationship {
                    kind: relationship.kind,
                    related,
                    other_side: relationship.other_side,
                })
            }
        };
        fields.push(Field {
            label: field.label.unwrap_or_else(|| field.name.to_title_case()),
            name: field.name,
            required: field.required,
            hidden: field.hidden,
            read_only: field.read_only,
            kind,
        });
    }

    let mut ranks: Vec<Rank> = Vec::with_capacity(definition.ranks.len());
    for rank in definition.ranks {
        if ranks
            .iter()
            .any(|existing| existing.name.eq_ignore_ascii_case(&rank.name))
        {
            return Err(SchemaError::DuplicateRank {
                table: definition.name.clone(),
                rank: rank.name,
            });
        }
        ranks.push(Rank {
            id: rank.id,
            title: rank.title.unwrap_or_else(|| rank.name.clone()),
            name: rank.name,
        });
    }

    let identifier_field = match definition.identifier_field {
        None => None,
        Some(name) => {
            let index = fields
                .iter()
                .position(|field| field.name.eq_ignore_ascii_case(&name))
                .filter(|index| !fields[*index].is_relationship())
                .ok_or_else(|| SchemaError::InvalidIdentifier {
                    table: definition.name.clone(),
                    field: name.clone(),
                })?;
            Some(index)
        }
    };

    Ok(Table {
        id,
        label: definition
            .label
            .unwrap_or_else(|| definition.name.to_title_case()),
        name: definition.name,
        system: definition.system,
        hidden: definition.hidden,
        identifier_field,
        ranks,
        fields,
    })
}
