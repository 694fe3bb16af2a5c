use std::collections::{BTreeMap, BTreeSet};

use log::{debug, warn};

use crate::{
    lines::SplitMappingPath,
    mapping_path::{MappingPath, PathToken},
    schema::{Schema, SchemaError, Table, TableId},
};

use super::{ColumnDefinition, PlanError, RankColumns, TreeRecord, UploadPlan, Uploadable};

/// A decoded plan: the base table, one entry per column, and the tables the
/// plan marks as must-match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPlan {
    pub base_table: TableId,
    pub lines: Vec<SplitMappingPath>,
    pub must_match_tables: BTreeSet<String>,
}

/// Decodes `plan` against `schema`.
///
/// Field and rank names are restored to the schema's casing. A relationship
/// listed directly as a column is redirected to the related table's
/// identifier field. Records that disagree with the schema (a tree table
/// encoded as a table, a to-many relationship under `toOne`) are rejected.
pub fn parse_plan(schema: &Schema, plan: &UploadPlan) -> Result<ParsedPlan, PlanError> {
    let base_table = schema
        .table_id(&plan.base_table_name)
        .ok_or_else(|| PlanError::UnknownBaseTable(plan.base_table_name.clone()))?;

    let mut walker = PlanWalker {
        schema,
        lines: Vec::new(),
        must_match_tables: BTreeSet::new(),
    };
    walker.uploadable(&plan.uploadable, base_table, &MappingPath::default(), true)?;
    debug!(
        "Decoded {} column(s) from plan for '{}'",
        walker.lines.len(),
        schema.table(base_table).name
    );

    Ok(ParsedPlan {
        base_table,
        lines: walker.lines,
        must_match_tables: walker.must_match_tables,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    ToOne,
    ToMany,
}

impl Section {
    fn key(self) -> &'static str {
        match self {
            Section::ToOne => "toOne",
            Section::ToMany => "toMany",
        }
    }
}

struct PlanWalker<'s> {
    schema: &'s Schema,
    lines: Vec<SplitMappingPath>,
    must_match_tables: BTreeSet<String>,
}

impl<'s> PlanWalker<'s> {
    fn uploadable(
        &mut self,
        uploadable: &Uploadable,
        table: TableId,
        prefix: &MappingPath,
        is_root: bool,
    ) -> Result<(), PlanError> {
        let definition = self.schema.table(table);
        if uploadable.is_must_match() && !is_root {
            self.must_match_tables.insert(definition.name.clone());
        }
        match uploadable {
            Uploadable::UploadTable(record) | Uploadable::MustMatchTable(record) => {
                if definition.is_tree() {
                    return Err(PlanError::WrongRecordKind {
                        table: definition.name.clone(),
                        expected: "a tree record",
                        found: "an upload table",
                    });
                }
                self.columns(&record.wbcols, definition, prefix)?;
                self.to_one(&record.to_one, definition, prefix)?;
                for (name, records) in &record.to_many {
                    let (field, related) = self.relationship(definition, name, Section::ToMany)?;
                    let related = self.schema.table(related);
                    for (position, entry) in records.iter().enumerate() {
                        let record_prefix = prefix
                            .with(PathToken::field(field.clone()))
                            .with(PathToken::ToMany(position + 1));
                        self.columns(&entry.wbcols, related, &record_prefix)?;
                        self.to_one(&entry.to_one, related, &record_prefix)?;
                    }
                }
                Ok(())
            }
            Uploadable::TreeRecord(record) | Uploadable::MustMatchTreeRecord(record) => {
                if !definition.is_tree() {
                    return Err(PlanError::WrongRecordKind {
                        table: definition.name.clone(),
                        expected: "an upload table",
                        found: "a tree record",
                    });
                }
                self.tree_record(record, definition, prefix)
            }
        }
    }

    fn columns(
        &mut self,
        wbcols: &BTreeMap<String, ColumnDefinition>,
        table: &'s Table,
        prefix: &MappingPath,
    ) -> Result<(), PlanError> {
        for (name, column) in wbcols {
            let field = table.field(name).ok_or_else(|| SchemaError::UnknownField {
                table: table.name.clone(),
                field: name.clone(),
            })?;
            let mut path = prefix.with(PathToken::field(field.name.clone()));

            if let Some(relationship) = field.relationship() {
                let related = self.schema.table(relationship.related);
                let identifier = related.identifier().ok_or_else(|| PlanError::NoIdentifierField {
                    table: table.name.clone(),
                    field: field.name.clone(),
                    related: related.name.clone(),
                })?;
                if relationship.kind.is_to_many() {
                    path = path.with(PathToken::ToMany(1));
                }
                path = path.with(PathToken::field(identifier.name.clone()));
                warn!(
                    "Column '{}' was mapped to relationship '{}.{}'; using '{path}' instead",
                    column.header(),
                    table.name,
                    field.name
                );
            }
            self.push(column, path);
        }
        Ok(())
    }

    fn to_one(
        &mut self,
        to_one: &BTreeMap<String, Uploadable>,
        table: &'s Table,
        prefix: &MappingPath,
    ) -> Result<(), PlanError> {
        for (name, child) in to_one {
            let (field, related) = self.relationship(table, name, Section::ToOne)?;
            self.uploadable(child, related, &prefix.with(PathToken::field(field)), false)?;
        }
        Ok(())
    }

    fn tree_record(&mut self, record: &TreeRecord, table: &'s Table, prefix: &MappingPath) -> Result<(), PlanError> {
        for (rank_name, columns) in &record.ranks {
            let rank = table.rank(rank_name).ok_or_else(|| SchemaError::UnknownRank {
                table: table.name.clone(),
                rank: rank_name.clone(),
            })?;
            let rank_prefix = prefix.with(PathToken::rank(rank.name.clone()));
            match columns {
                RankColumns::Name(column) => {
                    let field = table.field("name").ok_or_else(|| SchemaError::UnknownField {
                        table: table.name.clone(),
                        field: "name".to_string(),
                    })?;
                    self.push(column, rank_prefix.with(PathToken::field(field.name.clone())));
                }
                RankColumns::Fields { tree_node_cols } => {
                    for (name, column) in tree_node_cols {
                        let field = table.field(name).ok_or_else(|| SchemaError::UnknownField {
                            table: table.name.clone(),
                            field: name.clone(),
                        })?;
                        self.push(column, rank_prefix.with(PathToken::field(field.name.clone())));
                    }
                }
            }
        }
        Ok(())
    }

    /// Canonical name and related table of relationship `name` on `table`,
    /// which must have the cardinality `section` holds.
    fn relationship(&self, table: &Table, name: &str, section: Section) -> Result<(String, TableId), PlanError> {
        let field = table.field(name).ok_or_else(|| SchemaError::UnknownField {
            table: table.name.clone(),
            field: name.to_string(),
        })?;
        let relationship = field.relationship().ok_or_else(|| SchemaError::UnexpectedToken {
            table: table.name.clone(),
            token: name.to_string(),
            position: 0,
        })?;
        if relationship.kind.is_to_many() != (section == Section::ToMany) {
            return Err(PlanError::MisplacedRelationship {
                table: table.name.clone(),
                field: field.name.clone(),
                section: section.key(),
            });
        }
        Ok((field.name.clone(), relationship.related))
    }

    fn push(&mut self, column: &ColumnDefinition, mapping_path: MappingPath) {
        self.lines.push(SplitMappingPath {
            header_name: column.header().to_string(),
            mapping_path,
            column_options: column.options(),
        });
    }
}
