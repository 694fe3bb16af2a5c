use std::collections::{BTreeMap, BTreeSet, btree_map::Entry};

use log::{debug, info};

use crate::{
    lines::{ColumnOptions, MappingLine},
    mapping_path::{self, MappingPath, PathToken},
    schema::{NextToken, Schema, SchemaError, TableId},
};

use super::{
    ColumnDefinition, PlanError, RankColumns, ToManyRecord, TreeRecord, UploadPlan, UploadTable,
    Uploadable,
};

/// A mapped column while it is being pushed down the plan tree. `offset`
/// is the number of tokens already consumed by the enclosing records.
#[derive(Debug, Clone, Copy)]
struct Column<'a> {
    header: &'a str,
    path: &'a MappingPath,
    options: &'a ColumnOptions,
    offset: usize,
}

impl<'a> Column<'a> {
    fn rest(&self) -> &'a [PathToken] {
        &self.path.tokens()[self.offset..]
    }

    fn advance(self, tokens: usize) -> Self {
        Self {
            offset: self.offset + tokens,
            ..self
        }
    }

    fn definition(&self) -> ColumnDefinition {
        ColumnDefinition::new(self.header, self.options)
    }

    fn error(&self, make: impl FnOnce(String, String) -> PlanError) -> PlanError {
        make(self.header.to_string(), self.path.to_string())
    }
}

/// Encodes `lines` as an upload plan rooted at `base_table`.
///
/// Field and relationship keys are written in lowercase; rank names keep
/// the schema's casing. Unmapped lines are skipped. To-many indices are
/// renumbered so every group runs from `#1` before records are laid out;
/// `must_match` names (any case) the tables encoded as must-match records
/// below the root.
pub fn build_plan(
    schema: &Schema,
    base_table: TableId,
    lines: &[MappingLine],
    must_match: &BTreeSet<String>,
) -> Result<UploadPlan, PlanError> {
    let mapped: Vec<&MappingLine> = lines.iter().filter(|line| line.is_mapped()).collect();
    let paths: Vec<MappingPath> = mapped
        .iter()
        .map(|line| line.mapping_path.clone())
        .collect();

    let mut canonical = Vec::with_capacity(paths.len());
    for (line, path) in mapped.iter().zip(mapping_path::rebase_to_many(&paths)) {
        canonical.push(validate(schema, base_table, &line.header_name, &path)?);
    }

    let mut seen: BTreeMap<String, &str> = BTreeMap::new();
    for (line, path) in mapped.iter().zip(&canonical) {
        match seen.entry(path.key()) {
            Entry::Vacant(slot) => {
                slot.insert(&line.header_name);
            }
            Entry::Occupied(first) => {
                return Err(PlanError::DuplicatePath {
                    first: first.get().to_string(),
                    second: line.header_name.clone(),
                    path: path.to_string(),
                });
            }
        }
    }

    let must_match: BTreeSet<String> = must_match.iter().map(|name| name.to_lowercase()).collect();
    let columns: Vec<Column> = mapped
        .iter()
        .zip(&canonical)
        .map(|(line, path)| Column {
            header: &line.header_name,
            path,
            options: &line.column_options,
            offset: 0,
        })
        .collect();

    let builder = PlanBuilder { schema, must_match };
    let uploadable = builder.uploadable(base_table, columns, true)?;
    info!(
        "Built upload plan for '{}' from {} mapped column(s)",
        schema.table(base_table).name,
        mapped.len()
    );
    Ok(UploadPlan {
        base_table_name: schema.table(base_table).name.to_lowercase(),
        uploadable,
    })
}

/// Checks everything about a single path that the plan layout cannot
/// express and returns it with the schema's casing.
fn validate(
    schema: &Schema,
    base_table: TableId,
    header: &str,
    path: &MappingPath,
) -> Result<MappingPath, PlanError> {
    let invalid = |source: SchemaError| PlanError::InvalidPath {
        header: header.to_string(),
        path: path.to_string(),
        source,
    };

    if path.iter().any(|token| matches!(token, PathToken::AnyRank)) {
        return Err(PlanError::AnyRank {
            header: header.to_string(),
            path: path.to_string(),
        });
    }

    let resolved = match schema.resolve_path(base_table, path) {
        Ok(resolved) => resolved,
        Err(err @ SchemaError::UnexpectedToken { position, .. }) => {
            let expected_index = schema
                .resolve_path(base_table, &path.prefix(position))
                .is_ok_and(|prefix| prefix.next == NextToken::ToManyIndex);
            if expected_index {
                return Err(PlanError::MissingToManyIndex {
                    header: header.to_string(),
                    path: path.to_string(),
                });
            }
            let after_rank_field = position >= 2 && path.get(position - 2).is_some_and(PathToken::is_rank);
            if after_rank_field {
                return Err(PlanError::PastTreeField {
                    header: header.to_string(),
                    path: path.to_string(),
                });
            }
            return Err(invalid(err));
        }
        Err(err) => return Err(invalid(err)),
    };

    if let Some(rank) = resolved.hops.iter().position(|hop| hop.token.is_rank())
        && resolved.hops.len() > rank + 2
    {
        return Err(PlanError::PastTreeField {
            header: header.to_string(),
            path: path.to_string(),
        });
    }
    if resolved.next != NextToken::End {
        return Err(PlanError::IncompletePath {
            header: header.to_string(),
            path: path.to_string(),
        });
    }
    Ok(resolved.canonical_path())
}

struct PlanBuilder<'s> {
    schema: &'s Schema,
    must_match: BTreeSet<String>,
}

impl PlanBuilder<'_> {
    fn uploadable(&self, table: TableId, columns: Vec<Column>, is_root: bool) -> Result<Uploadable, PlanError> {
        let definition = self.schema.table(table);
        let must_match = !is_root && self.must_match.contains(&definition.name.to_lowercase());
        if definition.is_tree() {
            let record = self.tree_record(columns)?;
            return Ok(if must_match {
                Uploadable::MustMatchTreeRecord(record)
            } else {
                Uploadable::TreeRecord(record)
            });
        }
        let (wbcols, to_one, to_many) = self.table_parts(table, columns, false)?;
        let record = UploadTable {
            wbcols,
            to_one,
            to_many,
            ..UploadTable::default()
        };
        Ok(if must_match {
            Uploadable::MustMatchTable(record)
        } else {
            Uploadable::UploadTable(record)
        })
    }

    fn tree_record(&self, columns: Vec<Column>) -> Result<TreeRecord, PlanError> {
        let mut ranks: BTreeMap<String, BTreeMap<String, ColumnDefinition>> = BTreeMap::new();
        for column in columns {
            match column.rest() {
                [PathToken::Rank(rank), PathToken::Field(field)] => {
                    ranks
                        .entry(rank.clone())
                        .or_default()
                        .insert(field.to_lowercase(), column.definition());
                }
                [PathToken::Rank(_), _, _, ..] => {
                    return Err(column.error(|header, path| PlanError::PastTreeField { header, path }));
                }
                _ => {
                    return Err(column.error(|header, path| PlanError::IncompletePath { header, path }));
                }
            }
        }
        Ok(TreeRecord {
            ranks: ranks
                .into_iter()
                .map(|(rank, fields)| (rank, RankColumns::Fields { tree_node_cols: fields }))
                .collect(),
        })
    }

    #[allow(clippy::type_complexity)]
    fn table_parts(
        &self,
        table: TableId,
        columns: Vec<Column>,
        in_to_many: bool,
    ) -> Result<
        (
            BTreeMap<String, ColumnDefinition>,
            BTreeMap<String, Uploadable>,
            BTreeMap<String, Vec<ToManyRecord>>,
        ),
        PlanError,
    > {
        let definition = self.schema.table(table);
        let mut wbcols = BTreeMap::new();
        let mut to_one_groups: BTreeMap<String, (TableId, Vec<Column>)> = BTreeMap::new();
        let mut to_many_groups: BTreeMap<String, (TableId, BTreeMap<usize, Vec<Column>>)> =
            BTreeMap::new();

        for column in columns {
            let Some(PathToken::Field(name)) = column.rest().first() else {
                return Err(column.error(|header, path| PlanError::IncompletePath { header, path }));
            };
            let reference = definition.field_ref(name).ok_or_else(|| SchemaError::UnknownField {
                table: definition.name.clone(),
                field: name.clone(),
            })?;
            let field = self.schema.field(reference);
            let Some(relationship) = field.relationship() else {
                wbcols.insert(field.name.to_lowercase(), column.definition());
                continue;
            };

            if !relationship.kind.is_to_many() {
                to_one_groups
                    .entry(field.name.to_lowercase())
                    .or_insert_with(|| (relationship.related, Vec::new()))
                    .1
                    .push(column.advance(1));
                continue;
            }
            if in_to_many {
                return Err(column.error(|header, path| PlanError::NestedToMany { header, path }));
            }
            let Some(index) = column.rest().get(1).and_then(PathToken::to_many_index) else {
                return Err(column.error(|header, path| PlanError::MissingToManyIndex { header, path }));
            };
            to_many_groups
                .entry(field.name.to_lowercase())
                .or_insert_with(|| (relationship.related, BTreeMap::new()))
                .1
                .entry(index)
                .or_default()
                .push(column.advance(2));
        }

        let mut to_one = BTreeMap::new();
        for (name, (related, group)) in to_one_groups {
            to_one.insert(name, self.uploadable(related, group, false)?);
        }

        let mut to_many = BTreeMap::new();
        for (name, (related, records)) in to_many_groups {
            debug!("Laying out {} record(s) for to-many '{name}'", records.len());
            let mut laid_out = Vec::with_capacity(records.len());
            for group in records.into_values() {
                let (wbcols, to_one, _) = self.table_parts(related, group, true)?;
                laid_out.push(ToManyRecord {
                    wbcols,
                    to_one,
                    ..ToManyRecord::default()
                });
            }
            to_many.insert(name, laid_out);
        }

        Ok((wbcols, to_one, to_many))
    }
}
