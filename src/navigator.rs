//! Step-by-step traversal of the schema graph along a mapping path.
//!
//! [`enumerate`] consumes one path token per hop and reports, for every hop,
//! the tokens a user could pick there. The visibility and cycle rules live on
//! [`TraversalContext`] so the auto-mapper expands relationships exactly the
//! way the navigator offers them.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::{
    lines::MappedFields,
    mapping_path::{MappingPath, PathToken},
    schema::{
        AccessPolicy, FieldRef, NextToken, ResolvedPath, Schema, SchemaError, TableAction, TableId,
    },
};

#[derive(Debug, Error)]
pub enum NavigationError {
    #[error("Cannot navigate '{path}': {source}")]
    InvalidPath {
        path: String,
        #[source]
        source: SchemaError,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NavigatorOptions {
    /// Offer hidden fields (flagged as hidden) instead of leaving them out.
    pub show_hidden_fields: bool,
    /// Ignore read-only and system-table restrictions.
    pub no_restrictions: bool,
    /// Allow a to-many relationship directly under another to-many one.
    pub allow_nested_to_many: bool,
    /// Offer the "any rank" wildcard on tree tables.
    pub allow_any_rank: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Fields,
    ToMany,
    TreeRanks,
}

impl StepKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StepKind::Fields => "fields",
            StepKind::ToMany => "to-many",
            StepKind::TreeRanks => "tree-ranks",
        }
    }

    fn from_next(next: NextToken) -> Self {
        match next {
            NextToken::ToManyIndex => StepKind::ToMany,
            NextToken::Rank => StepKind::TreeRanks,
            NextToken::Field | NextToken::End => StepKind::Fields,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOption {
    pub token: PathToken,
    pub label: String,
    pub is_relationship: bool,
    pub is_default: bool,
    pub is_required: bool,
    pub is_hidden: bool,
    pub is_enabled: bool,
    pub related_table: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LineStep {
    pub table_name: String,
    pub table_label: String,
    pub kind: StepKind,
    pub selected: Option<PathToken>,
    pub options: Vec<StepOption>,
}

impl LineStep {
    pub fn option(&self, token: &PathToken) -> Option<&StepOption> {
        self.options.iter().find(|option| option.token == *token)
    }

    pub fn tokens(&self) -> Vec<PathToken> {
        self.options.iter().map(|option| option.token.clone()).collect()
    }
}

/// Where a traversal currently stands: the table, the relationship used to
/// reach it, and whether a tree rank has already been chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraversalContext {
    pub table: TableId,
    pub parent: Option<FieldRef>,
    pub in_tree_node: bool,
}

impl TraversalContext {
    pub fn root(table: TableId) -> Self {
        Self {
            table,
            parent: None,
            in_tree_node: false,
        }
    }

    pub fn follow(&self, schema: &Schema, relationship: FieldRef) -> Self {
        let related = schema
            .field(relationship)
            .relationship()
            .map_or(self.table, |relationship| relationship.related);
        Self {
            table: related,
            parent: Some(relationship),
            in_tree_node: false,
        }
    }

    pub fn enter_rank(&self) -> Self {
        Self {
            in_tree_node: true,
            ..*self
        }
    }

    /// Context reached after walking every hop of an already resolved path.
    pub fn at_end_of(schema: &Schema, base: TableId, resolved: &ResolvedPath) -> Self {
        let mut context = TraversalContext::root(base);
        for hop in &resolved.hops {
            match &hop.token {
                PathToken::Field(_) => {
                    if let Some(reference) = hop.field
                        && schema.field(reference).is_relationship()
                    {
                        context = context.follow(schema, reference);
                    }
                }
                PathToken::Rank(_) | PathToken::AnyRank => context = context.enter_rank(),
                PathToken::ToMany(_) | PathToken::Empty => {}
            }
        }
        context
    }

    /// Fields of the current table a user may pick at this hop, in schema
    /// order.
    pub fn selectable_fields(
        &self,
        schema: &Schema,
        options: &NavigatorOptions,
        access: &dyn AccessPolicy,
    ) -> Vec<FieldRef> {
        let table = schema.table(self.table);
        (0..table.fields.len())
            .map(|index| FieldRef {
                table: self.table,
                index,
            })
            .filter(|candidate| self.is_selectable(schema, options, access, *candidate))
            .collect()
    }

    fn is_selectable(
        &self,
        schema: &Schema,
        options: &NavigatorOptions,
        access: &dyn AccessPolicy,
        candidate: FieldRef,
    ) -> bool {
        let field = schema.field(candidate);
        if field.hidden && !options.show_hidden_fields {
            return false;
        }
        let Some(relationship) = field.relationship() else {
            return !field.read_only || options.no_restrictions;
        };

        let related = schema.table(relationship.related);
        if !options.no_restrictions && (field.read_only || related.system) {
            return false;
        }
        if !access.can_access(&related.name, TableAction::Create) {
            return false;
        }
        if is_circular_relationship(schema, self.parent, candidate) {
            return false;
        }
        if !options.allow_nested_to_many && is_nested_to_many(schema, self.parent, candidate) {
            return false;
        }
        !(self.in_tree_node && relationship.related == self.table)
    }
}

/// A relationship is circular with its parent when it leads straight back
/// to the parent's table and the two are each other's inverse.
pub fn is_circular_relationship(
    schema: &Schema,
    parent: Option<FieldRef>,
    candidate: FieldRef,
) -> bool {
    let Some(parent) = parent else {
        return false;
    };
    let parent_field = schema.field(parent);
    let field = schema.field(candidate);
    let (Some(parent_relationship), Some(relationship)) =
        (parent_field.relationship(), field.relationship())
    else {
        return false;
    };
    if relationship.related != parent.table {
        return false;
    }
    let names_inverse = |other_side: Option<&String>, name: &str| {
        other_side.is_some_and(|other| other.eq_ignore_ascii_case(name))
    };
    names_inverse(relationship.other_side.as_ref(), &parent_field.name)
        || names_inverse(parent_relationship.other_side.as_ref(), &field.name)
}

pub fn is_nested_to_many(schema: &Schema, parent: Option<FieldRef>, candidate: FieldRef) -> bool {
    parent.is_some_and(|parent| schema.field(parent).is_to_many())
        && schema.field(candidate).is_to_many()
}

/// Enumerates the selectable tokens at every hop of `path`.
///
/// One step is produced per token, stopping at the empty sentinel. When the
/// path ends on a token that leads somewhere (a relationship, a to-many
/// index, a tree rank) a final step with nothing selected describes the next
/// choice.
pub fn enumerate(
    schema: &Schema,
    base: TableId,
    path: &MappingPath,
    options: &NavigatorOptions,
    access: &dyn AccessPolicy,
    mapped: &dyn MappedFields,
) -> Result<Vec<LineStep>, NavigationError> {
    let resolved = schema
        .resolve_path(base, path)
        .map_err(|source| NavigationError::InvalidPath {
            path: path.to_string(),
            source,
        })?;

    let mut context = TraversalContext::root(base);
    let mut kind = if schema.table(base).is_tree() {
        StepKind::TreeRanks
    } else {
        StepKind::Fields
    };
    let mut prefix: Vec<PathToken> = Vec::with_capacity(resolved.hops.len());
    let mut steps = Vec::with_capacity(resolved.hops.len() + 1);

    for hop in &resolved.hops {
        steps.push(build_step(
            schema,
            &context,
            kind,
            Some(&hop.token),
            &prefix,
            options,
            access,
            mapped,
        ));
        if hop.token.is_empty() {
            return Ok(steps);
        }
        prefix.push(hop.token.clone());

        kind = match &hop.token {
            PathToken::Field(_) => {
                let Some(reference) = hop.field else {
                    continue;
                };
                let Some(relationship) = schema.field(reference).relationship() else {
                    continue;
                };
                context = context.follow(schema, reference);
                if relationship.kind.is_to_many() {
                    StepKind::ToMany
                } else if schema.table(context.table).is_tree() {
                    StepKind::TreeRanks
                } else {
                    StepKind::Fields
                }
            }
            PathToken::ToMany(_) if schema.table(context.table).is_tree() => StepKind::TreeRanks,
            PathToken::Rank(_) | PathToken::AnyRank => {
                context = context.enter_rank();
                StepKind::Fields
            }
            PathToken::ToMany(_) | PathToken::Empty => StepKind::Fields,
        };
    }

    if resolved.next != NextToken::End {
        steps.push(build_step(
            schema,
            &context,
            StepKind::from_next(resolved.next),
            None,
            &prefix,
            options,
            access,
            mapped,
        ));
    }
    Ok(steps)
}

#[allow(clippy::too_many_arguments)]
fn build_step(
    schema: &Schema,
    context: &TraversalContext,
    kind: StepKind,
    selected: Option<&PathToken>,
    prefix: &[PathToken],
    options: &NavigatorOptions,
    access: &dyn AccessPolicy,
    mapped: &dyn MappedFields,
) -> LineStep {
    let table = schema.table(context.table);
    let mapped_tokens = mapped.mapped_tokens(prefix);
    let step_options = match kind {
        StepKind::ToMany => to_many_options(schema, context, selected, &mapped_tokens),
        StepKind::TreeRanks => rank_options(schema, context, selected, options),
        StepKind::Fields => field_options(schema, context, selected, &mapped_tokens, options, access),
    };
    LineStep {
        table_name: table.name.clone(),
        table_label: table.label.clone(),
        kind,
        selected: selected.cloned(),
        options: step_options,
    }
}

fn to_many_options(
    schema: &Schema,
    context: &TraversalContext,
    selected: Option<&PathToken>,
    mapped_tokens: &[PathToken],
) -> Vec<StepOption> {
    let table = schema.table(context.table);
    let mut used: BTreeSet<usize> = mapped_tokens
        .iter()
        .filter_map(PathToken::to_many_index)
        .collect();
    if let Some(index) = selected.and_then(PathToken::to_many_index) {
        used.insert(index);
    }
    let cap = context
        .parent
        .and_then(|parent| schema.field(parent).relationship())
        .and_then(|relationship| relationship.kind.max_to_many_index());

    let option = |index: usize, label: String| {
        let token = PathToken::ToMany(index);
        StepOption {
            is_default: selected == Some(&token),
            token,
            label,
            is_relationship: true,
            is_required: false,
            is_hidden: false,
            is_enabled: true,
            related_table: Some(table.name.clone()),
        }
    };

    let mut options: Vec<StepOption> = used
        .iter()
        .map(|index| option(*index, format!("#{index}")))
        .collect();
    let fresh = used.last().copied().unwrap_or(0) + 1;
    if cap.is_none_or(|cap| fresh <= cap) {
        options.push(option(fresh, format!("Add #{fresh}")));
    }
    options
}

fn rank_options(
    schema: &Schema,
    context: &TraversalContext,
    selected: Option<&PathToken>,
    options: &NavigatorOptions,
) -> Vec<StepOption> {
    let table = schema.table(context.table);
    let mut tokens: Vec<(PathToken, String)> = table
        .ranks
        .iter()
        .map(|rank| (PathToken::rank(rank.name.clone()), rank.title.clone()))
        .collect();
    if options.allow_any_rank {
        tokens.push((PathToken::AnyRank, "Any rank".to_string()));
    }
    tokens
        .into_iter()
        .map(|(token, label)| StepOption {
            is_default: selected == Some(&token),
            token,
            label,
            is_relationship: true,
            is_required: false,
            is_hidden: false,
            is_enabled: true,
            related_table: Some(table.name.clone()),
        })
        .collect()
}

fn field_options(
    schema: &Schema,
    context: &TraversalContext,
    selected: Option<&PathToken>,
    mapped_tokens: &[PathToken],
    options: &NavigatorOptions,
    access: &dyn AccessPolicy,
) -> Vec<StepOption> {
    let table = schema.table(context.table);
    // The selected field stays listed even when it would otherwise be filtered out.
    (0..table.fields.len())
        .map(|index| FieldRef {
            table: context.table,
            index,
        })
        .filter_map(|reference| {
            let field = schema.field(reference);
            let token = PathToken::field(field.name.clone());
            let is_default = selected == Some(&token);
            if !is_default && !context.is_selectable(schema, options, access, reference) {
                return None;
            }
            let is_relationship = field.is_relationship();
            Some(StepOption {
                is_enabled: is_relationship || is_default || !mapped_tokens.contains(&token),
                is_default,
                label: field.label.clone(),
                is_relationship,
                is_required: field.required,
                is_hidden: field.hidden,
                related_table: schema
                    .related_table(reference)
                    .map(|related| related.name.clone()),
                token,
            })
        })
        .collect()
}
