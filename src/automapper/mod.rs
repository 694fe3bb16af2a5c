//! Header-to-path matching.
//!
//! The auto-mapper walks the schema graph breadth first from a starting
//! table, trying every unmapped header against the fields of each table it
//! reaches. Shallow matches therefore always win over deep ones.
//!
//! Two passes run over the graph:
//!
//! 1. [`SearchPass::ShortcutsAndTableSynonyms`] applies the hand-written
//!    shortcut rules and matches headers that combine a table synonym with a
//!    field name (`Collector Last Name`).
//! 2. [`SearchPass::SynonymsAndMatches`] compares headers against field
//!    synonyms, labels and names. Each table is searched at most once in this
//!    pass, which is what keeps cyclic schemas finite.
//!
//! Every candidate goes through [`AutoMapper::commit`], which owns the
//! to-many index bookkeeping and the final accept/reject decision.

pub mod headers;

use std::collections::HashSet;

use itertools::Itertools;
use log::{debug, error, info, trace};

use crate::{
    lines::{MappedFields, MappedLines, MappingLine},
    mapping_path::{MappingPath, PathToken},
    navigator::{NavigatorOptions, TraversalContext},
    rules::{AutoMapperScope, HeaderMatcher, RuleTable},
    schema::{AccessPolicy, AllowAll, FieldRef, NextToken, Schema, SchemaError, Table, TableId},
};

use self::headers::{HeaderForms, NameForms};

/// Maximum number of relationship hops explored from the starting table.
pub const DEFAULT_DEPTH_LIMIT: usize = 6;
/// Maximum number of proposals [`suggest`] returns.
pub const SUGGESTION_LIMIT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPass {
    ShortcutsAndTableSynonyms,
    SynonymsAndMatches,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoMapperOptions {
    pub scope: AutoMapperScope,
    pub depth_limit: usize,
    /// Keep collecting candidates for a header after its first match.
    pub allow_multiple_mappings: bool,
    pub navigator: NavigatorOptions,
}

impl AutoMapperOptions {
    pub fn for_scope(scope: AutoMapperScope) -> Self {
        Self {
            scope,
            depth_limit: DEFAULT_DEPTH_LIMIT,
            allow_multiple_mappings: scope == AutoMapperScope::Suggestion,
            navigator: NavigatorOptions::default(),
        }
    }
}

impl Default for AutoMapperOptions {
    fn default() -> Self {
        Self::for_scope(AutoMapperScope::AutoMapper)
    }
}

/// Proposals per header, in header order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutoMapperResults {
    entries: Vec<(String, Vec<MappingPath>)>,
    searched_tables: Vec<String>,
}

impl AutoMapperResults {
    /// Proposals for the first header named `header`.
    pub fn get(&self, header: &str) -> &[MappingPath] {
        self.entries
            .iter()
            .find(|(name, _)| name == header)
            .map_or(&[], |(_, paths)| paths.as_slice())
    }

    pub fn paths(&self, index: usize) -> &[MappingPath] {
        self.entries
            .get(index)
            .map_or(&[], |(_, paths)| paths.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[MappingPath])> {
        self.entries
            .iter()
            .map(|(header, paths)| (header.as_str(), paths.as_slice()))
    }

    pub fn mapped_count(&self) -> usize {
        self.entries.iter().filter(|(_, paths)| !paths.is_empty()).count()
    }

    /// Tables inspected during the synonym pass, in visiting order.
    pub fn searched_tables(&self) -> &[String] {
        &self.searched_tables
    }

    /// One line per header carrying its first proposal, or unmapped.
    pub fn to_lines(&self) -> Vec<MappingLine> {
        self.entries
            .iter()
            .map(|(header, paths)| match paths.first() {
                Some(path) => MappingLine::new(header.clone(), path.clone()),
                None => MappingLine::unmapped(header.clone()),
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
struct HeaderState {
    forms: HeaderForms,
    mapped: bool,
    denied: bool,
}

impl HeaderState {
    fn is_open(&self) -> bool {
        !self.mapped && !self.denied
    }
}

/// A literal field with every name a header may use for it.
struct FieldCandidate<'r> {
    name: String,
    synonyms: Vec<&'r HeaderMatcher>,
    own_names: [NameForms; 2],
    all_names: Vec<NameForms>,
}

#[derive(Debug, Clone)]
struct SearchNode {
    context: TraversalContext,
    path: MappingPath,
}

/// One auto-mapping run. All search state lives here and is dropped with
/// the value, so concurrent runs never share anything mutable.
pub struct AutoMapper<'a> {
    schema: &'a Schema,
    rules: &'a RuleTable,
    access: &'a dyn AccessPolicy,
    options: AutoMapperOptions,
    base_table: TableId,
    start: TraversalContext,
    starting_path: MappingPath,
    /// Tokens before this position belong to the caller and are never
    /// renumbered.
    path_offset: usize,
    /// Set when the starting path already ends on a literal field.
    exhausted: bool,
    headers: Vec<HeaderState>,
    results: Vec<Vec<MappingPath>>,
    existing: Vec<MappingPath>,
    searched: HashSet<TableId>,
    searched_order: Vec<TableId>,
}

impl<'a> AutoMapper<'a> {
    pub fn new(
        schema: &'a Schema,
        rules: &'a RuleTable,
        base_table: TableId,
        headers: &[String],
        options: AutoMapperOptions,
    ) -> Self {
        let headers: Vec<HeaderState> = headers
            .iter()
            .map(|header| {
                let forms = HeaderForms::new(header);
                let denied = rules.is_header_denied(&forms, options.scope);
                if denied {
                    debug!("Header '{header}' is excluded by the deny list");
                }
                HeaderState {
                    forms,
                    mapped: false,
                    denied,
                }
            })
            .collect();
        Self {
            schema,
            rules,
            access: &AllowAll,
            options,
            base_table,
            start: TraversalContext::root(base_table),
            starting_path: MappingPath::default(),
            path_offset: 0,
            exhausted: false,
            results: vec![Vec::new(); headers.len()],
            headers,
            existing: Vec::new(),
            searched: HashSet::new(),
            searched_order: Vec::new(),
        }
    }

    pub fn with_access(mut self, access: &'a dyn AccessPolicy) -> Self {
        self.access = access;
        self
    }

    /// Restricts the search to paths extending `prefix`. A prefix ending on a
    /// to-many relationship gets `#1` appended; that index stays renumberable.
    pub fn starting_at(mut self, prefix: &MappingPath) -> Result<Self, SchemaError> {
        let prefix: MappingPath = prefix
            .iter()
            .take_while(|token| !token.is_empty())
            .cloned()
            .collect();
        let resolved = self.schema.resolve_path(self.base_table, &prefix)?;
        self.start = TraversalContext::at_end_of(self.schema, self.base_table, &resolved);
        self.path_offset = prefix.len();
        self.exhausted = resolved.next == NextToken::End;
        let mut starting_path = resolved.canonical_path();
        if resolved.next == NextToken::ToManyIndex {
            starting_path = starting_path.with(PathToken::ToMany(1));
        }
        self.starting_path = starting_path;
        Ok(self)
    }

    /// Paths already claimed elsewhere; new proposals never collide with them.
    pub fn with_existing(mut self, existing: Vec<MappingPath>) -> Self {
        self.existing = existing;
        self
    }

    pub fn run(mut self) -> AutoMapperResults {
        if !self.exhausted {
            for pass in [
                SearchPass::ShortcutsAndTableSynonyms,
                SearchPass::SynonymsAndMatches,
            ] {
                self.search(pass);
            }
        }

        let mapped = self.results.iter().filter(|paths| !paths.is_empty()).count();
        info!(
            "Auto-mapper ({}) matched {mapped} of {} header(s) from '{}'",
            self.options.scope.as_str(),
            self.headers.len(),
            self.schema.table(self.start.table).name
        );

        let searched_tables = self
            .searched_order
            .iter()
            .map(|id| self.schema.table(*id).name.clone())
            .collect();
        AutoMapperResults {
            entries: self
                .headers
                .into_iter()
                .zip(self.results)
                .map(|(header, paths)| (header.forms.original, paths))
                .collect(),
            searched_tables,
        }
    }

    fn all_headers_mapped(&self) -> bool {
        self.headers.iter().all(|header| !header.is_open())
    }

    fn search(&mut self, pass: SearchPass) {
        self.searched.clear();
        self.searched_order.clear();

        let mut queue: Vec<Vec<SearchNode>> = vec![vec![SearchNode {
            context: self.start,
            path: self.starting_path.clone(),
        }]];
        let mut level = 0;
        while level < queue.len() && level < self.options.depth_limit {
            if self.all_headers_mapped() {
                trace!("Every header is mapped; stopping {pass:?} at level {level}");
                break;
            }
            let nodes = std::mem::take(&mut queue[level]);
            let mut next_level = Vec::new();
            for node in &nodes {
                self.visit(node, level, pass, &mut next_level);
            }
            if !next_level.is_empty() {
                queue.push(next_level);
            }
            level += 1;
        }
    }

    fn visit(&mut self, node: &SearchNode, level: usize, pass: SearchPass, next_level: &mut Vec<SearchNode>) {
        let schema = self.schema;
        let table = schema.table(node.context.table);
        if pass == SearchPass::SynonymsAndMatches {
            if !self.searched.insert(table.id) {
                return;
            }
            self.searched_order.push(table.id);
        }
        trace!("{pass:?} level {level}: '{}' at '{}'", table.name, node.path);

        let needs_rank = table.is_tree() && !node.context.in_tree_node;
        match pass {
            SearchPass::ShortcutsAndTableSynonyms => {
                self.apply_shortcuts(node, table);
                let synonyms = self.rules.table_synonyms(&table.name, &node.path);
                if !synonyms.is_empty() && !needs_rank {
                    self.match_fields(node, table, &synonyms, true);
                }
            }
            SearchPass::SynonymsAndMatches => {
                if needs_rank {
                    self.match_ranks(node, table);
                } else {
                    let names = self.table_names(node, table);
                    self.match_fields(node, table, &names, false);
                }
            }
        }

        if table.is_tree() || level + 1 >= self.options.depth_limit {
            return;
        }
        self.enqueue_relationships(node, pass, next_level);
    }

    /// Names a header may use for `table` in compound and formatted rules.
    fn table_names(&self, node: &SearchNode, table: &Table) -> Vec<NameForms> {
        let mut names = vec![NameForms::new(&table.label), NameForms::new(&table.name)];
        names.extend(self.rules.table_synonyms(&table.name, &node.path));
        if let Some(parent) = node.context.parent {
            let field = self.schema.field(parent);
            names.push(NameForms::new(&field.label));
            names.push(NameForms::new(&field.name));
        }
        names
            .into_iter()
            .unique_by(|name| name.lowercase.clone())
            .collect()
    }

    fn apply_shortcuts(&mut self, node: &SearchNode, table: &Table) {
        let rules = self.rules;
        let shortcuts: Vec<_> = rules.shortcuts(&table.name, self.options.scope).collect();
        for index in 0..self.headers.len() {
            if !self.headers[index].is_open() {
                continue;
            }
            for shortcut in &shortcuts {
                if shortcut.headers.matches(&self.headers[index].forms)
                    && !self.commit(index, &node.path, shortcut.mapping_path.tokens(), None)
                {
                    break;
                }
            }
        }
    }

    /// Tries every open header against every selectable literal field. With
    /// `compound_only`, only `<table name> [n] <field>` headers are accepted.
    fn match_fields(&mut self, node: &SearchNode, table: &Table, table_names: &[NameForms], compound_only: bool) {
        let schema = self.schema;
        let rules = self.rules;
        let scope = self.options.scope;
        let candidates: Vec<FieldCandidate> = node
            .context
            .selectable_fields(schema, &self.options.navigator, self.access)
            .into_iter()
            .map(|reference| schema.field(reference))
            .filter(|field| !field.is_relationship())
            .map(|field| {
                let synonyms: Vec<_> = rules.field_synonyms(&table.name, &field.name, scope).collect();
                let own_names = [NameForms::new(&field.label), NameForms::new(&field.name)];
                let mut all_names: Vec<NameForms> = own_names.to_vec();
                for synonym in &synonyms {
                    all_names.extend(synonym.strings().iter().cloned());
                }
                FieldCandidate {
                    name: field.name.clone(),
                    synonyms,
                    own_names,
                    all_names,
                }
            })
            .collect();

        for index in 0..self.headers.len() {
            if !self.headers[index].is_open() {
                continue;
            }
            for candidate in &candidates {
                let forms = &self.headers[index].forms;
                let direct = !compound_only
                    && (candidate.synonyms.iter().any(|synonym| synonym.matches(forms))
                        || candidate.own_names.iter().any(|name| forms.matches_name(name)));
                let matched = if direct {
                    Some(None)
                } else if let Some(to_many_index) = forms.compound_match(table_names, &candidate.all_names) {
                    Some(to_many_index)
                } else if candidate
                    .synonyms
                    .iter()
                    .any(|synonym| synonym.matches_formatted(forms, table_names))
                {
                    Some(None)
                } else {
                    None
                };
                if let Some(to_many_index) = matched
                    && !self.commit(
                        index,
                        &node.path,
                        &[PathToken::field(candidate.name.clone())],
                        to_many_index,
                    )
                {
                    break;
                }
            }
        }
    }

    /// Matches headers naming a rank (`Species`) or a rank and a field
    /// (`Species Author`) of the tree table at `node`.
    fn match_ranks(&mut self, node: &SearchNode, table: &Table) {
        let schema = self.schema;
        let rules = self.rules;
        let fields: Vec<FieldRef> = node
            .context
            .enter_rank()
            .selectable_fields(schema, &self.options.navigator, self.access)
            .into_iter()
            .filter(|reference| !schema.field(*reference).is_relationship())
            .collect();
        let name_field = fields
            .iter()
            .map(|reference| schema.field(*reference))
            .find(|field| field.name.eq_ignore_ascii_case("name"));
        let ranks: Vec<(&str, Vec<NameForms>)> = table
            .ranks
            .iter()
            .map(|rank| {
                let mut names = vec![NameForms::new(&rank.name), NameForms::new(&rank.title)];
                names.extend(rules.rank_synonyms(&table.name, &rank.name).iter().cloned());
                (rank.name.as_str(), names)
            })
            .collect();

        for index in 0..self.headers.len() {
            if !self.headers[index].is_open() {
                continue;
            }
            for (rank, rank_names) in &ranks {
                let forms = &self.headers[index].forms;
                let target = if rank_names.iter().any(|name| forms.matches_name(name)) {
                    name_field.map(|field| field.name.clone())
                } else {
                    fields.iter().map(|reference| schema.field(*reference)).find_map(|field| {
                        let names = [NameForms::new(&field.label), NameForms::new(&field.name)];
                        forms
                            .compound_match(rank_names, &names)
                            .map(|_| field.name.clone())
                    })
                };
                if let Some(field_name) = target {
                    let tail = [PathToken::rank(*rank), PathToken::field(field_name)];
                    if !self.commit(index, &node.path, &tail, None) {
                        break;
                    }
                }
            }
        }
    }

    fn enqueue_relationships(&self, node: &SearchNode, pass: SearchPass, next_level: &mut Vec<SearchNode>) {
        let schema = self.schema;
        for reference in node
            .context
            .selectable_fields(schema, &self.options.navigator, self.access)
        {
            let field = schema.field(reference);
            let Some(relationship) = field.relationship() else {
                continue;
            };
            if pass == SearchPass::SynonymsAndMatches
                && (self.searched.contains(&relationship.related)
                    || next_level
                        .iter()
                        .any(|queued| queued.context.table == relationship.related))
            {
                continue;
            }
            let mut path = node.path.with(PathToken::field(field.name.clone()));
            if relationship.kind.is_to_many() {
                path = path.with(PathToken::ToMany(1));
            }
            next_level.push(SearchNode {
                context: node.context.follow(schema, reference),
                path,
            });
        }
    }

    /// Validates a candidate mapping and records it.
    ///
    /// Returns `true` when the caller should keep looking for more
    /// candidates for this header, `false` once the header is settled.
    fn commit(
        &mut self,
        header: usize,
        node_path: &MappingPath,
        new_parts: &[PathToken],
        to_many_index: Option<usize>,
    ) -> bool {
        debug_assert!(!new_parts.is_empty(), "commit needs at least one new token");
        if new_parts.is_empty() {
            error!("Ignoring empty candidate for header '{}'", self.headers[header].forms.original);
            return true;
        }

        let schema = self.schema;
        let candidate = node_path.join(new_parts);
        let resolved = match schema.resolve_path(self.base_table, &candidate) {
            Ok(resolved) => resolved,
            Err(err) => {
                debug!("Rejecting '{candidate}': {err}");
                return true;
            }
        };
        let mut path = resolved.canonical_path();

        if let Some(tail) = resolved.tail_field() {
            let table = schema.table(tail.table);
            let field = schema.field(tail);
            if self.rules.is_field_denied(&table.name, &field.name, self.options.scope) {
                debug!("Rejecting '{path}': field is denied in {} scope", self.options.scope.as_str());
                return true;
            }
        }

        if !path.starts_with(self.starting_path.tokens()) {
            debug!("Rejecting '{path}': outside of '{}'", self.starting_path);
            return true;
        }

        let cap_at = |position: usize| {
            position
                .checked_sub(1)
                .and_then(|parent| resolved.hops.get(parent))
                .and_then(|hop| hop.field)
                .and_then(|reference| schema.field(reference).relationship())
                .and_then(|relationship| relationship.kind.max_to_many_index())
        };

        if let Some(index) = to_many_index
            && let Some(position) = path.last_to_many_position(self.path_offset)
        {
            if cap_at(position).is_some_and(|cap| index > cap) {
                debug!("Rejecting '{path}': #{index} exceeds the relationship's capacity");
                return true;
            }
            path = path.replace(position, PathToken::ToMany(index));
        }

        while self.collides(&path) {
            let Some(position) = path.last_to_many_position(self.path_offset) else {
                debug!("Rejecting '{path}': already mapped");
                return true;
            };
            let next = path
                .get(position)
                .and_then(PathToken::to_many_index)
                .unwrap_or(0)
                + 1;
            if cap_at(position).is_some_and(|cap| next > cap) {
                debug!("Rejecting '{path}': no free slot left");
                return true;
            }
            path = path.replace(position, PathToken::ToMany(next));
        }

        if let Some(parent) = resolved.parent_relationship()
            && schema
                .field(parent)
                .relationship()
                .is_some_and(|relationship| relationship.related == self.base_table)
        {
            debug!("Rejecting '{path}': leads back to the base table");
            return true;
        }

        debug!("Mapped '{}' to '{path}'", self.headers[header].forms.original);
        self.results[header].push(path);
        if self.options.allow_multiple_mappings {
            return true;
        }
        self.headers[header].mapped = true;
        false
    }

    fn collides(&self, path: &MappingPath) -> bool {
        self.existing.contains(path) || self.results.iter().flatten().any(|taken| taken == path)
    }
}

/// Maps every header in one go.
pub fn map(
    schema: &Schema,
    rules: &RuleTable,
    base_table: TableId,
    headers: &[String],
    options: AutoMapperOptions,
    starting_path: Option<&MappingPath>,
) -> Result<AutoMapperResults, SchemaError> {
    let mut mapper = AutoMapper::new(schema, rules, base_table, headers, options);
    if let Some(prefix) = starting_path {
        mapper = mapper.starting_at(prefix)?;
    }
    Ok(mapper.run())
}

/// Up to [`SUGGESTION_LIMIT`] proposals for the column at `line`, extending
/// the first `position` tokens of its current path. Paths used by the other
/// lines are never proposed.
pub fn suggest(
    schema: &Schema,
    rules: &RuleTable,
    access: &dyn AccessPolicy,
    base_table: TableId,
    lines: &[MappingLine],
    line: usize,
    position: usize,
) -> Result<Vec<MappingPath>, SchemaError> {
    let Some(current) = lines.get(line) else {
        return Ok(Vec::new());
    };
    let prefix = current.mapping_path.prefix(position);
    let existing = MappedLines::excluding(lines, line).mapped_paths();
    let results = AutoMapper::new(
        schema,
        rules,
        base_table,
        std::slice::from_ref(&current.header_name),
        AutoMapperOptions::for_scope(AutoMapperScope::Suggestion),
    )
    .with_access(access)
    .starting_at(&prefix)?
    .with_existing(existing)
    .run();

    Ok(results
        .paths(0)
        .iter()
        .take(SUGGESTION_LIMIT)
        .cloned()
        .collect())
}
