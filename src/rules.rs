//! Auto-mapper rule table: shortcuts, synonyms and deny lists.
//!
//! Rules are authored in YAML ([`RuleTableDefinition`]) and compiled once
//! into a [`RuleTable`] with lowercase keys and pre-built regexes. A default
//! table ships inside the binary; `--rules` replaces it wholesale.

use std::{
    collections::{BTreeMap, HashMap},
    fs::File,
    io::BufReader,
    path::Path,
    sync::OnceLock,
};

use anyhow::{Context, Result};
use clap::ValueEnum;
use log::debug;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::{
    automapper::headers::{HeaderForms, NameForms},
    mapping_path::{MappingPath, PathToken},
};

const DEFAULT_RULES: &str = include_str!("../rules/default.yaml");

static BUILTIN: OnceLock<RuleTable> = OnceLock::new();

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "camelCase")]
pub enum AutoMapperScope {
    /// Bulk mapping of a whole header row; one mapping per header.
    AutoMapper,
    /// Proposals for a single column; every candidate is collected.
    Suggestion,
}

impl AutoMapperScope {
    pub fn as_str(self) -> &'static str {
        match self {
            AutoMapperScope::AutoMapper => "autoMapper",
            AutoMapperScope::Suggestion => "suggestion",
        }
    }

    fn all() -> Vec<AutoMapperScope> {
        vec![AutoMapperScope::AutoMapper, AutoMapperScope::Suggestion]
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RuleTableDefinition {
    /// Table name to alternative table names, each scoped to the tail of the
    /// path the table is reached by.
    #[serde(default)]
    pub table_synonyms: BTreeMap<String, Vec<TableSynonymDefinition>>,
    /// Tree table name to rank name to alternative rank names.
    #[serde(default)]
    pub rank_synonyms: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    #[serde(default)]
    pub shortcuts: BTreeMap<String, Vec<ShortcutDefinition>>,
    /// Table name to field name to header rules.
    #[serde(default)]
    pub synonyms: BTreeMap<String, BTreeMap<String, Vec<SynonymDefinition>>>,
    #[serde(default)]
    pub deny: DenyDefinition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSynonymDefinition {
    pub mapping_path_filter: Vec<String>,
    pub synonyms: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortcutDefinition {
    #[serde(default = "AutoMapperScope::all")]
    pub scopes: Vec<AutoMapperScope>,
    pub mapping_path: Vec<String>,
    pub headers: HeaderMatcherDefinition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynonymDefinition {
    #[serde(default = "AutoMapperScope::all")]
    pub scopes: Vec<AutoMapperScope>,
    pub headers: HeaderMatcherDefinition,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeaderMatcherDefinition {
    #[serde(default)]
    pub string: Vec<String>,
    #[serde(default)]
    pub contains: Vec<String>,
    #[serde(default)]
    pub regex: Vec<String>,
    /// Patterns where `%s` stands for a table name or one of its synonyms.
    #[serde(default)]
    pub formatted_header_field_synonym: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DenyDefinition {
    /// Table name to field name to the scopes the field is never proposed in.
    #[serde(default)]
    pub fields: BTreeMap<String, BTreeMap<String, Vec<AutoMapperScope>>>,
    /// Header regexes that are never mapped, per scope.
    #[serde(default)]
    pub headers: BTreeMap<AutoMapperScope, Vec<String>>,
}

fn compile_regex(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .with_context(|| format!("Compiling rule regex '{pattern}'"))
}

#[derive(Debug, Clone)]
pub struct HeaderMatcher {
    strings: Vec<NameForms>,
    contains: Vec<String>,
    regexes: Vec<Regex>,
    formatted: Vec<String>,
}

impl HeaderMatcher {
    fn compile(definition: &HeaderMatcherDefinition) -> Result<Self> {
        Ok(Self {
            strings: definition.string.iter().map(|raw| NameForms::new(raw)).collect(),
            contains: definition
                .contains
                .iter()
                .map(|raw| raw.to_lowercase())
                .collect(),
            regexes: definition
                .regex
                .iter()
                .map(|pattern| compile_regex(pattern))
                .collect::<Result<_>>()?,
            formatted: definition
                .formatted_header_field_synonym
                .iter()
                .map(|raw| raw.to_lowercase())
                .collect(),
        })
    }

    /// Plain string, substring and regex rules. Formatted synonyms need a
    /// table name and are checked through [`HeaderMatcher::matches_formatted`].
    pub fn matches(&self, header: &HeaderForms) -> bool {
        self.strings.iter().any(|name| header.matches_name(name))
            || self
                .contains
                .iter()
                .any(|needle| header.lowercase().contains(needle.as_str()))
            || self
                .regexes
                .iter()
                .any(|regex| regex.is_match(header.lowercase()))
    }

    pub fn matches_formatted(&self, header: &HeaderForms, table_names: &[NameForms]) -> bool {
        self.formatted.iter().any(|pattern| {
            table_names.iter().any(|table| {
                header.matches_name(&NameForms::new(&pattern.replace("%s", &table.lowercase)))
            })
        })
    }

    /// Literal synonyms, usable as field names in compound headers.
    pub fn strings(&self) -> &[NameForms] {
        &self.strings
    }
}

#[derive(Debug, Clone)]
pub struct TableSynonym {
    pub filter: MappingPath,
    pub synonyms: Vec<NameForms>,
}

#[derive(Debug, Clone)]
pub struct Shortcut {
    pub scopes: Vec<AutoMapperScope>,
    pub mapping_path: MappingPath,
    pub headers: HeaderMatcher,
}

#[derive(Debug, Clone)]
struct FieldSynonym {
    scopes: Vec<AutoMapperScope>,
    headers: HeaderMatcher,
}

/// Compiled rules, keyed by lowercase table and field names.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    table_synonyms: HashMap<String, Vec<TableSynonym>>,
    rank_synonyms: HashMap<String, HashMap<String, Vec<NameForms>>>,
    shortcuts: HashMap<String, Vec<Shortcut>>,
    synonyms: HashMap<String, HashMap<String, Vec<FieldSynonym>>>,
    denied_fields: HashMap<String, HashMap<String, Vec<AutoMapperScope>>>,
    denied_headers: HashMap<AutoMapperScope, Vec<Regex>>,
}

impl RuleTable {
    /// The rule table embedded in the binary.
    pub fn builtin() -> &'static RuleTable {
        BUILTIN.get_or_init(|| {
            RuleTable::from_yaml_str(DEFAULT_RULES).expect("Embedded rule table should compile")
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening rules file {path:?}"))?;
        let definition: RuleTableDefinition = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing rules YAML {path:?}"))?;
        RuleTable::compile(&definition).with_context(|| format!("Compiling rules from {path:?}"))
    }

    pub fn from_yaml_str(input: &str) -> Result<Self> {
        let definition: RuleTableDefinition =
            serde_yaml::from_str(input).context("Parsing rules YAML")?;
        RuleTable::compile(&definition)
    }

    pub fn compile(definition: &RuleTableDefinition) -> Result<Self> {
        let mut table = RuleTable::default();

        for (name, entries) in &definition.table_synonyms {
            table.table_synonyms.insert(
                name.to_lowercase(),
                entries
                    .iter()
                    .map(|entry| TableSynonym {
                        filter: entry.mapping_path_filter.iter().map(|raw| PathToken::parse(raw)).collect(),
                        synonyms: entry.synonyms.iter().map(|raw| NameForms::new(raw)).collect(),
                    })
                    .collect(),
            );
        }

        for (name, ranks) in &definition.rank_synonyms {
            table.rank_synonyms.insert(
                name.to_lowercase(),
                ranks
                    .iter()
                    .map(|(rank, synonyms)| {
                        (
                            rank.to_lowercase(),
                            synonyms.iter().map(|raw| NameForms::new(raw)).collect(),
                        )
                    })
                    .collect(),
            );
        }

        for (name, entries) in &definition.shortcuts {
            let compiled = entries
                .iter()
                .map(|entry| {
                    Ok(Shortcut {
                        scopes: entry.scopes.clone(),
                        mapping_path: entry.mapping_path.iter().map(|raw| PathToken::parse(raw)).collect(),
                        headers: HeaderMatcher::compile(&entry.headers)?,
                    })
                })
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("Compiling shortcuts for table '{name}'"))?;
            table.shortcuts.insert(name.to_lowercase(), compiled);
        }

        for (name, fields) in &definition.synonyms {
            let mut by_field = HashMap::with_capacity(fields.len());
            for (field, entries) in fields {
                let compiled = entries
                    .iter()
                    .map(|entry| {
                        Ok(FieldSynonym {
                            scopes: entry.scopes.clone(),
                            headers: HeaderMatcher::compile(&entry.headers)?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()
                    .with_context(|| format!("Compiling synonyms for '{name}.{field}'"))?;
                by_field.insert(field.to_lowercase(), compiled);
            }
            table.synonyms.insert(name.to_lowercase(), by_field);
        }

        for (name, fields) in &definition.deny.fields {
            table.denied_fields.insert(
                name.to_lowercase(),
                fields
                    .iter()
                    .map(|(field, scopes)| (field.to_lowercase(), scopes.clone()))
                    .collect(),
            );
        }

        for (scope, patterns) in &definition.deny.headers {
            let compiled = patterns
                .iter()
                .map(|pattern| compile_regex(pattern))
                .collect::<Result<Vec<_>>>()?;
            table.denied_headers.insert(*scope, compiled);
        }

        debug!(
            "Compiled rule table: {} shortcut tables, {} synonym tables, {} table synonym entries",
            table.shortcuts.len(),
            table.synonyms.len(),
            table.table_synonyms.len()
        );
        Ok(table)
    }

    pub fn shortcuts<'a>(
        &'a self,
        table: &str,
        scope: AutoMapperScope,
    ) -> impl Iterator<Item = &'a Shortcut> + 'a {
        self.shortcuts
            .get(&table.to_lowercase())
            .into_iter()
            .flatten()
            .filter(move |shortcut| shortcut.scopes.contains(&scope))
    }

    pub fn field_synonyms<'a>(
        &'a self,
        table: &str,
        field: &str,
        scope: AutoMapperScope,
    ) -> impl Iterator<Item = &'a HeaderMatcher> + 'a {
        self.synonyms
            .get(&table.to_lowercase())
            .and_then(|fields| fields.get(&field.to_lowercase()))
            .into_iter()
            .flatten()
            .filter(move |synonym| synonym.scopes.contains(&scope))
            .map(|synonym| &synonym.headers)
    }

    /// Synonyms of `table` whose filter matches the tail of `path`. Filters
    /// are compared with to-many indices canonicalised.
    pub fn table_synonyms(&self, table: &str, path: &MappingPath) -> Vec<NameForms> {
        let canonical = path.canonicalize();
        self.table_synonyms
            .get(&table.to_lowercase())
            .into_iter()
            .flatten()
            .filter(|entry| canonical.ends_with(entry.filter.canonicalize().tokens()))
            .flat_map(|entry| entry.synonyms.iter().cloned())
            .collect()
    }

    pub fn rank_synonyms(&self, table: &str, rank: &str) -> &[NameForms] {
        self.rank_synonyms
            .get(&table.to_lowercase())
            .and_then(|ranks| ranks.get(&rank.to_lowercase()))
            .map_or(&[], Vec::as_slice)
    }

    pub fn is_field_denied(&self, table: &str, field: &str, scope: AutoMapperScope) -> bool {
        self.denied_fields
            .get(&table.to_lowercase())
            .and_then(|fields| fields.get(&field.to_lowercase()))
            .is_some_and(|scopes| scopes.contains(&scope))
    }

    pub fn is_header_denied(&self, header: &HeaderForms, scope: AutoMapperScope) -> bool {
        self.denied_headers
            .get(&scope)
            .is_some_and(|patterns| patterns.iter().any(|regex| regex.is_match(header.lowercase())))
    }
}
