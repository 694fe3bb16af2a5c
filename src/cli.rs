use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::{
    automapper::DEFAULT_DEPTH_LIMIT, navigator::NavigatorOptions, rules::AutoMapperScope,
};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Map spreadsheet columns onto a relational schema and build upload plans",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Propose a mapping path for every header of a CSV file
    Automap(AutomapArgs),
    /// Suggest up to three paths for one line of a mapping-lines file
    Suggest(SuggestArgs),
    /// Show the selectable tokens at every step of a mapping path
    Navigate(NavigateArgs),
    /// Encode mapping lines into an upload plan
    Plan(PlanArgs),
    /// Decode an upload plan back into mapping lines
    Lines(LinesArgs),
}

#[derive(Debug, Args)]
pub struct SchemaArgs {
    /// Schema definition (YAML)
    #[arg(short = 's', long = "schema")]
    pub schema: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, Args)]
pub struct NavigatorFlags {
    /// Offer hidden fields
    #[arg(long = "show-hidden")]
    pub show_hidden: bool,
    /// Ignore read-only and system-table restrictions
    #[arg(long = "no-restrictions")]
    pub no_restrictions: bool,
    /// Allow a to-many relationship directly under another one
    #[arg(long = "allow-nested-to-many")]
    pub allow_nested_to_many: bool,
    /// Offer the any-rank wildcard on tree tables
    #[arg(long = "allow-any-rank")]
    pub allow_any_rank: bool,
}

impl NavigatorFlags {
    pub fn options(&self) -> NavigatorOptions {
        NavigatorOptions {
            show_hidden_fields: self.show_hidden,
            no_restrictions: self.no_restrictions,
            allow_nested_to_many: self.allow_nested_to_many,
            allow_any_rank: self.allow_any_rank,
        }
    }
}

#[derive(Debug, Args)]
pub struct AutomapArgs {
    #[command(flatten)]
    pub schema: SchemaArgs,
    /// Table every mapping path starts from
    #[arg(short = 'b', long = "base-table")]
    pub base_table: String,
    /// CSV file whose header row is mapped (`-` for stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Rule table (YAML); the built-in rules are used when omitted
    #[arg(long = "rules")]
    pub rules: Option<PathBuf>,
    /// Rule scope to apply
    #[arg(long, value_enum, default_value_t = AutoMapperScope::AutoMapper)]
    pub scope: AutoMapperScope,
    /// Maximum number of relationship hops to explore
    #[arg(long = "depth-limit", default_value_t = DEFAULT_DEPTH_LIMIT)]
    pub depth_limit: usize,
    /// Only propose paths below this prefix, e.g. `collectingEvent.locality`
    #[arg(long = "starting-path")]
    pub starting_path: Option<String>,
    #[command(flatten)]
    pub navigator: NavigatorFlags,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Mapping-lines JSON output (stdout if omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Print an aligned table instead of JSON
    #[arg(long = "table")]
    pub table: bool,
}

#[derive(Debug, Args)]
pub struct SuggestArgs {
    #[command(flatten)]
    pub schema: SchemaArgs,
    /// Table every mapping path starts from
    #[arg(short = 'b', long = "base-table")]
    pub base_table: String,
    /// Mapping-lines JSON file
    #[arg(short = 'l', long = "lines")]
    pub lines: PathBuf,
    /// 0-based index of the line to suggest paths for
    #[arg(long = "line")]
    pub line: usize,
    /// Number of leading path tokens to keep (defaults to the line's
    /// unfinished prefix)
    #[arg(long = "position")]
    pub position: Option<usize>,
    /// Rule table (YAML); the built-in rules are used when omitted
    #[arg(long = "rules")]
    pub rules: Option<PathBuf>,
    /// Print JSON instead of an aligned table
    #[arg(long = "json")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct NavigateArgs {
    #[command(flatten)]
    pub schema: SchemaArgs,
    /// Table every mapping path starts from
    #[arg(short = 'b', long = "base-table")]
    pub base_table: String,
    /// Mapping path to walk, e.g. `determinations.#1.taxon`
    #[arg(short = 'p', long = "path", default_value = "")]
    pub path: String,
    /// Mapping-lines JSON file whose paths count as already mapped
    #[arg(short = 'l', long = "lines")]
    pub lines: Option<PathBuf>,
    /// Line of `--lines` being edited; its own path is not counted
    #[arg(long = "line", requires = "lines")]
    pub line: Option<usize>,
    #[command(flatten)]
    pub navigator: NavigatorFlags,
}

#[derive(Debug, Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub schema: SchemaArgs,
    /// Table every mapping path starts from
    #[arg(short = 'b', long = "base-table")]
    pub base_table: String,
    /// Mapping-lines JSON file (`-` for stdin)
    #[arg(short = 'l', long = "lines")]
    pub lines: PathBuf,
    /// Tables to encode as must-match records
    #[arg(long = "must-match", value_delimiter = ',')]
    pub must_match: Vec<String>,
    /// JSON array of must-match tables, as written by `lines --must-match-output`
    #[arg(long = "must-match-file")]
    pub must_match_file: Option<PathBuf>,
    /// Upload plan JSON output (stdout if omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct LinesArgs {
    #[command(flatten)]
    pub schema: SchemaArgs,
    /// Upload plan JSON file (`-` for stdin)
    #[arg(short = 'u', long = "plan")]
    pub plan: PathBuf,
    /// CSV file whose header row orders the decoded lines
    #[arg(short = 'i', long = "input")]
    pub input: Option<PathBuf>,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Mapping-lines JSON output (stdout if omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Write the plan's must-match tables as a JSON array to this file
    #[arg(long = "must-match-output")]
    pub must_match_output: Option<PathBuf>,
    /// Print an aligned table instead of JSON
    #[arg(long = "table")]
    pub table: bool,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
