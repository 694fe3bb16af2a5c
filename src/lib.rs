pub mod automap;
pub mod automapper;
pub mod cli;
pub mod decode;
pub mod encode;
pub mod io_utils;
pub mod lines;
pub mod mapping_path;
pub mod navigate;
pub mod navigator;
pub mod report;
pub mod rules;
pub mod schema;
pub mod suggest;
pub mod upload_plan;

use std::{env, path::Path, sync::OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, debug};

use crate::{
    cli::{Cli, Commands},
    rules::RuleTable,
    schema::{Schema, TableId},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("plan_mapper", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Automap(args) => automap::execute(&args),
        Commands::Suggest(args) => suggest::execute(&args),
        Commands::Navigate(args) => navigate::execute(&args),
        Commands::Plan(args) => encode::execute(&args),
        Commands::Lines(args) => decode::execute(&args),
    }
}

pub(crate) fn load_schema(path: &Path) -> Result<Schema> {
    let schema = Schema::load(path).with_context(|| format!("Loading schema from {path:?}"))?;
    debug!("Loaded schema with {} table(s)", schema.tables().count());
    Ok(schema)
}

pub(crate) fn resolve_base_table(schema: &Schema, name: &str) -> Result<TableId> {
    schema
        .require_table(name)
        .with_context(|| format!("Resolving base table '{name}'"))
}

pub(crate) fn load_rules(path: Option<&Path>) -> Result<RuleTable> {
    match path {
        Some(path) => RuleTable::load(path),
        None => Ok(RuleTable::builtin().clone()),
    }
}

pub(crate) fn printable_delimiter(delimiter: Option<u8>) -> String {
    match delimiter {
        None => "auto".to_string(),
        Some(b',') => ",".to_string(),
        Some(b'\t') => "\\t".to_string(),
        Some(other) => (other as char).to_string(),
    }
}
