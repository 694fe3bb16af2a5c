use std::collections::BTreeSet;

use anyhow::{Context, Result};
use log::{info, warn};

use crate::{
    cli::PlanArgs,
    io_utils,
    lines::MappingLine,
    mapping_path,
    upload_plan,
};

pub fn execute(args: &PlanArgs) -> Result<()> {
    let schema = crate::load_schema(&args.schema.schema)?;
    let base_table = crate::resolve_base_table(&schema, &args.base_table)?;
    let lines: Vec<MappingLine> = io_utils::read_json(&args.lines)?;

    let paths: Vec<_> = lines.iter().map(|line| line.mapping_path.clone()).collect();
    for index in mapping_path::find_duplicates(&paths, None) {
        warn!(
            "Column '{}' repeats path '{}'",
            lines[index].header_name, lines[index].mapping_path
        );
    }

    let from_file: Vec<String> = match &args.must_match_file {
        Some(path) => io_utils::read_json(path)?,
        None => Vec::new(),
    };
    let must_match: BTreeSet<String> = args
        .must_match
        .iter()
        .chain(&from_file)
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect();
    for name in &must_match {
        if schema.table_id(name).is_none() {
            warn!("Must-match table '{name}' is not part of the schema");
        }
    }

    let plan = upload_plan::build_plan(&schema, base_table, &lines, &must_match)
        .with_context(|| format!("Building upload plan from {:?}", args.lines))?;
    info!(
        "Upload plan for '{}' covers {} of {} line(s)",
        plan.base_table_name,
        lines.iter().filter(|line| line.is_mapped()).count(),
        lines.len()
    );
    io_utils::write_json(args.output.as_deref(), &plan)
}
