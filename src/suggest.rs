use anyhow::{Context, Result, bail};
use log::info;

use crate::{automapper, cli::SuggestArgs, io_utils, lines::MappingLine, report, schema::AllowAll};

pub fn execute(args: &SuggestArgs) -> Result<()> {
    let schema = crate::load_schema(&args.schema.schema)?;
    let base_table = crate::resolve_base_table(&schema, &args.base_table)?;
    let rules = crate::load_rules(args.rules.as_deref())?;
    let lines: Vec<MappingLine> = io_utils::read_json(&args.lines)?;

    let Some(line) = lines.get(args.line) else {
        bail!(
            "Line {} is out of range; {:?} has {} line(s)",
            args.line,
            args.lines,
            lines.len()
        );
    };
    let position = args.position.unwrap_or_else(|| {
        if line.is_mapped() {
            0
        } else {
            line.mapping_path
                .iter()
                .take_while(|token| !token.is_empty())
                .count()
        }
    });

    let suggestions = automapper::suggest(&schema, &rules, &AllowAll, base_table, &lines, args.line, position)
        .with_context(|| format!("Suggesting paths for '{}'", line.header_name))?;
    info!(
        "{} suggestion(s) for '{}'",
        suggestions.len(),
        line.header_name
    );

    if args.json {
        io_utils::write_json(None, &suggestions)
    } else {
        io_utils::write_text(None, &report::render_suggestions(&line.header_name, &suggestions))
    }
}
