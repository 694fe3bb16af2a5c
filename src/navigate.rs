use anyhow::Result;
use log::debug;

use crate::{
    cli::NavigateArgs,
    io_utils,
    lines::{MappedLines, MappingLine, NoMappedFields},
    mapping_path::MappingPath,
    navigator, report,
    schema::AllowAll,
};

pub fn execute(args: &NavigateArgs) -> Result<()> {
    let schema = crate::load_schema(&args.schema.schema)?;
    let base_table = crate::resolve_base_table(&schema, &args.base_table)?;
    let path = MappingPath::parse(&args.path);
    let options = args.navigator.options();

    let lines: Vec<MappingLine> = match &args.lines {
        Some(path) => io_utils::read_json(path)?,
        None => Vec::new(),
    };
    debug!("Navigating '{path}' with {} existing line(s)", lines.len());

    let steps = match (args.lines.is_some(), args.line) {
        (true, Some(line)) => navigator::enumerate(
            &schema,
            base_table,
            &path,
            &options,
            &AllowAll,
            &MappedLines::excluding(&lines, line),
        )?,
        (true, None) => navigator::enumerate(
            &schema,
            base_table,
            &path,
            &options,
            &AllowAll,
            &MappedLines::new(&lines),
        )?,
        (false, _) => navigator::enumerate(&schema, base_table, &path, &options, &AllowAll, &NoMappedFields)?,
    };
    io_utils::write_text(None, &report::render_steps(&steps))
}
