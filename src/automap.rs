use anyhow::{Context, Result};
use log::info;

use crate::{
    automapper::{AutoMapper, AutoMapperOptions},
    cli::AutomapArgs,
    io_utils,
    lines::MappingLine,
    mapping_path::MappingPath,
    report,
};

pub fn execute(args: &AutomapArgs) -> Result<()> {
    let schema = crate::load_schema(&args.schema.schema)?;
    let base_table = crate::resolve_base_table(&schema, &args.base_table)?;
    let rules = crate::load_rules(args.rules.as_deref())?;

    info!(
        "Reading headers from '{}' with delimiter '{}'",
        args.input.display(),
        crate::printable_delimiter(args.delimiter)
    );
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    let headers = io_utils::read_csv_headers(&args.input, args.delimiter, encoding)?;

    let options = AutoMapperOptions {
        depth_limit: args.depth_limit,
        navigator: args.navigator.options(),
        ..AutoMapperOptions::for_scope(args.scope)
    };
    let mut mapper = AutoMapper::new(&schema, &rules, base_table, &headers, options);
    if let Some(prefix) = &args.starting_path {
        mapper = mapper
            .starting_at(&MappingPath::parse(prefix))
            .with_context(|| format!("Resolving starting path '{prefix}'"))?;
    }
    let results = mapper.run();
    let lines: Vec<MappingLine> = results.to_lines();
    info!(
        "Mapped {} of {} header(s)",
        results.mapped_count(),
        headers.len()
    );

    if args.table {
        io_utils::write_text(args.output.as_deref(), &report::render_lines(&lines))
    } else {
        io_utils::write_json(args.output.as_deref(), &lines)
    }
}
