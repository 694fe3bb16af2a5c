use anyhow::{Context, Result};
use itertools::Itertools;
use log::info;

use crate::{
    cli::LinesArgs,
    io_utils,
    lines::{self, MappingLine},
    report,
    upload_plan::{self, UploadPlan},
};

pub fn execute(args: &LinesArgs) -> Result<()> {
    let schema = crate::load_schema(&args.schema.schema)?;
    let plan: UploadPlan = io_utils::read_json(&args.plan)?;
    let parsed = upload_plan::parse_plan(&schema, &plan)
        .with_context(|| format!("Decoding upload plan {:?}", args.plan))?;
    if !parsed.must_match_tables.is_empty() {
        info!(
            "Must-match tables: {}",
            parsed.must_match_tables.iter().join(", ")
        );
    }

    let lines: Vec<MappingLine> = match &args.input {
        Some(input) => {
            let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
            let headers = io_utils::read_csv_headers(input, args.delimiter, encoding)?;
            lines::lines_for_headers(&headers, parsed.lines)
        }
        None => parsed.lines.into_iter().map(MappingLine::from).collect(),
    };
    info!("Decoded {} line(s)", lines.len());

    if let Some(path) = &args.must_match_output {
        io_utils::write_json(Some(path.as_path()), &parsed.must_match_tables)
            .with_context(|| format!("Writing must-match tables to {path:?}"))?;
    }

    if args.table {
        let mut text = report::render_lines(&lines);
        if !parsed.must_match_tables.is_empty() {
            text.push_str(&format!(
                "\nMust-match tables: {}\n",
                parsed.must_match_tables.iter().join(", ")
            ));
        }
        io_utils::write_text(args.output.as_deref(), &text)
    } else {
        io_utils::write_json(args.output.as_deref(), &lines)
    }
}
