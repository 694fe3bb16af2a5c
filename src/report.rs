//! Plain-text tables for terminal output.

use std::{borrow::Cow, fmt::Write as _};

use crate::{
    lines::MappingLine,
    mapping_path::MappingPath,
    navigator::{LineStep, StepOption},
};

pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|header| display_width(header)).collect();
    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(widths.len()) {
            widths[idx] = widths[idx].max(display_width(cell));
        }
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_row(headers, &widths));
    let rule: Vec<String> = widths.iter().map(|width| "-".repeat((*width).max(3))).collect();
    let _ = writeln!(output, "{}", format_row(&rule, &widths));
    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, &widths));
    }
    output
}

fn format_row(values: &[String], widths: &[usize]) -> String {
    let mut line = values
        .iter()
        .zip(widths)
        .map(|(value, width)| {
            let cell = sanitize_cell(value);
            let padding = width.saturating_sub(display_width(&cell));
            format!("{cell}{}", " ".repeat(padding))
        })
        .collect::<Vec<_>>()
        .join("  ");
    line.truncate(line.trim_end().len());
    line
}

fn display_width(value: &str) -> usize {
    value.chars().count()
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}

fn flags(option: &StepOption) -> String {
    let mut flags = Vec::new();
    if option.is_default {
        flags.push("selected");
    }
    if option.is_required {
        flags.push("required");
    }
    if option.is_hidden {
        flags.push("hidden");
    }
    if !option.is_enabled {
        flags.push("mapped");
    }
    flags.join(",")
}

/// One table per navigator step.
pub fn render_steps(steps: &[LineStep]) -> String {
    let headers = ["token", "label", "kind", "related", "flags"].map(String::from);
    let mut output = String::new();
    for (position, step) in steps.iter().enumerate() {
        let selected = step
            .selected
            .as_ref()
            .map_or_else(|| "(choose)".to_string(), ToString::to_string);
        let _ = writeln!(
            output,
            "[{position}] {} ({}) {}: {selected}",
            step.table_label,
            step.table_name,
            step.kind.as_str()
        );
        let rows: Vec<Vec<String>> = step
            .options
            .iter()
            .map(|option| {
                vec![
                    option.token.to_string(),
                    option.label.clone(),
                    if option.is_relationship { "relationship" } else { "field" }.to_string(),
                    option.related_table.clone().unwrap_or_default(),
                    flags(option),
                ]
            })
            .collect();
        output.push_str(&render_table(&headers, &rows));
        output.push('\n');
    }
    output
}

pub fn render_lines(lines: &[MappingLine]) -> String {
    let headers = ["header", "mapping path", "match", "null allowed", "default"].map(String::from);
    let rows: Vec<Vec<String>> = lines
        .iter()
        .map(|line| {
            vec![
                line.header_name.clone(),
                if line.is_mapped() {
                    line.mapping_path.to_string()
                } else {
                    String::new()
                },
                format!("{:?}", line.column_options.match_behavior),
                line.column_options.null_allowed.to_string(),
                line.column_options.default.clone().unwrap_or_default(),
            ]
        })
        .collect();
    render_table(&headers, &rows)
}

pub fn render_suggestions(header: &str, suggestions: &[MappingPath]) -> String {
    let headers = ["#", "suggested path"].map(String::from);
    let rows: Vec<Vec<String>> = suggestions
        .iter()
        .enumerate()
        .map(|(index, path)| vec![(index + 1).to_string(), path.to_string()])
        .collect();
    format!("Suggestions for '{header}':\n{}", render_table(&headers, &rows))
}
