//! Human-readable command summaries.

use comfy_table::modifiers::{UTF8_ROUND_CORNERS, UTF8_SOLID_INNER_BORDERS};
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};

use crate::types::{CheckRunResult, FailureSummary, ImputeRunResult};

pub fn print_check_summary(result: &CheckRunResult) {
    println!("Data: {}", result.data);
    println!(
        "Checked {} records, {} failing",
        result.checked,
        result.failures.len()
    );
    if result.failures.is_empty() {
        return;
    }

    let mut tally = Table::new();
    tally.set_header(vec![header_cell("Field"), header_cell("Edits charged")]);
    apply_table_style(&mut tally);
    align_column(&mut tally, 1, CellAlignment::Right);
    for (field, count) in &result.field_tally {
        tally.add_row(vec![
            Cell::new(field).fg(Color::Blue).add_attribute(Attribute::Bold),
            count_cell(*count as usize, Color::Red),
        ]);
    }
    println!("{tally}");

    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Record"),
        header_cell("Failed fields"),
        header_cell("Alternatives"),
    ]);
    apply_table_style(&mut table);
    align_column(&mut table, 2, CellAlignment::Right);
    for failure in &result.failures {
        table.add_row(vec![
            Cell::new(&failure.id)
                .fg(Color::Blue)
                .add_attribute(Attribute::Bold),
            Cell::new(render_fields(failure)),
            alternatives_cell(failure),
        ]);
    }
    println!("{table}");
}

pub fn print_impute_summary(result: &ImputeRunResult) {
    println!("Data: {}", result.data);
    println!("Output rows: {}", result.output_rows);

    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Variable"),
        header_cell("Cells"),
        header_cell("Draws"),
        header_cell("Records"),
        header_cell("Failed"),
        header_cell("Unresolved"),
        header_cell("Warnings"),
    ]);
    apply_table_style(&mut table);
    for index in 1..=6 {
        align_column(&mut table, index, CellAlignment::Right);
    }
    let mut total_draws = 0u64;
    let mut total_failed = 0usize;
    let mut total_unresolved = 0usize;
    for variable in &result.report.variables {
        total_draws += variable.draws_written;
        total_failed += variable.failed.len();
        total_unresolved += variable.unresolved.len();
        table.add_row(vec![
            Cell::new(&variable.target)
                .fg(Color::Blue)
                .add_attribute(Attribute::Bold),
            Cell::new(variable.cells_fitted),
            Cell::new(variable.draws_written),
            Cell::new(variable.records_imputed),
            count_cell(variable.failed.len(), Color::Red),
            count_cell(variable.unresolved.len(), Color::Red),
            count_cell(variable.warnings.len(), Color::Yellow),
        ]);
    }
    table.add_row(vec![
        Cell::new("TOTAL")
            .fg(Color::Cyan)
            .add_attribute(Attribute::Bold),
        dim_cell("-"),
        Cell::new(total_draws).add_attribute(Attribute::Bold),
        dim_cell("-"),
        count_cell(total_failed, Color::Red).add_attribute(Attribute::Bold),
        count_cell(total_unresolved, Color::Red).add_attribute(Attribute::Bold),
        dim_cell("-"),
    ]);
    println!("{table}");

    let mut warned = false;
    for variable in &result.report.variables {
        for warning in &variable.warnings {
            if !warned {
                eprintln!("Warnings:");
                warned = true;
            }
            eprintln!("- {}: {warning}", variable.target);
        }
    }
}

fn render_fields(failure: &FailureSummary) -> String {
    failure
        .by_field
        .iter()
        .map(|(field, count)| format!("{field} ({count})"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn alternatives_cell(failure: &FailureSummary) -> Cell {
    match &failure.alternatives {
        None => dim_cell("-"),
        Some(summary) if summary.found == 0 && !summary.partial => Cell::new("none")
            .fg(Color::Red)
            .add_attribute(Attribute::Bold),
        Some(summary) if summary.partial => {
            Cell::new(format!("{}+", summary.found)).fg(Color::Yellow)
        }
        Some(summary) => Cell::new(summary.found).fg(Color::Green),
    }
}

fn apply_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .apply_modifier(UTF8_SOLID_INNER_BORDERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(120);
}

fn align_column(table: &mut Table, index: usize, alignment: CellAlignment) {
    if let Some(column) = table.column_mut(index) {
        column.set_cell_alignment(alignment);
    }
}

fn header_cell(label: &str) -> Cell {
    Cell::new(label)
        .fg(Color::Cyan)
        .add_attribute(Attribute::Bold)
}

fn count_cell(count: usize, color: Color) -> Cell {
    if count > 0 {
        Cell::new(count).fg(color).add_attribute(Attribute::Bold)
    } else {
        dim_cell(count)
    }
}

fn dim_cell<T: ToString>(value: T) -> Cell {
    Cell::new(value).fg(Color::DarkGrey)
}
