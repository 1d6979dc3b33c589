//! Terminal rendering for query results and table listings

use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, ContentArrangement, Table};
use csvdb::{ColumnDescription, QueryOutcome, TableListing};

/// Build a grid with cyan headers
pub fn build_table<S: AsRef<str>>(headers: &[S], rows: Vec<Vec<String>>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let header_cells: Vec<Cell> = headers
        .iter()
        .map(|h| Cell::new(h.as_ref()).fg(Color::Cyan))
        .collect();
    table.set_header(header_cells);

    for row in rows {
        table.add_row(row);
    }
    table
}

/// `Rows: N | Tables reloaded: M | Total time: X.XXXXs`
pub fn format_summary(outcome: &QueryOutcome) -> String {
    format!(
        "Rows: {} | Tables reloaded: {} | Total time: {:.4}s",
        outcome.row_count,
        outcome.tables_refreshed,
        outcome.elapsed.as_secs_f64()
    )
}

pub fn print_outcome(outcome: &QueryOutcome) {
    if !outcome.columns.is_empty() {
        let rows = outcome
            .rows
            .iter()
            .map(|row| row.values().iter().map(|v| v.to_string()).collect())
            .collect();
        println!("{}", build_table(&outcome.columns, rows));
    }
    println!("{}", format_summary(outcome));
}

pub fn print_tables(tables: &[TableListing]) {
    if tables.is_empty() {
        println!("No tables.");
        return;
    }
    let rows = tables
        .iter()
        .map(|t| vec![t.name.clone(), t.path.display().to_string()])
        .collect();
    println!("{}", build_table(&["TABLE", "SOURCE"], rows));
}

pub fn print_columns(columns: &[ColumnDescription]) {
    let rows = columns
        .iter()
        .map(|c| vec![c.name.clone(), c.column_type.to_string()])
        .collect();
    println!("{}", build_table(&["COLUMN", "TYPE"], rows));
}
