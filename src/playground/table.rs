//! Markdown rendering for `console.table`.

/// Placeholder rendered for a table without rows or columns.
pub const EMPTY_TABLE: &str = "*Empty table*";

/// Header used for rows that are not objects.
pub const VALUE_COLUMN: &str = "Value";

const MIN_COLUMN_WIDTH: usize = 3;

/// One row of a table, with cell text already rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableRow {
    /// An object row: `(column, cell)` pairs in key order.
    Fields(Vec<(String, String)>),
    /// A primitive row, shown in the `Value` column.
    Value(String),
}

/// Render rows as a Markdown table with centered columns.
///
/// Columns are the union of row keys in first-seen order, followed by
/// `Value` when any row is primitive. Missing cells are left blank.
pub fn render_table(rows: &[TableRow]) -> String {
    let mut headers: Vec<String> = Vec::new();
    let mut has_values = false;
    for row in rows {
        match row {
            TableRow::Fields(fields) => {
                for (key, _) in fields {
                    if !headers.iter().any(|header| header == key) {
                        headers.push(key.clone());
                    }
                }
            }
            TableRow::Value(_) => has_values = true,
        }
    }
    if has_values {
        headers.push(VALUE_COLUMN.to_string());
    }
    if headers.is_empty() {
        return EMPTY_TABLE.to_string();
    }

    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            headers
                .iter()
                .map(|header| match row {
                    TableRow::Fields(fields) => fields
                        .iter()
                        .find(|(key, _)| key == header)
                        .map(|(_, cell)| sanitize(cell))
                        .unwrap_or_default(),
                    TableRow::Value(cell) if header == VALUE_COLUMN => sanitize(cell),
                    TableRow::Value(_) => String::new(),
                })
                .collect()
        })
        .collect();

    let headers: Vec<String> = headers.iter().map(|header| sanitize(header)).collect();
    let widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(column, header)| {
            cells
                .iter()
                .map(|row| text_width(&row[column]))
                .chain([text_width(header), MIN_COLUMN_WIDTH])
                .max()
                .unwrap_or(MIN_COLUMN_WIDTH)
        })
        .collect();

    let mut lines = Vec::with_capacity(rows.len() + 2);
    lines.push(format_row(&headers, &widths));
    lines.push(separator_row(&widths));
    for row in &cells {
        lines.push(format_row(row, &widths));
    }
    lines.join("\n")
}

/// Escape pipes and flatten line breaks so a cell stays on one row.
fn sanitize(text: &str) -> String {
    text.replace('|', "\\|").replace("\r\n", " ").replace(['\n', '\r'], " ")
}

fn text_width(text: &str) -> usize {
    text.chars().count()
}

fn format_row(values: &[String], widths: &[usize]) -> String {
    let cells: Vec<String> = values
        .iter()
        .zip(widths)
        .map(|(value, &width)| center(value, width))
        .collect();
    format!("| {} |", cells.join(" | "))
}

fn separator_row(widths: &[usize]) -> String {
    let cells: Vec<String> = widths
        .iter()
        .map(|&width| format!(":{}:", "-".repeat(width.saturating_sub(2))))
        .collect();
    format!("| {} |", cells.join(" | "))
}

fn center(text: &str, width: usize) -> String {
    let pad = width.saturating_sub(text_width(text));
    let left = pad / 2;
    format!("{}{}{}", " ".repeat(left), text, " ".repeat(pad - left))
}
