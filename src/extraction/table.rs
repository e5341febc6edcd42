//! Merged-cell-aware extractor for endorsement sheets.
//!
//! Insurer sheets typically look like:
//!
//! ```text
//!   ENDORSEMENT SHEET                 <- lone string: title
//!   Policy No | P-1 | Holder | ACME   <- label/value pairs: header
//!   Sr No | Name | ... (>= 8 values)  <- table header row
//!   1     | ...                       <- records
//!   2     | ...
//!   Total | 2                         <- summary
//! ```
//!
//! The table header row is the first row with at least eight distinct
//! non-empty values. When the first column is a serial-number column, the
//! body ends at the first non-serial value once data has started.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::Serialize;
use serde_json::{Map, Value};

use super::sheet::{open_first_sheet, CellValue, SheetSource};
use crate::pipeline::error::PipelineError;
use crate::pipeline::types::RawRecord;

/// Distinct non-empty values that mark a row as the table header.
pub const MIN_HEADER_VALUES: usize = 8;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SheetExtraction {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub header: Map<String, Value>,
    pub records: Vec<RawRecord>,
    pub summary: Map<String, Value>,
}

/// Run the full extraction: title, header metadata, records, summary.
pub fn extract_sheet(sheet: &dyn SheetSource) -> SheetExtraction {
    let merged = MergedLookup::build(sheet);
    let header_row = find_table_header_row(sheet);
    let (title, header) = extract_header(sheet, header_row);
    let (records, data_end_row) = extract_table(sheet, &merged, header_row);
    let summary = extract_summary(sheet, &merged, data_end_row);

    tracing::info!(
        title = title.as_deref().unwrap_or(""),
        header_fields = header.len(),
        records = records.len(),
        summary_fields = summary.len(),
        "Sheet extraction complete"
    );

    SheetExtraction { title, header, records, summary }
}

/// Load the first worksheet of a workbook and extract it off the async runtime.
pub async fn extract_workbook(path: &Path) -> Result<SheetExtraction, PipelineError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let sheet = open_first_sheet(&path)?;
        Ok(extract_sheet(&sheet))
    })
    .await
    .map_err(|e| PipelineError::Internal(format!("Spreadsheet task failed: {e}")))?
}

// ═══════════════════════════════════════════════════════════
// Merged cells
// ═══════════════════════════════════════════════════════════

/// Every coordinate inside a merged range mapped to the range's top-left value.
pub struct MergedLookup<'a> {
    cells: HashMap<(usize, usize), Option<&'a CellValue>>,
}

impl<'a> MergedLookup<'a> {
    pub fn build(sheet: &'a dyn SheetSource) -> Self {
        let mut cells = HashMap::new();
        for range in sheet.merged_ranges() {
            let top_left = sheet.raw_value(range.first_row, range.first_col);
            for row in range.first_row..=range.last_row {
                for col in range.first_col..=range.last_col {
                    cells.insert((row, col), top_left);
                }
            }
        }
        Self { cells }
    }

    /// Effective value: the stored value, else the merged top-left value.
    pub fn value_at(
        &self,
        sheet: &'a dyn SheetSource,
        row: usize,
        col: usize,
    ) -> Option<&'a CellValue> {
        sheet
            .raw_value(row, col)
            .or_else(|| self.cells.get(&(row, col)).copied().flatten())
    }
}

// ═══════════════════════════════════════════════════════════
// Sections
// ═══════════════════════════════════════════════════════════

/// First row with enough distinct values; the last row when none qualifies.
pub fn find_table_header_row(sheet: &dyn SheetSource) -> usize {
    for row in 0..sheet.row_count() {
        let distinct: HashSet<String> = (0..sheet.col_count())
            .filter_map(|col| sheet.raw_value(row, col))
            .map(|v| v.display().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if distinct.len() >= MIN_HEADER_VALUES {
            return row;
        }
    }
    sheet.row_count().saturating_sub(1)
}

/// Metadata above the table: an optional title and label/value pairs.
pub fn extract_header(
    sheet: &dyn SheetSource,
    table_header_row: usize,
) -> (Option<String>, Map<String, Value>) {
    let members: HashSet<(usize, usize)> = sheet
        .merged_ranges()
        .iter()
        .flat_map(|r| {
            (r.first_row..=r.last_row).flat_map(move |row| {
                (r.first_col..=r.last_col)
                    .filter(move |&col| !(row == r.first_row && col == r.first_col))
                    .map(move |col| (row, col))
            })
        })
        .collect();

    let mut title = None;
    let mut header = Map::new();

    for row in 0..table_header_row {
        let entries: Vec<&CellValue> = (0..sheet.col_count())
            .filter(|&col| !members.contains(&(row, col)))
            .filter_map(|col| sheet.raw_value(row, col))
            .filter(|v| !v.is_blank())
            .collect();

        if entries.is_empty() {
            continue;
        }

        if entries.len() == 1 && title.is_none() {
            if let Some(text) = entries[0].as_text() {
                title = Some(text.trim().to_string());
                continue;
            }
        }

        let mut i = 0;
        while i < entries.len() {
            let Some(label) = entries[i].as_text().map(str::trim).filter(|l| !l.is_empty()) else {
                i += 1;
                continue;
            };
            match entries.get(i + 1) {
                Some(value) => {
                    header.insert(label.to_string(), trimmed_json(value));
                    i += 2;
                }
                None => i += 1,
            }
        }
    }

    (title, header)
}

/// Table body below the header row; returns records and the first row after the data.
pub fn extract_table<'a>(
    sheet: &'a dyn SheetSource,
    merged: &MergedLookup<'a>,
    table_header_row: usize,
) -> (Vec<RawRecord>, usize) {
    let columns: Vec<(usize, String)> = (0..sheet.col_count())
        .filter_map(|col| {
            merged
                .value_at(sheet, table_header_row, col)
                .map(|v| v.display().trim().to_string())
                .filter(|name| !name.is_empty())
                .map(|name| (col, name))
        })
        .collect();

    let Some((first_col, first_name)) = columns.first().cloned() else {
        return (Vec::new(), table_header_row + 1);
    };
    let enforce_serial = header_looks_serial(&first_name);

    let mut records = Vec::new();
    let mut data_started = false;
    let mut last_data_row = table_header_row;

    for row in (table_header_row + 1)..sheet.row_count() {
        let mut record = RawRecord::new();
        let mut all_empty = true;
        for (col, name) in &columns {
            let value = match merged.value_at(sheet, row, *col) {
                Some(CellValue::Text(s)) if s.trim().is_empty() => Value::Null,
                Some(CellValue::Text(s)) => Value::String(s.trim().to_string()),
                Some(other) => other.to_json(),
                None => Value::Null,
            };
            all_empty &= value.is_null();
            record.insert(name.clone(), value);
        }

        if all_empty {
            continue;
        }

        let first = merged.value_at(sheet, row, first_col).filter(|v| !v.is_blank());
        let Some(first) = first else {
            if data_started {
                break;
            }
            continue;
        };

        if enforce_serial && !is_serial_value(first) {
            if data_started {
                break;
            }
            continue;
        }

        records.push(record);
        data_started = true;
        last_data_row = row;
    }

    let data_end_row = if data_started { last_data_row + 1 } else { table_header_row + 1 };
    (records, data_end_row)
}

/// Label/value pairs below the table body.
pub fn extract_summary<'a>(
    sheet: &'a dyn SheetSource,
    merged: &MergedLookup<'a>,
    data_end_row: usize,
) -> Map<String, Value> {
    let mut summary = Map::new();

    for row in data_end_row..sheet.row_count() {
        let cells: Vec<&CellValue> = (0..sheet.col_count())
            .filter_map(|col| merged.value_at(sheet, row, col))
            .filter(|v| !v.is_blank())
            .collect();

        let Some(label_idx) = cells.iter().position(|v| v.as_text().is_some()) else {
            continue;
        };
        let label = cells[label_idx].display().trim().to_string();

        let value = cells[label_idx + 1..].iter().find_map(|v| match v {
            CellValue::Text(s) => {
                let text = s.trim();
                (!text.is_empty() && text != label).then(|| Value::String(text.to_string()))
            }
            other => Some(other.to_json()),
        });

        if let Some(value) = value {
            summary.insert(label, value);
        }
    }

    summary
}

// ═══════════════════════════════════════════════════════════
// Serial columns
// ═══════════════════════════════════════════════════════════

/// Header names such as "Sr No", "S.No", "Serial Number".
pub fn header_looks_serial(name: &str) -> bool {
    let normalized: String = name
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect();
    matches!(
        normalized.as_str(),
        "srno" | "sno" | "serialno" | "serialnumber" | "srnumber"
    ) || normalized.starts_with("srno")
}

/// Numbers, or text that parses as a number once commas are removed.
pub fn is_serial_value(value: &CellValue) -> bool {
    match value {
        CellValue::Int(_) | CellValue::Float(_) => true,
        CellValue::Text(s) => {
            let text = s.trim().replace(',', "");
            !text.is_empty() && text.parse::<f64>().is_ok()
        }
        CellValue::Bool(_) | CellValue::DateTime(_) => false,
    }
}

fn trimmed_json(value: &CellValue) -> Value {
    match value {
        CellValue::Text(s) => Value::String(s.trim().to_string()),
        other => other.to_json(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::sheet::{LoadedSheet, MergedRange};
    use serde_json::json;

    fn t(s: &str) -> Option<CellValue> {
        Some(CellValue::text(s))
    }

    fn n(i: i64) -> Option<CellValue> {
        Some(CellValue::Int(i))
    }

    const COLUMNS: [&str; 8] = [
        "Sr No", "Name", "Employee Id", "Action", "DOB", "Gender", "Relation", "Effective Date",
    ];

    fn header_row() -> Vec<Option<CellValue>> {
        COLUMNS.iter().map(|c| t(c)).collect()
    }

    fn data_row(serial: Option<CellValue>, name: &str) -> Vec<Option<CellValue>> {
        vec![
            serial,
            t(name),
            t("E1"),
            t("ADD"),
            t("1990-01-01"),
            t("F"),
            t("Self"),
            t("2024-01-01"),
        ]
    }

    fn endorsement_sheet() -> LoadedSheet {
        LoadedSheet::from_rows(vec![
            vec![t("ENDORSEMENT SCHEDULE")],
            vec![t("Policy No"), t("  P-100 "), None, t("Holder"), t("ACME Ltd")],
            vec![],
            header_row(),
            data_row(n(1), "Asha"),
            data_row(t("2"), "Ravi"),
            data_row(Some(CellValue::Float(3.0)), "Meena"),
            vec![t("Total"), n(3)],
            data_row(n(4), "Ghost"),
            vec![t("Premium"), t("Premium"), Some(CellValue::Float(1200.5))],
            vec![t("Signed"), t("   ")],
        ])
    }

    #[test]
    fn whole_number_cells_stay_integers() {
        use calamine::{Data, Range};

        let mut range: Range<Data> = Range::new((0, 0), (1, 7));
        for (col, name) in COLUMNS.iter().enumerate() {
            range.set_value((0, col as u32), Data::String(name.to_string()));
        }
        range.set_value((1, 0), Data::Float(1.0));
        range.set_value((1, 1), Data::String("Asha".into()));
        range.set_value((1, 2), Data::Float(12345.0));
        range.set_value((1, 3), Data::String("ADD".into()));
        range.set_value((1, 5), Data::Float(62.5));

        let out = extract_sheet(&LoadedSheet::from_range(&range, Vec::new()));
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0]["Sr No"], json!(1));
        assert!(out.records[0]["Employee Id"].is_i64());
        assert_eq!(out.records[0]["Employee Id"].to_string(), "12345");
        assert_eq!(out.records[0]["Gender"], 62.5);
    }

    #[test]
    fn header_row_needs_eight_distinct_values() {
        assert_eq!(find_table_header_row(&endorsement_sheet()), 3);

        let sparse = LoadedSheet::from_rows(vec![vec![t("a"), t("b")], vec![t("c")]]);
        assert_eq!(find_table_header_row(&sparse), 1);
    }

    #[test]
    fn body_stops_at_total_row() {
        let out = extract_sheet(&endorsement_sheet());
        assert_eq!(out.records.len(), 3);
        assert_eq!(out.records[2]["Name"], "Meena");
        assert!(out.records.iter().all(|r| r["Sr No"] != "Total"));
        assert!(out.records.iter().all(|r| r["Name"] != "Ghost"));
    }

    #[test]
    fn title_header_and_summary() {
        let out = extract_sheet(&endorsement_sheet());
        assert_eq!(out.title.as_deref(), Some("ENDORSEMENT SCHEDULE"));
        assert_eq!(out.header["Policy No"], "P-100");
        assert_eq!(out.header["Holder"], "ACME Ltd");
        assert_eq!(out.summary["Total"], 3);
        // The repeated label is skipped in favour of the number.
        assert_eq!(out.summary["Premium"], 1200.5);
        assert!(!out.summary.contains_key("Signed"));
    }

    #[test]
    fn merged_cells_read_top_left_value() {
        let sheet = LoadedSheet::from_rows(vec![vec![None, None, t("Member Details"), None, None]])
            .with_merge(MergedRange::new(0, 0, 2, 4));
        let lookup = MergedLookup::build(&sheet);
        for col in 2..=4 {
            assert_eq!(
                lookup.value_at(&sheet, 0, col),
                Some(&CellValue::text("Member Details")),
                "col {col}"
            );
        }
        assert_eq!(lookup.value_at(&sheet, 0, 1), None);
    }

    #[test]
    fn merged_header_names_columns() {
        let mut header = header_row();
        header[7] = t("Dates");
        header.push(None);
        let sheet = LoadedSheet::from_rows(vec![header, {
            let mut row = data_row(n(1), "Asha");
            row.push(t("2024-02-01"));
            row
        }])
        .with_merge(MergedRange::new(0, 0, 7, 8));

        let out = extract_sheet(&sheet);
        // Both merged columns share one name; the later column wins.
        assert_eq!(out.records[0]["Dates"], "2024-02-01");
    }

    #[test]
    fn blank_and_leading_rows_tolerated_before_data() {
        let sheet = LoadedSheet::from_rows(vec![
            header_row(),
            vec![],
            data_row(None, "No serial yet"),
            data_row(t("Sub-heading"), "Skipped"),
            data_row(n(1), "Asha"),
            data_row(n(2), "Ravi"),
        ]);
        let out = extract_sheet(&sheet);
        let names: Vec<_> = out.records.iter().map(|r| r["Name"].clone()).collect();
        assert_eq!(names, vec![json!("Asha"), json!("Ravi")]);
    }

    #[test]
    fn null_first_column_after_data_ends_body() {
        let sheet = LoadedSheet::from_rows(vec![
            header_row(),
            data_row(n(1), "Asha"),
            data_row(None, "Continuation"),
            data_row(n(2), "Ravi"),
        ]);
        let out = extract_sheet(&sheet);
        assert_eq!(out.records.len(), 1);
    }

    #[test]
    fn non_serial_first_column_keeps_all_rows() {
        let mut header = header_row();
        header[0] = t("Member Code");
        let sheet = LoadedSheet::from_rows(vec![
            header,
            data_row(t("M-1"), "Asha"),
            data_row(t("M-2"), "Ravi"),
        ]);
        assert_eq!(extract_sheet(&sheet).records.len(), 2);
    }

    #[test]
    fn text_cells_are_trimmed_and_blank_text_is_null() {
        let mut row = data_row(n(1), "  Asha  ");
        row[5] = t("   ");
        let sheet = LoadedSheet::from_rows(vec![header_row(), row]);
        let out = extract_sheet(&sheet);
        assert_eq!(out.records[0]["Name"], "Asha");
        assert_eq!(out.records[0]["Gender"], Value::Null);
    }

    #[test]
    fn serial_aliases() {
        for name in ["Sr No", "S.No", "Serial Number", "SR. NO.", "Sr No (Member)", "srnumber"] {
            assert!(header_looks_serial(name), "{name}");
        }
        assert!(!header_looks_serial("Name"));
        assert!(!header_looks_serial("Number"));
    }

    #[test]
    fn serial_values() {
        assert!(is_serial_value(&CellValue::Int(1)));
        assert!(is_serial_value(&CellValue::Float(2.0)));
        assert!(is_serial_value(&CellValue::text(" 1,024 ")));
        assert!(!is_serial_value(&CellValue::text("Total")));
        assert!(!is_serial_value(&CellValue::text("")));
        assert!(!is_serial_value(&CellValue::Bool(true)));
    }

    #[test]
    fn empty_sheet_yields_nothing() {
        let out = extract_sheet(&LoadedSheet::default());
        assert!(out.records.is_empty());
        assert!(out.header.is_empty());
        assert!(out.title.is_none());
    }
}
