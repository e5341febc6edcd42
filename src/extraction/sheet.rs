//! Uniform read access to the first worksheet of an `.xlsx` or `.xls` file.
//!
//! Coordinates are zero-based and absolute: row 0 is the sheet's first row
//! even when it is blank, so merged ranges line up with cell reads.

use std::path::Path;

use calamine::{open_workbook, Data, Dimensions, Range, Reader, Xls, Xlsx};
use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};
use serde_json::Value;

use crate::pipeline::error::PipelineError;

/// A non-empty cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    DateTime(NaiveDateTime),
}

impl CellValue {
    pub fn text(s: &str) -> Self {
        Self::Text(s.to_string())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Display form, used for distinctness and blank checks.
    pub fn display(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::DateTime(dt) => render_datetime(dt),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.display().trim().is_empty()
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Text(s) => Value::String(s.clone()),
            Self::Int(i) => Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Bool(b) => Value::Bool(*b),
            Self::DateTime(dt) => Value::String(render_datetime(dt)),
        }
    }
}

/// Dates without a time part render as `YYYY-MM-DD`.
fn render_datetime(dt: &NaiveDateTime) -> String {
    if dt.time().num_seconds_from_midnight() == 0 {
        dt.format("%Y-%m-%d").to_string()
    } else {
        dt.format("%Y-%m-%dT%H:%M:%S").to_string()
    }
}

/// Inclusive merged-cell rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergedRange {
    pub first_row: usize,
    pub last_row: usize,
    pub first_col: usize,
    pub last_col: usize,
}

impl MergedRange {
    pub fn new(first_row: usize, last_row: usize, first_col: usize, last_col: usize) -> Self {
        Self { first_row, last_row, first_col, last_col }
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        (self.first_row..=self.last_row).contains(&row)
            && (self.first_col..=self.last_col).contains(&col)
    }
}

impl From<&Dimensions> for MergedRange {
    fn from(d: &Dimensions) -> Self {
        Self::new(d.start.0 as usize, d.end.0 as usize, d.start.1 as usize, d.end.1 as usize)
    }
}

/// The read interface the table extractor works against.
pub trait SheetSource {
    fn row_count(&self) -> usize;

    fn col_count(&self) -> usize;

    /// Stored value, `None` for empty cells and merge members other than the top-left.
    fn raw_value(&self, row: usize, col: usize) -> Option<&CellValue>;

    fn merged_ranges(&self) -> &[MergedRange];
}

/// A fully materialized worksheet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedSheet {
    cells: Vec<Vec<Option<CellValue>>>,
    merged: Vec<MergedRange>,
    cols: usize,
}

impl LoadedSheet {
    pub fn from_rows(rows: Vec<Vec<Option<CellValue>>>) -> Self {
        let cols = rows.iter().map(Vec::len).max().unwrap_or(0);
        Self { cells: rows, merged: Vec::new(), cols }
    }

    pub fn with_merge(mut self, range: MergedRange) -> Self {
        self.merged.push(range);
        self
    }

    pub(crate) fn from_range(range: &Range<Data>, merged: Vec<MergedRange>) -> Self {
        let Some((end_row, end_col)) = range.end() else {
            return Self { merged, ..Self::default() };
        };
        let rows = (0..=end_row)
            .map(|r| {
                (0..=end_col)
                    .map(|c| range.get_value((r, c)).and_then(cell_from_data))
                    .collect()
            })
            .collect();
        Self { merged, ..Self::from_rows(rows) }
    }
}

impl SheetSource for LoadedSheet {
    fn row_count(&self) -> usize {
        self.cells.len()
    }

    fn col_count(&self) -> usize {
        self.cols
    }

    fn raw_value(&self, row: usize, col: usize) -> Option<&CellValue> {
        self.cells.get(row).and_then(|r| r.get(col)).and_then(Option::as_ref)
    }

    fn merged_ranges(&self) -> &[MergedRange] {
        &self.merged
    }
}

fn cell_from_data(data: &Data) -> Option<CellValue> {
    match data {
        Data::String(s) if s.is_empty() => None,
        Data::String(s) => Some(CellValue::Text(s.clone())),
        Data::Int(i) => Some(CellValue::Int(*i)),
        Data::Float(f) => Some(number_cell(*f)),
        Data::Bool(b) => Some(CellValue::Bool(*b)),
        Data::DateTime(dt) => excel_serial_to_datetime(dt.as_f64()).map(CellValue::DateTime),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Some(CellValue::Text(s.clone())),
        Data::Error(_) | Data::Empty => None,
    }
}

/// xlsx stores every number as a double; whole values come back as integers.
fn number_cell(f: f64) -> CellValue {
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if f.is_finite() && f.fract() == 0.0 && (-LIMIT..LIMIT).contains(&f) {
        CellValue::Int(f as i64)
    } else {
        CellValue::Float(f)
    }
}

/// Excel serial day number (1900 date system) to a timestamp.
pub fn excel_serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let millis = (serial * 86_400_000.0).round() as i64;
    epoch.checked_add_signed(Duration::milliseconds(millis))
}

// ═══════════════════════════════════════════════════════════
// Loaders
// ═══════════════════════════════════════════════════════════

/// Opens a workbook and materializes its first worksheet.
pub trait SheetLoader {
    fn load_first_sheet(&self, path: &Path) -> Result<LoadedSheet, PipelineError>;
}

pub struct XlsxLoader;

impl SheetLoader for XlsxLoader {
    fn load_first_sheet(&self, path: &Path) -> Result<LoadedSheet, PipelineError> {
        let mut workbook: Xlsx<_> = open_workbook(path).map_err(|e| open_error(path, e))?;
        let name = first_sheet_name(workbook.sheet_names(), path)?;
        let range = workbook
            .worksheet_range(&name)
            .map_err(|e| open_error(path, e))?;
        workbook
            .load_merged_regions()
            .map_err(|e| open_error(path, e))?;
        let merged = workbook
            .merged_regions_by_sheet(&name)
            .into_iter()
            .map(|(_, _, dims)| MergedRange::from(dims))
            .collect();
        Ok(LoadedSheet::from_range(&range, merged))
    }
}

pub struct XlsLoader;

impl SheetLoader for XlsLoader {
    fn load_first_sheet(&self, path: &Path) -> Result<LoadedSheet, PipelineError> {
        let mut workbook: Xls<_> = open_workbook(path).map_err(|e| open_error(path, e))?;
        let name = first_sheet_name(workbook.sheet_names(), path)?;
        let range = workbook
            .worksheet_range(&name)
            .map_err(|e| open_error(path, e))?;
        let merged = workbook
            .worksheet_merge_cells(&name)
            .unwrap_or_default()
            .iter()
            .map(MergedRange::from)
            .collect();
        Ok(LoadedSheet::from_range(&range, merged))
    }
}

/// Pick the loader for a path by its extension.
pub fn loader_for(path: &Path) -> Result<Box<dyn SheetLoader>, PipelineError> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "xlsx" | "xlsm" => Ok(Box::new(XlsxLoader)),
        "xls" => Ok(Box::new(XlsLoader)),
        other => Err(PipelineError::extraction(format!("Unsupported spreadsheet extension: .{other}"))),
    }
}

/// Load the first worksheet of an `.xlsx`/`.xls` file.
pub fn open_first_sheet(path: &Path) -> Result<LoadedSheet, PipelineError> {
    if !path.exists() {
        return Err(PipelineError::extraction(format!("File not found: {}", path.display())));
    }
    loader_for(path)?.load_first_sheet(path)
}

fn first_sheet_name(names: Vec<String>, path: &Path) -> Result<String, PipelineError> {
    names
        .into_iter()
        .next()
        .ok_or_else(|| PipelineError::extraction(format!("Workbook has no sheets: {}", path.display())))
}

fn open_error(path: &Path, e: impl std::fmt::Display) -> PipelineError {
    PipelineError::extraction(format!("Cannot read workbook {}: {e}", path.display()))
}
