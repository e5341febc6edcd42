//! Format-specific extractors: spreadsheets, CSV, and LLM-read documents.

pub mod csv;
pub mod document;
pub mod sheet;
pub mod table;

pub use document::{extract_document, parse_records, DOCUMENT_SYSTEM_PROMPT, GENERIC_ENDORSEMENT_PROMPT};
pub use sheet::{open_first_sheet, CellValue, LoadedSheet, MergedRange, SheetLoader, SheetSource};
pub use table::{extract_sheet, extract_workbook, SheetExtraction};
