//! Header-row CSV extraction.

use std::io::Read;
use std::path::Path;

use serde_json::Value;

use crate::pipeline::error::PipelineError;
use crate::pipeline::types::RawRecord;

/// Read a CSV file whose first row names the columns.
pub fn extract_csv(path: &Path) -> Result<Vec<RawRecord>, PipelineError> {
    let file = std::fs::File::open(path).map_err(|e| {
        PipelineError::extraction(format!("Cannot open {}: {e}", path.display()))
    })?;
    extract_csv_reader(file)
}

/// Every row becomes a record keyed by header; cells are trimmed, blanks become null.
pub fn extract_csv_reader<R: Read>(reader: R) -> Result<Vec<RawRecord>, PipelineError> {
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

    let headers: Vec<String> = rdr
        .headers()
        .map_err(csv_error)?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut records = Vec::new();
    for row in rdr.records() {
        let row = row.map_err(csv_error)?;
        let mut record = RawRecord::new();
        for (i, header) in headers.iter().enumerate() {
            if header.is_empty() {
                continue;
            }
            let value = row
                .get(i)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| Value::String(v.to_string()))
                .unwrap_or(Value::Null);
            record.insert(header.clone(), value);
        }
        if record.values().any(|v| !v.is_null()) {
            records.push(record);
        }
    }

    tracing::debug!(columns = headers.len(), records = records.len(), "CSV parsed");
    Ok(records)
}

fn csv_error(e: csv::Error) -> PipelineError {
    PipelineError::extraction(format!("Invalid CSV: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_keyed_by_header() {
        let data = "name, employee_id ,action\n Asha ,E1,ADD\nRavi,,DEL\n";
        let records = extract_csv_reader(data.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["name"], "Asha");
        assert_eq!(records[0]["employee_id"], "E1");
        assert_eq!(records[1]["employee_id"], Value::Null);
    }

    #[test]
    fn short_rows_and_blank_rows() {
        let data = "a,b,c\n1\n,,\n";
        let records = extract_csv_reader(data.as_bytes()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["a"], "1");
        assert_eq!(records[0]["c"], Value::Null);
    }

    #[test]
    fn column_order_follows_header() {
        let records = extract_csv_reader("z,a,m\n1,2,3\n".as_bytes()).unwrap();
        let keys: Vec<_> = records[0].keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn missing_file_is_extraction_error() {
        let err = extract_csv(Path::new("/no/such/file.csv")).unwrap_err();
        assert_eq!(err.kind(), "Extraction");
    }

    #[test]
    fn reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("e.csv");
        std::fs::write(&path, "name\nAsha\n").unwrap();
        assert_eq!(extract_csv(&path).unwrap().len(), 1);
    }
}
