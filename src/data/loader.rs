// ============================================================
// Layer 4 — Columnar JSON Loader
// ============================================================
// Reads the dataset document and turns it into RawRecords.
//
// The document is column-oriented: one key per field, each key
// holding an array with one entry per record.
//
//   {
//     "lyrics": ["first song ...", "second song ..."],
//     "title":  ["One",            "Two"]
//   }
//       │
//       ▼
//   RawRecord { text: "first song ...",  fields: { "title": "One" } }
//   RawRecord { text: "second song ...", fields: { "title": "Two" } }
//
// Every column must be an array and all arrays must have the
// same length; otherwise the whole load fails with FormatError.

use serde_json::{Map, Value};
use std::{
    collections::BTreeMap,
    fs,
    path::PathBuf,
};

use crate::domain::error::{FineTuneError, Result};
use crate::domain::record::RawRecord;
use crate::domain::traits::RecordSource;

/// Loads RawRecords from a columnar JSON file on disk.
pub struct JsonColumnLoader {
    path:       PathBuf,
    /// Column that holds the text to tokenize (e.g. "lyrics")
    text_field: String,
}

impl JsonColumnLoader {
    pub fn new(path: impl Into<PathBuf>, text_field: impl Into<String>) -> Self {
        Self { path: path.into(), text_field: text_field.into() }
    }
}

impl RecordSource for JsonColumnLoader {
    fn load_records(&self) -> Result<Vec<RawRecord>> {
        if !self.path.is_file() {
            return Err(FineTuneError::not_found(&self.path));
        }

        let bytes = fs::read(&self.path)?;
        let text  = String::from_utf8(bytes).map_err(|e| {
            FineTuneError::format(format!(
                "'{}' is not valid UTF-8: {e}", self.path.display()
            ))
        })?;

        let records = parse_columns(&text, &self.text_field)?;
        tracing::info!(
            "Loaded {} records from '{}'",
            records.len(),
            self.path.display()
        );
        Ok(records)
    }
}

/// Parse a columnar JSON document into records, keeping input order.
pub fn parse_columns(json: &str, text_field: &str) -> Result<Vec<RawRecord>> {
    let doc: Value = serde_json::from_str(json)?;

    let Value::Object(columns) = doc else {
        return Err(FineTuneError::format(
            "dataset must be a JSON object mapping field names to arrays",
        ));
    };

    let n_rows = column_length(&columns)?;

    let text_column = columns
        .get(text_field)
        .and_then(Value::as_array)
        .ok_or_else(|| {
            FineTuneError::format(format!("dataset has no '{text_field}' field"))
        })?;

    let mut records = Vec::with_capacity(n_rows);
    for row in 0..n_rows {
        let text = text_column[row].as_str().ok_or_else(|| {
            FineTuneError::format(format!(
                "'{text_field}' entry {row} is not a string: {}", text_column[row]
            ))
        })?;

        let fields: BTreeMap<String, Value> = columns
            .iter()
            .filter(|(name, _)| name.as_str() != text_field)
            .filter_map(|(name, col)| {
                col.as_array().map(|values| (name.clone(), values[row].clone()))
            })
            .collect();

        records.push(RawRecord { text: text.to_string(), fields });
    }

    Ok(records)
}

/// Check that every column is an array and that they all agree on length.
fn column_length(columns: &Map<String, Value>) -> Result<usize> {
    let mut expected: Option<(&str, usize)> = None;

    for (name, value) in columns {
        let len = value
            .as_array()
            .ok_or_else(|| FineTuneError::format(format!("field '{name}' is not an array")))?
            .len();

        match expected {
            None => expected = Some((name.as_str(), len)),
            Some((first, n)) if n != len => {
                return Err(FineTuneError::format(format!(
                    "misaligned fields: '{first}' has {n} entries but '{name}' has {len}"
                )));
            }
            Some(_) => {}
        }
    }

    Ok(expected.map(|(_, n)| n).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_columns_in_order() {
        let json = r#"{"lyrics": ["a b", "c d", "e"], "title": ["x", "y", "z"]}"#;
        let records = parse_columns(json, "lyrics").unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].text, "a b");
        assert_eq!(records[2].text, "e");
        assert_eq!(records[1].fields.get("title"), Some(&Value::from("y")));
        // The text column is not duplicated into the extra fields
        assert!(records[0].fields.get("lyrics").is_none());
    }

    #[test]
    fn test_missing_text_field_is_format_error() {
        let json = r#"{"title": ["x"]}"#;
        let err = parse_columns(json, "lyrics").unwrap_err();
        assert!(matches!(err, FineTuneError::Format(_)));
    }

    #[test]
    fn test_misaligned_columns_rejected() {
        let json = r#"{"lyrics": ["a", "b"], "title": ["x"]}"#;
        let err = parse_columns(json, "lyrics").unwrap_err();
        assert!(err.to_string().contains("misaligned"));
    }

    #[test]
    fn test_invalid_json_rejected() {
        assert!(matches!(
            parse_columns("{\"lyrics\": [", "lyrics"),
            Err(FineTuneError::Format(_))
        ));
    }

    #[test]
    fn test_row_oriented_document_rejected() {
        let json = r#"[{"lyrics": "a"}]"#;
        assert!(matches!(parse_columns(json, "lyrics"), Err(FineTuneError::Format(_))));
    }

    #[test]
    fn test_non_string_text_rejected() {
        let json = r#"{"lyrics": ["ok", 3]}"#;
        assert!(matches!(parse_columns(json, "lyrics"), Err(FineTuneError::Format(_))));
    }

    #[test]
    fn test_empty_columns_give_no_records() {
        let records = parse_columns(r#"{"lyrics": []}"#, "lyrics").unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let loader = JsonColumnLoader::new("/definitely/not/here.json", "lyrics");
        assert!(matches!(
            loader.load_records(),
            Err(FineTuneError::ResourceNotFound { .. })
        ));
    }

    #[test]
    fn test_loads_from_disk() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        fs::write(&path, r#"{"lyrics": ["hello world"]}"#).unwrap();

        let records = JsonColumnLoader::new(&path, "lyrics").load_records().unwrap();
        assert_eq!(records, vec![RawRecord::new("hello world")]);
    }
}
