//! Lookup behavior - query external data sources.

use super::copy::CopySource;
use super::extraction::ExtractionMethod;
use crate::error::{DecoyError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

/// Lookup behavior - query external data source
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LookupBehavior {
    /// Key extraction from request
    pub key: LookupKey,
    /// Data source configuration
    #[serde(rename = "fromDataSource")]
    pub from_data_source: DataSource,
    /// Token to replace in response (e.g., "${RESULT}")
    pub into: String,
}

/// Key extraction configuration for lookup
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(try_from = "RawLookupKey", into = "RawLookupKey")]
pub struct LookupKey {
    /// Request field to extract key from
    pub from: CopySource,
    /// Extraction method
    pub extraction: ExtractionMethod,
    /// Which extracted value is the key
    pub index: usize,
}

#[derive(Deserialize, Serialize)]
struct RawLookupKey {
    from: CopySource,
    using: Value,
}

impl TryFrom<RawLookupKey> for LookupKey {
    type Error = String;

    fn try_from(raw: RawLookupKey) -> std::result::Result<Self, Self::Error> {
        let index = match raw.using.get("index") {
            None => 0,
            Some(index) => index
                .as_u64()
                .and_then(|i| usize::try_from(i).ok())
                .ok_or_else(|| "lookup key index must be a non-negative integer".to_string())?,
        };
        let extraction =
            ExtractionMethod::deserialize(&raw.using).map_err(|e| e.to_string())?;
        Ok(Self {
            from: raw.from,
            extraction,
            index,
        })
    }
}

impl From<LookupKey> for RawLookupKey {
    fn from(key: LookupKey) -> Self {
        let mut using = serde_json::to_value(&key.extraction).unwrap_or(Value::Null);
        if key.index != 0 {
            if let Value::Object(map) = &mut using {
                map.insert("index".to_string(), Value::from(key.index));
            }
        }
        Self {
            from: key.from,
            using,
        }
    }
}

impl LookupKey {
    /// The lookup key for this request, if the extraction matched.
    pub fn value(&self, request: &Value) -> Option<String> {
        self.extraction
            .values(&self.from.extract(request))
            .into_iter()
            .nth(self.index)
    }
}

/// External data source configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DataSource {
    /// CSV data source
    pub csv: CsvDataSource,
}

/// CSV data source configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CsvDataSource {
    /// Path to CSV file
    pub path: String,
    /// Column to use as lookup key
    #[serde(rename = "keyColumn")]
    pub key_column: String,
    /// Delimiter character (default: ',')
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
}

fn default_delimiter() -> char {
    ','
}

impl CsvDataSource {
    pub fn validate(&self) -> Result<()> {
        if !self.delimiter.is_ascii() {
            return Err(DecoyError::validation(format!(
                "lookup delimiter {:?} must be a single ASCII character",
                self.delimiter
            )));
        }
        Ok(())
    }

    /// Read the file and return the row whose key column equals `key`.
    ///
    /// The file is read on every call so edits show up immediately.
    pub fn find_row(&self, key: &str) -> std::result::Result<Option<HashMap<String, String>>, csv::Error> {
        let data = CsvData::load(&self.path, self.delimiter)?;
        Ok(data.lookup(key, &self.key_column))
    }
}

/// Parsed CSV data
pub struct CsvData {
    /// Column headers
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl CsvData {
    /// Load CSV from file
    pub fn load<P: AsRef<Path>>(path: P, delimiter: char) -> std::result::Result<Self, csv::Error> {
        let delimiter = u8::try_from(delimiter).unwrap_or(b',');
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .trim(csv::Trim::All)
            .flexible(true)
            .from_path(path)?;
        let headers = reader.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(record?.iter().map(str::to_string).collect());
        }
        Ok(Self { headers, rows })
    }

    /// Column values of the first row whose `key_column` equals `key`.
    pub fn lookup(&self, key: &str, key_column: &str) -> Option<HashMap<String, String>> {
        let key_idx = self.headers.iter().position(|h| h == key_column)?;
        let row = self
            .rows
            .iter()
            .find(|row| row.get(key_idx).map(String::as_str) == Some(key))?;
        Some(
            self.headers
                .iter()
                .zip(row.iter())
                .map(|(header, value)| (header.clone(), value.clone()))
                .collect(),
        )
    }
}

/// Apply lookup behaviors to every string in the response.
pub fn apply_lookup_behaviors(response: &mut Value, behaviors: &[LookupBehavior], request: &Value) {
    for behavior in behaviors {
        let Some(key) = behavior.key.value(request) else {
            tracing::debug!("lookup behavior {} found no key", behavior.into);
            continue;
        };
        let csv = &behavior.from_data_source.csv;
        let row = match csv.find_row(&key) {
            Ok(Some(row)) => row,
            Ok(None) => {
                tracing::debug!("lookup key {key:?} not found in {}", csv.path);
                continue;
            }
            Err(e) => {
                tracing::warn!("lookup failed to read {}: {e}", csv.path);
                continue;
            }
        };
        for (column, value) in &row {
            for token in [
                format!("{}[\"{column}\"]", behavior.into),
                format!("{}['{column}']", behavior.into),
                format!("{}[{column}]", behavior.into),
            ] {
                super::replace_token(response, &token, value);
            }
        }
    }
}
