//! CSV decoding and row validation for product imports
//!
//! Rows are produced lazily from the raw upload bytes. Header cells are
//! lowercased and trimmed; blank or repeated headers are ignored so a
//! spreadsheet export with stray columns still imports.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::types::{ProductCandidate, MAX_NAME_LEN, MAX_SKU_LEN};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// One data row keyed by normalized header name. Empty cells are absent.
pub type CsvRow = HashMap<String, String>;

#[derive(Debug, Error)]
pub enum CsvImportError {
    #[error("File is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),
    #[error("Malformed CSV: {0}")]
    Csv(#[from] csv::Error),
}

/// Lazy iterator over the data rows of a CSV upload
pub struct CsvRows<'a> {
    records: csv::StringRecordsIntoIter<&'a [u8]>,
    columns: Vec<Option<String>>,
}

impl<'a> Iterator for CsvRows<'a> {
    type Item = Result<CsvRow, CsvImportError>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = match self.records.next()? {
            Ok(record) => record,
            Err(e) => return Some(Err(e.into())),
        };

        let mut row = CsvRow::new();
        for (column, value) in self.columns.iter().zip(record.iter()) {
            let Some(name) = column else { continue };
            let value = value.trim();
            if !value.is_empty() {
                row.insert(name.clone(), value.to_string());
            }
        }
        Some(Ok(row))
    }
}

/// Decode upload bytes and start iterating rows.
///
/// Fails only if the content is not UTF-8 or the header row cannot be read;
/// per-record parse errors surface through the iterator.
pub fn parse_csv(content: &[u8]) -> Result<CsvRows<'_>, CsvImportError> {
    let body = content.strip_prefix(UTF8_BOM).unwrap_or(content);
    let text = std::str::from_utf8(body)?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let columns = normalize_headers(reader.headers()?);

    Ok(CsvRows {
        records: reader.into_records(),
        columns,
    })
}

fn normalize_headers(headers: &csv::StringRecord) -> Vec<Option<String>> {
    let mut seen = HashSet::new();
    headers
        .iter()
        .map(|header| {
            let name = header.trim().to_lowercase();
            if name.is_empty() || !seen.insert(name.clone()) {
                None
            } else {
                Some(name)
            }
        })
        .collect()
}

/// Validate one row and project it to a catalog write candidate.
///
/// `row_number` is 1-based over data rows (the header is row 0).
pub fn validate_row(row: &CsvRow, row_number: usize) -> Result<ProductCandidate, String> {
    let sku = row
        .get("sku")
        .ok_or_else(|| format!("Row {}: SKU is required", row_number))?;
    let name = row
        .get("name")
        .ok_or_else(|| format!("Row {}: Name is required", row_number))?;

    // Column widths of the products table
    if sku.chars().count() > MAX_SKU_LEN {
        return Err(format!(
            "Row {}: SKU must be at most {} characters",
            row_number, MAX_SKU_LEN
        ));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(format!(
            "Row {}: Name must be at most {} characters",
            row_number, MAX_NAME_LEN
        ));
    }

    Ok(ProductCandidate {
        sku: sku.clone(),
        name: name.clone(),
        description: row.get("description").cloned(),
        // CSV import never deactivates a product
        active: true,
    })
}

/// Valid candidates and row errors of a fully read file, both in file order
#[derive(Debug, Default)]
pub struct ValidatedRows {
    pub candidates: Vec<ProductCandidate>,
    pub errors: Vec<String>,
}

pub fn validate_rows(rows: &[CsvRow]) -> ValidatedRows {
    let mut validated = ValidatedRows::default();
    for (idx, row) in rows.iter().enumerate() {
        match validate_row(row, idx + 1) {
            Ok(candidate) => validated.candidates.push(candidate),
            Err(error) => validated.errors.push(error),
        }
    }
    validated
}
