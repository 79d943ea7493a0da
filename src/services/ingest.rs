//! Parsing of uploaded product spreadsheets (CSV) into batch rows.
//!
//! Expected header columns: `Serial Number`, `Product Name` and
//! `Input Image Urls`, in any order. The image column holds a comma-separated
//! list of URLs, so it is normally quoted.

use crate::models::product::ProductRow;

const SERIAL_COLUMN: &str = "Serial Number";
const NAME_COLUMN: &str = "Product Name";
const IMAGES_COLUMN: &str = "Input Image Urls";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum IngestError {
    #[error("CSV is missing column '{0}'")]
    MissingColumn(&'static str),

    #[error("Malformed CSV at line {line}: {reason}")]
    Malformed { line: u64, reason: String },
}

impl From<csv::Error> for IngestError {
    fn from(e: csv::Error) -> Self {
        Self::Malformed {
            line: e.position().map(|p| p.line()).unwrap_or(0),
            reason: e.to_string(),
        }
    }
}

pub fn parse_product_csv(bytes: &[u8]) -> Result<Vec<ProductRow>, IngestError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let header = reader.headers()?.clone();
    let column = |name: &'static str| {
        header
            .iter()
            .position(|h| h == name)
            .ok_or(IngestError::MissingColumn(name))
    };
    let serial_idx = column(SERIAL_COLUMN)?;
    let name_idx = column(NAME_COLUMN)?;
    let images_idx = column(IMAGES_COLUMN)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        let field = |idx: usize| record.get(idx).unwrap_or_default().to_string();
        let input_locators = field(images_idx)
            .split(',')
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .collect();

        rows.push(ProductRow {
            serial_number: field(serial_idx),
            product_name: field(name_idx),
            input_locators,
        });
    }
    Ok(rows)
}
