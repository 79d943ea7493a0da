use garde::Validate;
use serde::{Deserialize, Serialize};

/// One validated input row: a product and the images to re-encode.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct ProductRow {
    #[garde(length(min = 1, max = 255))]
    pub serial_number: String,

    #[garde(length(min = 1, max = 255))]
    pub product_name: String,

    #[garde(length(min = 1), inner(length(min = 1)))]
    pub input_locators: Vec<String>,
}

/// Stored product snapshot. `output_paths` is filled when its job completes,
/// in the same order as `input_locators`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub serial_number: String,
    pub product_name: String,
    pub input_locators: Vec<String>,
    pub output_paths: Vec<String>,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Self {
            serial_number: row.serial_number,
            product_name: row.product_name,
            input_locators: row.input_locators,
            output_paths: Vec::new(),
        }
    }
}
