//! Mapping document: one per destination table.
//!
//! ```yaml
//! table: crf63_dailysales
//! alternate_key: crf63_businesskey
//! business_key:
//!   format: "{Store}_{Date:%Y%m%d}"
//! display_name:
//!   column: crf63_name
//!   format: "Store {Store} {Date:%b %d, %Y}"
//! refreshed_column: crf63_lastrefreshed
//! constants:
//!   crf63_source: cube
//! fields:
//!   Store: { column: crf63_storenumber }
//!   Date:  { column: crf63_date, type: date }
//! measures:
//!   TY Net Sales USD: { column: crf63_netsales, type: decimal, default: 0 }
//! ```

use serde::Deserialize;
use serde_json::Value;

use super::ordered;
use crate::models::FieldType;

pub const DEFAULT_ALTERNATE_KEY: &str = "crf63_businesskey";

#[derive(Debug, Clone, Deserialize)]
pub struct MappingDocument {
    pub table: String,

    #[serde(default = "default_alternate_key")]
    pub alternate_key: String,

    pub business_key: BusinessKeySpec,

    #[serde(default)]
    pub display_name: Option<DisplayNameSpec>,

    #[serde(default)]
    pub refreshed_column: Option<String>,

    #[serde(default, deserialize_with = "ordered")]
    pub constants: Vec<(String, Value)>,

    /// Dimension fields keyed by the name a hierarchy mapping produces.
    #[serde(default, deserialize_with = "ordered")]
    pub fields: Vec<(String, FieldSpec)>,

    /// Measures keyed by caption on the column axis.
    #[serde(default, deserialize_with = "ordered")]
    pub measures: Vec<(String, MeasureSpec)>,
}

fn default_alternate_key() -> String {
    DEFAULT_ALTERNATE_KEY.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct BusinessKeySpec {
    pub format: String,
    /// Replace spaces and hyphens in substituted text with `_`.
    #[serde(default)]
    pub sanitize: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisplayNameSpec {
    pub column: String,
    pub format: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FieldSpec {
    #[serde(default, alias = "dataverse")]
    pub column: Option<String>,
    #[serde(default, rename = "type")]
    pub field_type: Option<FieldType>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MeasureSpec {
    #[serde(default, alias = "dataverse")]
    pub column: Option<String>,
    #[serde(default, rename = "type")]
    pub field_type: Option<FieldType>,
    #[serde(default)]
    pub default: Option<Value>,
}
