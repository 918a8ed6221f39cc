//! JSON Schema validation for configuration documents.
//!
//! Pipeline and mapping documents are YAML, converted to JSON values and
//! checked against Draft 7 schemas before they are deserialized. This gives
//! users every structural problem at once instead of the first serde error.
//!
//! # Embedded Schemas
//!
//! Schemas are embedded at compile time from `schemas/`:
//! - `pipelines.schema.json`
//! - `mapping.schema.json`
//!
//! # Example
//!
//! ```rust,ignore
//! use serde_json::json;
//! use cubesync::validation::validate_mapping_document;
//!
//! let mapping = json!({
//!     "table": "crf63_dailysales",
//!     "business_key": { "format": "{Store}_{Date:%Y%m%d}" }
//! });
//! assert!(validate_mapping_document(&mapping).is_ok());
//! ```

use once_cell::sync::Lazy;
use serde_json::Value;

static PIPELINES_SCHEMA: Lazy<Value> = Lazy::new(|| {
    serde_json::from_str(include_str!("../../schemas/pipelines.schema.json"))
        .expect("Invalid embedded schema")
});

static MAPPING_SCHEMA: Lazy<Value> = Lazy::new(|| {
    serde_json::from_str(include_str!("../../schemas/mapping.schema.json"))
        .expect("Invalid embedded schema")
});

/// Validate `data` against `schema`.
///
/// Returns every violation, or a single entry if the schema itself is invalid.
pub fn validate(schema: &Value, data: &Value) -> Result<(), Vec<String>> {
    let validator =
        jsonschema::draft7::new(schema).map_err(|e| vec![format!("Invalid schema: {}", e)])?;

    let errors: Vec<String> = validator.iter_errors(data).map(|e| e.to_string()).collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

pub fn is_valid(schema: &Value, data: &Value) -> bool {
    jsonschema::draft7::is_valid(schema, data)
}

/// Validate a `pipelines.yaml` document.
pub fn validate_pipelines_document(data: &Value) -> Result<(), Vec<String>> {
    validate(&PIPELINES_SCHEMA, data)
}

/// Validate a mapping document.
pub fn validate_mapping_document(data: &Value) -> Result<(), Vec<String>> {
    validate(&MAPPING_SCHEMA, data)
}
