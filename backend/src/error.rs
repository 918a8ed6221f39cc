//! Error types for the cubesync pipeline.
//!
//! Errors are split by the stage that raises them:
//!
//! - [`ConfigError`] - pipeline/mapping documents, raised at load time
//! - [`ResponseError`] - structural problems with one XMLA response
//! - [`RecordError`] - one output record could not be built
//! - [`XmlaError`] - transport errors talking to the OLAP server
//! - [`SinkError`] - errors writing records to a sink
//! - [`PipelineError`] - top-level orchestration errors
//!
//! Conversion into [`PipelineError`] is automatic via `From`, so `?` works
//! across stage boundaries.

use std::path::PathBuf;

use thiserror::Error;

// =============================================================================
// Configuration Errors
// =============================================================================

/// Errors raised while loading or compiling a pipeline definition.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a configuration file.
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML syntax error.
    #[error("Invalid YAML in '{document}': {source}")]
    Yaml {
        document: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// Document does not match its JSON Schema.
    #[error("'{document}' failed schema validation: {}", .errors.join("; "))]
    Schema { document: String, errors: Vec<String> },

    /// Document matched the schema but could not be deserialized.
    #[error("Invalid document '{document}': {source}")]
    Shape {
        document: String,
        #[source]
        source: serde_json::Error,
    },

    /// A hierarchy pattern is not a valid regular expression.
    #[error("Invalid hierarchy pattern '{pattern}' for field '{field}': {source}")]
    InvalidPattern {
        pattern: String,
        field: String,
        #[source]
        source: regex::Error,
    },

    /// A template string could not be parsed.
    #[error("Invalid template '{template}': {message}")]
    InvalidTemplate { template: String, message: String },

    /// A template placeholder names a field no mapping produces.
    #[error("Template '{template}' references undefined field '{field}'")]
    UndefinedField { template: String, field: String },

    /// A format specifier was applied to a field that cannot take one.
    #[error("Field '{field}' of type {field_type} does not accept format '{format}'")]
    FormatNotSupported {
        field: String,
        field_type: String,
        format: String,
    },

    /// A configured default value does not coerce to its field's type.
    #[error("Default for '{field}' is not a valid {expected}: {raw}")]
    InvalidDefault {
        field: String,
        raw: String,
        expected: String,
    },

    /// A measure shares its name with a dimension field.
    #[error("'{field}' is both a dimension field and a measure")]
    FieldConflict { field: String },

    /// Pipeline name not present in the registry.
    #[error("Unknown pipeline '{name}'. Available: {}", .available.join(", "))]
    UnknownPipeline { name: String, available: Vec<String> },

    /// Named slicer not defined for the pipeline.
    #[error("Pipeline '{pipeline}' has no slicer named '{slicer}'")]
    UnknownSlicer { pipeline: String, slicer: String },

    /// Template variables left unfilled after rendering.
    #[error("Unresolved variables in MDX for '{pipeline}': {}", .variables.join(", "))]
    UnresolvedVariables {
        pipeline: String,
        variables: Vec<String>,
    },
}

// =============================================================================
// Response Errors
// =============================================================================

/// Errors raised while decoding one XMLA response body.
#[derive(Debug, Error)]
pub enum ResponseError {
    /// The response does not have the two-axis + cells shape.
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// XML well-formedness error.
    #[error("XML error at byte {position}: {message}")]
    Xml { position: u64, message: String },

    /// Body could not be decoded to text.
    #[error("Failed to decode response body as {encoding}")]
    Encoding { encoding: String },

    /// The server answered with a SOAP fault or XMLA exception.
    #[error("Server fault {code}: {message}")]
    ServerFault { code: String, message: String },
}

// =============================================================================
// Record Errors
// =============================================================================

/// Errors that fail one output record without affecting its siblings.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RecordError {
    /// A value could not be coerced to its configured type.
    #[error("Row {row}: field '{field}' value '{raw}' is not a valid {expected}")]
    FieldCoercion {
        row: usize,
        field: String,
        raw: String,
        expected: String,
    },

    /// The business key references fields missing from this row.
    #[error("Row {row}: business key is missing {}", .missing.join(", "))]
    BusinessKey { row: usize, missing: Vec<String> },
}

impl RecordError {
    /// Row index within the response that produced the error.
    pub fn row(&self) -> usize {
        match self {
            RecordError::FieldCoercion { row, .. } | RecordError::BusinessKey { row, .. } => *row,
        }
    }
}

// =============================================================================
// XMLA Transport Errors
// =============================================================================

/// Errors executing an MDX statement over XMLA.
#[derive(Debug, Error)]
pub enum XmlaError {
    /// Required setting is missing.
    #[error("Missing {0} environment variable")]
    MissingSetting(&'static str),

    /// HTTP request failed before a response arrived.
    #[error("XMLA request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Server returned a non-success status.
    #[error("XMLA query failed with HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

// =============================================================================
// Sink Errors
// =============================================================================

/// Errors writing records to a sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Sink IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sink JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Sink CSV error: {0}")]
    Csv(#[from] csv::Error),
}

// =============================================================================
// Pipeline Errors (top-level)
// =============================================================================

/// Top-level pipeline orchestration errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Response error in chunk {chunk}: {source}")]
    Response {
        chunk: usize,
        #[source]
        source: ResponseError,
    },

    #[error("XMLA error: {0}")]
    Xmla(#[from] XmlaError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// A record failed and the caller asked to abort.
    #[error("Aborted in chunk {chunk}: {source}")]
    Aborted {
        chunk: usize,
        #[source]
        source: RecordError,
    },
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for response parsing.
pub type ResponseResult<T> = Result<T, ResponseError>;

/// Result type for record building.
pub type RecordResult<T> = Result<T, RecordError>;

/// Result type for XMLA operations.
pub type XmlaResult<T> = Result<T, XmlaError>;

/// Result type for sink operations.
pub type SinkResult<T> = Result<T, SinkError>;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_converts_to_pipeline_error() {
        let err = ConfigError::UndefinedField {
            template: "{Store}_{Date}".into(),
            field: "Date".into(),
        };
        let pipeline_err: PipelineError = err.into();
        let msg = pipeline_err.to_string();
        assert!(msg.contains("Date"));
        assert!(msg.starts_with("Config error"));
    }

    #[test]
    fn test_coercion_error_names_field_and_value() {
        let err = RecordError::FieldCoercion {
            row: 3,
            field: "Revenue USD".into(),
            raw: "n/a".into(),
            expected: "decimal".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Row 3"));
        assert!(msg.contains("Revenue USD"));
        assert!(msg.contains("'n/a'"));
        assert_eq!(err.row(), 3);
    }

    #[test]
    fn test_schema_error_lists_all_violations() {
        let err = ConfigError::Schema {
            document: "mapping.yaml".into(),
            errors: vec!["missing table".into(), "missing business_key".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("missing table; missing business_key"));
    }
}
