//! # Cubesync - XMLA response parsing and declarative record mapping
//!
//! Cubesync queries an OLAP cube over XMLA, decodes the multidimensional
//! response, and maps every row tuple to a typed record keyed by a business
//! key, ready to upsert into a destination table.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  MDX + vars │────▶│  XMLA HTTP  │────▶│   Parser    │────▶│   Builder   │────▶ sink
//! │  (pipeline) │     │  (Execute)  │     │ (axes+cells)│     │ (YAML maps) │
//! └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cubesync::{parse_and_transform, PipelineRegistry};
//!
//! let registry = PipelineRegistry::load("pipelines/pipelines.yaml")?;
//! let config = registry.compile("daily_sales")?;
//! for record in parse_and_transform(&config, &response_xml)? {
//!     println!("{}", record?.business_key);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Hierarchical error types
//! - [`models`] - Axis tuples, cells, typed values, output records
//! - [`parser`] - XMLA response decoding
//! - [`config`] - Pipeline and mapping documents, compiled configuration
//! - [`registry`] - Pipelines file loading
//! - [`transform`] - Resolver, coercion, templates, record builder, driver
//! - [`sink`] - Record output
//! - [`xmla`] - SOAP envelope and HTTP client
//! - [`validation`] - Config document schema validation
//! - [`settings`] - Environment settings

// Core modules
pub mod error;
pub mod models;

// Parsing
pub mod parser;

// Configuration
pub mod config;
pub mod registry;
pub mod settings;
pub mod validation;

// Transformation
pub mod transform;

// Output
pub mod sink;

// Transport
pub mod xmla;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    ConfigError, ConfigResult, PipelineError, PipelineResult, RecordError, RecordResult,
    ResponseError, ResponseResult, SinkError, SinkResult, XmlaError, XmlaResult,
};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{
    AxisTuple, CellDatum, FieldType, Member, OutputRecord, ParseOutcome, ParsedResponse,
    TypedValue,
};

// =============================================================================
// Re-exports - Parsing
// =============================================================================

pub use parser::{decode_body, parse_bytes, parse_response};

// =============================================================================
// Re-exports - Configuration
// =============================================================================

pub use config::{
    parse_assignment, parse_each, MappingDocument, PipelineConfig, PipelineDefinition, Variables,
};
pub use registry::PipelineRegistry;
pub use settings::Settings;

// =============================================================================
// Re-exports - Transformation
// =============================================================================

pub use transform::{
    check_ambiguities, parse_and_transform, run_bodies, transform_outcome, ChunkRunner,
    ErrorPolicy, HierarchyResolver, KeyTemplate, RecordBuilder, RecordStream, RunOptions,
    RunSummary, UpsertRecord,
};

// =============================================================================
// Re-exports - Output and Transport
// =============================================================================

pub use sink::{CsvSink, JsonLinesSink, MemorySink, RecordSink};
pub use xmla::XmlaClient;
