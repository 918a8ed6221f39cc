//! Transformation module.
//!
//! This module maps parsed XMLA responses to records:
//! - Resolver: hierarchy names to semantic fields
//! - Coerce: raw text to typed values
//! - Template: business-key and display-name templates
//! - Builder: one row tuple to one record
//! - Pipeline: response body to record stream, chunked runs

pub mod builder;
pub mod coerce;
pub mod pipeline;
pub mod resolver;
pub mod template;

pub use builder::{RecordBuilder, UpsertRecord};
pub use pipeline::*;
pub use resolver::{find_ambiguities, Ambiguity, HierarchyMapping, HierarchyResolver, UnmappedLog};
pub use template::KeyTemplate;
