//! XMLA transport: SOAP `Execute` envelopes and an HTTP client.
//!
//! The client returns raw bodies; decoding and fault detection belong to
//! [`crate::parser`].

pub mod client;
pub mod envelope;

pub use client::{endpoint_url, XmlaClient};
pub use envelope::{execute_envelope, SOAP_ACTION};
