//! Record Builder
//!
//! Combines one row tuple and its measure cells into an [`OutputRecord`],
//! then maps records onto destination columns as [`UpsertRecord`]s.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use super::coerce::{coerce, infer};
use super::resolver::UnmappedLog;
use crate::config::PipelineConfig;
use crate::error::{RecordError, RecordResult};
use crate::models::{AxisTuple, CellDatum, OutputRecord, TypedValue};

/// Builds records for one compiled pipeline.
#[derive(Debug, Clone, Copy)]
pub struct RecordBuilder<'a> {
    config: &'a PipelineConfig,
}

impl<'a> RecordBuilder<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &'a PipelineConfig {
        self.config
    }

    /// Build the record for row `row`.
    ///
    /// `measures` are the column-axis names and `cells` the row's cells in the
    /// same order. Unmapped hierarchies are dropped and reported to `unmapped`.
    /// Configured measures missing from `measures` take their default.
    pub fn build(
        &self,
        row: usize,
        tuple: &AxisTuple,
        measures: &[String],
        cells: &[Option<&CellDatum>],
        unmapped: &mut UnmappedLog,
    ) -> RecordResult<OutputRecord> {
        let mut fields: Vec<(String, TypedValue)> = Vec::new();

        for member in &tuple.members {
            let Some(field) = self.config.resolver.resolve(&member.hierarchy) else {
                unmapped.report(&member.hierarchy);
                continue;
            };
            if fields.iter().any(|(f, _)| f == field) {
                tracing::debug!(
                    row,
                    field,
                    hierarchy = member.hierarchy.as_str(),
                    "field already set by an earlier member"
                );
                continue;
            }

            let rule = self.config.field_rule(field);
            let value = if member.caption.is_empty() {
                TypedValue::Null
            } else {
                coerce(&member.caption, rule.field_type).ok_or_else(|| {
                    RecordError::FieldCoercion {
                        row,
                        field: field.to_string(),
                        raw: member.caption.clone(),
                        expected: rule.field_type.to_string(),
                    }
                })?
            };
            fields.push((field.to_string(), value));
        }

        for (idx, name) in measures.iter().enumerate() {
            let cell = cells.get(idx).copied().flatten();
            let value = match self.config.measure_rule(name) {
                Some(rule) => match cell.filter(|c| !c.is_empty()) {
                    None => rule.default.clone(),
                    Some(cell) => {
                        let raw = cell.value.as_deref().unwrap_or_default();
                        coerce(raw, rule.field_type).ok_or_else(|| RecordError::FieldCoercion {
                            row,
                            field: name.clone(),
                            raw: raw.to_string(),
                            expected: rule.field_type.to_string(),
                        })?
                    }
                },
                None => infer(cell),
            };
            fields.push((name.clone(), value));
        }

        for (name, rule) in self.config.measures() {
            if !measures.contains(name) {
                fields.push((name.clone(), rule.default.clone()));
            }
        }

        let lookup = |f: &str| fields.iter().find(|(k, _)| k == f).map(|(_, v)| v);

        let business_key = self
            .config
            .business_key
            .render(lookup, self.config.sanitize_key)
            .map_err(|missing| RecordError::BusinessKey { row, missing })?;

        let display_name = self
            .config
            .display_name
            .as_ref()
            .and_then(|d| d.template.render(lookup, false).ok());

        Ok(OutputRecord {
            row,
            fields,
            business_key,
            display_name,
            target_table: self.config.target_table.clone(),
        })
    }

    /// Map a record onto destination columns.
    ///
    /// Null values are omitted. Constants, the display name, and the refresh
    /// timestamp are added when configured.
    pub fn to_upsert(
        &self,
        record: &OutputRecord,
        refreshed_at: Option<DateTime<Utc>>,
    ) -> UpsertRecord {
        let config = self.config;
        let dimensions = config.resolver.fields();
        let mut columns = Map::new();

        columns.insert(
            config.alternate_key.clone(),
            Value::String(record.business_key.clone()),
        );

        for (field, value) in &record.fields {
            if value.is_null() {
                continue;
            }
            let column = if dimensions.contains(&field.as_str()) {
                config.field_rule(field).column
            } else if let Some(rule) = config.measure_rule(field) {
                rule.column.clone()
            } else {
                field.clone()
            };
            columns.insert(column, value.to_json());
        }

        for (column, value) in &config.constants {
            columns.insert(column.clone(), value.clone());
        }

        if let (Some(display), Some(name)) = (&config.display_name, &record.display_name) {
            columns.insert(display.column.clone(), Value::String(name.clone()));
        }

        if let (Some(column), Some(at)) = (&config.refreshed_column, refreshed_at) {
            columns.insert(
                column.clone(),
                Value::String(at.to_rfc3339_opts(SecondsFormat::Secs, true)),
            );
        }

        UpsertRecord {
            table: config.target_table.clone(),
            alternate_key: config.alternate_key.clone(),
            key: record.business_key.clone(),
            columns,
        }
    }
}

/// One record addressed to its destination table, keyed by column name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpsertRecord {
    pub table: String,
    pub alternate_key: String,
    pub key: String,
    pub columns: Map<String, Value>,
}
