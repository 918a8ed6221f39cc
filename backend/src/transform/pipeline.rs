//! Pipeline driver: response body in, records out.
//!
//! [`parse_and_transform`] parses one response and returns a lazy iterator
//! of per-row results, in row tuple order. Structural problems fail the
//! whole call; a bad row fails only its own record.
//!
//! [`ChunkRunner`] drives several responses (one per time chunk) into a
//! [`RecordSink`] under an [`ErrorPolicy`] and keeps a [`RunSummary`].
//!
//! # Example
//!
//! ```rust,ignore
//! use cubesync::registry::PipelineRegistry;
//! use cubesync::transform::parse_and_transform;
//!
//! let config = PipelineRegistry::load("pipelines/pipelines.yaml")?.compile("daily_sales")?;
//! for record in parse_and_transform(&config, &body)? {
//!     match record {
//!         Ok(record) => println!("{}", record.business_key),
//!         Err(err) => eprintln!("{err}"),
//!     }
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::builder::RecordBuilder;
use super::resolver::{find_ambiguities, Ambiguity, UnmappedLog};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult, RecordError, RecordResult, ResponseResult};
use crate::models::{OutputRecord, ParseOutcome, ParsedResponse};
use crate::parser::{decode_body, parse_response};
use crate::sink::RecordSink;

/// Failures kept verbatim in a [`RunSummary`]; later ones are only counted.
const MAX_KEPT_FAILURES: usize = 20;

// =============================================================================
// Record Stream
// =============================================================================

/// Parse `body` and map each row tuple to a record.
pub fn parse_and_transform<'a>(
    config: &'a PipelineConfig,
    body: &str,
) -> ResponseResult<RecordStream<'a>> {
    let outcome = parse_response(body)?;
    Ok(transform_outcome(config, outcome, UnmappedLog::new()))
}

/// Map an already parsed response. `unmapped` carries warnings across calls.
pub fn transform_outcome(
    config: &PipelineConfig,
    outcome: ParseOutcome,
    unmapped: UnmappedLog,
) -> RecordStream<'_> {
    let response = match outcome {
        ParseOutcome::Data(parsed) => Some(parsed),
        ParseOutcome::NoData { measures } => {
            tracing::info!(
                pipeline = %config.name,
                measures = measures.len(),
                "response has no rows"
            );
            None
        }
    };

    if let Some(parsed) = &response {
        for name in config.measure_names() {
            if !parsed.measures.iter().any(|m| m == name) {
                tracing::warn!(
                    pipeline = %config.name,
                    measure = name,
                    "configured measure not on the column axis; using its default"
                );
            }
        }
    }

    RecordStream {
        builder: RecordBuilder::new(config),
        response,
        next_row: 0,
        unmapped,
    }
}

/// Lazy iterator over the records of one response.
pub struct RecordStream<'a> {
    builder: RecordBuilder<'a>,
    response: Option<ParsedResponse>,
    next_row: usize,
    unmapped: UnmappedLog,
}

impl<'a> RecordStream<'a> {
    /// Rows in the response, built or not.
    pub fn row_count(&self) -> usize {
        self.response.as_ref().map_or(0, ParsedResponse::row_count)
    }

    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }

    pub fn into_unmapped_log(self) -> UnmappedLog {
        self.unmapped
    }
}

impl<'a> Iterator for RecordStream<'a> {
    type Item = RecordResult<OutputRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let parsed = self.response.as_ref()?;
        let row = self.next_row;
        let tuple = parsed.rows.get(row)?;
        self.next_row += 1;

        let cells = parsed.row_cells(row);
        Some(
            self.builder
                .build(row, tuple, &parsed.measures, &cells, &mut self.unmapped),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.row_count().saturating_sub(self.next_row);
        (left, Some(left))
    }
}

impl ExactSizeIterator for RecordStream<'_> {}

/// Hierarchies in a sample response that match more than one field.
pub fn check_ambiguities(config: &PipelineConfig, body: &str) -> ResponseResult<Vec<Ambiguity>> {
    Ok(match parse_response(body)? {
        ParseOutcome::Data(parsed) => find_ambiguities(&config.resolver, &parsed),
        ParseOutcome::NoData { .. } => Vec::new(),
    })
}

// =============================================================================
// Chunked Runs
// =============================================================================

/// What to do when one record fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Log the failure, count it, and keep going.
    #[default]
    Skip,
    /// Stop the run at the first failed record.
    Abort,
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub policy: ErrorPolicy,
    /// Written to the refresh column of every record, when configured.
    pub refreshed_at: Option<DateTime<Utc>>,
}

/// A record failure and the chunk it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkFailure {
    pub chunk: usize,
    pub error: RecordError,
}

/// Counters for one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub chunks: usize,
    pub empty_chunks: usize,
    pub rows: usize,
    pub records: usize,
    pub failed: usize,
    #[serde(skip)]
    pub failures: Vec<ChunkFailure>,
}

impl RunSummary {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Feeds response bodies, in order, through one pipeline into a sink.
pub struct ChunkRunner<'a, S: RecordSink + ?Sized> {
    config: &'a PipelineConfig,
    sink: &'a mut S,
    options: RunOptions,
    summary: RunSummary,
    unmapped: UnmappedLog,
}

impl<'a, S: RecordSink + ?Sized> ChunkRunner<'a, S> {
    pub fn new(config: &'a PipelineConfig, sink: &'a mut S, options: RunOptions) -> Self {
        Self {
            config,
            sink,
            options,
            summary: RunSummary::default(),
            unmapped: UnmappedLog::new(),
        }
    }

    /// Decode and process one raw response body.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> PipelineResult<()> {
        let chunk = self.summary.chunks;
        let body =
            decode_body(bytes).map_err(|source| PipelineError::Response { chunk, source })?;
        self.push(&body)
    }

    /// Process one response body.
    pub fn push(&mut self, body: &str) -> PipelineResult<()> {
        let chunk = self.summary.chunks;
        let outcome =
            parse_response(body).map_err(|source| PipelineError::Response { chunk, source })?;

        let unmapped = std::mem::take(&mut self.unmapped);
        let mut stream = transform_outcome(self.config, outcome, unmapped);
        self.summary.chunks += 1;
        self.summary.rows += stream.row_count();
        if stream.is_empty() {
            self.summary.empty_chunks += 1;
        }

        let builder = RecordBuilder::new(self.config);
        let mut result = Ok(());
        for record in stream.by_ref() {
            match record {
                Ok(record) => {
                    let upsert = builder.to_upsert(&record, self.options.refreshed_at);
                    if let Err(err) = self.sink.write(&upsert) {
                        result = Err(err.into());
                        break;
                    }
                    self.summary.records += 1;
                }
                Err(error) => match self.options.policy {
                    ErrorPolicy::Abort => {
                        result = Err(PipelineError::Aborted {
                            chunk,
                            source: error,
                        });
                        break;
                    }
                    ErrorPolicy::Skip => {
                        tracing::warn!(
                            pipeline = %self.config.name,
                            chunk,
                            row = error.row(),
                            error = %error,
                            "record skipped"
                        );
                        self.summary.failed += 1;
                        if self.summary.failures.len() < MAX_KEPT_FAILURES {
                            self.summary.failures.push(ChunkFailure { chunk, error });
                        }
                    }
                },
            }
        }
        self.unmapped = stream.into_unmapped_log();

        tracing::debug!(
            pipeline = %self.config.name,
            chunk,
            records = self.summary.records,
            failed = self.summary.failed,
            "chunk processed"
        );
        result
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Flush the sink and return the summary.
    pub fn finish(self) -> PipelineResult<RunSummary> {
        self.sink.finish()?;
        Ok(self.summary)
    }
}

/// Run every body through `config` into `sink`.
pub fn run_bodies<S, I, B>(
    config: &PipelineConfig,
    bodies: I,
    sink: &mut S,
    options: RunOptions,
) -> PipelineResult<RunSummary>
where
    S: RecordSink + ?Sized,
    I: IntoIterator<Item = B>,
    B: AsRef<str>,
{
    let mut runner = ChunkRunner::new(config, sink, options);
    for body in bodies {
        runner.push(body.as_ref())?;
    }
    runner.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::{compile, daily_sales};
    use crate::error::ResponseError;
    use crate::models::TypedValue;
    use crate::sink::MemorySink;

    const DAILY: &str = include_str!("../../fixtures/daily_sales_response.xml");
    const SPARSE: &str = include_str!("../../fixtures/sparse_response.xml");
    const FAULT: &str = include_str!("../../fixtures/fault_response.xml");

    const SPARSE_PIPELINE: &str = r#"
pipelines:
  offer_redemptions:
    catalog: Offers
    mapping: mappings/offer_redemptions.yaml
    mdx: SELECT FROM [Offers]
    hierarchy_mappings:
      - { pattern: 'Store Number', field: Store }
      - { pattern: 'Offer Code', field: Offer }
"#;

    const SPARSE_MAPPING: &str = r#"
table: crf63_offerredemptions
business_key:
  format: "{Store}_{Offer}"
  sanitize: true
measures:
  Redeemed Count: { column: crf63_redeemed, type: int, default: 0 }
  Order Count: { column: crf63_orders, type: int }
"#;

    fn empty_body() -> String {
        // Same document with the row tuples removed
        let start = DAILY.find("<Axis name=\"Axis1\">").unwrap();
        let end = DAILY[start..].find("</Axis>").unwrap() + start + "</Axis>".len();
        format!(
            "{}<Axis name=\"Axis1\"><Tuples></Tuples></Axis>{}",
            &DAILY[..start],
            &DAILY[end..]
        )
    }

    #[test]
    fn test_daily_sales_end_to_end() {
        let config = daily_sales();
        let records: Vec<_> = parse_and_transform(&config, DAILY)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].business_key, "4280_20250115");
        assert_eq!(records[1].business_key, "4280_20250116");
        assert_eq!(records[0].get("TY Net Sales USD"), Some(&TypedValue::Decimal(1500.25)));
        assert_eq!(records[1].get("TY Net Sales USD"), Some(&TypedValue::Decimal(1322.5)));
        assert_eq!(records[0].get("TY Orders"), Some(&TypedValue::Int(91)));
        assert_eq!(records[1].get("TY Orders"), Some(&TypedValue::Int(88)));
        assert!(records.iter().all(|r| r.target_table == "crf63_dailysales"));
    }

    #[test]
    fn test_single_row_revenue() {
        let pipeline = r#"
pipelines:
  revenue:
    catalog: OARS Franchise
    mapping: mappings/revenue.yaml
    mdx: SELECT FROM [OARS Franchise]
    hierarchy_mappings:
      - { pattern: 'Franchise.*Store', field: StoreNumber }
      - { pattern: 'Calendar.*Date', field: CalendarDate }
"#;
        let mapping = r#"
table: crf63_oarsbidatas
business_key:
  format: "{StoreNumber}_{CalendarDate:%Y%m%d}"
fields:
  StoreNumber: { column: crf63_storenumber, type: string }
  CalendarDate: { column: crf63_calendardate, type: date }
measures:
  Revenue USD: { column: crf63_revenue, type: decimal }
"#;
        let body = r#"<root xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"><Axes>
  <Axis name="Axis0"><Tuples><Tuple>
    <Member Hierarchy="[Measures]">
      <UName>[Measures].[Revenue USD]</UName><Caption>Revenue USD</Caption>
    </Member>
  </Tuple></Tuples></Axis>
  <Axis name="Axis1"><Tuples><Tuple>
    <Member Hierarchy="[Franchise].[Store Number]"><Caption>4280</Caption></Member>
    <Member Hierarchy="[Calendar].[Date]"><Caption>2025-01-15</Caption></Member>
  </Tuple></Tuples></Axis>
</Axes><CellData>
  <Cell CellOrdinal="0"><Value xsi:type="xsd:decimal">1500.00</Value></Cell>
</CellData></root>"#;

        let config = compile(pipeline, mapping).unwrap();
        let records: Vec<_> = parse_and_transform(&config, body)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(records.len(), 1);
        let record = &records[0];
        let mut keys: Vec<_> = record.keys().collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["CalendarDate", "Revenue USD", "StoreNumber"]);
        assert_eq!(record.get("StoreNumber"), Some(&TypedValue::String("4280".into())));
        assert_eq!(
            record.get("CalendarDate").and_then(TypedValue::as_date),
            chrono::NaiveDate::from_ymd_opt(2025, 1, 15)
        );
        assert_eq!(record.get("Revenue USD"), Some(&TypedValue::Decimal(1500.0)));
        assert_eq!(record.business_key, "4280_20250115");
    }

    #[test]
    fn test_stream_is_exact_size() {
        let config = daily_sales();
        let stream = parse_and_transform(&config, DAILY).unwrap();
        assert_eq!(stream.len(), 2);
        assert_eq!(stream.row_count(), 2);
    }

    #[test]
    fn test_transform_is_repeatable() {
        let config = daily_sales();
        let first: Vec<_> = parse_and_transform(&config, DAILY).unwrap().collect();
        let second: Vec<_> = parse_and_transform(&config, DAILY).unwrap().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_sparse_cells_use_defaults() {
        let config = compile(SPARSE_PIPELINE, SPARSE_MAPPING).unwrap();
        let records: Vec<_> = parse_and_transform(&config, SPARSE)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].business_key, "125_OC_1");
        assert_eq!(records[0].get("Redeemed Count"), Some(&TypedValue::Int(4)));
        assert_eq!(records[0].get("Order Count"), Some(&TypedValue::Null));
        assert_eq!(records[1].get("Redeemed Count"), Some(&TypedValue::Int(1)));
        assert_eq!(records[1].get("Order Count"), Some(&TypedValue::Int(12)));
        assert_eq!(records[2].get("Redeemed Count"), Some(&TypedValue::Int(0)));
        assert_eq!(records[2].get("Order Count"), Some(&TypedValue::Int(7)));
    }

    #[test]
    fn test_empty_response_yields_no_records() {
        let config = daily_sales();
        let stream = parse_and_transform(&config, &empty_body()).unwrap();
        assert!(stream.is_empty());
        assert_eq!(stream.count(), 0);
    }

    #[test]
    fn test_fault_fails_whole_call() {
        let config = daily_sales();
        let err = parse_and_transform(&config, FAULT).err().unwrap();
        assert!(matches!(err, ResponseError::ServerFault { .. }));
    }

    #[test]
    fn test_bad_row_does_not_fail_siblings() {
        let config = daily_sales();
        let body = DAILY.replacen("1500.25", "n/a", 1);
        let results: Vec<_> = parse_and_transform(&config, &body).unwrap().collect();

        assert_eq!(results.len(), 2);
        assert!(matches!(
            results[0],
            Err(RecordError::FieldCoercion { row: 0, ref raw, .. }) if raw == "n/a"
        ));
        assert_eq!(results[1].as_ref().unwrap().business_key, "4280_20250116");
    }

    #[test]
    fn test_runner_skip_policy() {
        let config = daily_sales();
        let bad = DAILY.replacen("1500.25", "n/a", 1);
        let mut sink = MemorySink::new();

        let summary = run_bodies(
            &config,
            [DAILY.to_string(), bad, empty_body()],
            &mut sink,
            RunOptions::default(),
        )
        .unwrap();

        assert_eq!(summary.chunks, 3);
        assert_eq!(summary.empty_chunks, 1);
        assert_eq!(summary.rows, 4);
        assert_eq!(summary.records, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failures[0].chunk, 1);
        assert!(sink.finished);
        let keys: Vec<_> = sink.records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["4280_20250115", "4280_20250116", "4280_20250116"]);
    }

    #[test]
    fn test_runner_abort_policy() {
        let config = daily_sales();
        let bad = DAILY.replacen("1500.25", "n/a", 1);
        let mut sink = MemorySink::new();
        let options = RunOptions {
            policy: ErrorPolicy::Abort,
            refreshed_at: None,
        };

        let err = run_bodies(&config, [DAILY, bad.as_str()], &mut sink, options).unwrap_err();
        assert!(matches!(err, PipelineError::Aborted { chunk: 1, .. }));
        assert_eq!(sink.records.len(), 2);
    }

    #[test]
    fn test_runner_structural_error_names_chunk() {
        let config = daily_sales();
        let mut sink = MemorySink::new();
        let err =
            run_bodies(&config, [DAILY, FAULT], &mut sink, RunOptions::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Response { chunk: 1, .. }));
    }

    #[test]
    fn test_runner_decodes_bytes() {
        let config = daily_sales();
        let mut sink = MemorySink::new();
        let mut runner = ChunkRunner::new(&config, &mut sink, RunOptions::default());
        runner.push_bytes(DAILY.as_bytes()).unwrap();
        assert_eq!(runner.summary().chunks, 1);
        runner.push_bytes(empty_body().as_bytes()).unwrap();
        let summary = runner.finish().unwrap();
        assert_eq!(summary.records, 2);
        assert_eq!(summary.empty_chunks, 1);
    }

    #[test]
    fn test_no_ambiguity_in_daily_sales() {
        let config = daily_sales();
        assert!(check_ambiguities(&config, DAILY).unwrap().is_empty());
    }
}
