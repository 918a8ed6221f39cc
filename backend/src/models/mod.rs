//! Domain models for the cubesync pipeline.
//!
//! - [`Member`] / [`AxisTuple`] - one tuple from a response axis
//! - [`CellDatum`] - one value cell, addressed by ordinal
//! - [`ParsedResponse`] / [`ParseOutcome`] - structural decode of one response
//! - [`FieldType`] / [`TypedValue`] - configured types and coerced values
//! - [`OutputRecord`] - one mapped row, ready for the upsert collaborator

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::{ResponseError, ResponseResult};

// =============================================================================
// Axis Tuples
// =============================================================================

/// One member of an axis tuple.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    /// Hierarchy unique name, e.g. `[Franchise].[Store Number]`.
    pub hierarchy: String,
    /// Member caption as reported by the server.
    pub caption: String,
    /// Member unique name (`UName`), when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_name: Option<String>,
}

impl Member {
    pub fn new(hierarchy: impl Into<String>, caption: impl Into<String>) -> Self {
        Self {
            hierarchy: hierarchy.into(),
            caption: caption.into(),
            unique_name: None,
        }
    }
}

/// An ordered sequence of members from one axis position.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AxisTuple {
    pub members: Vec<Member>,
}

impl AxisTuple {
    pub fn new(members: Vec<Member>) -> Self {
        Self { members }
    }

    /// Build a tuple from `(hierarchy, caption)` pairs.
    pub fn from_pairs<H, C>(pairs: impl IntoIterator<Item = (H, C)>) -> Self
    where
        H: Into<String>,
        C: Into<String>,
    {
        Self {
            members: pairs.into_iter().map(|(h, c)| Member::new(h, c)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

// =============================================================================
// Cells
// =============================================================================

/// One value cell from the response's cell collection.
///
/// `value` is the raw text of the `Value` element; coercion happens later in
/// the record builder.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellDatum {
    pub ordinal: usize,
    pub value: Option<String>,
    /// XSD type reported by the server with its prefix stripped (`double`, `string`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatted: Option<String>,
}

impl CellDatum {
    pub fn new(ordinal: usize, value: Option<&str>) -> Self {
        Self {
            ordinal,
            value: value.map(str::to_string),
            data_type: None,
            formatted: None,
        }
    }

    pub fn with_data_type(mut self, data_type: impl Into<String>) -> Self {
        self.data_type = Some(data_type.into());
        self
    }

    /// Null, missing, and whitespace-only values all count as empty.
    pub fn is_empty(&self) -> bool {
        self.value.as_deref().map_or(true, |v| v.trim().is_empty())
    }

    /// Whether the server reported a numeric XSD type for this cell.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self.data_type.as_deref(),
            Some(
                "double" | "float" | "decimal" | "int" | "integer" | "long" | "short"
                    | "byte" | "unsignedInt" | "unsignedLong" | "unsignedShort"
                    | "unsignedByte"
            )
        )
    }
}

// =============================================================================
// Parsed Response
// =============================================================================

/// Structural decode of a two-axis response.
///
/// Cells are addressed by ordinal: `ordinal = row * measures.len() + measure`.
/// Sparse responses are supported; an ordinal with no cell reads as absent.
#[derive(Debug, Clone, Serialize)]
pub struct ParsedResponse {
    pub rows: Vec<AxisTuple>,
    pub measures: Vec<String>,
    pub cells: Vec<CellDatum>,
    #[serde(skip)]
    grid: Vec<Option<usize>>,
}

impl ParsedResponse {
    /// Assemble a response, inverting cell ordinals into a row-major grid.
    ///
    /// Fails if there are no measures, if an ordinal falls outside the
    /// `rows × measures` grid, or if two cells share an ordinal.
    pub fn new(
        rows: Vec<AxisTuple>,
        measures: Vec<String>,
        cells: Vec<CellDatum>,
    ) -> ResponseResult<Self> {
        if measures.is_empty() {
            return Err(ResponseError::Malformed(
                "column axis contains no measures".to_string(),
            ));
        }

        let size = rows.len() * measures.len();
        let mut grid = vec![None; size];

        for (idx, cell) in cells.iter().enumerate() {
            let slot = grid.get_mut(cell.ordinal).ok_or_else(|| {
                ResponseError::Malformed(format!(
                    "cell ordinal {} outside the {}x{} grid",
                    cell.ordinal,
                    rows.len(),
                    measures.len()
                ))
            })?;
            if slot.is_some() {
                return Err(ResponseError::Malformed(format!(
                    "duplicate cell ordinal {}",
                    cell.ordinal
                )));
            }
            *slot = Some(idx);
        }

        Ok(Self {
            rows,
            measures,
            cells,
            grid,
        })
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn measure_count(&self) -> usize {
        self.measures.len()
    }

    /// The cell for `(row, measure)`, if the server sent one.
    pub fn cell(&self, row: usize, measure: usize) -> Option<&CellDatum> {
        if measure >= self.measures.len() {
            return None;
        }
        self.grid
            .get(row * self.measures.len() + measure)
            .copied()
            .flatten()
            .map(|idx| &self.cells[idx])
    }

    /// All cells of one row, in column-axis order.
    pub fn row_cells(&self, row: usize) -> Vec<Option<&CellDatum>> {
        (0..self.measures.len()).map(|m| self.cell(row, m)).collect()
    }
}

/// Result of parsing one response.
#[derive(Debug, Clone)]
pub enum ParseOutcome {
    /// At least one row tuple.
    Data(ParsedResponse),
    /// Valid response with measures but no row tuples.
    NoData { measures: Vec<String> },
}

impl ParseOutcome {
    pub fn row_count(&self) -> usize {
        match self {
            ParseOutcome::Data(parsed) => parsed.row_count(),
            ParseOutcome::NoData { .. } => 0,
        }
    }

    pub fn measures(&self) -> &[String] {
        match self {
            ParseOutcome::Data(parsed) => &parsed.measures,
            ParseOutcome::NoData { measures } => measures,
        }
    }
}

// =============================================================================
// Field Types and Values
// =============================================================================

/// Configured semantic type for a field or measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Date,
    Int,
    Decimal,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Date => "date",
            FieldType::Int => "int",
            FieldType::Decimal => "decimal",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A coerced value.
///
/// Serializes untagged: dates as `YYYY-MM-DD`, numbers as JSON numbers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TypedValue {
    Null,
    String(String),
    Date(NaiveDate),
    Int(i64),
    Decimal(f64),
}

impl TypedValue {
    pub fn is_null(&self) -> bool {
        matches!(self, TypedValue::Null)
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            TypedValue::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            TypedValue::Null => Value::Null,
            TypedValue::String(s) => Value::String(s.clone()),
            TypedValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
            TypedValue::Int(i) => Value::from(*i),
            TypedValue::Decimal(v) => serde_json::Number::from_f64(*v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::Null => Ok(()),
            TypedValue::String(s) => f.write_str(s),
            TypedValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            TypedValue::Int(i) => write!(f, "{i}"),
            TypedValue::Decimal(v) => write!(f, "{v}"),
        }
    }
}

// =============================================================================
// Output Record
// =============================================================================

/// One mapped row: dimension fields and measures keyed by semantic name.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRecord {
    /// Row tuple index within the response.
    pub row: usize,
    /// Fields in tuple order, then measures in column-axis order.
    pub fields: Vec<(String, TypedValue)>,
    pub business_key: String,
    pub display_name: Option<String>,
    pub target_table: String,
}

impl OutputRecord {
    pub fn get(&self, field: &str) -> Option<&TypedValue> {
        self.fields.iter().find(|(k, _)| k == field).map(|(_, v)| v)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    /// JSON view keyed by semantic field names, plus `businessKey`.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for (field, value) in &self.fields {
            map.insert(field.clone(), value.to_json());
        }
        map.insert(
            "businessKey".to_string(),
            Value::String(self.business_key.clone()),
        );
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_by_two(cells: Vec<CellDatum>) -> ResponseResult<ParsedResponse> {
        ParsedResponse::new(
            vec![
                AxisTuple::from_pairs([("[Store]", "1")]),
                AxisTuple::from_pairs([("[Store]", "2")]),
            ],
            vec!["Sales".into(), "Orders".into()],
            cells,
        )
    }

    #[test]
    fn test_dense_cells_are_row_major() {
        let parsed = two_by_two(vec![
            CellDatum::new(0, Some("10")),
            CellDatum::new(1, Some("1")),
            CellDatum::new(2, Some("20")),
            CellDatum::new(3, Some("2")),
        ])
        .unwrap();

        assert_eq!(parsed.cell(1, 0).unwrap().value.as_deref(), Some("20"));
        assert_eq!(parsed.cell(0, 1).unwrap().value.as_deref(), Some("1"));
    }

    #[test]
    fn test_sparse_ordinals_leave_gaps() {
        let parsed = two_by_two(vec![CellDatum::new(3, Some("2"))]).unwrap();

        assert!(parsed.cell(0, 0).is_none());
        assert_eq!(parsed.cell(1, 1).unwrap().value.as_deref(), Some("2"));
        let row0 = parsed.row_cells(0);
        assert_eq!(row0.len(), 2);
        assert!(row0.iter().all(Option::is_none));
    }

    #[test]
    fn test_ordinal_out_of_grid_is_malformed() {
        let err = two_by_two(vec![CellDatum::new(4, Some("x"))]).unwrap_err();
        assert!(matches!(err, ResponseError::Malformed(_)));
    }

    #[test]
    fn test_duplicate_ordinal_is_malformed() {
        let err = two_by_two(vec![
            CellDatum::new(1, Some("a")),
            CellDatum::new(1, Some("b")),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_no_measures_is_malformed() {
        let err = ParsedResponse::new(vec![AxisTuple::default()], vec![], vec![]).unwrap_err();
        assert!(err.to_string().contains("no measures"));
    }

    #[test]
    fn test_cell_emptiness() {
        assert!(CellDatum::new(0, None).is_empty());
        assert!(CellDatum::new(0, Some("  ")).is_empty());
        assert!(!CellDatum::new(0, Some("0")).is_empty());
    }

    #[test]
    fn test_typed_value_json() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
        assert_eq!(TypedValue::Date(date).to_json(), Value::String("2025-01-15".into()));
        assert_eq!(TypedValue::Decimal(12.5).to_json(), serde_json::json!(12.5));
        assert_eq!(TypedValue::Null.to_json(), Value::Null);
    }

    #[test]
    fn test_field_type_names() {
        let parsed: FieldType = serde_json::from_str("\"decimal\"").unwrap();
        assert_eq!(parsed, FieldType::Decimal);
        assert!(serde_json::from_str::<FieldType>("\"money\"").is_err());
    }
}
