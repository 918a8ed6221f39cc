//! Generic XMLA (MDDataSet) response parser.
//!
//! Decodes the two axes and the flat cell collection of an `Execute`
//! response. Nothing here knows about cubes or pipelines; hierarchy names
//! and captions are passed through as reported.
//!
//! ```text
//! <Axes>
//!   <Axis name="Axis0">  columns: one tuple per measure
//!   <Axis name="Axis1">  rows: one tuple per dimension combination
//!   <Axis name="SlicerAxis">  ignored
//! </Axes>
//! <CellData>
//!   <Cell CellOrdinal="n"><Value xsi:type="xsd:double">..</Value></Cell>
//! </CellData>
//! ```
//!
//! Element names are matched on their local part, so namespace prefixes do
//! not matter.

use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::debug;

use crate::error::{ResponseError, ResponseResult};
use crate::models::{AxisTuple, CellDatum, Member, ParseOutcome, ParsedResponse};

/// Hierarchy name the server uses for the measures dimension.
const MEASURES_HIERARCHY: &str = "[Measures]";

/// Axis name carrying the WHERE-clause slicer; never part of the grid.
const SLICER_AXIS: &str = "SlicerAxis";

/// Decode a raw response body to text.
///
/// A byte-order mark wins, then the XML declaration's `encoding`, then UTF-8.
pub fn decode_body(bytes: &[u8]) -> ResponseResult<String> {
    let (encoding, body) = match Encoding::for_bom(bytes) {
        Some((encoding, bom_len)) => (encoding, &bytes[bom_len..]),
        None => (declared_encoding(bytes).unwrap_or(UTF_8), bytes),
    };

    let (text, had_errors) = encoding.decode_without_bom_handling(body);
    if had_errors {
        return Err(ResponseError::Encoding {
            encoding: encoding.name().to_string(),
        });
    }
    Ok(text.into_owned())
}

/// Read `encoding="..."` from the XML declaration, if there is one.
///
/// A readable declaration naming UTF-16 without a BOM is treated as UTF-8.
fn declared_encoding(bytes: &[u8]) -> Option<&'static Encoding> {
    let head = &bytes[..bytes.len().min(256)];
    let head = String::from_utf8_lossy(head);
    let decl_end = head.find("?>")?;
    let decl = head.strip_prefix("<?xml")?.get(..decl_end.saturating_sub(5))?;
    let start = decl.find("encoding")? + "encoding".len();
    let rest = decl[start..].trim_start().strip_prefix('=')?.trim_start();
    let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let label = rest[1..].split(quote).next()?;
    Encoding::for_label(label.trim().as_bytes())
        .filter(|encoding| *encoding != UTF_16LE && *encoding != UTF_16BE)
}

/// Parse a raw response body.
pub fn parse_bytes(bytes: &[u8]) -> ResponseResult<ParseOutcome> {
    let text = decode_body(bytes)?;
    parse_response(&text)
}

/// Parse an XMLA response document.
///
/// Returns [`ParseOutcome::NoData`] when the row axis has no tuples, which is
/// a valid empty result rather than an error.
pub fn parse_response(xml: &str) -> ResponseResult<ParseOutcome> {
    let mut reader = Reader::from_str(xml);
    let mut collector = Collector::default();

    loop {
        let event = reader.read_event().map_err(|e| ResponseError::Xml {
            position: reader.buffer_position() as u64,
            message: e.to_string(),
        })?;

        match event {
            Event::Start(e) => {
                collector.start(&e)?;
                collector.stack.push(local_name(&e));
            }
            Event::Empty(e) => {
                let name = local_name(&e);
                collector.start(&e)?;
                collector.stack.push(name.clone());
                collector.end(&name);
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                collector.end(&name);
            }
            Event::Text(e) => {
                if collector.capture.is_some() {
                    let text = e.unescape().map_err(|err| ResponseError::Xml {
                        position: reader.buffer_position() as u64,
                        message: err.to_string(),
                    })?;
                    collector.text.push_str(&text);
                }
            }
            Event::CData(e) => {
                if collector.capture.is_some() {
                    collector.text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    collector.finish()
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

/// Attributes of interest, keyed by local name.
fn attributes(e: &BytesStart<'_>) -> ResponseResult<Vec<(String, String)>> {
    let mut out = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| ResponseError::Xml {
            position: 0,
            message: err.to_string(),
        })?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| ResponseError::Xml {
                position: 0,
                message: err.to_string(),
            })?
            .into_owned();
        out.push((key, value));
    }
    Ok(out)
}

fn attr<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

// =============================================================================
// Event collector
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum Capture {
    Caption,
    UniqueName,
    Value,
    FmtValue,
    FaultCode,
    FaultString,
}

#[derive(Debug, Default)]
struct RawAxis {
    name: Option<String>,
    tuples: Vec<AxisTuple>,
}

#[derive(Debug, Default)]
struct Fault {
    code: String,
    message: String,
}

#[derive(Debug, Default)]
struct Collector {
    stack: Vec<String>,
    axes: Vec<RawAxis>,
    saw_axes: bool,
    saw_cell_data: bool,
    tuple: Option<AxisTuple>,
    member: Option<Member>,
    cells: Vec<CellDatum>,
    cell: Option<CellDatum>,
    next_ordinal: usize,
    capture: Option<Capture>,
    text: String,
    fault: Option<Fault>,
}

impl Collector {
    fn parent(&self) -> Option<&str> {
        self.stack.last().map(String::as_str)
    }

    fn inside(&self, name: &str) -> bool {
        self.stack.iter().any(|s| s == name)
    }

    fn begin_capture(&mut self, capture: Capture) {
        self.capture = Some(capture);
        self.text.clear();
    }

    fn start(&mut self, e: &BytesStart<'_>) -> ResponseResult<()> {
        let name = local_name(e);

        match name.as_str() {
            "Fault" => {
                self.fault.get_or_insert_with(Fault::default);
            }
            "faultcode" if self.fault.is_some() => self.begin_capture(Capture::FaultCode),
            "faultstring" if self.fault.is_some() => self.begin_capture(Capture::FaultString),
            "Exception" => {
                self.fault.get_or_insert_with(|| Fault {
                    code: "Exception".to_string(),
                    message: "XMLA exception".to_string(),
                });
            }
            "Error" if self.inside("Messages") || self.inside("Fault") => {
                let attrs = attributes(e)?;
                let fault = self.fault.get_or_insert_with(Fault::default);
                if let Some(code) = attr(&attrs, "ErrorCode") {
                    fault.code = code.to_string();
                }
                if let Some(description) = attr(&attrs, "Description") {
                    fault.message = description.to_string();
                }
            }
            "Axes" => self.saw_axes = true,
            "Axis" if self.parent() == Some("Axes") => {
                let attrs = attributes(e)?;
                self.axes.push(RawAxis {
                    name: attr(&attrs, "name").map(str::to_string),
                    tuples: Vec::new(),
                });
            }
            "Tuple" if self.inside("Axis") => {
                self.tuple = Some(AxisTuple::default());
            }
            "Member" if self.tuple.is_some() => {
                let attrs = attributes(e)?;
                let hierarchy = attr(&attrs, "Hierarchy").unwrap_or_default();
                self.member = Some(Member::new(hierarchy, ""));
            }
            "Caption" if self.member.is_some() && self.parent() == Some("Member") => {
                self.begin_capture(Capture::Caption)
            }
            "UName" if self.member.is_some() && self.parent() == Some("Member") => {
                self.begin_capture(Capture::UniqueName)
            }
            "CellData" => self.saw_cell_data = true,
            "Cell" if self.parent() == Some("CellData") => {
                let attrs = attributes(e)?;
                let ordinal = match attr(&attrs, "CellOrdinal") {
                    Some(raw) => raw.trim().parse::<usize>().map_err(|_| {
                        ResponseError::Malformed(format!("invalid CellOrdinal '{raw}'"))
                    })?,
                    None => self.next_ordinal,
                };
                self.cell = Some(CellDatum::new(ordinal, None));
            }
            "Value" if self.cell.is_some() && self.parent() == Some("Cell") => {
                let attrs = attributes(e)?;
                let nil = matches!(attr(&attrs, "nil"), Some("true" | "1"));
                if let Some(cell) = self.cell.as_mut() {
                    cell.data_type = attr(&attrs, "type")
                        .map(|t| t.rsplit(':').next().unwrap_or(t).to_string());
                    if !nil {
                        cell.value = Some(String::new());
                    }
                }
                if !nil {
                    self.begin_capture(Capture::Value);
                }
            }
            "FmtValue" if self.cell.is_some() && self.parent() == Some("Cell") => {
                self.begin_capture(Capture::FmtValue)
            }
            _ => {}
        }
        Ok(())
    }

    fn end(&mut self, name: &str) {
        if let Some(capture) = self.capture {
            let closes = matches!(
                (capture, name),
                (Capture::Caption, "Caption")
                    | (Capture::UniqueName, "UName")
                    | (Capture::Value, "Value")
                    | (Capture::FmtValue, "FmtValue")
                    | (Capture::FaultCode, "faultcode")
                    | (Capture::FaultString, "faultstring")
            );
            if closes {
                self.finish_capture(capture);
            }
        }

        match name {
            "Member" => {
                if let (Some(member), Some(tuple)) = (self.member.take(), self.tuple.as_mut()) {
                    tuple.members.push(member);
                }
            }
            "Tuple" => {
                if let (Some(tuple), Some(axis)) = (self.tuple.take(), self.axes.last_mut()) {
                    axis.tuples.push(tuple);
                }
            }
            "Cell" => {
                if let Some(cell) = self.cell.take() {
                    self.next_ordinal = cell.ordinal + 1;
                    self.cells.push(cell);
                }
            }
            _ => {}
        }

        self.stack.pop();
    }

    fn finish_capture(&mut self, capture: Capture) {
        let text = std::mem::take(&mut self.text);
        self.capture = None;

        match capture {
            Capture::Caption => {
                if let Some(member) = self.member.as_mut() {
                    member.caption = text.trim().to_string();
                }
            }
            Capture::UniqueName => {
                if let Some(member) = self.member.as_mut() {
                    member.unique_name = Some(text.trim().to_string());
                }
            }
            Capture::Value => {
                if let Some(cell) = self.cell.as_mut() {
                    cell.value = Some(text);
                }
            }
            Capture::FmtValue => {
                if let Some(cell) = self.cell.as_mut() {
                    cell.formatted = Some(text);
                }
            }
            Capture::FaultCode => {
                if let Some(fault) = self.fault.as_mut() {
                    fault.code = text.trim().to_string();
                }
            }
            Capture::FaultString => {
                if let Some(fault) = self.fault.as_mut() {
                    fault.message = text.trim().to_string();
                }
            }
        }
    }

    fn finish(self) -> ResponseResult<ParseOutcome> {
        if let Some(open) = self.stack.last() {
            return Err(ResponseError::Malformed(format!(
                "truncated response: unclosed <{open}>"
            )));
        }

        if let Some(fault) = self.fault {
            return Err(ResponseError::ServerFault {
                code: fault.code,
                message: fault.message,
            });
        }

        if !self.saw_axes {
            return Err(ResponseError::Malformed("missing Axes element".to_string()));
        }

        let mut axes: Vec<RawAxis> = self
            .axes
            .into_iter()
            .filter(|a| a.name.as_deref() != Some(SLICER_AXIS))
            .collect();

        if axes.len() != 2 {
            return Err(ResponseError::Malformed(format!(
                "expected a column axis and a row axis, found {} axes",
                axes.len()
            )));
        }

        let column_idx = axes
            .iter()
            .position(|a| a.name.as_deref() == Some("Axis0"))
            .unwrap_or(0);
        let column_axis = axes.remove(column_idx);
        let row_axis = axes.remove(0);

        let measures: Vec<String> = column_axis.tuples.iter().map(measure_name).collect();
        if measures.is_empty() {
            return Err(ResponseError::Malformed(
                "column axis contains no measures".to_string(),
            ));
        }
        debug!(
            measures = measures.len(),
            rows = row_axis.tuples.len(),
            cells = self.cells.len(),
            "Decoded XMLA axes"
        );

        if row_axis.tuples.is_empty() {
            return Ok(ParseOutcome::NoData { measures });
        }

        if !self.saw_cell_data {
            return Err(ResponseError::Malformed("missing CellData element".to_string()));
        }

        ParsedResponse::new(row_axis.tuples, measures, self.cells).map(ParseOutcome::Data)
    }
}

/// Name a measure from its column tuple.
fn measure_name(tuple: &AxisTuple) -> String {
    if let Some(member) = tuple
        .members
        .iter()
        .find(|m| m.hierarchy == MEASURES_HIERARCHY)
    {
        return member.caption.clone();
    }
    tuple
        .members
        .iter()
        .map(|m| m.caption.as_str())
        .collect::<Vec<_>>()
        .join(" | ")
}
