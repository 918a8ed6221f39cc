//! Business-key and display-name templates.
//!
//! Syntax: `{Field}` substitutes a field, `{Field:fmt}` formats a date field
//! with a strftime specifier, `{{` and `}}` produce literal braces.
//!
//! ```text
//! {Store}_{Date:%Y%m%d}   ->   4280_20250115
//! ```

use std::fmt::Write;

use chrono::format::{Item, StrftimeItems};
use chrono::NaiveDate;

use crate::error::{ConfigError, ConfigResult};
use crate::models::TypedValue;

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Literal(String),
    Placeholder {
        field: String,
        format: Option<String>,
    },
}

/// A parsed template, ready to render against a record.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl KeyTemplate {
    pub fn parse(template: &str) -> ConfigResult<Self> {
        let invalid = |message: &str| ConfigError::InvalidTemplate {
            template: template.to_string(),
            message: message.to_string(),
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '}' => return Err(invalid("unmatched '}'")),
                '{' => {
                    let mut body = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        if c == '{' {
                            return Err(invalid("nested '{' in placeholder"));
                        }
                        body.push(c);
                    }
                    if !closed {
                        return Err(invalid("unclosed placeholder"));
                    }

                    let (field, format) = match body.split_once(':') {
                        Some((field, format)) => (field.trim(), Some(format.to_string())),
                        None => (body.trim(), None),
                    };
                    if field.is_empty() {
                        return Err(invalid("empty placeholder"));
                    }
                    if let Some(fmt) = &format {
                        if !is_valid_strftime(fmt) {
                            return Err(invalid(&format!("invalid date format '{fmt}'")));
                        }
                    }

                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder {
                        field: field.to_string(),
                        format,
                    });
                }
                c => literal.push(c),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: template.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// `(field, format)` for every placeholder, in template order.
    pub fn placeholders(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Placeholder { field, format } => Some((field.as_str(), format.as_deref())),
            Segment::Literal(_) => None,
        })
    }

    /// Render against `lookup`.
    ///
    /// Null, absent, and empty-string values are missing; the error lists
    /// every missing field. With `sanitize`, spaces and hyphens in
    /// substituted text values become `_`.
    pub fn render<'a, F>(&self, lookup: F, sanitize: bool) -> Result<String, Vec<String>>
    where
        F: Fn(&str) -> Option<&'a TypedValue>,
    {
        let mut out = String::new();
        let mut missing = Vec::new();

        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder { field, format } => match lookup(field) {
                    None | Some(TypedValue::Null) => missing.push(field.clone()),
                    Some(TypedValue::String(s)) if s.is_empty() => missing.push(field.clone()),
                    Some(TypedValue::String(s)) if sanitize => {
                        out.push_str(&s.replace([' ', '-'], "_"))
                    }
                    Some(TypedValue::Date(d)) => {
                        let items = StrftimeItems::new(format.as_deref().unwrap_or("%Y-%m-%d"));
                        if write!(out, "{}", d.format_with_items(items)).is_err() {
                            missing.push(field.clone());
                        }
                    }
                    Some(value) => out.push_str(&value.to_string()),
                },
            }
        }

        if missing.is_empty() {
            Ok(out)
        } else {
            missing.dedup();
            Err(missing)
        }
    }
}

/// Parseable, and renders from a bare date (no time or offset specifiers).
fn is_valid_strftime(fmt: &str) -> bool {
    if fmt.is_empty() || StrftimeItems::new(fmt).any(|item| matches!(item, Item::Error)) {
        return false;
    }
    let sample = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or_default();
    let mut out = String::new();
    write!(out, "{}", sample.format_with_items(StrftimeItems::new(fmt))).is_ok()
}
