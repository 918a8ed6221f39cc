//! Pipeline definitions and MDX rendering.
//!
//! A pipeline names its catalog, its MDX template, its hierarchy mappings
//! and the mapping document for its destination table:
//!
//! ```yaml
//! pipelines:
//!   daily_sales:
//!     catalog: Sales
//!     mapping: mappings/daily_sales.yaml
//!     mdx: |
//!       SELECT {[Measures].[TY Net Sales USD]} ON COLUMNS,
//!       NON EMPTY [Franchise].[Store Number].Children * [Calendar].[Date].Children ON ROWS
//!       FROM [Sales] WHERE (${slicer})
//!     hierarchy_mappings:
//!       - { pattern: '\[Store Number\]', field: Store }
//!       - { pattern: '\[Date\]', field: Date }
//!     slicers:
//!       fiscal_period: "[Calendar].[Fiscal Period].&[${year}${period}]"
//! ```
//!
//! MDX templates use `${name}` variables. Rendering fails if any are left.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Deserialize;

use super::ordered;
use crate::transform::resolver::HierarchyMapping;

static VARIABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid variable pattern")
});

/// Variable name bound to the rendered slicer.
pub const SLICER_VARIABLE: &str = "slicer";

/// Template variables for one render.
pub type Variables = BTreeMap<String, String>;

/// Top-level `pipelines.yaml` document.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelinesDocument {
    #[serde(deserialize_with = "ordered")]
    pub pipelines: Vec<(String, PipelineDefinition)>,
}

/// One pipeline entry, before its mapping document is loaded.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineDefinition {
    #[serde(default)]
    pub description: Option<String>,
    pub catalog: String,
    pub mdx: String,
    /// Mapping document path, relative to the pipelines file.
    pub mapping: String,
    pub hierarchy_mappings: Vec<HierarchyMapping>,
    #[serde(default, deserialize_with = "ordered")]
    pub slicers: Vec<(String, String)>,
}

/// Substitute `${name}` variables. Returns the names left unresolved.
pub fn render_variables(template: &str, vars: &Variables) -> Result<String, Vec<String>> {
    let mut unresolved: Vec<String> = Vec::new();
    for caps in VARIABLE.captures_iter(template) {
        let name = &caps[1];
        if !vars.contains_key(name) && !unresolved.iter().any(|u| u == name) {
            unresolved.push(name.to_string());
        }
    }
    if !unresolved.is_empty() {
        return Err(unresolved);
    }

    Ok(VARIABLE
        .replace_all(template, |caps: &Captures| vars[&caps[1]].clone())
        .into_owned())
}

/// Parse a `key=value` assignment.
pub fn parse_assignment(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty variable name in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Parse a chunking spec: `key=1..13` (inclusive) or `key=a,b,c`.
///
/// Ranges keep the width of a zero-padded start, so `period=01..03`
/// yields `01`, `02`, `03`.
pub fn parse_each(raw: &str) -> Result<(String, Vec<String>), String> {
    let (key, spec) = parse_assignment(raw)?;

    if let Some((start, end)) = spec.split_once("..") {
        let parse = |s: &str| {
            s.trim()
                .parse::<i64>()
                .map_err(|_| format!("invalid range bound '{s}' in '{raw}'"))
        };
        let (lo, hi) = (parse(start)?, parse(end)?);
        if lo > hi {
            return Err(format!("empty range in '{raw}'"));
        }
        let start = start.trim();
        let width = if start.len() > 1 && start.starts_with('0') {
            start.len()
        } else {
            0
        };
        let values = (lo..=hi).map(|v| format!("{v:0width$}")).collect();
        return Ok((key, values));
    }

    let values: Vec<String> = spec
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect();
    if values.is_empty() {
        return Err(format!("no values in '{raw}'"));
    }
    Ok((key, values))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Variables {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_render_variables() {
        let out = render_variables(
            "FROM [Sales] WHERE ([Calendar].[Year].&[${year}], ${slicer})",
            &vars(&[("year", "2025"), ("slicer", "[Store].&[1]")]),
        )
        .unwrap();
        assert_eq!(out, "FROM [Sales] WHERE ([Calendar].[Year].&[2025], [Store].&[1])");
    }

    #[test]
    fn test_unresolved_variables_listed_once() {
        let err = render_variables("${a} ${b} ${a}", &vars(&[("b", "x")])).unwrap_err();
        assert_eq!(err, vec!["a".to_string()]);
    }

    #[test]
    fn test_mdx_braces_are_not_variables() {
        let mdx = "SELECT {[Measures].[Sales]} ON COLUMNS FROM [Sales]";
        assert_eq!(render_variables(mdx, &Variables::new()).unwrap(), mdx);
    }

    #[test]
    fn test_parse_assignment() {
        assert_eq!(
            parse_assignment("year=2025").unwrap(),
            ("year".to_string(), "2025".to_string())
        );
        assert_eq!(parse_assignment("expr=a=b").unwrap().1, "a=b");
        assert!(parse_assignment("year").is_err());
        assert!(parse_assignment("=2025").is_err());
    }

    #[test]
    fn test_parse_each_range() {
        let (key, values) = parse_each("period=1..3").unwrap();
        assert_eq!(key, "period");
        assert_eq!(values, vec!["1", "2", "3"]);

        let (_, padded) = parse_each("period=08..10").unwrap();
        assert_eq!(padded, vec!["08", "09", "10"]);
    }

    #[test]
    fn test_parse_each_list() {
        let (_, values) = parse_each("region=East, West").unwrap();
        assert_eq!(values, vec!["East", "West"]);
    }

    #[test]
    fn test_parse_each_rejects_bad_ranges() {
        assert!(parse_each("period=5..1").is_err());
        assert!(parse_each("period=a..b").is_err());
        assert!(parse_each("period=").is_err());
    }
}
