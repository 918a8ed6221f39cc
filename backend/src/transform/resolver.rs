//! Hierarchy name to semantic field resolution.
//!
//! Patterns are regular expressions searched (not anchored) against the
//! hierarchy unique name. The first pattern in configuration order wins.

use std::collections::HashSet;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::models::ParsedResponse;

/// One `(pattern, field)` entry from a pipeline definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyMapping {
    pub pattern: String,
    pub field: String,
}

impl HierarchyMapping {
    pub fn new(pattern: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            field: field.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct Rule {
    pattern: Regex,
    field: String,
}

/// Compiled, ordered hierarchy mappings.
#[derive(Debug, Clone)]
pub struct HierarchyResolver {
    rules: Vec<Rule>,
}

impl HierarchyResolver {
    pub fn new(mappings: &[HierarchyMapping]) -> ConfigResult<Self> {
        let rules = mappings
            .iter()
            .map(|m| {
                Regex::new(&m.pattern)
                    .map(|pattern| Rule {
                        pattern,
                        field: m.field.clone(),
                    })
                    .map_err(|source| ConfigError::InvalidPattern {
                        pattern: m.pattern.clone(),
                        field: m.field.clone(),
                        source,
                    })
            })
            .collect::<ConfigResult<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Field for the first pattern matching `hierarchy`.
    pub fn resolve(&self, hierarchy: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|r| r.pattern.is_match(hierarchy))
            .map(|r| r.field.as_str())
    }

    /// Every field whose pattern matches, in configuration order.
    pub fn matches(&self, hierarchy: &str) -> Vec<&str> {
        self.rules
            .iter()
            .filter(|r| r.pattern.is_match(hierarchy))
            .map(|r| r.field.as_str())
            .collect()
    }

    /// Distinct target fields, in configuration order.
    pub fn fields(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.rules
            .iter()
            .map(|r| r.field.as_str())
            .filter(|f| seen.insert(*f))
            .collect()
    }

    pub fn mappings(&self) -> Vec<HierarchyMapping> {
        self.rules
            .iter()
            .map(|r| HierarchyMapping::new(r.pattern.as_str(), r.field.as_str()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

// =============================================================================
// Ambiguity Check
// =============================================================================

/// A hierarchy that matches patterns for more than one field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ambiguity {
    pub hierarchy: String,
    /// Matching fields in configuration order; the first one wins.
    pub fields: Vec<String>,
}

/// Hierarchies in `parsed` whose name matches more than one distinct field.
pub fn find_ambiguities(resolver: &HierarchyResolver, parsed: &ParsedResponse) -> Vec<Ambiguity> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for member in parsed.rows.iter().flat_map(|t| t.members.iter()) {
        if !seen.insert(member.hierarchy.as_str()) {
            continue;
        }
        let mut fields: Vec<String> = Vec::new();
        for field in resolver.matches(&member.hierarchy) {
            if !fields.iter().any(|f| f == field) {
                fields.push(field.to_string());
            }
        }
        if fields.len() > 1 {
            out.push(Ambiguity {
                hierarchy: member.hierarchy.clone(),
                fields,
            });
        }
    }
    out
}

// =============================================================================
// Unmapped Hierarchy Log
// =============================================================================

/// Records unmapped hierarchies so each is warned about once per run.
#[derive(Debug, Default)]
pub struct UnmappedLog {
    seen: HashSet<String>,
}

impl UnmappedLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Warn about `hierarchy` unless it was already reported.
    /// Returns `true` the first time.
    pub fn report(&mut self, hierarchy: &str) -> bool {
        if self.seen.contains(hierarchy) {
            return false;
        }
        tracing::warn!(hierarchy, "hierarchy has no mapping; member dropped");
        self.seen.insert(hierarchy.to_string());
        true
    }

    pub fn hierarchies(&self) -> impl Iterator<Item = &str> {
        self.seen.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AxisTuple, CellDatum};

    fn resolver(pairs: &[(&str, &str)]) -> HierarchyResolver {
        let mappings: Vec<_> = pairs.iter().map(|(p, f)| HierarchyMapping::new(*p, *f)).collect();
        HierarchyResolver::new(&mappings).unwrap()
    }

    #[test]
    fn test_first_match_wins() {
        let r = resolver(&[("Store", "A"), ("Store.*Name", "B")]);
        assert_eq!(r.resolve("Store.Name"), Some("A"));
        assert_eq!(r.matches("Store.Name"), vec!["A", "B"]);
    }

    #[test]
    fn test_match_is_unanchored_search() {
        let r = resolver(&[(r"\[Store Number\]", "Store"), (r"\[Date\]", "Date")]);
        assert_eq!(r.resolve("[Franchise].[Store Number]"), Some("Store"));
        assert_eq!(r.resolve("[Calendar].[Date]"), Some("Date"));
        assert_eq!(r.resolve("[Product].[Category]"), None);
    }

    #[test]
    fn test_resolve_is_stable() {
        let r = resolver(&[("Store", "A")]);
        assert_eq!(r.resolve("[Store]"), r.resolve("[Store]"));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let err = HierarchyResolver::new(&[HierarchyMapping::new("[Store", "Store")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { ref field, .. } if field == "Store"));
    }

    #[test]
    fn test_fields_are_distinct() {
        let r = resolver(&[("a", "X"), ("b", "Y"), ("c", "X")]);
        assert_eq!(r.fields(), vec!["X", "Y"]);
    }

    #[test]
    fn test_find_ambiguities() {
        let r = resolver(&[("Store", "Store"), ("Name", "StoreName"), ("Number", "Store")]);
        let parsed = ParsedResponse::new(
            vec![
                AxisTuple::from_pairs([
                    ("[Store].[Store Name]", "Main St"),
                    ("[Store].[Store Number]", "1"),
                ]),
                AxisTuple::from_pairs([
                    ("[Store].[Store Name]", "Elm St"),
                    ("[Store].[Store Number]", "2"),
                ]),
            ],
            vec!["Sales".into()],
            vec![CellDatum::new(0, Some("1"))],
        )
        .unwrap();

        let found = find_ambiguities(&r, &parsed);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].hierarchy, "[Store].[Store Name]");
        assert_eq!(found[0].fields, vec!["Store", "StoreName"]);
    }

    #[test]
    fn test_unmapped_reported_once() {
        let mut log = UnmappedLog::new();
        assert!(log.report("[Product].[Category]"));
        assert!(!log.report("[Product].[Category]"));
        assert!(log.report("[Product].[Brand]"));
        assert_eq!(log.hierarchies().count(), 2);
    }
}
