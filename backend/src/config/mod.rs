//! Pipeline configuration.
//!
//! A [`PipelineConfig`] is compiled from a [`PipelineDefinition`] and the
//! [`MappingDocument`] it points to. Everything that can be checked without
//! a response is checked here, once:
//!
//! - hierarchy patterns compile
//! - key and display-name templates parse, and reference only fields some
//!   hierarchy mapping or measure produces
//! - format specifiers appear only on date fields
//! - measure defaults coerce to their measure's type
//!
//! After compilation the config is immutable and shared by every record
//! built from it.

pub mod mapping;
pub mod pipeline;

pub use mapping::{BusinessKeySpec, DisplayNameSpec, FieldSpec, MappingDocument, MeasureSpec};
pub use pipeline::{
    parse_assignment, parse_each, render_variables, PipelineDefinition, PipelinesDocument,
    Variables, SLICER_VARIABLE,
};

use std::fmt;
use std::marker::PhantomData;

use serde::de::{DeserializeOwned, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};

use crate::error::{ConfigError, ConfigResult};
use crate::models::{FieldType, TypedValue};
use crate::transform::coerce::coerce_default;
use crate::transform::resolver::HierarchyResolver;
use crate::transform::template::KeyTemplate;
use crate::validation;

// =============================================================================
// Document Loading
// =============================================================================

/// Which schema a document is validated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pipelines,
    Mapping,
}

/// Parse YAML, validate it against its schema, then deserialize.
pub fn load_document<T: DeserializeOwned>(
    text: &str,
    document: &str,
    kind: DocumentKind,
) -> ConfigResult<T> {
    let value: Value = serde_yaml::from_str(text).map_err(|source| ConfigError::Yaml {
        document: document.to_string(),
        source,
    })?;

    let checked = match kind {
        DocumentKind::Pipelines => validation::validate_pipelines_document(&value),
        DocumentKind::Mapping => validation::validate_mapping_document(&value),
    };
    checked.map_err(|errors| ConfigError::Schema {
        document: document.to_string(),
        errors,
    })?;

    serde_json::from_value(value).map_err(|source| ConfigError::Shape {
        document: document.to_string(),
        source,
    })
}

/// Deserialize a map into `(key, value)` pairs, keeping document order.
pub(crate) fn ordered<'de, D, T>(deserializer: D) -> Result<Vec<(String, T)>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    struct OrderedVisitor<T>(PhantomData<T>);

    impl<'de, T: Deserialize<'de>> Visitor<'de> for OrderedVisitor<T> {
        type Value = Vec<(String, T)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut out = Vec::new();
            while let Some((key, value)) = map.next_entry::<String, T>()? {
                out.push((key, value));
            }
            Ok(out)
        }
    }

    deserializer.deserialize_map(OrderedVisitor(PhantomData))
}

// =============================================================================
// Compiled Configuration
// =============================================================================

/// A dimension field with its destination column and type.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRule {
    pub column: String,
    pub field_type: FieldType,
}

/// A configured measure.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasureRule {
    pub column: String,
    pub field_type: FieldType,
    /// Used when the cell is absent, null or empty.
    pub default: TypedValue,
}

#[derive(Debug, Clone)]
pub struct DisplayName {
    pub column: String,
    pub template: KeyTemplate,
}

/// Compiled, validated pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub name: String,
    pub description: Option<String>,
    pub catalog: String,
    pub mdx: String,
    pub slicers: Vec<(String, String)>,
    pub resolver: HierarchyResolver,
    pub target_table: String,
    pub alternate_key: String,
    pub business_key: KeyTemplate,
    pub sanitize_key: bool,
    pub display_name: Option<DisplayName>,
    pub refreshed_column: Option<String>,
    pub constants: Vec<(String, Value)>,
    fields: Vec<(String, FieldRule)>,
    measures: Vec<(String, MeasureRule)>,
}

impl PipelineConfig {
    pub fn compile(
        name: &str,
        definition: &PipelineDefinition,
        mapping: &MappingDocument,
    ) -> ConfigResult<Self> {
        let resolver = HierarchyResolver::new(&definition.hierarchy_mappings)?;

        let fields = mapping
            .fields
            .iter()
            .map(|(field, spec)| {
                let rule = FieldRule {
                    column: spec.column.clone().unwrap_or_else(|| field.clone()),
                    field_type: spec.field_type.unwrap_or(FieldType::String),
                };
                (field.clone(), rule)
            })
            .collect::<Vec<_>>();

        let mut measures = Vec::with_capacity(mapping.measures.len());
        for (measure, spec) in &mapping.measures {
            let field_type = spec.field_type.unwrap_or(FieldType::Decimal);
            let default = match &spec.default {
                None => TypedValue::Null,
                Some(raw) => coerce_default(raw, field_type).ok_or_else(|| {
                    ConfigError::InvalidDefault {
                        field: measure.clone(),
                        raw: raw.to_string(),
                        expected: field_type.to_string(),
                    }
                })?,
            };
            let rule = MeasureRule {
                column: spec.column.clone().unwrap_or_else(|| measure.clone()),
                field_type,
                default,
            };
            measures.push((measure.clone(), rule));
        }

        let produced: Vec<&str> = resolver.fields();
        if let Some((measure, _)) = measures
            .iter()
            .find(|(measure, _)| produced.contains(&measure.as_str()))
        {
            return Err(ConfigError::FieldConflict {
                field: measure.clone(),
            });
        }
        for (field, _) in &fields {
            if !produced.contains(&field.as_str()) {
                tracing::warn!(
                    pipeline = name,
                    field = field.as_str(),
                    "mapped field is not produced by any hierarchy mapping"
                );
            }
        }

        let business_key = KeyTemplate::parse(&mapping.business_key.format)?;
        let display_name = match &mapping.display_name {
            Some(spec) => Some(DisplayName {
                column: spec.column.clone(),
                template: KeyTemplate::parse(&spec.format)?,
            }),
            None => None,
        };

        let config = Self {
            name: name.to_string(),
            description: definition.description.clone(),
            catalog: definition.catalog.clone(),
            mdx: definition.mdx.clone(),
            slicers: definition.slicers.clone(),
            resolver,
            target_table: mapping.table.clone(),
            alternate_key: mapping.alternate_key.clone(),
            business_key,
            sanitize_key: mapping.business_key.sanitize,
            display_name,
            refreshed_column: mapping.refreshed_column.clone(),
            constants: mapping.constants.clone(),
            fields,
            measures,
        };

        config.check_template(&config.business_key)?;
        if let Some(display) = &config.display_name {
            config.check_template(&display.template)?;
        }

        Ok(config)
    }

    /// Every placeholder must name a produced field, and only dates take a format.
    fn check_template(&self, template: &KeyTemplate) -> ConfigResult<()> {
        for (field, format) in template.placeholders() {
            let field_type = self.field_type(field).ok_or_else(|| ConfigError::UndefinedField {
                template: template.source().to_string(),
                field: field.to_string(),
            })?;
            if let Some(format) = format {
                if field_type != FieldType::Date {
                    return Err(ConfigError::FormatNotSupported {
                        field: field.to_string(),
                        field_type: field_type.to_string(),
                        format: format.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Type of a field this pipeline produces, or `None` if nothing produces it.
    ///
    /// Dimension fields not listed under `fields` are strings.
    pub fn field_type(&self, field: &str) -> Option<FieldType> {
        if self.resolver.fields().contains(&field) {
            return Some(self.field_rule(field).field_type);
        }
        self.measure_rule(field).map(|m| m.field_type)
    }

    /// Rule for a dimension field; unlisted fields map to a string column of the same name.
    pub fn field_rule(&self, field: &str) -> FieldRule {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, rule)| rule.clone())
            .unwrap_or_else(|| FieldRule {
                column: field.to_string(),
                field_type: FieldType::String,
            })
    }

    pub fn measure_rule(&self, measure: &str) -> Option<&MeasureRule> {
        self.measures
            .iter()
            .find(|(name, _)| name == measure)
            .map(|(_, rule)| rule)
    }

    pub fn fields(&self) -> &[(String, FieldRule)] {
        &self.fields
    }

    pub fn measures(&self) -> &[(String, MeasureRule)] {
        &self.measures
    }

    /// Configured measure names, in mapping order.
    pub fn measure_names(&self) -> impl Iterator<Item = &str> {
        self.measures.iter().map(|(name, _)| name.as_str())
    }

    // -------------------------------------------------------------------------
    // MDX Rendering
    // -------------------------------------------------------------------------

    /// Render the MDX template with `vars`.
    pub fn render_mdx(&self, vars: &Variables) -> ConfigResult<String> {
        render_variables(&self.mdx, vars).map_err(|variables| ConfigError::UnresolvedVariables {
            pipeline: self.name.clone(),
            variables,
        })
    }

    /// Render a named slicer with `vars`.
    pub fn render_slicer(&self, slicer: &str, vars: &Variables) -> ConfigResult<String> {
        let template = self
            .slicers
            .iter()
            .find(|(name, _)| name == slicer)
            .map(|(_, template)| template)
            .ok_or_else(|| ConfigError::UnknownSlicer {
                pipeline: self.name.clone(),
                slicer: slicer.to_string(),
            })?;
        render_variables(template, vars).map_err(|variables| ConfigError::UnresolvedVariables {
            pipeline: self.name.clone(),
            variables,
        })
    }

    /// Render the statement for one query: the slicer (if any) is rendered
    /// first and bound to `${slicer}`.
    pub fn render_query(&self, slicer: Option<&str>, vars: &Variables) -> ConfigResult<String> {
        match slicer {
            Some(slicer) => {
                let mut vars = vars.clone();
                let rendered = self.render_slicer(slicer, &vars)?;
                vars.insert(SLICER_VARIABLE.to_string(), rendered);
                self.render_mdx(&vars)
            }
            None => self.render_mdx(vars),
        }
    }

    /// A JSON summary for display.
    pub fn describe(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "catalog": self.catalog,
            "table": self.target_table,
            "alternate_key": self.alternate_key,
            "business_key": self.business_key.source(),
            "hierarchy_mappings": self.resolver.mappings(),
            "fields": self.fields.iter().map(|(name, rule)| json!({
                "name": name,
                "column": rule.column,
                "type": rule.field_type,
            })).collect::<Vec<_>>(),
            "measures": self.measures.iter().map(|(name, rule)| json!({
                "name": name,
                "column": rule.column,
                "type": rule.field_type,
                "default": rule.default,
            })).collect::<Vec<_>>(),
            "slicers": self.slicers.iter().map(|(name, _)| name).collect::<Vec<_>>(),
        })
    }
}

impl fmt::Display for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} -> {})", self.name, self.catalog, self.target_table)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const PIPELINE_YAML: &str = r#"
pipelines:
  daily_sales:
    description: Daily net sales per store
    catalog: Sales
    mapping: mappings/daily_sales.yaml
    mdx: |
      SELECT {[Measures].[TY Net Sales USD], [Measures].[TY Orders]} ON COLUMNS,
      NON EMPTY [Franchise].[Store Number].Children * [Calendar].[Date].Children ON ROWS
      FROM [Sales] WHERE (${slicer})
    hierarchy_mappings:
      - { pattern: '\[Store Number\]', field: Store }
      - { pattern: '\[Date\]', field: Date }
    slicers:
      fiscal_period: "[Calendar].[Fiscal Period].&[${year}${period}]"
"#;

    pub(crate) const MAPPING_YAML: &str = r#"
table: crf63_dailysales
business_key:
  format: "{Store}_{Date:%Y%m%d}"
display_name:
  column: crf63_name
  format: "Store {Store} {Date:%Y-%m-%d}"
refreshed_column: crf63_lastrefreshed
constants:
  crf63_source: cube
fields:
  Store: { column: crf63_storenumber }
  Date: { column: crf63_date, type: date }
measures:
  TY Net Sales USD: { column: crf63_netsales, type: decimal, default: 0 }
  TY Orders: { column: crf63_orders, type: int }
"#;

    pub(crate) fn compile(pipeline_yaml: &str, mapping_yaml: &str) -> ConfigResult<PipelineConfig> {
        let doc: PipelinesDocument =
            load_document(pipeline_yaml, "pipelines.yaml", DocumentKind::Pipelines)?;
        let mapping: MappingDocument =
            load_document(mapping_yaml, "mapping.yaml", DocumentKind::Mapping)?;
        let (name, definition) = &doc.pipelines[0];
        PipelineConfig::compile(name, definition, &mapping)
    }

    pub(crate) fn daily_sales() -> PipelineConfig {
        compile(PIPELINE_YAML, MAPPING_YAML).unwrap()
    }

    #[test]
    fn test_compile_daily_sales() {
        let config = daily_sales();
        assert_eq!(config.name, "daily_sales");
        assert_eq!(config.catalog, "Sales");
        assert_eq!(config.target_table, "crf63_dailysales");
        assert_eq!(config.alternate_key, "crf63_businesskey");
        assert_eq!(config.field_type("Date"), Some(FieldType::Date));
        assert_eq!(config.field_type("Store"), Some(FieldType::String));
        assert_eq!(config.field_type("TY Orders"), Some(FieldType::Int));
        assert_eq!(config.field_type("Region"), None);
        assert_eq!(
            config.measure_rule("TY Net Sales USD").unwrap().default,
            TypedValue::Decimal(0.0)
        );
        let names: Vec<_> = config.measure_names().collect();
        assert_eq!(names, vec!["TY Net Sales USD", "TY Orders"]);
    }

    #[test]
    fn test_undefined_key_field() {
        let mapping = MAPPING_YAML.replace("{Store}_{Date:%Y%m%d}", "{Region}_{Date:%Y%m%d}");
        let err = compile(PIPELINE_YAML, &mapping).unwrap_err();
        assert!(matches!(err, ConfigError::UndefinedField { ref field, .. } if field == "Region"));
    }

    #[test]
    fn test_format_on_non_date_field() {
        let mapping = MAPPING_YAML.replace("{Store}_{Date:%Y%m%d}", "{Store:%Y}_{Date}");
        let err = compile(PIPELINE_YAML, &mapping).unwrap_err();
        assert!(
            matches!(err, ConfigError::FormatNotSupported { ref field, .. } if field == "Store")
        );
    }

    #[test]
    fn test_time_specifier_on_date_key() {
        let mapping =
            MAPPING_YAML.replace("{Store}_{Date:%Y%m%d}", "{Store}_{Date:%Y%m%d%H}");
        let err = compile(PIPELINE_YAML, &mapping).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTemplate { .. }));
    }

    #[test]
    fn test_measure_named_like_dimension() {
        let mapping = MAPPING_YAML.replace("TY Orders:", "Store:");
        let err = compile(PIPELINE_YAML, &mapping).unwrap_err();
        assert!(matches!(err, ConfigError::FieldConflict { ref field } if field == "Store"));
    }

    #[test]
    fn test_invalid_default() {
        let mapping = MAPPING_YAML.replace("type: int }", "type: int, default: lots }");
        let err = compile(PIPELINE_YAML, &mapping).unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidDefault { ref field, .. } if field == "TY Orders")
        );
    }

    #[test]
    fn test_invalid_pattern() {
        let pipeline = PIPELINE_YAML.replace(r"'\[Date\]'", "'[Date'");
        let err = compile(&pipeline, MAPPING_YAML).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { .. }));
    }

    #[test]
    fn test_schema_errors_surface_at_load() {
        let mapping = MAPPING_YAML.replace("table: crf63_dailysales", "");
        let err = compile(PIPELINE_YAML, &mapping).unwrap_err();
        assert!(matches!(err, ConfigError::Schema { .. }));
    }

    #[test]
    fn test_yaml_syntax_error() {
        let err = compile("pipelines: [unclosed", MAPPING_YAML).unwrap_err();
        assert!(matches!(err, ConfigError::Yaml { .. }));
    }

    #[test]
    fn test_render_query_with_slicer() {
        let config = daily_sales();
        let vars: Variables = [("year", "2025"), ("period", "03")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mdx = config.render_query(Some("fiscal_period"), &vars).unwrap();
        assert!(mdx.contains("WHERE ([Calendar].[Fiscal Period].&[202503])"));
    }

    #[test]
    fn test_render_query_unresolved() {
        let config = daily_sales();
        let err = config.render_query(None, &Variables::new()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnresolvedVariables { ref variables, .. } if variables == &["slicer"]
        ));
    }

    #[test]
    fn test_unknown_slicer() {
        let config = daily_sales();
        let err = config.render_query(Some("weekly"), &Variables::new()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownSlicer { .. }));
    }

    #[test]
    fn test_describe() {
        let summary = daily_sales().describe();
        assert_eq!(summary["table"], "crf63_dailysales");
        assert_eq!(summary["measures"][1]["type"], "int");
        assert_eq!(summary["slicers"][0], "fiscal_period");
    }
}
