//! Pipeline Registry - load pipeline definitions and their mapping documents
//!
//! The registry reads one `pipelines.yaml` and resolves each pipeline's
//! `mapping` path relative to that file's directory.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{
    load_document, DocumentKind, MappingDocument, PipelineConfig, PipelineDefinition,
    PipelinesDocument,
};
use crate::error::{ConfigError, ConfigResult};

/// Pipelines file used when nothing else is configured (relative to current dir)
pub const DEFAULT_PIPELINES_FILE: &str = "pipelines/pipelines.yaml";

/// Registry of pipeline definitions from one pipelines file
#[derive(Debug, Clone)]
pub struct PipelineRegistry {
    /// Path of the pipelines file
    path: PathBuf,
    /// Directory mapping paths are resolved against
    base_dir: PathBuf,
    /// Definitions in document order
    definitions: Vec<(String, PipelineDefinition)>,
}

impl PipelineRegistry {
    /// Load the registry from a pipelines file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        let text = read(&path)?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self::from_yaml(&text, &path, base_dir)
    }

    /// Build a registry from YAML text; `path` is only used in messages
    pub fn from_yaml(text: &str, path: &Path, base_dir: impl Into<PathBuf>) -> ConfigResult<Self> {
        let document = path.display().to_string();
        let doc: PipelinesDocument = load_document(text, &document, DocumentKind::Pipelines)?;
        tracing::debug!(path = %document, pipelines = doc.pipelines.len(), "pipelines loaded");
        Ok(Self {
            path: path.to_path_buf(),
            base_dir: base_dir.into(),
            definitions: doc.pipelines,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Pipeline names in document order
    pub fn names(&self) -> Vec<&str> {
        self.definitions.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn list(&self) -> &[(String, PipelineDefinition)] {
        &self.definitions
    }

    /// Get a definition by name
    pub fn definition(&self, name: &str) -> ConfigResult<&PipelineDefinition> {
        self.definitions
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d)
            .ok_or_else(|| ConfigError::UnknownPipeline {
                name: name.to_string(),
                available: self.names().into_iter().map(str::to_string).collect(),
            })
    }

    /// Resolved path of a definition's mapping document
    pub fn mapping_path(&self, definition: &PipelineDefinition) -> PathBuf {
        let mapping = Path::new(&definition.mapping);
        if mapping.is_absolute() {
            mapping.to_path_buf()
        } else {
            self.base_dir.join(mapping)
        }
    }

    /// Load, validate and compile one pipeline
    pub fn compile(&self, name: &str) -> ConfigResult<PipelineConfig> {
        let definition = self.definition(name)?;
        let mapping_path = self.mapping_path(definition);
        let text = read(&mapping_path)?;
        let mapping: MappingDocument = load_document(
            &text,
            &mapping_path.display().to_string(),
            DocumentKind::Mapping,
        )?;
        PipelineConfig::compile(name, definition, &mapping)
    }

    /// Compile every pipeline, keeping per-pipeline results
    pub fn compile_all(&self) -> Vec<(String, ConfigResult<PipelineConfig>)> {
        self.definitions
            .iter()
            .map(|(name, _)| (name.clone(), self.compile(name)))
            .collect()
    }
}

fn read(path: &Path) -> ConfigResult<String> {
    fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}
