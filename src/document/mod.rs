//! Suite documents
//!
//! Parsed specs, concepts and pre-execution errors arrive as serialized
//! suite documents (JSON or YAML). Paths may name files or directories;
//! directories are searched recursively in name order.

#![allow(dead_code)]

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::is_yaml_file;
use crate::models::{BuildError, BuildErrors, Specification};
use crate::resolve::{ConceptDefinition, ConceptDictionary};

const EXTENSIONS: &[&str] = &["json", "yaml", "yml"];

/// One serialized parser output
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SuiteDocument {
    #[serde(default)]
    pub specs: Vec<Specification>,

    #[serde(default)]
    pub concepts: Vec<ConceptDefinition>,

    /// Step signatures the runner implements; absent means "don't validate"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implemented_steps: Option<Vec<String>>,

    /// Extra signatures served by an implementation listed above
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub step_aliases: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub build_errors: Vec<BuildError>,
}

impl SuiteDocument {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read suite document: {}", path.display()))?;
        if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML document: {}", path.display()))
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON document: {}", path.display()))
        }
    }
}

/// Everything loaded for one run
pub struct LoadedSuite {
    pub specs: Vec<Arc<Specification>>,
    pub dictionary: ConceptDictionary,
    pub build_errors: BuildErrors,
    pub implemented_steps: Option<Vec<String>>,
    pub step_aliases: Vec<String>,
}

impl LoadedSuite {
    /// Load and combine every document under `paths`
    pub fn load(paths: &[PathBuf]) -> Result<Self> {
        let mut files = Vec::new();
        for path in paths {
            collect_files(path, &mut files)?;
        }
        if files.is_empty() {
            bail!("No suite documents found");
        }

        let mut documents = Vec::with_capacity(files.len());
        for file in &files {
            debug!("Loading {}", file.display());
            documents.push(SuiteDocument::load(file)?);
        }
        let suite = Self::from_documents(documents)?;

        info!(
            "Loaded {} spec(s) and {} concept(s) from {} document(s)",
            suite.specs.len(),
            suite.dictionary.len(),
            files.len()
        );
        Ok(suite)
    }

    pub fn from_documents(documents: Vec<SuiteDocument>) -> Result<Self> {
        let mut specs: Vec<Arc<Specification>> = Vec::new();
        let mut concepts = Vec::new();
        let mut build_errors = BuildErrors::new();
        let mut implemented: Option<Vec<String>> = None;
        let mut step_aliases = Vec::new();

        for document in documents {
            for spec in document.specs {
                if specs.iter().any(|s| s.file_name == spec.file_name) {
                    bail!("Specification {} is defined more than once", spec.file_name);
                }
                specs.push(Arc::new(spec));
            }
            concepts.extend(document.concepts);
            for error in document.build_errors {
                build_errors.add(error);
            }
            if let Some(steps) = document.implemented_steps {
                implemented.get_or_insert_with(Vec::new).extend(steps);
            }
            step_aliases.extend(document.step_aliases);
        }

        let dictionary =
            ConceptDictionary::new(concepts).context("Invalid concept definitions")?;

        Ok(Self {
            specs,
            dictionary,
            build_errors,
            implemented_steps: implemented,
            step_aliases,
        })
    }
}

fn collect_files(path: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    if path.is_file() {
        files.push(path.to_path_buf());
        return Ok(());
    }
    if !path.is_dir() {
        bail!("Path not found: {}", path.display());
    }

    let mut entries: Vec<PathBuf> = fs::read_dir(path)
        .with_context(|| format!("Failed to read directory: {}", path.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    entries.sort();

    for entry in entries {
        if entry.is_dir() {
            collect_files(&entry, files)?;
        } else if has_document_extension(&entry) {
            files.push(entry);
        }
    }
    Ok(())
}

fn has_document_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| EXTENSIONS.contains(&e))
}
