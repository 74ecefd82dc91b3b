//! Special arguments
//!
//! `file:<path>` reads a file into a string parameter and `table:<path>`
//! reads a CSV file into a table parameter. Paths are relative to the
//! project directory.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use super::ResolveError;
use crate::models::{ArgKind, StepArg, Table};

/// Resolver for `<type>:<value>` special arguments
#[derive(Clone, Debug)]
pub struct SpecialResolver {
    base_dir: PathBuf,
}

impl SpecialResolver {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Split `raw` at the first `:` and dispatch on the type prefix
    pub fn resolve(&self, raw: &str) -> Result<StepArg, ResolveError> {
        let (kind, value) = raw
            .split_once(':')
            .map(|(k, v)| (k.trim(), v.trim()))
            .ok_or_else(|| ResolveError::UnknownSpecialType(raw.to_string()))?;

        let mut arg = match kind {
            "file" => StepArg::special(ArgKind::SpecialString, self.read_file(value)?),
            "table" => {
                let mut arg = StepArg::special(ArgKind::SpecialTable, String::new());
                arg.table = Some(self.read_csv(value)?);
                arg
            }
            _ => return Err(ResolveError::UnknownSpecialType(raw.to_string())),
        };
        arg.name = raw.to_string();
        Ok(arg)
    }

    fn path(&self, value: &str) -> PathBuf {
        let path = Path::new(value);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    fn read_file(&self, value: &str) -> Result<String, ResolveError> {
        let path = self.path(value);
        std::fs::read_to_string(&path).map_err(|source| ResolveError::SpecialFile { path, source })
    }

    fn read_csv(&self, value: &str) -> Result<Table, ResolveError> {
        let path = self.path(value);
        let mut reader = csv::Reader::from_path(&path).map_err(|source| ResolveError::Csv {
            path: path.clone(),
            source,
        })?;

        let headers = reader
            .headers()
            .map_err(|source| ResolveError::Csv {
                path: path.clone(),
                source,
            })?
            .iter()
            .map(str::to_string)
            .collect();

        let mut table = Table::new(headers);
        for record in reader.records() {
            let record = record.map_err(|source| ResolveError::Csv {
                path: path.clone(),
                source,
            })?;
            table = table.with_row(record.iter().collect::<Vec<&str>>());
        }
        Ok(table)
    }
}

impl Default for SpecialResolver {
    fn default() -> Self {
        Self::new(".")
    }
}
