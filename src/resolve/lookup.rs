//! Argument lookup tables
//!
//! Maps a parameter name to its value for one data-table row or one concept
//! invocation.

#![allow(dead_code)]

use std::collections::HashMap;

use super::ResolveError;
use crate::models::{ArgKind, StepArg, Table};

/// Parameter name to argument, scoped to one row or invocation
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ArgLookup {
    args: HashMap<String, StepArg>,
    order: Vec<String>,
}

impl ArgLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lookup holding one column per header for row `row` of `table`
    pub fn from_table_row(table: &Table, row: usize) -> Self {
        let mut lookup = Self::new();
        if let Some(cells) = table.rows.get(row) {
            for (header, cell) in table.headers.iter().zip(cells) {
                lookup.add(
                    header.clone(),
                    StepArg {
                        name: header.clone(),
                        value: cell.value.clone(),
                        kind: ArgKind::Static,
                        table: None,
                    },
                );
            }
        }
        lookup
    }

    /// Add or replace a parameter
    pub fn add(&mut self, name: impl Into<String>, arg: StepArg) {
        let name = name.into();
        if !self.args.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.args.insert(name, arg);
    }

    pub fn get(&self, name: &str) -> Result<&StepArg, ResolveError> {
        self.args
            .get(name)
            .ok_or_else(|| ResolveError::MissingParameter(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.args.contains_key(name)
    }

    /// Parameter names in insertion order
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Copy of this lookup with `other`'s entries layered on top
    pub fn overlay(&self, other: &ArgLookup) -> ArgLookup {
        let mut merged = self.clone();
        for name in &other.order {
            if let Some(arg) = other.args.get(name) {
                merged.add(name.clone(), arg.clone());
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Table {
        Table::new(vec!["user".to_string(), "role".to_string()])
            .with_row(vec!["alice", "admin"])
            .with_row(vec!["bob", "viewer"])
    }

    #[test]
    fn test_lookup_from_row() {
        let lookup = ArgLookup::from_table_row(&table(), 1);
        assert_eq!(lookup.get("user").unwrap().value, "bob");
        assert_eq!(lookup.names(), ["user", "role"]);
    }

    #[test]
    fn test_missing_parameter() {
        let lookup = ArgLookup::from_table_row(&table(), 0);
        let err = lookup.get("email").unwrap_err();
        assert_eq!(err.to_string(), "Accessing an invalid parameter (email)");
    }

    #[test]
    fn test_row_out_of_range_is_empty() {
        assert!(ArgLookup::from_table_row(&table(), 9).is_empty());
    }

    #[test]
    fn test_overlay_prefers_inner_scope() {
        let spec_row = ArgLookup::from_table_row(&table(), 0);
        let scenario_table = Table::new(vec!["role".to_string(), "page".to_string()])
            .with_row(vec!["auditor", "/audit"]);
        let scenario_row = ArgLookup::from_table_row(&scenario_table, 0);

        let merged = spec_row.overlay(&scenario_row);
        assert_eq!(merged.get("user").unwrap().value, "alice");
        assert_eq!(merged.get("role").unwrap().value, "auditor");
        assert_eq!(merged.len(), 3);
    }
}
