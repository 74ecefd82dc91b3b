//! Parsed specification models
//!
//! Specifications, scenarios, steps and data tables as handed over by the
//! parser. These trees are read-only for the whole run and shared across
//! streams behind `Arc`.

#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a step argument or table cell
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgKind {
    /// Literal text
    #[default]
    Static,
    /// Reference to a data-table column or concept parameter
    Dynamic,
    /// Inline table argument
    Table,
    /// Special argument resolved to a string (`file:<path>`)
    SpecialString,
    /// Special argument resolved to a table (`table:<file.csv>`)
    SpecialTable,
}

impl ArgKind {
    pub fn name(&self) -> &'static str {
        match self {
            ArgKind::Static => "static",
            ArgKind::Dynamic => "dynamic",
            ArgKind::Table => "table",
            ArgKind::SpecialString => "special_string",
            ArgKind::SpecialTable => "special_table",
        }
    }

    pub fn is_table(&self) -> bool {
        matches!(self, ArgKind::Table | ArgKind::SpecialTable)
    }
}

impl fmt::Display for ArgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Single cell of a data table
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCell {
    pub value: String,
    #[serde(default)]
    pub kind: ArgKind,
}

impl TableCell {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            kind: ArgKind::Static,
        }
    }

    pub fn dynamic(name: impl Into<String>) -> Self {
        Self {
            value: name.into(),
            kind: ArgKind::Dynamic,
        }
    }
}

/// Column-headed table used as spec/scenario data table or step argument
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub headers: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<TableCell>>,
    #[serde(default)]
    pub line_no: usize,
}

impl Table {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
            line_no: 0,
        }
    }

    /// Append a row of static cells
    pub fn with_row<S: Into<String>>(mut self, cells: Vec<S>) -> Self {
        self.rows.push(cells.into_iter().map(TableCell::new).collect());
        self
    }

    /// Append a row of prepared cells
    pub fn with_cells(mut self, cells: Vec<TableCell>) -> Self {
        self.rows.push(cells);
        self
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// A table counts as initialized once it has headers
    pub fn is_initialized(&self) -> bool {
        !self.headers.is_empty()
    }

    pub fn column_index(&self, header: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == header)
    }

    /// Cell under `header` in row `row`
    pub fn cell(&self, row: usize, header: &str) -> Option<&TableCell> {
        let column = self.column_index(header)?;
        self.rows.get(row).and_then(|r| r.get(column))
    }

    /// Copy of this table holding only row `row`
    pub fn with_one_row(&self, row: usize) -> Option<Table> {
        let cells = self.rows.get(row)?.clone();
        Some(Table {
            headers: self.headers.clone(),
            rows: vec![cells],
            line_no: self.line_no,
        })
    }

    /// Plain string values of one row
    pub fn row_values(&self, row: usize) -> Option<Vec<String>> {
        self.rows
            .get(row)
            .map(|cells| cells.iter().map(|c| c.value.clone()).collect())
    }
}

/// Declared argument of a step
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepArg {
    /// Placeholder name, if the parser recorded one
    #[serde(default)]
    pub name: String,
    /// Literal value, or the referenced parameter name for dynamic args
    pub value: String,
    #[serde(default)]
    pub kind: ArgKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<Table>,
}

impl StepArg {
    pub fn literal(value: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            value: value.into(),
            kind: ArgKind::Static,
            table: None,
        }
    }

    pub fn dynamic(param: impl Into<String>) -> Self {
        let param = param.into();
        Self {
            name: param.clone(),
            value: param,
            kind: ArgKind::Dynamic,
            table: None,
        }
    }

    pub fn special(kind: ArgKind, value: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            value: value.into(),
            kind,
            table: None,
        }
    }

    pub fn table(table: Table) -> Self {
        Self {
            name: "table".to_string(),
            value: String::new(),
            kind: ArgKind::Table,
            table: Some(table),
        }
    }

    /// Whether this argument reads any of the given parameter names
    pub fn uses_any(&self, names: &[String]) -> bool {
        match self.kind {
            ArgKind::Dynamic => names.contains(&self.value),
            ArgKind::Table => self.table.as_ref().is_some_and(|t| {
                t.rows.iter().flatten().any(|cell| {
                    cell.kind == ArgKind::Dynamic && names.contains(&cell.value)
                })
            }),
            _ => false,
        }
    }
}

/// Step as written in a specification or concept definition
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    #[serde(default)]
    pub line_no: usize,
    /// Parameterized text with `{}` placeholders; also the concept signature
    pub value: String,
    /// Text as it appears in the source
    #[serde(default)]
    pub line_text: String,
    #[serde(default)]
    pub args: Vec<StepArg>,
    /// Set when this step invokes a concept
    #[serde(default)]
    pub concept: bool,
}

impl Step {
    pub fn new(line_no: usize, value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            line_no,
            line_text: value.clone(),
            value,
            args: Vec::new(),
            concept: false,
        }
    }

    pub fn with_arg(mut self, arg: StepArg) -> Self {
        self.args.push(arg);
        self
    }

    pub fn with_line_text(mut self, text: impl Into<String>) -> Self {
        self.line_text = text.into();
        self
    }

    pub fn as_concept(mut self) -> Self {
        self.concept = true;
        self
    }

    /// Number of `{}` placeholders in the step value
    pub fn placeholder_count(&self) -> usize {
        self.value.matches("{}").count()
    }

    pub fn uses_any_arg(&self, names: &[String]) -> bool {
        self.args.iter().any(|arg| arg.uses_any(names))
    }
}

/// Scenario inside a specification
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub heading: String,
    #[serde(default)]
    pub line_no: usize,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Scenario-level data table
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_table: Option<Table>,
}

impl Scenario {
    pub fn new(heading: impl Into<String>, line_no: usize) -> Self {
        Self {
            heading: heading.into(),
            line_no,
            tags: Vec::new(),
            steps: Vec::new(),
            data_table: None,
        }
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_table(mut self, table: Table) -> Self {
        self.data_table = Some(table);
        self
    }

    /// Data table with at least one column, if any
    pub fn table(&self) -> Option<&Table> {
        self.data_table.as_ref().filter(|t| t.is_initialized())
    }

    pub fn uses_args_in_steps(&self, names: &[String]) -> bool {
        self.steps.iter().any(|s| s.uses_any_arg(names))
    }
}

/// Parsed specification file
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Specification {
    pub file_name: String,
    pub heading: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Spec-level data table
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_table: Option<Table>,
    /// Context steps, run before every scenario
    #[serde(default)]
    pub contexts: Vec<Step>,
    #[serde(default)]
    pub scenarios: Vec<Scenario>,
    /// Teardown steps, run after every scenario
    #[serde(default)]
    pub teardowns: Vec<Step>,
}

impl Specification {
    pub fn new(file_name: impl Into<String>, heading: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            heading: heading.into(),
            tags: Vec::new(),
            data_table: None,
            contexts: Vec::new(),
            scenarios: Vec::new(),
            teardowns: Vec::new(),
        }
    }

    pub fn with_scenario(mut self, scenario: Scenario) -> Self {
        self.scenarios.push(scenario);
        self
    }

    pub fn with_context(mut self, step: Step) -> Self {
        self.contexts.push(step);
        self
    }

    pub fn with_teardown(mut self, step: Step) -> Self {
        self.teardowns.push(step);
        self
    }

    pub fn with_table(mut self, table: Table) -> Self {
        self.data_table = Some(table);
        self
    }

    /// Data table with at least one column, if any
    pub fn table(&self) -> Option<&Table> {
        self.data_table.as_ref().filter(|t| t.is_initialized())
    }

    pub fn uses_args_in_context_teardown(&self, names: &[String]) -> bool {
        self.contexts
            .iter()
            .chain(self.teardowns.iter())
            .any(|s| s.uses_any_arg(names))
    }

    /// Every step of the spec, contexts first and teardowns last
    pub fn all_steps(&self) -> impl Iterator<Item = &Step> {
        self.contexts
            .iter()
            .chain(self.scenarios.iter().flat_map(|s| s.steps.iter()))
            .chain(self.teardowns.iter())
    }
}

impl fmt::Display for Specification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.heading, self.file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_table_with_one_row() {
        let table = Table::new(headers(&["id", "name"]))
            .with_row(vec!["1", "alice"])
            .with_row(vec!["2", "bob"]);

        let single = table.with_one_row(1).unwrap();
        assert_eq!(single.row_count(), 1);
        assert_eq!(single.cell(0, "name").unwrap().value, "bob");
        assert!(table.with_one_row(5).is_none());
    }

    #[test]
    fn test_step_uses_dynamic_arg() {
        let step = Step::new(3, "Say {} to {}")
            .with_arg(StepArg::literal("hello"))
            .with_arg(StepArg::dynamic("name"));

        assert_eq!(step.placeholder_count(), 2);
        assert!(step.uses_any_arg(&headers(&["name"])));
        assert!(!step.uses_any_arg(&headers(&["id"])));
    }

    #[test]
    fn test_inline_table_with_dynamic_cell() {
        let inline = Table::new(headers(&["user"])).with_cells(vec![TableCell::dynamic("name")]);
        let step = Step::new(4, "Create users {}").with_arg(StepArg::table(inline));

        assert!(step.uses_any_arg(&headers(&["name"])));
    }

    #[test]
    fn test_spec_context_usage() {
        let spec = Specification::new("login.spec", "Login")
            .with_context(Step::new(2, "Open {}").with_arg(StepArg::dynamic("url")));

        assert!(spec.uses_args_in_context_teardown(&headers(&["url"])));
        assert!(!spec.uses_args_in_context_teardown(&headers(&["user"])));
    }

    #[test]
    fn test_spec_deserialize_defaults() {
        let json = r#"{
            "file_name": "a.spec",
            "heading": "A",
            "scenarios": [{"heading": "S", "steps": [{"value": "do it"}]}]
        }"#;

        let spec: Specification = serde_json::from_str(json).unwrap();
        assert!(spec.table().is_none());
        assert_eq!(spec.scenarios[0].steps[0].args.len(), 0);
        assert!(!spec.scenarios[0].steps[0].concept);
    }
}
