//! Run configuration
//!
//! Immutable settings for one run, frozen from CLI flags, environment and
//! config file before the scheduler is built.

#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// How work is handed to parallel streams
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Partition expanded specs up front, round-robin
    #[default]
    Eager,
    /// Streams pull from a shared collection; scenario tables expand on demand
    Lazy,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Eager => "eager",
            Strategy::Lazy => "lazy",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "eager" => Ok(Strategy::Eager),
            "lazy" => Ok(Strategy::Lazy),
            _ => Err(format!("Unknown strategy: {s}. Valid: eager, lazy")),
        }
    }
}

/// Malformed `--table-rows` value
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TableRowsError {
    #[error("Table rows filter is empty")]
    Empty,

    #[error("Invalid table row '{0}': rows are numbered from 1")]
    InvalidRow(String),

    #[error("Invalid table row range '{0}': start must not exceed end")]
    InvalidRange(String),
}

/// Row selection from `--table-rows`
///
/// Accepts `N`, `N-M` and comma separated combinations, numbered from 1.
/// Indices are kept 0-based, as sorted non-overlapping ranges.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableRowFilter {
    ranges: Vec<RangeInclusive<usize>>,
    raw: String,
}

impl TableRowFilter {
    pub fn parse(value: &str) -> Result<Self, TableRowsError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(TableRowsError::Empty);
        }

        let mut ranges = Vec::new();
        for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match part.split_once('-') {
                Some((start, end)) => {
                    let start = parse_row(start, part)?;
                    let end = parse_row(end, part)?;
                    if start > end {
                        return Err(TableRowsError::InvalidRange(part.to_string()));
                    }
                    ranges.push(start..=end);
                }
                None => {
                    let row = parse_row(part, part)?;
                    ranges.push(row..=row);
                }
            }
        }

        if ranges.is_empty() {
            return Err(TableRowsError::Empty);
        }
        Ok(Self {
            ranges: coalesce(ranges),
            raw: value.to_string(),
        })
    }

    /// Whether the 0-based row index is selected
    pub fn includes(&self, row: usize) -> bool {
        let after = self.ranges.partition_point(|r| *r.end() < row);
        self.ranges.get(after).is_some_and(|r| r.contains(&row))
    }

    /// Selected rows in ascending order
    pub fn rows(&self) -> impl Iterator<Item = usize> + '_ {
        self.ranges.iter().flat_map(|r| r.clone())
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Sort and merge overlapping or adjacent ranges
fn coalesce(mut ranges: Vec<RangeInclusive<usize>>) -> Vec<RangeInclusive<usize>> {
    ranges.sort_by_key(|r| *r.start());
    let mut merged: Vec<RangeInclusive<usize>> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if *range.start() <= last.end().saturating_add(1) => {
                if range.end() > last.end() {
                    *last = *last.start()..=*range.end();
                }
            }
            _ => merged.push(range),
        }
    }
    merged
}

fn parse_row(value: &str, part: &str) -> Result<usize, TableRowsError> {
    match value.trim().parse::<usize>() {
        Ok(n) if n >= 1 => Ok(n - 1),
        _ => Err(TableRowsError::InvalidRow(part.to_string())),
    }
}

impl fmt::Display for TableRowFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Tag expression from `--tags`: `smoke,!slow`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TagFilter {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl TagFilter {
    pub fn parse(value: &str) -> Self {
        let mut filter = Self::default();
        for tag in value.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            match tag.strip_prefix('!') {
                Some(negated) => filter.exclude.push(negated.trim().to_lowercase()),
                None => filter.include.push(tag.to_lowercase()),
            }
        }
        filter
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Whether a unit carrying `tags` should be scheduled
    pub fn matches<'a, I>(&self, tags: I) -> bool
    where
        I: IntoIterator<Item = &'a String>,
    {
        let tags: Vec<String> = tags.into_iter().map(|t| t.to_lowercase()).collect();
        self.include.iter().all(|t| tags.contains(t))
            && !self.exclude.iter().any(|t| tags.contains(t))
    }
}

impl fmt::Display for TagFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tags: Vec<String> = self
            .include
            .iter()
            .cloned()
            .chain(self.exclude.iter().map(|t| format!("!{t}")))
            .collect();
        write!(f, "{}", tags.join(","))
    }
}

/// Frozen settings handed to the scheduler
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub project_name: String,
    pub parallel: bool,
    pub streams: usize,
    pub strategy: Strategy,
    /// Share one runner across streams when it reports multithreading
    pub multithreading: bool,
    pub table_rows: Option<TableRowFilter>,
    pub tags: Option<TagFilter>,
    /// Attempts per scenario instance; 1 means no retry
    pub max_retries: u32,
    pub kill_timeout: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            project_name: "stepwise".to_string(),
            parallel: false,
            streams: 1,
            strategy: Strategy::Eager,
            multithreading: false,
            table_rows: None,
            tags: None,
            max_retries: 1,
            kill_timeout: Duration::from_secs(5),
        }
    }
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parallel(mut self, streams: usize) -> Self {
        self.parallel = true;
        self.streams = streams.max(1);
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_multithreading(mut self, enabled: bool) -> Self {
        self.multithreading = enabled;
        self
    }

    pub fn with_table_rows(mut self, filter: TableRowFilter) -> Self {
        self.table_rows = Some(filter);
        self
    }

    pub fn with_tags(mut self, filter: TagFilter) -> Self {
        self.tags = Some(filter).filter(|f| !f.is_empty());
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    pub fn with_project_name(mut self, name: impl Into<String>) -> Self {
        self.project_name = name.into();
        self
    }

    /// Whether row `row` of a data table is excluded by the row filter
    pub fn row_excluded(&self, row: usize) -> bool {
        self.table_rows.as_ref().is_some_and(|f| !f.includes(row))
    }

    /// Skip reason recorded for excluded rows
    pub fn row_filter_reason(&self) -> String {
        format!("Doesn't satisfy {} flag condition", crate::models::ROW_FILTER_FLAG)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ranges_and_lists() {
        let filter = TableRowFilter::parse("2-3").unwrap();
        assert_eq!(filter.rows().collect::<Vec<_>>(), vec![1, 2]);

        let filter = TableRowFilter::parse("1, 4-5,3").unwrap();
        assert_eq!(filter.rows().collect::<Vec<_>>(), vec![0, 2, 3, 4]);
        assert!(filter.includes(3));
        assert!(!filter.includes(1));
    }

    #[test]
    fn test_huge_range_is_not_materialized() {
        let filter = TableRowFilter::parse("1-9999999999,5,3-4").unwrap();
        assert!(filter.includes(0));
        assert!(filter.includes(9_999_999_998));
        assert!(!filter.includes(9_999_999_999));
        assert_eq!(filter.rows().take(3).collect::<Vec<_>>(), vec![0, 1, 2]);

        let filter = TableRowFilter::parse("7,2-3,3-4").unwrap();
        assert_eq!(filter.rows().collect::<Vec<_>>(), vec![1, 2, 3, 6]);
        assert!(!filter.includes(5));
    }

    #[test]
    fn test_parse_rejects_bad_rows() {
        assert_eq!(TableRowFilter::parse(""), Err(TableRowsError::Empty));
        assert!(matches!(
            TableRowFilter::parse("0"),
            Err(TableRowsError::InvalidRow(_))
        ));
        assert!(matches!(
            TableRowFilter::parse("4-2"),
            Err(TableRowsError::InvalidRange(_))
        ));
        assert!(TableRowFilter::parse("a-b").is_err());
    }

    #[test]
    fn test_tag_filter() {
        let filter = TagFilter::parse("smoke, !slow");
        let tags = |list: &[&str]| list.iter().map(|t| t.to_string()).collect::<Vec<_>>();

        assert!(filter.matches(&tags(&["Smoke", "login"])));
        assert!(!filter.matches(&tags(&["smoke", "slow"])));
        assert!(!filter.matches(&tags(&["login"])));
        assert!(TagFilter::parse("").is_empty());
    }

    #[test]
    fn test_run_config_row_exclusion() {
        let config = RunConfig::new().with_table_rows(TableRowFilter::parse("2-3").unwrap());
        assert!(config.row_excluded(0));
        assert!(!config.row_excluded(1));
        assert!(!config.row_excluded(2));
        assert!(config.row_excluded(3));
        assert!(config.row_filter_reason().contains("--table-rows"));

        assert!(!RunConfig::new().row_excluded(7));
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("LAZY".parse::<Strategy>().unwrap(), Strategy::Lazy);
        assert!("random".parse::<Strategy>().is_err());
    }
}
