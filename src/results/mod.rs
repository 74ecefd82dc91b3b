//! Suite results
//!
//! Aggregation of stream reports into the suite result, persistence of
//! finished runs and failed-only rerun selection.

#![allow(dead_code)]

mod aggregate;
mod merge;
mod rerun;
mod storage;

pub use aggregate::{Aggregator, StreamReport};
pub use merge::merge_spec_results;
pub use rerun::{restrict_to_failed, FailedSelection};
pub use storage::{ExportFormat, ResultsStorage, RunInfo, StoredRun, LAST_RUN_FILE};
