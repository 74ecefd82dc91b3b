//! Merging partial spec results
//!
//! A spec split into per-row instances comes back as several partial
//! results, possibly from different streams. They are grouped by file name
//! and folded into one result whose statistics are recounted from the
//! merged scenario list.

use indexmap::IndexMap;
use tracing::debug;

use crate::models::{ExecutionStatus, SpecResult};

/// Group partial results by file and merge each group
///
/// Groups keep the order in which their file was first seen. With
/// `parallel` set, merged time is the longest part instead of the sum.
pub fn merge_spec_results(results: Vec<SpecResult>, parallel: bool) -> Vec<SpecResult> {
    let mut groups: IndexMap<String, Vec<SpecResult>> = IndexMap::new();
    for result in results {
        groups.entry(result.file_name.clone()).or_default().push(result);
    }

    groups
        .into_values()
        .map(|parts| merge_parts(parts, parallel))
        .collect()
}

fn merge_parts(mut parts: Vec<SpecResult>, parallel: bool) -> SpecResult {
    if parts.len() == 1 {
        let mut single = parts.remove(0);
        single.recompute_statistics();
        return single;
    }

    debug!(
        "Merging {} partial results for {}",
        parts.len(),
        parts[0].file_name
    );

    let first = &parts[0];
    let mut merged = SpecResult::new(&first.file_name, &first.heading);
    merged.tags = first.tags.clone();
    merged.table_headers = first.table_headers.clone();

    let all_skipped = parts.iter().all(|p| p.skipped);
    let mut time = 0;
    for part in parts {
        time = if parallel {
            time.max(part.execution_time)
        } else {
            time + part.execution_time
        };
        merged.is_table_driven |= part.is_table_driven;
        merged.failed |= part.failed;
        for (row, values) in part.table_rows {
            merged.add_table_row(row, values);
        }
        merged.scenarios.extend(part.scenarios);
        merged.pre_hook_failures.extend(part.pre_hook_failures);
        merged.post_hook_failures.extend(part.post_hook_failures);
        extend_unique(&mut merged.skip_reasons, part.skip_reasons);
        extend_unique(&mut merged.errors, part.errors);
    }

    merged
        .scenarios
        .sort_by_key(|s| (s.spec_row, s.line_no, s.scenario_row));
    merged.execution_time = time;
    merged.skipped = all_skipped;
    merged.recompute_statistics();

    if all_skipped && !merged.failed {
        merged.status.advance(ExecutionStatus::Skipped);
    } else {
        merged.status.advance(ExecutionStatus::Executing);
        merged.status.advance(if merged.failed {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Passed
        });
    }
    merged
}

fn extend_unique(target: &mut Vec<String>, values: Vec<String>) {
    for value in values {
        if !target.contains(&value) {
            target.push(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExecResult, HookFailure, ScenarioResult, ROW_FILTER_FLAG};

    fn part(row: usize, millis: u64, failed: bool) -> SpecResult {
        let mut spec = SpecResult::new("rows.spec", "Rows");
        spec.is_table_driven = true;
        spec.add_table_row(row, vec![format!("value {row}")]);
        spec.start();
        let mut scenario = ScenarioResult::new("Open", 3).with_rows(Some(row), None);
        scenario.start();
        if failed {
            scenario.set_failure();
        }
        scenario.finish();
        spec.add_scenario(scenario);
        spec.execution_time = millis;
        spec.finish();
        spec
    }

    #[test]
    fn test_rows_union_in_ascending_order() {
        let merged = merge_spec_results(vec![part(2, 10, false), part(0, 20, false), part(1, 5, false)], false);

        assert_eq!(merged.len(), 1);
        let spec = &merged[0];
        assert_eq!(spec.table_rows.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
        let rows: Vec<_> = spec.scenarios.iter().map(|s| s.spec_row).collect();
        assert_eq!(rows, vec![Some(0), Some(1), Some(2)]);
        assert_eq!(spec.scenario_count, 3);
        assert_eq!(spec.execution_time, 35);
        assert!(spec.is_table_driven);
        assert_eq!(spec.status, ExecutionStatus::Passed);
    }

    #[test]
    fn test_duplicate_rows_kept_once() {
        let merged = merge_spec_results(vec![part(1, 1, false), part(1, 1, false)], false);
        assert_eq!(merged[0].table_rows.len(), 1);
    }

    #[test]
    fn test_parallel_time_takes_longest_part() {
        let merged = merge_spec_results(vec![part(0, 30, false), part(1, 50, false)], true);
        assert_eq!(merged[0].execution_time, 50);
    }

    #[test]
    fn test_failed_part_fails_merged_spec() {
        let merged = merge_spec_results(vec![part(0, 1, false), part(1, 1, true)], false);
        let spec = &merged[0];
        assert!(spec.failed);
        assert_eq!(spec.scenario_failed_count, 1);
        assert_eq!(spec.failed_data_table_rows, vec![1]);
        assert_eq!(spec.status, ExecutionStatus::Failed);
    }

    #[test]
    fn test_row_filtered_parts_not_counted() {
        let mut excluded = SpecResult::new("rows.spec", "Rows");
        excluded.add_table_row(0, vec!["value 0".to_string()]);
        let mut scenario = ScenarioResult::new("Open", 3).with_rows(Some(0), None);
        scenario.skip([format!("Doesn't satisfy {ROW_FILTER_FLAG} flag condition")]);
        excluded.add_scenario(scenario);
        excluded.skip([format!("Doesn't satisfy {ROW_FILTER_FLAG} flag condition")]);
        excluded.finish();

        let merged = merge_spec_results(vec![excluded, part(1, 4, false)], false);
        let spec = &merged[0];
        assert_eq!(spec.scenarios.len(), 2);
        assert_eq!(spec.scenario_count, 1);
        assert_eq!(spec.scenario_skipped_count, 0);
        assert!(!spec.skipped);
        assert_eq!(spec.table_rows.len(), 2);
    }

    #[test]
    fn test_hook_failures_stay_per_row() {
        let mut first = part(0, 1, false);
        first.add_pre_hook_failure(HookFailure::new("before spec").with_row_index(Some(0)));
        let mut second = part(1, 1, false);
        second.add_post_hook_failure(HookFailure::new("after spec").with_row_index(Some(1)));

        let merged = merge_spec_results(vec![first, second], false);
        assert_eq!(merged[0].pre_hook_failures[0].table_row_index, Some(0));
        assert_eq!(merged[0].post_hook_failures[0].table_row_index, Some(1));
    }

    #[test]
    fn test_distinct_files_keep_first_seen_order() {
        let mut other = part(0, 1, false);
        other.file_name = "other.spec".to_string();
        let merged = merge_spec_results(vec![other, part(0, 1, false), part(1, 1, false)], false);

        let files: Vec<_> = merged.iter().map(|s| s.file_name.as_str()).collect();
        assert_eq!(files, vec!["other.spec", "rows.spec"]);
    }
}
