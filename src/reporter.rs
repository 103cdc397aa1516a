//! Human-readable advisory output.
//!
//! Suggestions are the tool's product and go to stdout; ambient diagnostics
//! flow through `tracing`. The `debug` levels widen the stdout report with
//! per-query blocks and, at `debug3`, the column-mining trace.

use crate::options::LogLevel;
use crate::query::{Query, Suggestion, UNKNOWN_FINGERPRINT};

pub struct Reporter {
    level: LogLevel,
}

impl Reporter {
    pub fn new(level: LogLevel) -> Reporter {
        Reporter { level }
    }

    fn enabled(&self, level: LogLevel) -> bool {
        self.level >= level
    }

    /// Reports one evaluated batch: per-query blocks first (suggesting
    /// queries at `debug`, every query at `debug2`), then the suggestion
    /// lines, or `No new indexes found`.
    pub fn batch(&self, queries: &[Query], suggestions: &[Suggestion]) {
        if self.enabled(LogLevel::Debug) {
            for query in queries {
                if query.suggest_index || self.enabled(LogLevel::Debug2) {
                    self.query_block(query);
                }
            }
        }
        if !self.enabled(LogLevel::Info) {
            return;
        }
        if suggestions.is_empty() {
            println!("No new indexes found");
            return;
        }
        for suggestion in suggestions {
            println!("Index found: {}", suggestion.index);
        }
    }

    fn query_block(&self, query: &Query) {
        println!("{}", "-".repeat(80));
        println!("Query {}", query.fingerprint);
        if let (Some(total_time_ms), Some(calls)) = (query.total_time_ms, query.calls) {
            let avg_ms = if calls > 0 {
                total_time_ms / calls as f64
            } else {
                0.0
            };
            println!(
                "Total time: {:.1} min, avg time: {:.0} ms, calls: {}",
                total_time_ms / 60_000.0,
                avg_ms,
                calls
            );
        }
        if query.fingerprint == UNKNOWN_FINGERPRINT {
            println!("Could not parse query");
        } else if query.tables().is_empty() {
            println!("No tables");
        } else if query.missing_tables {
            println!("Tables not present in current database");
        } else if !query.explainable() {
            println!("Could not run explain");
        } else if !query.high_cost() {
            println!("Low initial cost: {:.1}", query.initial_cost().unwrap_or(0.0));
        } else {
            self.cost_trace(query);
        }
        println!("{}", query.statement.trim());
    }

    fn cost_trace(&self, query: &Query) {
        if let Some(cost) = query.cost(0) {
            println!("Start: {:.1}", cost);
        }
        if let Some(cost) = query.cost(1) {
            println!(
                "Pass1: {:.1} : {}",
                cost,
                format_indexes(query.pass1_indexes.as_deref())
            );
        }
        if let Some(cost) = query.cost(2) {
            println!(
                "Pass2: {:.1} : {}",
                cost,
                format_indexes(query.pass2_indexes.as_deref())
            );
        }
        if let Some(cost) = query.new_cost {
            println!("Final: {:.1} : {}", cost, format_indexes(Some(&query.indexes)));
        }
        if !query.suggest_index {
            println!("Need 50% cost savings to suggest index");
        }
    }

    /// Column-mining trace, one line per query, at `debug3` only.
    pub fn column_mining(&self, fingerprint: &str, columns: &[String]) {
        if self.enabled(LogLevel::Debug3) {
            println!("Query {} columns: {}", fingerprint, columns.join(", "));
        }
    }
}

fn format_indexes(indexes: Option<&[crate::query::CandidateIndex]>) -> String {
    match indexes {
        Some(list) if !list.is_empty() => list
            .iter()
            .map(|index| index.to_string())
            .collect::<Vec<_>>()
            .join(", "),
        _ => "none".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_level_suppresses_info() {
        let reporter = Reporter::new(LogLevel::Error);
        assert!(!reporter.enabled(LogLevel::Info));
        assert!(reporter.enabled(LogLevel::Error));
    }

    #[test]
    fn test_debug2_implies_debug() {
        let reporter = Reporter::new(LogLevel::Debug2);
        assert!(reporter.enabled(LogLevel::Debug));
        assert!(!reporter.enabled(LogLevel::Debug3));
    }

    #[test]
    fn test_format_indexes() {
        use crate::query::CandidateIndex;
        assert_eq!(format_indexes(None), "none");
        let list = [CandidateIndex::single("ratings", "user_id")];
        assert_eq!(format_indexes(Some(&list)), "ratings (user_id)");
    }
}
