//! Workload sources. Each adapter yields batches of fingerprint-unique
//! queries; the advisor evaluates one batch end-to-end before asking for
//! the next.

use std::collections::HashSet;
use std::fs;
use std::io::BufRead;
use std::thread;
use std::time::{Duration, Instant};

use regex::Regex;
use tracing::debug;

use crate::error::Result;
use crate::gateway::SqlGateway;
use crate::options::Options;
use crate::query::Query;

pub trait QuerySource {
    /// Next batch, or `None` once the source is exhausted. Streaming
    /// sources never return `None` before their input ends.
    fn next_batch(&mut self) -> Result<Option<Vec<Query>>>;
}

/// Keeps the first query per fingerprint, preserving arrival order.
pub fn dedup_by_fingerprint(queries: Vec<Query>) -> Vec<Query> {
    let mut seen = HashSet::new();
    queries
        .into_iter()
        .filter(|query| seen.insert(query.fingerprint.clone()))
        .collect()
}

/// Splits concatenated SQL into one fingerprint-unique batch. Content the
/// splitter rejects is evaluated as a single statement so the failure
/// surfaces in the per-query diagnostics.
pub fn batch_from_sql(sql: &str) -> Vec<Query> {
    let statements: Vec<String> = match pg_query::split_with_parser(sql) {
        Ok(parts) => parts
            .into_iter()
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .collect(),
        Err(_) => vec![sql.trim().to_string()],
    };
    dedup_by_fingerprint(statements.into_iter().map(Query::new).collect())
}

/// Polls `pg_stat_statements` for the current database, filtered by
/// accumulated execution time.
pub struct StatStatementsSource<'g> {
    gateway: &'g SqlGateway,
    interval: Duration,
    min_total_time_ms: f64,
    first: bool,
}

const STAT_STATEMENTS_SQL: &str = "\
SELECT s.query, s.calls, s.total_exec_time
FROM pg_stat_statements s
JOIN pg_database d ON d.oid = s.dbid
WHERE d.datname = current_database()
  AND s.total_exec_time >= $1
ORDER BY s.total_exec_time DESC
LIMIT 100";

impl<'g> StatStatementsSource<'g> {
    pub fn new(gateway: &'g SqlGateway, options: &Options) -> StatStatementsSource<'g> {
        StatStatementsSource {
            gateway,
            interval: Duration::from_secs(options.interval),
            min_total_time_ms: options.min_time_minutes * 60_000.0,
            first: true,
        }
    }
}

impl QuerySource for StatStatementsSource<'_> {
    fn next_batch(&mut self) -> Result<Option<Vec<Query>>> {
        if self.first {
            self.first = false;
        } else {
            thread::sleep(self.interval);
        }
        let rows = self
            .gateway
            .exec(STAT_STATEMENTS_SQL, &[&self.min_total_time_ms])?;
        let mut queries = Vec::with_capacity(rows.len());
        for row in &rows {
            let statement: String = row.try_get(0)?;
            let calls: i64 = row.try_get(1)?;
            let total_time_ms: f64 = row.try_get(2)?;
            queries.push(Query::with_stats(statement, total_time_ms, calls));
        }
        Ok(Some(dedup_by_fingerprint(queries)))
    }
}

/// One slow-statement event recovered from the server log.
#[derive(Debug, Clone, PartialEq)]
pub struct SlowQueryEvent {
    pub statement: String,
    pub duration_ms: f64,
}

/// Extracts `duration: .. ms  statement: ..` events from stderr-format log
/// lines, stitching multi-line statements back together. `execute <name>:`
/// events from the extended protocol are recognized too.
pub struct LogLineParser {
    pattern: Regex,
    current: Option<SlowQueryEvent>,
}

impl LogLineParser {
    pub fn new() -> LogLineParser {
        let pattern = Regex::new(r"duration: ([\d.]+) ms\s+(?:statement|execute [^:]+): (.*)")
            .expect("valid pattern");
        LogLineParser {
            pattern,
            current: None,
        }
    }

    /// Feeds one log line; returns an event when the line completes one.
    pub fn push_line(&mut self, line: &str) -> Option<SlowQueryEvent> {
        if let Some(caps) = self.pattern.captures(line) {
            let finished = self.current.take();
            let duration_ms = caps[1].parse().unwrap_or(0.0);
            self.current = Some(SlowQueryEvent {
                statement: caps[2].to_string(),
                duration_ms,
            });
            return finished;
        }
        if is_log_record_start(line) {
            return self.current.take();
        }
        // Continuation of a multi-line statement.
        if let Some(event) = self.current.as_mut() {
            event.statement.push('\n');
            event.statement.push_str(line);
        }
        None
    }

    /// Flushes the trailing event at end of input.
    pub fn finish(&mut self) -> Option<SlowQueryEvent> {
        self.current.take()
    }
}

impl Default for LogLineParser {
    fn default() -> Self {
        LogLineParser::new()
    }
}

fn is_log_record_start(line: &str) -> bool {
    ["LOG:", "ERROR:", "FATAL:", "WARNING:", "DETAIL:", "HINT:", "STATEMENT:"]
        .iter()
        .any(|marker| line.contains(marker))
}

/// Tails stderr-format log lines from a reader (normally stdin) and batches
/// slow-statement events on a fixed cadence. Reads block, so a quiet stream
/// delays the batch until the next line arrives past the deadline.
pub struct LogStreamSource<R> {
    reader: R,
    interval: Duration,
    min_duration_ms: f64,
    parser: LogLineParser,
    done: bool,
}

impl<R: BufRead> LogStreamSource<R> {
    pub fn new(reader: R, options: &Options) -> LogStreamSource<R> {
        LogStreamSource {
            reader,
            interval: Duration::from_secs(options.interval),
            min_duration_ms: options.min_time_minutes * 60_000.0,
            parser: LogLineParser::new(),
            done: false,
        }
    }
}

impl<R: BufRead> QuerySource for LogStreamSource<R> {
    fn next_batch(&mut self) -> Result<Option<Vec<Query>>> {
        if self.done {
            return Ok(None);
        }
        let deadline = Instant::now() + self.interval;
        let mut events = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                self.done = true;
                events.extend(self.parser.finish());
                break;
            }
            events.extend(self.parser.push_line(line.trim_end_matches(['\r', '\n'])));
            if Instant::now() >= deadline {
                break;
            }
        }
        let min_duration_ms = self.min_duration_ms;
        let queries = events
            .into_iter()
            .filter(|event| event.duration_ms >= min_duration_ms)
            .map(|event| Query::new(event.statement))
            .collect();
        Ok(Some(dedup_by_fingerprint(queries)))
    }
}

/// Evaluates each file as one batch.
pub struct FileSource {
    files: std::vec::IntoIter<String>,
}

impl FileSource {
    pub fn new(files: Vec<String>) -> FileSource {
        FileSource {
            files: files.into_iter(),
        }
    }
}

impl QuerySource for FileSource {
    fn next_batch(&mut self) -> Result<Option<Vec<Query>>> {
        let Some(path) = self.files.next() else {
            return Ok(None);
        };
        debug!("processing {}", path);
        let contents = fs::read_to_string(&path)?;
        Ok(Some(batch_from_sql(&contents)))
    }
}

/// The `-s` flag: one batch holding one literal statement, then done.
pub struct SingleStatementSource {
    statement: Option<String>,
}

impl SingleStatementSource {
    pub fn new(statement: impl Into<String>) -> SingleStatementSource {
        SingleStatementSource {
            statement: Some(statement.into()),
        }
    }
}

impl QuerySource for SingleStatementSource {
    fn next_batch(&mut self) -> Result<Option<Vec<Query>>> {
        Ok(self.statement.take().map(|s| batch_from_sql(&s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_simple_statement_line() {
        let mut parser = LogLineParser::new();
        assert!(parser
            .push_line("2024-05-01 10:00:00 UTC [99] LOG:  duration: 1242.570 ms  statement: SELECT * FROM ratings WHERE user_id = 5")
            .is_none());
        let event = parser.finish().unwrap();
        assert_eq!(event.duration_ms, 1242.570);
        assert_eq!(event.statement, "SELECT * FROM ratings WHERE user_id = 5");
    }

    #[test]
    fn test_parse_execute_line() {
        let mut parser = LogLineParser::new();
        parser.push_line(
            "LOG:  duration: 350.000 ms  execute <unnamed>: SELECT * FROM ratings WHERE user_id = $1",
        );
        let event = parser.finish().unwrap();
        assert_eq!(event.duration_ms, 350.0);
        assert!(event.statement.starts_with("SELECT"));
    }

    #[test]
    fn test_multiline_statement_is_stitched() {
        let mut parser = LogLineParser::new();
        parser.push_line("LOG:  duration: 500.0 ms  statement: SELECT *");
        parser.push_line("    FROM ratings");
        parser.push_line("    WHERE user_id = 5");
        let event = parser.finish().unwrap();
        assert_eq!(event.statement, "SELECT *\n    FROM ratings\n    WHERE user_id = 5");
    }

    #[test]
    fn test_next_log_record_closes_current_event() {
        let mut parser = LogLineParser::new();
        parser.push_line("LOG:  duration: 500.0 ms  statement: SELECT 1");
        assert!(parser.push_line("LOG:  connection received: host=[local]").is_some());
        assert!(parser.finish().is_none());
    }

    #[test]
    fn test_dedup_by_fingerprint_keeps_first() {
        let queries = vec![
            Query::new("SELECT * FROM ratings WHERE user_id = 1"),
            Query::new("SELECT * FROM ratings WHERE user_id = 2"),
            Query::new("SELECT * FROM movies WHERE id = 3"),
        ];
        let deduped = dedup_by_fingerprint(queries);
        assert_eq!(deduped.len(), 2);
        assert!(deduped[0].statement.ends_with("user_id = 1"));
    }

    #[test]
    fn test_batch_from_sql_splits_statements() {
        let batch = batch_from_sql(
            "SELECT * FROM ratings WHERE user_id = 1; SELECT * FROM movies WHERE id = 2;",
        );
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_log_stream_source_filters_by_duration() {
        let mut log = tempfile::NamedTempFile::new().unwrap();
        writeln!(log, "LOG:  duration: 10.0 ms  statement: SELECT * FROM ratings WHERE user_id = 1").unwrap();
        writeln!(log, "LOG:  duration: 120000.0 ms  statement: SELECT * FROM movies WHERE id = 2").unwrap();
        let reader = std::io::BufReader::new(log.reopen().unwrap());
        let mut options = Options::default();
        options.interval = 0;
        options.min_time_minutes = 1.0;
        let mut source = LogStreamSource::new(reader, &options);
        // Zero interval: one line per batch until EOF.
        let mut queries = Vec::new();
        while let Some(batch) = source.next_batch().unwrap() {
            queries.extend(batch);
        }
        assert_eq!(queries.len(), 1);
        assert!(queries[0].statement.contains("movies"));
    }
}
