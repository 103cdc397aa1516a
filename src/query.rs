//! Per-query record flowing through the evaluation pipeline.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

/// Fingerprint sentinel for statements the parser rejected.
pub const UNKNOWN_FINGERPRINT: &str = "unknown";

/// Baseline planner cost at or above which a query is worth hypothetical
/// index work.
pub const HIGH_COST_THRESHOLD: f64 = 100.0;

/// An index the advisor is considering or has accepted: a table plus an
/// ordered column list. Identity is the whole pair, order significant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CandidateIndex {
    pub table: String,
    pub columns: Vec<String>,
}

impl CandidateIndex {
    pub fn new(table: impl Into<String>, columns: Vec<String>) -> CandidateIndex {
        CandidateIndex {
            table: table.into(),
            columns,
        }
    }

    pub fn single(table: impl Into<String>, column: impl Into<String>) -> CandidateIndex {
        CandidateIndex {
            table: table.into(),
            columns: vec![column.into()],
        }
    }
}

impl fmt::Display for CandidateIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.table, self.columns.join(", "))
    }
}

/// An accepted index together with the fingerprints of the queries that
/// asked for it.
#[derive(Debug, Clone, Serialize)]
pub struct Suggestion {
    pub index: CandidateIndex,
    pub queries: Vec<String>,
}

/// One observed query. Created by a source adapter, mutated only by the
/// evaluator, discarded at batch end.
pub struct Query {
    pub statement: String,
    pub fingerprint: String,
    parsed: Option<pg_query::ParseResult>,
    tables: Vec<String>,
    /// Accumulated execution time in milliseconds; stats source only.
    pub total_time_ms: Option<f64>,
    /// Call count; stats source only.
    pub calls: Option<i64>,
    /// Set when the query references a table the database does not have.
    pub missing_tables: bool,
    /// EXPLAIN documents captured per pass. An entry exists iff EXPLAIN
    /// succeeded at that pass; a failed pass leaves the list as captured and
    /// disqualifies the query from later passes.
    pub plans: Vec<Value>,
    pub suggest_index: bool,
    /// Planner cost under the winning pass, once an index is suggested.
    pub new_cost: Option<f64>,
    /// Final chosen indexes.
    pub indexes: Vec<CandidateIndex>,
    /// Debug snapshots of what each hypothetical pass recovered.
    pub pass1_indexes: Option<Vec<CandidateIndex>>,
    pub pass2_indexes: Option<Vec<CandidateIndex>>,
}

impl Query {
    pub fn new(statement: impl Into<String>) -> Query {
        let statement = statement.into();
        let fingerprint = pg_query::fingerprint(&statement)
            .map(|f| f.hex)
            .unwrap_or_else(|_| UNKNOWN_FINGERPRINT.to_string());
        let parsed = pg_query::parse(&statement).ok();
        let tables = parsed
            .as_ref()
            .map(|p| p.tables().into_iter().map(normalize_table).collect())
            .unwrap_or_default();
        Query {
            statement,
            fingerprint,
            parsed,
            tables,
            total_time_ms: None,
            calls: None,
            missing_tables: false,
            plans: Vec::new(),
            suggest_index: false,
            new_cost: None,
            indexes: Vec::new(),
            pass1_indexes: None,
            pass2_indexes: None,
        }
    }

    /// Query from the statistics view, carrying accumulated time and calls.
    pub fn with_stats(statement: impl Into<String>, total_time_ms: f64, calls: i64) -> Query {
        let mut query = Query::new(statement);
        query.total_time_ms = Some(total_time_ms);
        query.calls = Some(calls);
        query
    }

    pub fn parsed(&self) -> Option<&pg_query::ParseResult> {
        self.parsed.as_ref()
    }

    pub fn parse_failed(&self) -> bool {
        self.parsed.is_none()
    }

    /// Tables the statement references, `public.` prefix stripped so they
    /// compare against catalog table names.
    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    /// The database accepted this query's EXPLAIN during the current batch.
    pub fn explainable(&self) -> bool {
        !self.plans.is_empty()
    }

    /// Root planner cost captured at the given pass, if that pass ran.
    pub fn cost(&self, pass: usize) -> Option<f64> {
        self.plans.get(pass).and_then(plan_total_cost)
    }

    pub fn initial_cost(&self) -> Option<f64> {
        self.cost(0)
    }

    pub fn high_cost(&self) -> bool {
        self.initial_cost()
            .map_or(false, |cost| cost >= HIGH_COST_THRESHOLD)
    }
}

/// Total cost at the root of an EXPLAIN (FORMAT JSON) document.
pub fn plan_total_cost(plan: &Value) -> Option<f64> {
    plan.get(0)?.get("Plan")?.get("Total Cost")?.as_f64()
}

fn normalize_table(table: String) -> String {
    match table.strip_prefix("public.") {
        Some(bare) => bare.to_string(),
        None => table,
    }
}
