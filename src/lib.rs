//! # pg_autoindex
//!
//! Automatic B-tree index advisor for PostgreSQL. Given an observed SQL
//! workload (a tailed slow-query log, `pg_stat_statements`, or literal
//! files), it proposes, and optionally creates, indexes that measurably
//! reduce planner cost.
//!
//! The pipeline runs three EXPLAIN passes per batch of fingerprint-unique
//! queries: a baseline pass, a pass with single-column hypothetical indexes,
//! and a pass with two-column hypothetical indexes, then keeps the
//! candidates that at least halve the planner cost of a query. Hypothetical
//! indexes are materialized through the HypoPG extension, so nothing is
//! built on disk unless index creation is explicitly enabled.
//!
//! ## Quick start
//!
//! ```bash
//! tail -F -n +1 postgresql.log | pg-autoindex -d mydb
//! pg-autoindex -d mydb --pg-stat-statements --interval 60
//! pg-autoindex -d mydb -s "SELECT * FROM ratings WHERE user_id = 1" --create
//! ```

pub mod advisor;
pub mod applier;
pub mod catalog;
pub mod error;
pub mod evaluator;
pub mod gateway;
pub mod hypo;
pub mod options;
pub mod query;
pub mod reporter;
pub mod source;
pub mod tree;

pub use error::{Error, Result};
pub use options::{DbTarget, LogLevel, Options};
pub use query::{CandidateIndex, Query, Suggestion};
