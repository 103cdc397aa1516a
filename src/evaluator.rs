//! Candidate evaluation: mine columns from high-cost queries, materialize
//! hypothetical indexes, re-plan, and keep the candidates that pay for
//! themselves.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{Duration, Utc};
use serde_json::Value;
use tracing::debug;

use crate::catalog::{Catalog, ColumnInfo, ExistingIndex};
use crate::error::Result;
use crate::gateway::SqlGateway;
use crate::hypo::HypoEngine;
use crate::options::Options;
use crate::query::{CandidateIndex, Query, Suggestion};
use crate::reporter::Reporter;
use crate::tree;

/// A candidate must cut the previous pass cost at least in half.
const SAVINGS_RATIO: f64 = 0.5;
/// Queries already cheaper than this after the single-column pass do not
/// justify a second, wider index.
const RESIDUAL_COST_FLOOR: f64 = 100.0;
/// Table statistics older than this trigger ANALYZE before planning.
const ANALYZE_MAX_AGE_HOURS: i64 = 1;

pub struct Evaluator<'a> {
    catalog: Catalog<'a>,
    gateway: &'a SqlGateway,
    options: &'a Options,
    reporter: &'a Reporter,
}

impl<'a> Evaluator<'a> {
    pub fn new(gateway: &'a SqlGateway, options: &'a Options, reporter: &'a Reporter) -> Evaluator<'a> {
        Evaluator {
            catalog: Catalog::new(gateway),
            gateway,
            options,
            reporter,
        }
    }

    /// Runs the full three-pass evaluation over one fingerprint-unique batch
    /// and returns the accepted suggestions, sorted.
    pub fn evaluate(&self, queries: &mut [Query]) -> Result<Vec<Suggestion>> {
        let mut hypo = HypoEngine::new(self.gateway);
        hypo.reset()?;

        let known: HashSet<String> = self.catalog.list_tables()?.into_iter().collect();
        for query in queries.iter_mut() {
            query.missing_tables = query.tables().iter().any(|table| !known.contains(table));
        }
        let mut tables: HashSet<String> = queries
            .iter()
            .flat_map(|query| query.tables().iter().cloned())
            .filter(|table| known.contains(table))
            .collect();
        self.apply_table_filters(&mut tables);

        if !tables.is_empty() {
            self.refresh_statistics(&tables)?;
        }

        // Pass 0: baseline plans.
        for query in queries.iter_mut().filter(|q| !q.missing_tables) {
            self.explain_pass(query, 0);
        }

        // Only explainable high-cost queries justify hypothetical work.
        let mut tables: HashSet<String> = queries
            .iter()
            .filter(|q| q.explainable() && q.high_cost())
            .flat_map(|q| q.tables().iter().cloned())
            .collect();
        self.apply_table_filters(&mut tables);

        let columns = self.candidate_columns(queries, &tables)?;

        // Pass 1: one hypothetical index per eligible column.
        for column in &columns {
            hypo.create(CandidateIndex::single(&column.table, &column.column))?;
        }
        for query in queries.iter_mut().filter(|q| q.plans.len() == 1 && q.high_cost()) {
            self.explain_pass(query, 1);
        }

        // Pass 2: every ordered pair per table, on top of the singles.
        for (table, table_columns) in group_by_table(&columns) {
            for (first, second) in ordered_pairs(&table_columns) {
                hypo.create(CandidateIndex::new(
                    table,
                    vec![first.to_string(), second.to_string()],
                ))?;
            }
        }
        for query in queries.iter_mut().filter(|q| q.plans.len() == 2 && q.high_cost()) {
            self.explain_pass(query, 2);
        }

        let mut sorted_tables: Vec<String> = tables.into_iter().collect();
        sorted_tables.sort();
        let existing = self.catalog.indexes(&sorted_tables)?;
        let covered = existing_prefixes(&existing);

        let mut accepted: BTreeMap<CandidateIndex, Vec<String>> = BTreeMap::new();
        for query in queries.iter_mut().filter(|q| q.plans.len() == 3 && q.high_cost()) {
            for index in decide(query, hypo.mapping(), &covered) {
                accepted
                    .entry(index)
                    .or_default()
                    .push(query.fingerprint.clone());
            }
        }
        Ok(dedup_suggestions(accepted))
    }

    fn apply_table_filters(&self, tables: &mut HashSet<String>) {
        if let Some(include) = &self.options.include {
            tables.retain(|table| include.contains(table));
        }
        for excluded in &self.options.exclude {
            tables.remove(excluded);
        }
    }

    /// ANALYZE any table whose statistics are stale or missing, so the
    /// baseline costs reflect current data.
    fn refresh_statistics(&self, tables: &HashSet<String>) -> Result<()> {
        let mut sorted: Vec<String> = tables.iter().cloned().collect();
        sorted.sort();
        let analyzed = self.catalog.last_analyze_times(&sorted)?;
        let cutoff = Utc::now() - Duration::hours(ANALYZE_MAX_AGE_HOURS);
        for table in &sorted {
            let fresh = analyzed
                .get(table)
                .copied()
                .flatten()
                .map_or(false, |at| at > cutoff);
            if !fresh {
                debug!("analyzing {}", table);
                self.catalog.analyze(table)?;
            }
        }
        Ok(())
    }

    fn candidate_columns(
        &self,
        queries: &[Query],
        tables: &HashSet<String>,
    ) -> Result<Vec<ColumnInfo>> {
        if tables.is_empty() {
            return Ok(Vec::new());
        }
        let mut referenced: HashSet<String> = HashSet::new();
        for query in queries.iter().filter(|q| q.explainable() && q.high_cost()) {
            if let Some(parsed) = query.parsed() {
                let names = tree::column_names(parsed);
                self.reporter.column_mining(&query.fingerprint, &names);
                referenced.extend(names);
            }
        }
        let mut sorted: Vec<String> = tables.iter().cloned().collect();
        sorted.sort();
        let columns = self.catalog.columns(&sorted)?;
        Ok(eligible_columns(columns, &referenced))
    }

    /// EXPLAIN failures are per-query recoverable: the query keeps whatever
    /// costs it captured and sits out the rest of the batch.
    fn explain_pass(&self, query: &mut Query, pass: usize) {
        match self.gateway.explain(&query.statement) {
            Ok(plan) => query.plans.push(plan),
            Err(err) => {
                debug!(pass, "explain failed for {}: {}", query.fingerprint, err);
            }
        }
    }
}

/// Columns referenced by a high-cost query that can be B-tree key positions.
/// JSON-typed columns never qualify.
pub fn eligible_columns(columns: Vec<ColumnInfo>, referenced: &HashSet<String>) -> Vec<ColumnInfo> {
    columns
        .into_iter()
        .filter(|c| {
            referenced.contains(&c.column) && c.data_type != "json" && c.data_type != "jsonb"
        })
        .collect()
}

fn group_by_table(columns: &[ColumnInfo]) -> BTreeMap<&str, Vec<&str>> {
    let mut by_table: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for column in columns {
        by_table
            .entry(column.table.as_str())
            .or_default()
            .push(column.column.as_str());
    }
    by_table
}

/// Every size-two permutation of a table's eligible columns.
pub fn ordered_pairs<'c>(columns: &[&'c str]) -> Vec<(&'c str, &'c str)> {
    let mut pairs = Vec::new();
    for first in columns {
        for second in columns {
            if first != second {
                pairs.push((*first, *second));
            }
        }
    }
    pairs
}

/// First-column and first-two-column prefixes of existing B-tree indexes.
/// A candidate that lands on one of these is already served.
pub fn existing_prefixes(existing: &[ExistingIndex]) -> HashSet<CandidateIndex> {
    let mut covered = HashSet::new();
    for index in existing {
        for len in [1usize, 2] {
            if index.columns.len() >= len {
                covered.insert(CandidateIndex::new(
                    index.table.clone(),
                    index.columns[..len].to_vec(),
                ));
            }
        }
    }
    covered
}

/// Hypothetical indexes the planner chose in one plan, in document order,
/// deduplicated, minus those covered by an existing index prefix.
pub fn recovered_indexes(
    plan: &Value,
    hypos: &HashMap<String, CandidateIndex>,
    covered: &HashSet<CandidateIndex>,
) -> Vec<CandidateIndex> {
    let mut seen = HashSet::new();
    let mut recovered = Vec::new();
    for name in tree::strings_by_key(plan, "Index Name") {
        if let Some(index) = hypos.get(&name) {
            if covered.contains(index) {
                continue;
            }
            if seen.insert(index.clone()) {
                recovered.push(index.clone());
            }
        }
    }
    recovered
}

/// Applies the cost-savings policy to one fully planned query and returns
/// the index set it asks for (at most one entry).
///
/// The single-column pass must halve the baseline, or the multi-column pass
/// must halve a still-appreciable single-column residual. A plan touching
/// several hypothetical indexes at once is not evidence for any one of them,
/// so the wider pass falls back and a query never suggests more than one
/// index.
pub fn decide(
    query: &mut Query,
    hypos: &HashMap<String, CandidateIndex>,
    covered: &HashSet<CandidateIndex>,
) -> Vec<CandidateIndex> {
    let (Some(cost0), Some(cost1), Some(cost2)) = (query.cost(0), query.cost(1), query.cost(2))
    else {
        return Vec::new();
    };

    let savings1 = cost1 < cost0 * SAVINGS_RATIO;
    let mut savings2 = cost1 > RESIDUAL_COST_FLOOR && cost2 < cost1 * SAVINGS_RATIO;

    let pass1 = recovered_indexes(&query.plans[1], hypos, covered);
    let pass2 = recovered_indexes(&query.plans[2], hypos, covered);
    query.pass1_indexes = Some(pass1.clone());
    query.pass2_indexes = Some(pass2.clone());

    let mut chosen = if savings2 { pass2 } else { pass1.clone() };
    if savings2 && chosen.len() > 1 {
        chosen = pass1;
        savings2 = false;
    }

    query.suggest_index = (savings1 || savings2) && chosen.len() == 1;
    if !query.suggest_index {
        return Vec::new();
    }
    query.new_cost = Some(if savings2 { cost2 } else { cost1 });
    query.indexes = chosen.clone();
    chosen
}

/// Final coverage dedup: a single-column suggestion subsumes any
/// multi-column suggestion sharing its leading column.
pub fn dedup_suggestions(accepted: BTreeMap<CandidateIndex, Vec<String>>) -> Vec<Suggestion> {
    let singles: HashSet<CandidateIndex> = accepted
        .keys()
        .filter(|index| index.columns.len() == 1)
        .cloned()
        .collect();
    accepted
        .into_iter()
        .filter(|(index, _)| {
            index.columns.len() == 1
                || !singles.contains(&CandidateIndex::single(
                    index.table.clone(),
                    index.columns[0].clone(),
                ))
        })
        .map(|(index, queries)| Suggestion { index, queries })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(table: &str, name: &str, data_type: &str) -> ColumnInfo {
        ColumnInfo {
            table: table.to_string(),
            column: name.to_string(),
            data_type: data_type.to_string(),
        }
    }

    #[test]
    fn test_json_columns_are_never_candidates() {
        let referenced: HashSet<String> = ["user_id", "meta", "payload"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let columns = vec![
            column("ratings", "user_id", "integer"),
            column("ratings", "meta", "jsonb"),
            column("events", "payload", "json"),
        ];
        let eligible = eligible_columns(columns, &referenced);
        assert_eq!(eligible, vec![column("ratings", "user_id", "integer")]);
    }

    #[test]
    fn test_unreferenced_columns_are_dropped() {
        let referenced: HashSet<String> = ["user_id".to_string()].into_iter().collect();
        let columns = vec![
            column("ratings", "user_id", "integer"),
            column("ratings", "rating", "integer"),
        ];
        let eligible = eligible_columns(columns, &referenced);
        assert_eq!(eligible.len(), 1);
    }

    #[test]
    fn test_ordered_pairs_are_permutations() {
        let pairs = ordered_pairs(&["a", "b", "c"]);
        assert_eq!(pairs.len(), 6);
        assert!(pairs.contains(&("a", "b")));
        assert!(pairs.contains(&("b", "a")));
        assert!(!pairs.contains(&("a", "a")));
    }

    #[test]
    fn test_existing_prefixes_cover_one_and_two_columns() {
        let existing = vec![ExistingIndex {
            schema: "public".to_string(),
            table: "ratings".to_string(),
            name: "ratings_pair".to_string(),
            columns: vec![
                "user_id".to_string(),
                "movie_id".to_string(),
                "rating".to_string(),
            ],
            access_method: "btree".to_string(),
        }];
        let covered = existing_prefixes(&existing);
        assert!(covered.contains(&CandidateIndex::single("ratings", "user_id")));
        assert!(covered.contains(&CandidateIndex::new(
            "ratings",
            vec!["user_id".to_string(), "movie_id".to_string()]
        )));
        assert!(!covered.contains(&CandidateIndex::single("ratings", "movie_id")));
    }

    #[test]
    fn test_dedup_single_column_wins() {
        let single = CandidateIndex::single("ratings", "user_id");
        let pair = CandidateIndex::new(
            "ratings",
            vec!["user_id".to_string(), "movie_id".to_string()],
        );
        let mut accepted = BTreeMap::new();
        accepted.insert(single.clone(), vec!["fp1".to_string()]);
        accepted.insert(pair, vec!["fp2".to_string()]);
        let suggestions = dedup_suggestions(accepted);
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].index, single);
    }

    #[test]
    fn test_dedup_keeps_unrelated_pair() {
        let single = CandidateIndex::single("ratings", "user_id");
        let pair = CandidateIndex::new(
            "ratings",
            vec!["movie_id".to_string(), "user_id".to_string()],
        );
        let mut accepted = BTreeMap::new();
        accepted.insert(single, vec!["fp1".to_string()]);
        accepted.insert(pair.clone(), vec!["fp2".to_string()]);
        let suggestions = dedup_suggestions(accepted);
        assert_eq!(suggestions.len(), 2);
        assert!(suggestions.iter().any(|s| s.index == pair));
    }
}
