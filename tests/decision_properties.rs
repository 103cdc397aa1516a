//! Property tests over the suggestion-set invariants.

use std::collections::{BTreeMap, HashMap, HashSet};

use proptest::prelude::*;
use serde_json::{json, Value};

use pg_autoindex::catalog::ExistingIndex;
use pg_autoindex::evaluator::{decide, dedup_suggestions, existing_prefixes, recovered_indexes};
use pg_autoindex::query::{CandidateIndex, Query};

fn candidate_strategy() -> impl Strategy<Value = CandidateIndex> {
    let table = prop_oneof![Just("ratings"), Just("movies"), Just("users")];
    let column = prop_oneof![Just("a"), Just("b"), Just("c"), Just("d")];
    (table, proptest::collection::vec(column, 1..=2)).prop_filter_map(
        "distinct columns",
        |(table, columns)| {
            let unique: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
            if unique.len() == 2 && unique[0] == unique[1] {
                return None;
            }
            Some(CandidateIndex::new(table, unique))
        },
    )
}

fn accepted_strategy() -> impl Strategy<Value = BTreeMap<CandidateIndex, Vec<String>>> {
    proptest::collection::vec(candidate_strategy(), 0..12).prop_map(|candidates| {
        let mut accepted = BTreeMap::new();
        for (i, candidate) in candidates.into_iter().enumerate() {
            accepted
                .entry(candidate)
                .or_insert_with(Vec::new)
                .push(format!("fp{}", i));
        }
        accepted
    })
}

proptest! {
    #[test]
    fn suggestions_are_free_of_duplicates(accepted in accepted_strategy()) {
        let suggestions = dedup_suggestions(accepted);
        let mut keys = HashSet::new();
        for suggestion in &suggestions {
            prop_assert!(keys.insert(suggestion.index.clone()));
        }
    }

    #[test]
    fn single_column_form_always_wins(accepted in accepted_strategy()) {
        let inputs: Vec<CandidateIndex> = accepted.keys().cloned().collect();
        let suggestions = dedup_suggestions(accepted);
        let kept: HashSet<CandidateIndex> =
            suggestions.iter().map(|s| s.index.clone()).collect();

        // Every input single survives, and no kept multi shares a leading
        // column with a kept single on the same table.
        for index in &inputs {
            if index.columns.len() == 1 {
                prop_assert!(kept.contains(index));
            }
        }
        for index in &kept {
            if index.columns.len() > 1 {
                let leading = CandidateIndex::single(
                    index.table.clone(),
                    index.columns[0].clone(),
                );
                prop_assert!(!kept.contains(&leading));
            }
        }
    }

    #[test]
    fn recovered_indexes_never_match_existing_prefixes(
        existing_columns in proptest::collection::vec(
            prop_oneof![Just("a"), Just("b"), Just("c")], 1..=3),
        candidate in candidate_strategy(),
    ) {
        let existing = vec![ExistingIndex {
            schema: "public".to_string(),
            table: candidate.table.clone(),
            name: "existing_idx".to_string(),
            columns: existing_columns.iter().map(|c| c.to_string()).collect(),
            access_method: "btree".to_string(),
        }];
        let covered = existing_prefixes(&existing);

        let mut hypos = HashMap::new();
        hypos.insert("<1>hypo".to_string(), candidate);
        let plan = json!([{
            "Plan": {"Node Type": "Index Scan", "Index Name": "<1>hypo", "Total Cost": 1.0}
        }]);

        for index in recovered_indexes(&plan, &hypos, &covered) {
            prop_assert!(!covered.contains(&index));
        }
    }

    #[test]
    fn accepted_suggestions_imply_the_savings_gates(
        cost0 in 100.0f64..50_000.0,
        cost1 in 1.0f64..50_000.0,
        cost2 in 1.0f64..50_000.0,
        pair in proptest::bool::ANY,
    ) {
        let mut query = Query::new("SELECT * FROM ratings WHERE user_id = 1 AND movie_id = 2");
        let index = if pair {
            CandidateIndex::new("ratings", vec!["user_id".to_string(), "movie_id".to_string()])
        } else {
            CandidateIndex::single("ratings", "user_id")
        };
        let mut hypos = HashMap::new();
        hypos.insert("<1>hypo".to_string(), index);

        let plan = |cost: f64, with_index: bool| -> Value {
            if with_index {
                json!([{"Plan": {"Node Type": "Index Scan", "Index Name": "<1>hypo", "Total Cost": cost}}])
            } else {
                json!([{"Plan": {"Node Type": "Seq Scan", "Total Cost": cost}}])
            }
        };
        query.plans.push(plan(cost0, false));
        query.plans.push(plan(cost1, true));
        query.plans.push(plan(cost2, true));

        let chosen = decide(&mut query, &hypos, &HashSet::new());
        if !chosen.is_empty() {
            let savings1 = cost1 < 0.5 * cost0;
            let savings2 = cost1 > 100.0 && cost2 < 0.5 * cost1;
            prop_assert!(savings1 || savings2);
        }
    }
}
