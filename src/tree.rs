//! Generic walks over the two heterogeneous trees the advisor reads: the
//! SQL parse tree (column mining) and the EXPLAIN plan document (index
//! recovery). Neither walk models node types beyond the one it looks for.

use pg_query::{NodeEnum, NodeRef};
use serde_json::Value;

/// Collects every value stored under `key` anywhere in a JSON document,
/// walking objects and arrays recursively.
pub fn find_by_key<'a>(node: &'a Value, key: &str) -> Vec<&'a Value> {
    let mut found = Vec::new();
    collect_by_key(node, key, &mut found);
    found
}

fn collect_by_key<'a>(node: &'a Value, key: &str, found: &mut Vec<&'a Value>) {
    match node {
        Value::Object(map) => {
            for (k, v) in map {
                if k == key {
                    found.push(v);
                }
                collect_by_key(v, key, found);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_by_key(item, key, found);
            }
        }
        _ => {}
    }
}

/// String values stored under `key`. Used on plans to learn which indexes
/// the planner chose (`"Index Name"` nodes).
pub fn strings_by_key(node: &Value, key: &str) -> Vec<String> {
    find_by_key(node, key)
        .into_iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect()
}

/// Column names referenced anywhere in a parse tree. Each `ColumnRef`
/// contributes the last segment of its dotted path (`a.b.c` yields `c`);
/// star expansions carry no string and are skipped.
pub fn column_names(parsed: &pg_query::ParseResult) -> Vec<String> {
    let mut names = Vec::new();
    for entry in parsed.protobuf.nodes() {
        if let NodeRef::ColumnRef(column_ref) = entry.0 {
            if let Some(NodeEnum::String(segment)) =
                column_ref.fields.last().and_then(|f| f.node.as_ref())
            {
                names.push(segment.sval.clone());
            }
        }
    }
    names
}
