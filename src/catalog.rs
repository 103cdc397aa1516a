//! Schema and statistics lookups against the system catalogs.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::gateway::{quote_identifier, unquote_identifier, SqlGateway};

/// One column of a user table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub table: String,
    pub column: String,
    pub data_type: String,
}

/// An existing valid, non-expression, non-partial B-tree index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExistingIndex {
    pub schema: String,
    pub table: String,
    pub name: String,
    pub columns: Vec<String>,
    pub access_method: String,
}

const INDEXES_SQL: &str = "\
SELECT n.nspname AS schema_name,
       t.relname AS table_name,
       ix.relname AS index_name,
       pg_get_indexdef(i.indexrelid) AS index_def,
       am.amname AS access_method
FROM pg_index i
JOIN pg_class t ON t.oid = i.indrelid
JOIN pg_class ix ON ix.oid = i.indexrelid
JOIN pg_namespace n ON n.oid = t.relnamespace
JOIN pg_am am ON am.oid = ix.relam
WHERE t.relname = ANY($1::text[])
  AND n.nspname NOT IN ('pg_catalog', 'information_schema')
  AND i.indisvalid
  AND i.indexprs IS NULL
  AND i.indpred IS NULL
  AND am.amname = 'btree'
ORDER BY 1, 2, 3";

pub struct Catalog<'g> {
    gateway: &'g SqlGateway,
}

impl<'g> Catalog<'g> {
    pub fn new(gateway: &'g SqlGateway) -> Catalog<'g> {
        Catalog { gateway }
    }

    /// Base tables in the current database outside the system schemas.
    pub fn list_tables(&self) -> Result<Vec<String>> {
        let rows = self.gateway.exec(
            "SELECT tablename FROM pg_catalog.pg_tables \
             WHERE schemaname NOT IN ('pg_catalog', 'information_schema') \
             ORDER BY 1",
            &[],
        )?;
        rows.iter().map(|row| Ok(row.try_get(0)?)).collect()
    }

    /// Columns of the given tables, schema `public` only, in ordinal order.
    pub fn columns(&self, tables: &[String]) -> Result<Vec<ColumnInfo>> {
        let rows = self.gateway.exec(
            "SELECT table_name, column_name, data_type \
             FROM information_schema.columns \
             WHERE table_schema = 'public' AND table_name = ANY($1::text[]) \
             ORDER BY table_name, ordinal_position",
            &[&tables],
        )?;
        rows.iter()
            .map(|row| {
                Ok(ColumnInfo {
                    table: row.try_get(0)?,
                    column: row.try_get(1)?,
                    data_type: row.try_get(2)?,
                })
            })
            .collect()
    }

    /// Existing valid B-tree indexes on the given tables, reconstructed from
    /// the catalog. Expression and partial indexes are excluded at the
    /// source.
    pub fn indexes(&self, tables: &[String]) -> Result<Vec<ExistingIndex>> {
        let rows = self.gateway.exec(INDEXES_SQL, &[&tables])?;
        rows.iter()
            .map(|row| {
                let index_def: String = row.try_get(3)?;
                Ok(ExistingIndex {
                    schema: row.try_get(0)?,
                    table: row.try_get(1)?,
                    name: row.try_get(2)?,
                    columns: index_def_columns(&index_def),
                    access_method: row.try_get(4)?,
                })
            })
            .collect()
    }

    /// When each table was last analyzed, manually or by autovacuum.
    /// Tables missing from the statistics view are absent from the map.
    pub fn last_analyze_times(
        &self,
        tables: &[String],
    ) -> Result<HashMap<String, Option<DateTime<Utc>>>> {
        let rows = self.gateway.exec(
            "SELECT relname, GREATEST(last_analyze, last_autoanalyze) \
             FROM pg_stat_user_tables \
             WHERE schemaname = 'public' AND relname = ANY($1::text[])",
            &[&tables],
        )?;
        let mut times = HashMap::new();
        for row in &rows {
            let table: String = row.try_get(0)?;
            let analyzed_at: Option<DateTime<Utc>> = row.try_get(1)?;
            times.insert(table, analyzed_at);
        }
        Ok(times)
    }

    pub fn analyze(&self, table: &str) -> Result<()> {
        self.gateway
            .exec(&format!("ANALYZE {}", quote_identifier(table)), &[])?;
        Ok(())
    }
}

/// Pulls the ordered key columns out of a `pg_get_indexdef` rendering:
/// everything between the first `(` and the last `)`, split on `, `, with
/// quoted identifiers unwrapped.
pub fn index_def_columns(index_def: &str) -> Vec<String> {
    let Some(open) = index_def.find('(') else {
        return Vec::new();
    };
    let Some(close) = index_def.rfind(')') else {
        return Vec::new();
    };
    if close <= open {
        return Vec::new();
    }
    index_def[open + 1..close]
        .split(", ")
        .map(|column| unquote_identifier(column.trim()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_def_columns_single() {
        let def = "CREATE INDEX ratings_user_id_idx ON public.ratings USING btree (user_id)";
        assert_eq!(index_def_columns(def), vec!["user_id".to_string()]);
    }

    #[test]
    fn test_index_def_columns_ordered_pair() {
        let def = "CREATE UNIQUE INDEX ratings_pair ON public.ratings USING btree (user_id, movie_id)";
        assert_eq!(
            index_def_columns(def),
            vec!["user_id".to_string(), "movie_id".to_string()]
        );
    }

    #[test]
    fn test_index_def_columns_quoted_identifier() {
        let def = "CREATE INDEX odd ON public.t USING btree (\"user id\", \"quo\"\"ted\")";
        assert_eq!(
            index_def_columns(def),
            vec!["user id".to_string(), "quo\"ted".to_string()]
        );
    }

    #[test]
    fn test_index_def_columns_malformed() {
        assert!(index_def_columns("CREATE INDEX broken ON t").is_empty());
    }
}
