//! Advisory-locked, idempotent creation of accepted indexes.

use std::collections::{BTreeSet, HashSet};
use std::thread;
use std::time::{Duration, Instant};

use postgres::error::SqlState;
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::gateway::{quote_identifier, SqlGateway};
use crate::query::Suggestion;

/// Cooperative lock slot shared by every advisor instance connected to the
/// same database. Only the holder may issue CREATE INDEX.
const ADVISORY_LOCK_ID: i64 = 123_456;
const LOCK_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct IndexApplier<'g> {
    gateway: &'g SqlGateway,
}

impl<'g> IndexApplier<'g> {
    pub fn new(gateway: &'g SqlGateway) -> IndexApplier<'g> {
        IndexApplier { gateway }
    }

    /// Builds every suggested index that another process has not already
    /// built. Per-index lock timeouts are logged and skipped; any other
    /// failure aborts, releasing the advisory lock on the way out.
    pub fn apply(&self, suggestions: &[Suggestion]) -> Result<()> {
        if suggestions.is_empty() {
            return Ok(());
        }
        let _lock = AdvisoryLock::acquire(self.gateway)?;

        // Another instance may have won the race for some of these.
        let tables: Vec<String> = suggestions
            .iter()
            .map(|s| s.index.table.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let existing = Catalog::new(self.gateway).indexes(&tables)?;
        let present: HashSet<(&str, &[String])> = existing
            .iter()
            .map(|index| (index.table.as_str(), index.columns.as_slice()))
            .collect();

        for suggestion in suggestions {
            let index = &suggestion.index;
            if present.contains(&(index.table.as_str(), index.columns.as_slice())) {
                info!("index already exists: {}", index);
                continue;
            }
            let columns = index
                .columns
                .iter()
                .map(|column| quote_identifier(column))
                .collect::<Vec<_>>()
                .join(", ");
            let ddl = format!(
                "CREATE INDEX CONCURRENTLY ON {} ({})",
                quote_identifier(&index.table),
                columns
            );
            info!("creating index: {}", ddl);
            let started = Instant::now();
            match self.gateway.exec_simple(&ddl) {
                Ok(()) => info!(
                    "index created: {} ({:.1}s)",
                    index,
                    started.elapsed().as_secs_f64()
                ),
                Err(Error::Database(err))
                    if err.code() == Some(&SqlState::LOCK_NOT_AVAILABLE) =>
                {
                    warn!("could not acquire lock, skipping: {}", index);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

/// Scoped advisory lock. Release happens on every exit path, including
/// unwinds out of an individual create.
struct AdvisoryLock<'g> {
    gateway: &'g SqlGateway,
}

impl<'g> AdvisoryLock<'g> {
    fn acquire(gateway: &'g SqlGateway) -> Result<AdvisoryLock<'g>> {
        let mut waiting = false;
        loop {
            let rows = gateway.exec("SELECT pg_try_advisory_lock($1)", &[&ADVISORY_LOCK_ID])?;
            let acquired: bool = match rows.first() {
                Some(row) => row.try_get(0)?,
                None => false,
            };
            if acquired {
                return Ok(AdvisoryLock { gateway });
            }
            if !waiting {
                info!("Waiting for lock...");
                waiting = true;
            }
            thread::sleep(LOCK_POLL_INTERVAL);
        }
    }
}

impl Drop for AdvisoryLock<'_> {
    fn drop(&mut self) {
        // Release must not raise; notices are suppressed while unlocking.
        let _ = self
            .gateway
            .exec("SET client_min_messages = error", &[]);
        let _ = self
            .gateway
            .exec("SELECT pg_advisory_unlock($1)", &[&ADVISORY_LOCK_ID]);
        let _ = self
            .gateway
            .exec("SET client_min_messages = warning", &[]);
    }
}
