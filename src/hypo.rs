//! Session-scoped hypothetical index management through HypoPG.
//!
//! Hypothetical indexes live in the database session, not in this process;
//! the engine's only in-memory state is the reverse mapping from the opaque
//! names HypoPG assigns back to the ordered column sets that produced them.
//! The mapping is valid for one batch and is discarded on the next reset.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::gateway::{quote_identifier, SqlGateway};
use crate::query::CandidateIndex;

pub struct HypoEngine<'g> {
    gateway: &'g SqlGateway,
    by_name: HashMap<String, CandidateIndex>,
}

impl<'g> HypoEngine<'g> {
    pub fn new(gateway: &'g SqlGateway) -> HypoEngine<'g> {
        HypoEngine {
            gateway,
            by_name: HashMap::new(),
        }
    }

    /// Drops every hypothetical index in the session and forgets the name
    /// mapping from the previous batch. Must run at the start of every
    /// batch; there is no implicit carryover.
    pub fn reset(&mut self) -> Result<()> {
        self.gateway.exec("SELECT hypopg_reset()", &[])?;
        self.by_name.clear();
        Ok(())
    }

    /// Creates a hypothetical index and records the name the database
    /// assigned to it.
    pub fn create(&mut self, index: CandidateIndex) -> Result<String> {
        let columns = index
            .columns
            .iter()
            .map(|column| quote_identifier(column))
            .collect::<Vec<_>>()
            .join(", ");
        let ddl = format!(
            "CREATE INDEX ON {} ({})",
            quote_identifier(&index.table),
            columns
        );
        let rows = self
            .gateway
            .exec("SELECT indexname FROM hypopg_create_index($1)", &[&ddl])?;
        let row = rows.first().ok_or_else(|| {
            Error::UnexpectedResponse("hypopg_create_index returned no rows".to_string())
        })?;
        let name: String = row.try_get(0)?;
        self.by_name.insert(name.clone(), index);
        Ok(name)
    }

    /// Reverse mapping for the current batch: assigned name to column set.
    pub fn mapping(&self) -> &HashMap<String, CandidateIndex> {
        &self.by_name
    }
}
