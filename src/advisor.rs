//! Batch cycle orchestration: pull a batch from the source, evaluate it,
//! report, and optionally create the accepted indexes.

use crate::applier::IndexApplier;
use crate::error::Result;
use crate::evaluator::Evaluator;
use crate::gateway::SqlGateway;
use crate::options::Options;
use crate::reporter::Reporter;
use crate::source::QuerySource;

pub struct Advisor<'g> {
    gateway: &'g SqlGateway,
    options: &'g Options,
    reporter: Reporter,
}

impl<'g> Advisor<'g> {
    pub fn new(gateway: &'g SqlGateway, options: &'g Options) -> Advisor<'g> {
        Advisor {
            gateway,
            options,
            reporter: Reporter::new(options.log_level),
        }
    }

    /// Drains the source, one batch at a time. Streaming sources pace
    /// themselves; each batch runs end-to-end before the next begins.
    pub fn run(&self, source: &mut dyn QuerySource) -> Result<()> {
        while let Some(mut batch) = source.next_batch()? {
            let evaluator = Evaluator::new(self.gateway, self.options, &self.reporter);
            let suggestions = evaluator.evaluate(&mut batch)?;
            self.reporter.batch(&batch, &suggestions);
            if self.options.create {
                IndexApplier::new(self.gateway).apply(&suggestions)?;
            }
        }
        Ok(())
    }
}
