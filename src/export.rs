//! Drives the export of one program unit: every function with a body gets an identity and a set of
//! counts which are added to the sink, then the sink is written out once at the end.
use crate::assembler::{assemble, submit};
use crate::coverage::CoverageMetadata;
use crate::identity::resolve;
use crate::instrumentation_profile::{ProfileSink, SinkError};
use crate::synthesis::{CounterLayoutHint, CounterLayoutStrategy};
use crate::unit::ProgramUnit;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Tally of what happened to the functions in a run. Declarations count as neither.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ExportStats {
    pub processed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    /// No destination was given so nothing was done
    NoOutput,
    /// No function produced a record so no profile was written
    NothingProcessed(ExportStats),
    Written { path: PathBuf, stats: ExportStats },
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write profile with {} records: {source}", .stats.processed)]
    Write {
        #[source]
        source: SinkError,
        stats: ExportStats,
    },
}

pub struct ExportDriver<'a> {
    strategy: &'a dyn CounterLayoutStrategy,
    metadata: &'a dyn CoverageMetadata,
}

impl<'a> ExportDriver<'a> {
    pub fn new(strategy: &'a dyn CounterLayoutStrategy, metadata: &'a dyn CoverageMetadata) -> Self {
        Self { strategy, metadata }
    }

    pub fn run(
        &self,
        unit: &ProgramUnit,
        output: Option<&Path>,
        sink: &mut dyn ProfileSink,
    ) -> Result<ExportOutcome, ExportError> {
        let output = match output {
            Some(path) if !path.as_os_str().is_empty() => path,
            _ => {
                warn!("No output file given, skipping profile generation");
                return Ok(ExportOutcome::NoOutput);
            }
        };

        let mut stats = ExportStats::default();
        for function in unit.functions() {
            let model = match function.body.as_ref() {
                Some(model) => model,
                None => continue,
            };
            let identity = resolve(unit, function, self.metadata);
            let hint = self
                .metadata
                .counter_count(unit, function)
                .map(CounterLayoutHint::new);
            let counts = match self.strategy.synthesize(model, hint) {
                Ok(counts) => counts,
                Err(reason) => {
                    debug!("Skipping {}: {}", function.name, reason);
                    stats.skipped += 1;
                    continue;
                }
            };
            debug!("{} counts: {:?}", identity.name, counts);
            match submit(sink, assemble(identity, counts), &function.name) {
                Ok(()) => stats.processed += 1,
                Err(_) => stats.skipped += 1,
            }
        }

        if stats.processed == 0 {
            warn!(
                "No functions processed ({} skipped), no profile written",
                stats.skipped
            );
            return Ok(ExportOutcome::NothingProcessed(stats));
        }

        sink.write(output)
            .map_err(|source| ExportError::Write { source, stats })?;
        info!(
            "Wrote profile for {} functions ({} skipped) to {}",
            stats.processed,
            stats.skipped,
            output.display()
        );
        Ok(ExportOutcome::Written {
            path: output.to_path_buf(),
            stats,
        })
    }
}
