//! Static profiles for llvm's coverage and PGO tooling. Relative block frequencies from a static
//! analysis are converted into the counter values an instrumented run would have produced and
//! written out as an llvm instrumentation profile, so `llvm-cov` and friends can show likely
//! hot and cold code without ever running the program.
mod hash_table;
pub mod assembler;
pub mod coverage;
pub mod export;
pub mod identity;
pub mod instrumentation_profile;
pub mod synthesis;
pub mod unit;

pub use crate::export::{ExportDriver, ExportError, ExportOutcome, ExportStats};
pub use crate::unit::{parse, parse_bytes};

/// Output format for generated profiles
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum ProfileFormat {
    /// llvm's indexed profile, what `llvm-profdata merge` produces by default
    Indexed,
    /// llvm's text profile format
    Text,
}

impl Default for ProfileFormat {
    fn default() -> Self {
        Self::Indexed
    }
}
