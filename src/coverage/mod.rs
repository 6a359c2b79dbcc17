use crate::unit::{Function, ProgramUnit};

pub mod coverage_mapping;

pub use coverage_mapping::ObjectMetadata;

/// Lookup of the instrumentation metadata an instrumented build records for a function. Missing
/// metadata is normal, uninstrumented code has none.
pub trait CoverageMetadata: Sync {
    /// The structural hash from the function's coverage mapping record
    fn structural_hash(&self, unit: &ProgramUnit, function: &Function) -> Option<u64>;
    /// How many counters the instrumentation allocated for the function
    fn counter_count(&self, unit: &ProgramUnit, function: &Function) -> Option<u32>;
}

/// Metadata attached to the functions in the unit description itself
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmbeddedMetadata;

impl CoverageMetadata for EmbeddedMetadata {
    fn structural_hash(&self, _unit: &ProgramUnit, function: &Function) -> Option<u64> {
        function.coverage.structural_hash
    }

    fn counter_count(&self, _unit: &ProgramUnit, function: &Function) -> Option<u32> {
        function.coverage.counters
    }
}

/// The function record header from the `__llvm_covfun` section. The mapping data following it
/// isn't needed to find hashes so isn't kept.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct FunctionRecordHeader {
    pub name_hash: u64,
    pub data_len: u32,
    pub fn_hash: u64,
    pub filenames_ref: u64,
}

/// The parts of a `__llvm_prf_data` record used here
#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ProfileData {
    pub name_md5: u64,
    pub structural_hash: u64,
    pub counters_len: u32,
}
