//! Works out the name and hash a function's profile record is stored under.
//!
//! llvm-cov only matches a record to a function when the hash agrees with the structural hash in
//! the coverage mapping, so when an instrumented build has left that hash behind it's always
//! preferred. Otherwise the md5 of the function name is used which is enough for PGO style
//! consumers.
use crate::coverage::CoverageMetadata;
use crate::instrumentation_profile::types::compute_hash;
use crate::unit::{Function, ProgramUnit};
use std::fmt;
use tracing::debug;

/// Separator llvm uses between the file name and function name for local functions in IR level
/// PGO names (`kGlobalIdentifierDelimiter`)
const IR_PGO_SEPARATOR: char = ';';
/// Separator used in the older PGO names, these are still what the instrumentation data is keyed
/// by
const LEGACY_PGO_SEPARATOR: char = ':';

/// Where the hash in a `FunctionIdentity` came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FunctionHash {
    /// Hash of the function structure recorded in the coverage metadata
    Structural(u64),
    /// Hash of the function name
    Fallback(u64),
}

impl FunctionHash {
    pub fn value(&self) -> u64 {
        match self {
            Self::Structural(h) | Self::Fallback(h) => *h,
        }
    }

    pub fn is_structural(&self) -> bool {
        matches!(self, Self::Structural(_))
    }
}

impl fmt::Display for FunctionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Structural(h) => write!(f, "{:#018x} (structural)", h),
            Self::Fallback(h) => write!(f, "{:#018x} (name)", h),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionIdentity {
    /// Name of the profile record
    pub name: String,
    pub hash: FunctionHash,
}

fn qualified_name(unit: &ProgramUnit, function: &Function, separator: char) -> String {
    match unit.source_file.as_deref() {
        Some(file) if function.linkage.is_local() && !file.is_empty() => {
            format!("{}{}{}", file, separator, function.name)
        }
        _ => function.name.clone(),
    }
}

/// The name used for the profile record, llvm's `getIRPGOFuncName`
pub fn pgo_name(unit: &ProgramUnit, function: &Function) -> String {
    qualified_name(unit, function, IR_PGO_SEPARATOR)
}

/// The name instrumentation data and coverage records are keyed by, llvm's `getPGOFuncName`. For
/// functions with external linkage this is the same as `pgo_name`.
pub fn legacy_pgo_name(unit: &ProgramUnit, function: &Function) -> String {
    qualified_name(unit, function, LEGACY_PGO_SEPARATOR)
}

/// Hash of the function's name, used when there's no structural hash available
pub fn name_hash(unit: &ProgramUnit, function: &Function) -> u64 {
    compute_hash(legacy_pgo_name(unit, function))
}

pub fn resolve(
    unit: &ProgramUnit,
    function: &Function,
    metadata: &dyn CoverageMetadata,
) -> FunctionIdentity {
    let name = pgo_name(unit, function);
    let hash = match metadata.structural_hash(unit, function) {
        Some(hash) => FunctionHash::Structural(hash),
        None => FunctionHash::Fallback(name_hash(unit, function)),
    };
    debug!("Using hash {} for {}", hash, name);
    FunctionIdentity { name, hash }
}
