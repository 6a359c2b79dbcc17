use indexmap::IndexMap;
use std::convert::TryInto;

/// ~VARIANT_MASKS_ALL & Header.version is the version number
pub(crate) const VARIANT_MASKS_ALL: u64 = 0xff00_0000_0000_0000;

/// Computes the hash LLVM uses for function names in profiles and coverage records. This is the
/// first 8 bytes of the md5 digest read as a little endian integer (`IndexedInstrProf::ComputeHash`)
pub fn compute_hash(data: impl AsRef<[u8]>) -> u64 {
    let hash = md5::compute(data).0[..8].try_into().unwrap_or_default();
    u64::from_le_bytes(hash)
}

/// A collection of function records keyed by name. Functions which share a name but have
/// different hashes are kept as separate records under the same name like in llvm. Insertion order
/// is kept so output is reproducible. Only front-end instrumentation profiles are produced, coverage
/// mapping doesn't exist for IR level instrumentation.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct InstrumentationProfile {
    pub(crate) functions: IndexMap<String, IndexMap<u64, InstrProfRecord>>,
}

impl InstrumentationProfile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of (name, hash) records
    pub fn len(&self) -> usize {
        self.functions.values().map(|x| x.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_record(&self, name: &str, hash: u64) -> Option<&InstrProfRecord> {
        self.functions.get(name).and_then(|x| x.get(&hash))
    }

    pub fn records(&self) -> impl Iterator<Item = (&str, u64, &InstrProfRecord)> {
        self.functions.iter().flat_map(|(name, records)| {
            records
                .iter()
                .map(move |(hash, record)| (name.as_str(), *hash, record))
        })
    }
}

/// The profile record for a single function: the name used to look it up, the hash used to check
/// it matches the code it describes and the counter values.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct NamedInstrProfRecord {
    pub name: String,
    pub hash: u64,
    pub record: InstrProfRecord,
}

impl NamedInstrProfRecord {
    pub fn new(name: impl Into<String>, hash: u64, counts: Vec<u64>) -> Self {
        Self {
            name: name.into(),
            hash,
            record: InstrProfRecord { counts },
        }
    }

    pub fn counts(&self) -> &[u64] {
        &self.record.counts
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct InstrProfRecord {
    pub counts: Vec<u64>,
}

impl InstrProfRecord {
    /// Returns the counts multiplied by `weight` or `None` if any of them overflow
    pub fn scaled(&self, weight: u64) -> Option<Self> {
        let counts = self
            .counts
            .iter()
            .map(|x| x.checked_mul(weight))
            .collect::<Option<Vec<u64>>>()?;
        Some(Self { counts })
    }

    /// Returns the element-wise sum of both records or `None` if any counter overflows. Records
    /// with a different number of counters can't be merged and should be checked by the caller.
    pub fn merged(&self, other: &Self) -> Option<Self> {
        debug_assert_eq!(self.counts.len(), other.counts.len());
        let counts = self
            .counts
            .iter()
            .zip(other.counts.iter())
            .map(|(own, other)| own.checked_add(*other))
            .collect::<Option<Vec<u64>>>()?;
        Some(Self { counts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_hash() {
        // md5("foo") = acbd18db4cc2f85cedef654fccc4a4d8
        assert_eq!(compute_hash("foo"), 0x5cf8_c24c_db18_bdac);
        assert_ne!(compute_hash("foo"), compute_hash("bar"));
        assert_eq!(compute_hash("main"), compute_hash(String::from("main")));
    }

    #[test]
    fn merge_overflow() {
        let a = InstrProfRecord {
            counts: vec![u64::MAX, 1],
        };
        let b = InstrProfRecord { counts: vec![1, 1] };
        assert_eq!(a.merged(&b), None);
        assert_eq!(
            b.merged(&b),
            Some(InstrProfRecord { counts: vec![2, 2] })
        );
        assert_eq!(a.scaled(2), None);
        assert_eq!(b.scaled(3), Some(InstrProfRecord { counts: vec![3, 3] }));
    }
}
