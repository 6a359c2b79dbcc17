use crate::hash_table::HashTableGenerator;
use crate::instrumentation_profile::summary::*;
use crate::instrumentation_profile::types::*;
use crate::instrumentation_profile::*;
use std::io;
use tracing::debug;

/// Magic number at the start of an indexed profile: `\xfflprofi\x81` read as a little endian u64
pub const INDEXED_MAGIC: u64 = 0x8169_666f_7270_6cff;
/// Version 7 is the last version with the five field header. Later versions only add offsets for
/// sections that aren't written here and records keep this layout until bitmap bytes were added.
pub const INDEXED_VERSION: u64 = 7;
/// `IndexedInstrProf::HashT::MD5`
const HASH_TYPE_MD5: u64 = 0;
/// `TotalNumFunctions, TotalNumBlocks, MaxFunctionCount, MaxBlockCount, MaxInternalBlockCount,
/// TotalBlockCount`
const NUM_SUMMARY_FIELDS: u64 = 6;
/// Offset of the `HashOffset` field in the header
const HASH_OFFSET_FIELD: usize = 32;

/// The `IndexedProfWriter` writes out the file as an Indexed Instrumentation file. This is the
/// format `llvm-profdata merge` produces and what `llvm-cov` expects for `-instr-profile`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexedProfWriter;

impl IndexedProfWriter {
    pub fn new() -> Self {
        Default::default()
    }

    /// Serialises the whole profile to a buffer. The summary can only be computed after the
    /// records have been visited so space is reserved for it and it gets patched in at the end
    /// along with the hash table offset.
    pub fn to_bytes(&self, profile: &InstrumentationProfile) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&INDEXED_MAGIC.to_le_bytes());
        // No variant flags, front-end instrumentation
        out.extend_from_slice(&INDEXED_VERSION.to_le_bytes());
        // Unused since version 4
        out.extend_from_slice(&0u64.to_le_bytes());
        out.extend_from_slice(&HASH_TYPE_MD5.to_le_bytes());
        debug_assert_eq!(out.len(), HASH_OFFSET_FIELD);
        out.extend_from_slice(&0u64.to_le_bytes());

        let summary_offset = out.len();
        let summary_len = 8 * (2 + NUM_SUMMARY_FIELDS as usize + 3 * DEFAULT_CUTOFFS.len());
        out.resize(out.len() + summary_len, 0);

        let mut generator = HashTableGenerator::new();
        for (name, records) in profile.functions.iter() {
            generator.insert(name, records);
        }
        let mut summary = ProfileSummary::new();
        let table_offset = generator.emit(&mut out, |record| summary.add_record(record));
        debug!(
            "Hash table for {} names starts at {:#x}",
            generator.len(),
            table_offset
        );

        out[HASH_OFFSET_FIELD..HASH_OFFSET_FIELD + 8].copy_from_slice(&table_offset.to_le_bytes());
        let summary_bytes = summary_to_bytes(&summary);
        debug_assert_eq!(summary_bytes.len(), summary_len);
        out[summary_offset..summary_offset + summary_len].copy_from_slice(&summary_bytes);
        out
    }
}

fn summary_to_bytes(summary: &ProfileSummary) -> Vec<u8> {
    let detailed = summary.detailed_summary(&DEFAULT_CUTOFFS);
    let fields = [
        summary.num_functions() as u64,
        summary.num_counts() as u64,
        summary.max_function_count(),
        summary.max_count(),
        summary.max_internal_block_count(),
        summary.total_count(),
    ];
    let mut out = Vec::new();
    out.extend_from_slice(&NUM_SUMMARY_FIELDS.to_le_bytes());
    out.extend_from_slice(&(detailed.len() as u64).to_le_bytes());
    for field in &fields {
        out.extend_from_slice(&field.to_le_bytes());
    }
    for entry in &detailed {
        out.extend_from_slice(&(entry.cutoff as u64).to_le_bytes());
        out.extend_from_slice(&entry.min_count.to_le_bytes());
        out.extend_from_slice(&entry.num_counts.to_le_bytes());
    }
    out
}

impl InstrProfWriter for IndexedProfWriter {
    fn write(&self, profile: &InstrumentationProfile, writer: &mut impl Write) -> io::Result<()> {
        writer.write_all(&self.to_bytes(profile))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn le_u64(bytes: &[u8], offset: usize) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes[offset..offset + 8]);
        u64::from_le_bytes(buf)
    }

    /// Reads every record back by walking the buckets listed in the hash table
    fn read_records(bytes: &[u8]) -> BTreeMap<(String, u64), Vec<u64>> {
        let table = le_u64(bytes, HASH_OFFSET_FIELD) as usize;
        let num_buckets = le_u64(bytes, table) as usize;
        let mut result = BTreeMap::new();
        for bucket in 0..num_buckets {
            let mut offset = le_u64(bytes, table + 16 + bucket * 8) as usize;
            if offset == 0 {
                continue;
            }
            let items = u16::from_le_bytes([bytes[offset], bytes[offset + 1]]);
            offset += 2;
            for _ in 0..items {
                let key_hash = le_u64(bytes, offset);
                let key_len = le_u64(bytes, offset + 8) as usize;
                let data_len = le_u64(bytes, offset + 16) as usize;
                offset += 24;
                let name = String::from_utf8(bytes[offset..offset + key_len].to_vec()).unwrap();
                assert_eq!(key_hash, compute_hash(&name));
                assert_eq!(key_hash as usize & (num_buckets - 1), bucket);
                offset += key_len;
                let end = offset + data_len;
                while offset < end {
                    let hash = le_u64(bytes, offset);
                    let len = le_u64(bytes, offset + 8) as usize;
                    offset += 16;
                    let counts = (0..len).map(|i| le_u64(bytes, offset + i * 8)).collect();
                    offset += len * 8 + 8;
                    result.insert((name.clone(), hash), counts);
                }
                assert_eq!(offset, end);
            }
        }
        result
    }

    fn profile(records: &[(&str, u64, &[u64])]) -> InstrumentationProfile {
        let mut profile = InstrumentationProfile::default();
        for (name, hash, counts) in records {
            profile
                .functions
                .entry(name.to_string())
                .or_default()
                .insert(*hash, InstrProfRecord {
                    counts: counts.to_vec(),
                });
        }
        profile
    }

    #[test]
    fn header_layout() {
        let bytes = IndexedProfWriter::new().to_bytes(&profile(&[("main", 0x1234, &[100])]));
        assert_eq!(&bytes[..8], &[0xff, 0x6c, 0x70, 0x72, 0x6f, 0x66, 0x69, 0x81]);
        assert_eq!(le_u64(&bytes, 8), INDEXED_VERSION);
        assert_eq!(le_u64(&bytes, 16), 0);
        assert_eq!(le_u64(&bytes, 24), HASH_TYPE_MD5);
        let table = le_u64(&bytes, HASH_OFFSET_FIELD) as usize;
        assert_eq!(table % 8, 0);
        assert!(table < bytes.len());
    }

    #[test]
    fn summary_is_patched() {
        let bytes = IndexedProfWriter::new().to_bytes(&profile(&[
            ("main", 1, &[100, 50, 33]),
            ("foo", 2, &[100, 250]),
        ]));
        let summary = 40;
        assert_eq!(le_u64(&bytes, summary), NUM_SUMMARY_FIELDS);
        assert_eq!(le_u64(&bytes, summary + 8), DEFAULT_CUTOFFS.len() as u64);
        // functions, counters, max function count, max count, max internal count, total
        let fields = (0..6)
            .map(|i| le_u64(&bytes, summary + 16 + i * 8))
            .collect::<Vec<_>>();
        assert_eq!(fields, vec![2, 5, 100, 250, 250, 533]);
        // first cutoff is 1% which is covered by the hottest counter
        let first_entry = summary + 16 + 6 * 8;
        assert_eq!(le_u64(&bytes, first_entry), 10000);
        assert_eq!(le_u64(&bytes, first_entry + 8), 250);
        assert_eq!(le_u64(&bytes, first_entry + 16), 1);
    }

    #[test]
    fn records_round_trip() {
        let input = profile(&[
            ("main", 0xdead, &[100, 50, 33]),
            ("main", 0xbeef, &[100]),
            ("helper.c;static_fn", 7, &[100, 0, 12]),
            ("a", 1, &[1]),
            ("b", 2, &[2]),
        ]);
        let bytes = IndexedProfWriter::new().to_bytes(&input);
        let records = read_records(&bytes);
        let expected = input
            .records()
            .map(|(name, hash, record)| ((name.to_string(), hash), record.counts.clone()))
            .collect::<BTreeMap<_, _>>();
        assert_eq!(records, expected);
        assert_eq!(le_u64(&bytes, le_u64(&bytes, HASH_OFFSET_FIELD) as usize + 8), 4);
    }

    #[test]
    fn output_is_deterministic() {
        let input = profile(&[("x", 1, &[3, 2, 1]), ("y", 2, &[9]), ("z", 3, &[4, 4])]);
        let writer = IndexedProfWriter::new();
        assert_eq!(writer.to_bytes(&input), writer.to_bytes(&input.clone()));
    }
}
