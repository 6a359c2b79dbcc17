use crate::instrumentation_profile::types::*;
use indexmap::IndexMap;

/// Size of the value profiling data written for a record with no value sites. This is just the
/// `ValueProfData` header of `total_size: u32` and `num_value_kinds: u32`.
const EMPTY_VALUE_PROF_DATA_LEN: u64 = 8;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct KeyDataLen {
    key_len: u64,
    data_len: u64,
}

struct Item<'a> {
    hash: u64,
    key: &'a str,
    data: &'a IndexMap<u64, InstrProfRecord>,
}

/// Writer side of llvm's `OnDiskChainedHashTable` specialised for the indexed profile format. Keys
/// are function names and the data for a key is every record with that name.
///
/// The layout emitted is:
///
/// 1. The payload: for every non-empty bucket a `u16` item count followed by the items. An item is
///    `key hash: u64, key len: u64, data len: u64, key bytes, data bytes`
/// 2. Zero padding to 8 byte alignment
/// 3. The table: `num buckets: u64, num entries: u64` then the absolute offset of each bucket (0 if
///    the bucket is empty)
pub(crate) struct HashTableGenerator<'a> {
    items: Vec<Item<'a>>,
}

impl<'a> HashTableGenerator<'a> {
    pub(crate) fn new() -> Self {
        Self { items: vec![] }
    }

    pub(crate) fn insert(&mut self, key: &'a str, data: &'a IndexMap<u64, InstrProfRecord>) {
        self.items.push(Item {
            hash: compute_hash(key),
            key,
            data,
        });
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    /// Aim for an occupancy ratio in [3/8, 3/4) with a single bucket for tiny tables, this matches
    /// what llvm does when it resizes before emitting.
    fn num_buckets(&self) -> u64 {
        let entries = self.items.len() as u64;
        if entries <= 2 {
            1
        } else {
            (entries * 4 / 3 + 1).next_power_of_two()
        }
    }

    /// Appends the table to `out` calling `on_record` for every record in the order they're
    /// written. Returns the offset of the bucket table which is what the profile header points to.
    /// `out` must already contain something (the profile header) as a bucket offset of 0 marks an
    /// empty bucket.
    pub(crate) fn emit(
        &self,
        out: &mut Vec<u8>,
        mut on_record: impl FnMut(&InstrProfRecord),
    ) -> u64 {
        debug_assert!(!out.is_empty());
        let num_buckets = self.num_buckets();
        let mut buckets: Vec<Vec<&Item<'a>>> = (0..num_buckets).map(|_| vec![]).collect();
        for item in &self.items {
            buckets[(item.hash & (num_buckets - 1)) as usize].push(item);
        }

        let mut offsets = vec![0u64; num_buckets as usize];
        for (bucket, offset) in buckets.iter().zip(offsets.iter_mut()) {
            if bucket.is_empty() {
                continue;
            }
            *offset = out.len() as u64;
            out.extend_from_slice(&(bucket.len() as u16).to_le_bytes());
            for item in bucket {
                let lens = key_data_len(item);
                out.extend_from_slice(&item.hash.to_le_bytes());
                out.extend_from_slice(&lens.key_len.to_le_bytes());
                out.extend_from_slice(&lens.data_len.to_le_bytes());
                out.extend_from_slice(item.key.as_bytes());
                for (hash, record) in item.data.iter() {
                    write_record(out, *hash, record);
                    on_record(record);
                }
            }
        }

        let padding = (8 - (out.len() % 8)) % 8;
        out.resize(out.len() + padding, 0);
        let table_offset = out.len() as u64;
        out.extend_from_slice(&num_buckets.to_le_bytes());
        out.extend_from_slice(&(self.items.len() as u64).to_le_bytes());
        for offset in &offsets {
            out.extend_from_slice(&offset.to_le_bytes());
        }
        table_offset
    }
}

fn key_data_len(item: &Item<'_>) -> KeyDataLen {
    let data_len = item
        .data
        .values()
        .map(|record| {
            // function hash + number of counters + counters + value profile data
            8 + 8 + 8 * record.counts.len() as u64 + EMPTY_VALUE_PROF_DATA_LEN
        })
        .sum();
    KeyDataLen {
        key_len: item.key.len() as u64,
        data_len,
    }
}

fn write_record(out: &mut Vec<u8>, hash: u64, record: &InstrProfRecord) {
    out.extend_from_slice(&hash.to_le_bytes());
    out.extend_from_slice(&(record.counts.len() as u64).to_le_bytes());
    for count in &record.counts {
        out.extend_from_slice(&count.to_le_bytes());
    }
    // No value sites so the data is just the header: the total size (itself) and zero kinds
    out.extend_from_slice(&(EMPTY_VALUE_PROF_DATA_LEN as u32).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
}
