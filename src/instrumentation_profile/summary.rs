use crate::instrumentation_profile::types::*;
use std::collections::BTreeMap;

/// Cutoffs (times 10000) llvm computes the detailed summary for. Taken from
/// `ProfileSummaryBuilder::DefaultCutoffs`.
pub const DEFAULT_CUTOFFS: [u32; 16] = [
    10000, 100000, 200000, 300000, 400000, 500000, 600000, 700000, 800000, 900000, 950000, 990000,
    999000, 999900, 999990, 999999,
];

/// Cutoffs are given out of this scale
const SUMMARY_SCALE: u128 = 1_000_000;

/// A single entry of the detailed summary. The `min_count` is the smallest count needed to make
/// up `cutoff` of the total count when taking the hottest counters first and `num_counts` is how
/// many counters that took.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct SummaryEntry {
    pub cutoff: u32,
    pub min_count: u64,
    pub num_counts: u64,
}

#[derive(Clone, Debug, Default)]
pub struct ProfileSummary {
    num_functions: usize,
    num_counts: usize,
    total_count: u64,
    max_count: u64,
    max_function_count: u64,
    max_internal_block_count: u64,
    count_frequencies: BTreeMap<u64, usize>,
}

impl ProfileSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_record(&mut self, record: &InstrProfRecord) {
        if !record.counts.is_empty() {
            self.num_functions += 1;
            self.add_count(record.counts[0]);
            if record.counts[0] > self.max_function_count {
                self.max_function_count = record.counts[0];
            }
            self.add_internal_counts(&record.counts[1..]);
        }
    }

    fn add_count(&mut self, count: u64) {
        self.num_counts += 1;
        self.total_count = self.total_count.saturating_add(count);
        if count > self.max_count {
            self.max_count = count;
        }
        self.count_frequencies
            .entry(count)
            .and_modify(|x| *x += 1)
            .or_insert(1);
    }

    fn add_internal_counts(&mut self, counts: &[u64]) {
        for count in counts {
            self.add_count(*count);
            if *count > self.max_internal_block_count {
                self.max_internal_block_count = *count;
            }
        }
    }

    pub fn num_functions(&self) -> usize {
        self.num_functions
    }

    pub fn num_counts(&self) -> usize {
        self.num_counts
    }

    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    pub fn max_count(&self) -> u64 {
        self.max_count
    }

    pub fn max_function_count(&self) -> u64 {
        self.max_function_count
    }

    pub fn max_internal_block_count(&self) -> u64 {
        self.max_internal_block_count
    }

    /// Port of `ProfileSummaryBuilder::computeDetailedSummary`. Walks the counts from hottest to
    /// coldest until the running sum reaches each cutoff of the total.
    pub fn detailed_summary(&self, cutoffs: &[u32]) -> Vec<SummaryEntry> {
        let mut cutoffs = cutoffs.to_vec();
        cutoffs.sort_unstable();
        let mut frequencies = self.count_frequencies.iter().rev();
        let mut result = Vec::with_capacity(cutoffs.len());
        let mut counts_seen = 0u64;
        let mut current_sum = 0u64;
        let mut count = 0u64;
        for cutoff in cutoffs {
            let desired =
                (self.total_count as u128 * cutoff as u128 / SUMMARY_SCALE) as u64;
            while current_sum < desired {
                match frequencies.next() {
                    Some((value, freq)) => {
                        count = *value;
                        current_sum = current_sum.saturating_add(value.saturating_mul(*freq as u64));
                        counts_seen += *freq as u64;
                    }
                    None => break,
                }
            }
            result.push(SummaryEntry {
                cutoff,
                min_count: count,
                num_counts: counts_seen,
            });
        }
        result
    }
}
