//! Turns the relative block frequencies of a function into absolute counter values.
//!
//! Frequencies are normalised so the entry block executes `entry_count` times and every other
//! block is scaled by its frequency relative to the entry. When an instrumented build says how
//! many counters the function really has the scaled counts are fitted to that many slots. There's
//! no way to know which region each counter covers so the fitting is a heuristic: the first counter
//! is always the function entry and the rest take the hottest remaining blocks in order.
use crate::unit::FrequencyModel;
use std::convert::TryFrom;
use thiserror::Error;
use tracing::{debug, warn};

/// Count given to the entry block of every function
pub const DEFAULT_ENTRY_COUNT: u64 = 100;

/// Largest counter hint that is honoured. Hints come from object files and unit descriptions so a
/// corrupt value could otherwise ask for gigabytes of counters.
pub const MAX_COUNTER_HINT: u32 = 1 << 20;

/// How many counters an instrumented build allocated for the function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CounterLayoutHint {
    pub counter_count: u32,
}

impl CounterLayoutHint {
    pub fn new(counter_count: u32) -> Self {
        Self { counter_count }
    }
}

/// Reasons a function gets no profile record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum SkipReason {
    #[error("entry block has a frequency of zero")]
    ZeroEntryFrequency,
    #[error("no counters generated")]
    Empty,
}

pub trait CounterLayoutStrategy: Sync {
    fn synthesize(
        &self,
        model: &FrequencyModel,
        hint: Option<CounterLayoutHint>,
    ) -> Result<Vec<u64>, SkipReason>;
}

/// Scales block frequencies against the entry block. Without a hint there's one counter per block
/// in declaration order, with a hint the counters are the scaled frequencies sorted hottest first
/// and padded out with a decaying `entry_count / (i + 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SortedFrequencyLayout {
    entry_count: u64,
}

impl Default for SortedFrequencyLayout {
    fn default() -> Self {
        Self {
            entry_count: DEFAULT_ENTRY_COUNT,
        }
    }
}

impl SortedFrequencyLayout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry_count(entry_count: u64) -> Self {
        Self { entry_count }
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// `entry_count * frequency / entry_frequency` rounded down, saturating at `u64::MAX`
    fn scale(&self, frequency: u64, entry_frequency: u64) -> u64 {
        let scaled =
            u128::from(self.entry_count) * u128::from(frequency) / u128::from(entry_frequency);
        u64::try_from(scaled).unwrap_or(u64::MAX)
    }

    fn fit_to_counters(&self, mut scaled: Vec<u64>, counter_count: usize) -> Vec<u64> {
        scaled.sort_by(|a, b| b.cmp(a));
        (0..counter_count)
            .map(|i| match i {
                0 => self.entry_count,
                i if i < scaled.len() => scaled[i],
                i => self.entry_count / (i as u64 + 1),
            })
            .collect()
    }
}

impl CounterLayoutStrategy for SortedFrequencyLayout {
    fn synthesize(
        &self,
        model: &FrequencyModel,
        hint: Option<CounterLayoutHint>,
    ) -> Result<Vec<u64>, SkipReason> {
        let entry_frequency = model.entry().frequency;
        if entry_frequency == 0 {
            return Err(SkipReason::ZeroEntryFrequency);
        }
        let scaled = model
            .blocks()
            .iter()
            .map(|x| self.scale(x.frequency, entry_frequency))
            .collect::<Vec<_>>();

        // A zero counter hint can't describe a real instrumented function so it's treated like no
        // hint at all
        let counts = match hint {
            Some(hint) if hint.counter_count > 0 => {
                let counter_count = if hint.counter_count > MAX_COUNTER_HINT {
                    warn!(
                        "Counter hint of {} is above the limit, using {} counters",
                        hint.counter_count, MAX_COUNTER_HINT
                    );
                    MAX_COUNTER_HINT
                } else {
                    hint.counter_count
                };
                debug!(
                    "Fitting {} blocks to {} counters",
                    scaled.len(),
                    counter_count
                );
                self.fit_to_counters(scaled, counter_count as usize)
            }
            _ => scaled,
        };
        if counts.is_empty() {
            Err(SkipReason::Empty)
        } else {
            Ok(counts)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::Block;

    fn model(freqs: &[u64]) -> FrequencyModel {
        let blocks = freqs
            .iter()
            .enumerate()
            .map(|(i, f)| Block::new(format!("bb{}", i), *f))
            .collect();
        FrequencyModel::with_first_entry("f", blocks)
            .unwrap()
            .unwrap()
    }

    #[test]
    fn single_block() {
        let layout = SortedFrequencyLayout::default();
        assert_eq!(layout.synthesize(&model(&[5]), None), Ok(vec![100]));
        assert_eq!(
            layout.synthesize(&model(&[5]), Some(CounterLayoutHint::new(1))),
            Ok(vec![100])
        );
    }

    #[test]
    fn padded_counters() {
        let layout = SortedFrequencyLayout::default();
        let counts = layout
            .synthesize(&model(&[10, 5]), Some(CounterLayoutHint::new(3)))
            .unwrap();
        assert_eq!(counts, vec![100, 50, 33]);

        let counts = layout
            .synthesize(&model(&[10, 5]), Some(CounterLayoutHint::new(6)))
            .unwrap();
        assert_eq!(counts, vec![100, 50, 33, 25, 20, 16]);
    }

    #[test]
    fn declared_order_without_hint() {
        let layout = SortedFrequencyLayout::default();
        let counts = layout.synthesize(&model(&[8, 5, 16, 0, 3]), None).unwrap();
        assert_eq!(counts, vec![100, 62, 200, 0, 37]);
    }

    #[test]
    fn hottest_blocks_first() {
        let layout = SortedFrequencyLayout::default();
        let freqs = [8, 5, 16, 0, 3, 12];
        let counts = layout
            .synthesize(&model(&freqs), Some(CounterLayoutHint::new(4)))
            .unwrap();
        assert_eq!(counts.len(), 4);
        assert_eq!(counts[0], 100);
        // sorted scaled values are [200, 150, 100, 62, 37, 0]
        assert_eq!(&counts[1..], &[150, 100, 62]);
        assert!(counts[1..].windows(2).all(|x| x[0] >= x[1]));
    }

    #[test]
    fn zero_entry_frequency() {
        let layout = SortedFrequencyLayout::default();
        assert_eq!(
            layout.synthesize(&model(&[0, 4]), None),
            Err(SkipReason::ZeroEntryFrequency)
        );
        assert_eq!(
            layout.synthesize(&model(&[0]), Some(CounterLayoutHint::new(2))),
            Err(SkipReason::ZeroEntryFrequency)
        );
    }

    #[test]
    fn zero_counter_hint() {
        let layout = SortedFrequencyLayout::default();
        let m = model(&[4, 2, 1]);
        assert_eq!(
            layout.synthesize(&m, Some(CounterLayoutHint::new(0))),
            layout.synthesize(&m, None)
        );
    }

    #[test]
    fn oversized_counter_hint() {
        let layout = SortedFrequencyLayout::default();
        let counts = layout
            .synthesize(&model(&[10, 5]), Some(CounterLayoutHint::new(u32::MAX)))
            .unwrap();
        assert_eq!(counts.len(), MAX_COUNTER_HINT as usize);
        assert_eq!(&counts[..3], &[100, 50, 33]);

        let counts = layout
            .synthesize(&model(&[10]), Some(CounterLayoutHint::new(MAX_COUNTER_HINT)))
            .unwrap();
        assert_eq!(counts.len(), MAX_COUNTER_HINT as usize);
    }

    #[test]
    fn saturating_scale() {
        let layout = SortedFrequencyLayout::default();
        let counts = layout.synthesize(&model(&[1, u64::MAX]), None).unwrap();
        assert_eq!(counts, vec![100, u64::MAX]);

        let layout = SortedFrequencyLayout::with_entry_count(u64::MAX);
        let counts = layout.synthesize(&model(&[2, 1, 4]), None).unwrap();
        assert_eq!(counts, vec![u64::MAX, u64::MAX / 2, u64::MAX]);
    }

    #[test]
    fn custom_entry_count() {
        let layout = SortedFrequencyLayout::with_entry_count(1000);
        assert_eq!(layout.entry_count(), 1000);
        let counts = layout
            .synthesize(&model(&[4, 1]), Some(CounterLayoutHint::new(3)))
            .unwrap();
        assert_eq!(counts, vec![1000, 250, 333]);
    }
}
