use crate::instrumentation_profile::types::*;
use crate::instrumentation_profile::*;
use std::io;

/// Writes the textual profile format, the same as `llvm-profdata merge --text`. Useful for
/// inspecting what was generated and can be turned into an indexed profile by `llvm-profdata`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextProfWriter;

impl TextProfWriter {
    pub fn new() -> Self {
        Default::default()
    }
}

impl InstrProfWriter for TextProfWriter {
    fn write(&self, profile: &InstrumentationProfile, writer: &mut impl Write) -> io::Result<()> {
        // llvm orders text output by name then hash
        let mut records = profile.records().collect::<Vec<_>>();
        records.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        for (name, hash, record) in records {
            writeln!(writer, "{}", name)?;
            writeln!(writer, "# Func Hash:\n{}", hash)?;
            writeln!(writer, "# Num Counters:\n{}", record.counts.len())?;
            writeln!(writer, "# Counter Values:")?;
            for count in &record.counts {
                writeln!(writer, "{}", count)?;
            }
            writeln!(writer)?;
        }
        Ok(())
    }
}
