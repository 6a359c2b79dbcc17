use crate::instrumentation_profile::indexed_profile::*;
use crate::instrumentation_profile::text_profile::*;
use crate::instrumentation_profile::types::*;
use crate::ProfileFormat;
use std::fs::{self, File};
use std::io::{self, prelude::*, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

pub mod indexed_profile;
pub mod summary;
pub mod text_profile;
pub mod types;

pub trait InstrProfWriter {
    fn write(&self, profile: &InstrumentationProfile, writer: &mut impl Write) -> io::Result<()>;
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("record for {0} has no counters")]
    Malformed(String),
    #[error("record for {0} has a weight of zero")]
    InvalidWeight(String),
    #[error("record for {name} has {found} counters but {expected} were previously added with the same hash")]
    CountMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("counter overflow adding record for {0}")]
    CounterOverflow(String),
    #[error("unable to write profile to {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Destination for the generated profile records. Records are added one at a time and then the
/// whole profile is written out once at the end.
pub trait ProfileSink {
    /// Add a record scaled by `weight`. If this fails the sink must be left as it was before the
    /// call.
    fn add_record(&mut self, record: NamedInstrProfRecord, weight: u64) -> Result<(), SinkError>;

    /// Write everything added so far to `destination`
    fn write(&mut self, destination: &Path) -> Result<(), SinkError>;
}

/// Profile sink which collects records like llvm's `InstrProfWriter` and writes them out in one of
/// the supported formats.
#[derive(Debug, Clone, Default)]
pub struct ProfileWriter {
    format: ProfileFormat,
    profile: InstrumentationProfile,
}

impl ProfileWriter {
    pub fn new(format: ProfileFormat) -> Self {
        Self {
            format,
            profile: InstrumentationProfile::default(),
        }
    }

    pub fn format(&self) -> ProfileFormat {
        self.format
    }

    pub fn profile(&self) -> &InstrumentationProfile {
        &self.profile
    }

    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        match self.format {
            ProfileFormat::Indexed => IndexedProfWriter::new().write(&self.profile, writer),
            ProfileFormat::Text => TextProfWriter::new().write(&self.profile, writer),
        }
    }

    fn write_file(&self, path: &Path) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer)?;
        writer.flush()?;
        writer.get_ref().sync_all()
    }
}

/// The profile is written next to its destination first so a failed write never leaves a
/// truncated profile where a valid one is expected.
fn temporary_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|x| x.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    destination.with_file_name(name)
}

impl ProfileSink for ProfileWriter {
    fn add_record(&mut self, record: NamedInstrProfRecord, weight: u64) -> Result<(), SinkError> {
        let NamedInstrProfRecord { name, hash, record } = record;
        if record.counts.is_empty() {
            return Err(SinkError::Malformed(name));
        }
        if weight == 0 {
            return Err(SinkError::InvalidWeight(name));
        }
        let record = match record.scaled(weight) {
            Some(r) => r,
            None => return Err(SinkError::CounterOverflow(name)),
        };
        let merged = match self.profile.get_record(&name, hash) {
            Some(existing) if existing.counts.len() != record.counts.len() => {
                return Err(SinkError::CountMismatch {
                    expected: existing.counts.len(),
                    found: record.counts.len(),
                    name,
                });
            }
            Some(existing) => match existing.merged(&record) {
                Some(merged) => {
                    debug!("Merging record for {} with hash {:#018x}", name, hash);
                    merged
                }
                None => return Err(SinkError::CounterOverflow(name)),
            },
            None => record,
        };
        self.profile
            .functions
            .entry(name)
            .or_default()
            .insert(hash, merged);
        Ok(())
    }

    fn write(&mut self, destination: &Path) -> Result<(), SinkError> {
        let temporary = temporary_path(destination);
        let res = self
            .write_file(&temporary)
            .and_then(|_| fs::rename(&temporary, destination));
        if let Err(source) = res {
            if temporary.exists() {
                if let Err(e) = fs::remove_file(&temporary) {
                    warn!("Unable to remove {}: {}", temporary.display(), e);
                }
            }
            return Err(SinkError::Io {
                path: destination.to_path_buf(),
                source,
            });
        }
        debug!(
            "Wrote {} records to {}",
            self.profile.len(),
            destination.display()
        );
        Ok(())
    }
}
