use anyhow::Context;
use casp::coverage::{CoverageMetadata, EmbeddedMetadata, ObjectMetadata};
use casp::instrumentation_profile::ProfileWriter;
use casp::synthesis::SortedFrequencyLayout;
use casp::*;
use std::path::PathBuf;
use structopt::StructOpt;
use tracing::Level;

fn parse_entry_count(s: &str) -> Result<u64, String> {
    match s.parse::<u64>() {
        Ok(0) => Err("entry count must be greater than zero".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

/// Generate a static profile from block frequency estimates
#[derive(Clone, Debug, Eq, PartialEq, StructOpt)]
#[structopt(name = "casp")]
pub struct Opts {
    /// Block frequency dump (`opt -passes='print<block-freq>'`) or yaml unit description
    #[structopt(name = "input", parse(from_os_str))]
    input: PathBuf,
    /// Where to write the profile
    #[structopt(name = "output", default_value = "output.profdata", parse(from_os_str))]
    output: PathBuf,
    /// Instrumented object to take function hashes and counter counts from, can be repeated
    #[structopt(long = "object", number_of_values = 1, parse(from_os_str))]
    objects: Vec<PathBuf>,
    /// Write the profile in llvm's text format instead of the indexed format
    #[structopt(long = "text")]
    text: bool,
    /// Count given to the entry block of each function
    #[structopt(long = "entry-count", parse(try_from_str = parse_entry_count))]
    entry_count: Option<u64>,
    /// Print debug information about each function
    #[structopt(short = "v", long = "verbose")]
    verbose: bool,
}

impl Opts {
    fn run(&self) -> anyhow::Result<()> {
        let unit = parse(&self.input)
            .with_context(|| format!("failed to load {}", self.input.display()))?;
        let metadata: Box<dyn CoverageMetadata> = if self.objects.is_empty() {
            Box::new(EmbeddedMetadata)
        } else {
            let metadata = ObjectMetadata::new(&self.objects)
                .context("failed to read coverage metadata from objects")?;
            Box::new(metadata)
        };
        let layout = self
            .entry_count
            .map(SortedFrequencyLayout::with_entry_count)
            .unwrap_or_default();
        let format = if self.text {
            ProfileFormat::Text
        } else {
            ProfileFormat::Indexed
        };
        let mut writer = ProfileWriter::new(format);

        let driver = ExportDriver::new(&layout, metadata.as_ref());
        match driver.run(&unit, Some(self.output.as_path()), &mut writer)? {
            ExportOutcome::Written { path, .. } => {
                println!("Static profile written to: {}", path.display());
            }
            ExportOutcome::NothingProcessed(_) | ExportOutcome::NoOutput => {}
        }
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    let opts = Opts::from_args();
    let level = if opts.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
    opts.run()
}
