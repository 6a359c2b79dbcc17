//! A program unit is the set of functions exported in one run along with the static block
//! frequencies for each function body. The frequencies themselves come from an external analysis,
//! the readers here only load what that analysis produced.
use crate::unit::bfi_dump::*;
use crate::unit::yaml_unit::*;
use rustc_hash::FxHashSet;
use serde::Deserialize;
use std::fmt;
use std::fs::File;
use std::io::{self, prelude::*};
use std::path::Path;
use thiserror::Error;

pub mod bfi_dump;
pub mod yaml_unit;

#[derive(Debug, Error)]
pub enum UnitError {
    #[error("unable to read unit: {0}")]
    Io(#[from] io::Error),
    #[error("unsupported unit format")]
    UnrecognizedFormat,
    #[error("malformed block frequency dump at line {line}: {reason}")]
    MalformedDump { line: usize, reason: String },
    #[error("invalid unit description: {0}")]
    InvalidDescription(#[from] serde_yaml::Error),
    #[error("function {function} has no block named {block} to use as its entry")]
    MissingEntry { function: String, block: String },
    #[error("function {function} has more than one block named {block}")]
    DuplicateBlock { function: String, block: String },
}

pub trait UnitReader {
    /// Parse the whole unit
    fn parse_bytes(input: &[u8]) -> Result<ProgramUnit, UnitError>;
    /// Detects that the bytes match the current reader format if it can't read the format it will
    /// return false
    fn has_format(input: impl Read) -> bool;
}

pub fn parse(filename: impl AsRef<Path>) -> Result<ProgramUnit, UnitError> {
    let mut buffer = Vec::new();
    let mut f = File::open(filename)?;
    f.read_to_end(&mut buffer)?;
    parse_bytes(buffer.as_slice())
}

pub fn parse_bytes(data: &[u8]) -> Result<ProgramUnit, UnitError> {
    if BfiDump::has_format(data) {
        BfiDump::parse_bytes(data)
    } else if YamlUnit::has_format(data) {
        YamlUnit::parse_bytes(data)
    } else {
        Err(UnitError::UnrecognizedFormat)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Linkage {
    External,
    /// Local to the unit, llvm's `internal` linkage
    Internal,
    /// Local to the unit and not in the symbol table, llvm's `private` linkage
    Private,
}

impl Default for Linkage {
    fn default() -> Self {
        Self::External
    }
}

impl Linkage {
    /// Local symbols can clash between units so their profile names are prefixed with the unit
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Internal | Self::Private)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub String);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BlockId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Block {
    pub id: BlockId,
    /// Relative frequency, only comparable to other blocks in the same function
    pub frequency: u64,
}

impl Block {
    pub fn new(id: impl Into<BlockId>, frequency: u64) -> Self {
        Self {
            id: id.into(),
            frequency,
        }
    }
}

impl From<String> for BlockId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The blocks of a function body with their relative frequencies. Block order is the order they
/// were declared in and is kept as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FrequencyModel {
    entry: usize,
    blocks: Vec<Block>,
}

impl FrequencyModel {
    /// Creates a model checking that block ids are unique and the entry is one of the blocks
    pub fn new(function: &str, entry: &BlockId, blocks: Vec<Block>) -> Result<Self, UnitError> {
        let mut seen = FxHashSet::default();
        for block in &blocks {
            if !seen.insert(&block.id) {
                return Err(UnitError::DuplicateBlock {
                    function: function.to_string(),
                    block: block.id.to_string(),
                });
            }
        }
        match blocks.iter().position(|x| &x.id == entry) {
            Some(entry) => Ok(Self { entry, blocks }),
            None => Err(UnitError::MissingEntry {
                function: function.to_string(),
                block: entry.to_string(),
            }),
        }
    }

    /// Creates a model where the first block is the entry block. Returns `None` if there are no
    /// blocks.
    pub fn with_first_entry(function: &str, blocks: Vec<Block>) -> Result<Option<Self>, UnitError> {
        match blocks.first() {
            Some(first) => {
                let entry = first.id.clone();
                Self::new(function, &entry, blocks).map(Some)
            }
            None => Ok(None),
        }
    }

    pub fn entry(&self) -> &Block {
        &self.blocks[self.entry]
    }

    pub fn block(&self, id: &BlockId) -> Option<&Block> {
        self.blocks.iter().find(|x| &x.id == id)
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Metadata an instrumented build would have recorded for the function
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EmbeddedCoverage {
    pub structural_hash: Option<u64>,
    pub counters: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    pub linkage: Linkage,
    /// `None` for declarations
    pub body: Option<FrequencyModel>,
    pub coverage: EmbeddedCoverage,
}

impl Function {
    pub fn new(name: impl Into<String>, body: FrequencyModel) -> Self {
        Self {
            name: name.into(),
            linkage: Linkage::default(),
            body: Some(body),
            coverage: EmbeddedCoverage::default(),
        }
    }

    pub fn declaration(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            linkage: Linkage::default(),
            body: None,
            coverage: EmbeddedCoverage::default(),
        }
    }

    pub fn is_declaration(&self) -> bool {
        self.body.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramUnit {
    /// Name of the source the unit was built from. Local functions are qualified with it
    pub source_file: Option<String>,
    pub functions: Vec<Function>,
}

impl ProgramUnit {
    pub fn new(source_file: Option<String>, functions: Vec<Function>) -> Self {
        Self {
            source_file,
            functions,
        }
    }

    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.functions.iter()
    }

    pub fn get_function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|x| x.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_invariants() {
        let blocks = vec![Block::new("entry", 4), Block::new("exit", 4)];
        let model = FrequencyModel::new("f", &"exit".into(), blocks.clone()).unwrap();
        assert_eq!(model.entry().id, BlockId::from("exit"));
        assert_eq!(model.blocks(), &blocks[..]);

        assert!(matches!(
            FrequencyModel::new("f", &"nope".into(), blocks),
            Err(UnitError::MissingEntry { .. })
        ));
        let dupes = vec![Block::new("a", 1), Block::new("b", 2), Block::new("a", 3)];
        assert!(matches!(
            FrequencyModel::new("f", &"a".into(), dupes),
            Err(UnitError::DuplicateBlock { block, .. }) if block == "a"
        ));
        assert_eq!(FrequencyModel::with_first_entry("f", vec![]).unwrap(), None);
    }

    #[test]
    fn large_models() {
        let mut blocks = (0..50_000)
            .map(|i| Block::new(format!("bb{}", i), i))
            .collect::<Vec<_>>();
        let model = FrequencyModel::new("big", &"bb49999".into(), blocks.clone()).unwrap();
        assert_eq!(model.len(), 50_000);
        assert_eq!(model.entry().frequency, 49_999);

        blocks.push(Block::new("bb123", 1));
        assert!(matches!(
            FrequencyModel::with_first_entry("big", blocks),
            Err(UnitError::DuplicateBlock { block, .. }) if block == "bb123"
        ));
    }

    #[test]
    fn detects_formats() {
        let dump = b"block-frequency-info: main\n - entry: float = 1.0, int = 8\n";
        let unit = parse_bytes(dump).unwrap();
        assert_eq!(unit.functions.len(), 1);

        let yaml = b"functions:\n  - name: main\n    blocks:\n      - { id: entry, frequency: 8 }\n";
        let unit = parse_bytes(yaml).unwrap();
        assert_eq!(unit.functions.len(), 1);

        assert!(matches!(
            parse_bytes(b"\x00\x01garbage"),
            Err(UnitError::UnrecognizedFormat)
        ));
    }
}
