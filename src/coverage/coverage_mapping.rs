use crate::coverage::*;
use crate::identity::name_hash;
use crate::instrumentation_profile::types::VARIANT_MASKS_ALL;
use anyhow::Result;
use nom::bytes::complete::take;
use nom::number::complete::{u32 as nom_u32, u64 as nom_u64};
use nom::number::Endianness;
use nom::IResult;
use object::{Object, ObjectSection, ObjectSymbol};
use rustc_hash::FxHashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// `name hash: u64, data len: u32, structural hash: u64, filenames ref: u64`
const COVFUN_HEADER_LEN: usize = 28;
/// Raw profile version which added the bitmap pointer and bitmap byte count to the data records
const BITMAP_VERSION: u64 = 9;
const RAW_VERSION_SYMBOL: &str = "__llvm_profile_raw_version";

/// Stores the information from the coverage and profile data sections of instrumented object files
/// needed to make a profile for them. Inspired by the llvm `CoverageMapping` however only the
/// function hashes and counter counts are kept, keyed by the md5 of the function name.
#[derive(Debug, Clone, Default)]
pub struct ObjectMetadata {
    structural_hashes: FxHashMap<u64, u64>,
    counter_counts: FxHashMap<u64, u32>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LlvmSection {
    CoverageFunctions,
    ProfileData,
}

#[derive(Copy, Clone, Debug, Error)]
pub enum SectionReadError {
    #[error("empty section: {0:?}")]
    EmptySection(LlvmSection),
    #[error("malformed record at offset {offset:#x} in section: {section:?}")]
    Malformed { section: LlvmSection, offset: usize },
}

/// Layout of a `__llvm_prf_data` record. Pointer sized fields depend on the target and version 9
/// of the raw profile format added a bitmap pointer and a bitmap byte count.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ProfileDataLayout {
    pub pointer_width: usize,
    pub has_bitmap: bool,
}

impl ProfileDataLayout {
    /// Picks the layout for a data section. Without a raw version the older layout is assumed
    /// unless the section size only fits the newer one.
    pub fn detect(pointer_width: usize, raw_version: Option<u64>, section_len: usize) -> Self {
        let has_bitmap = match raw_version {
            Some(version) => (version & !VARIANT_MASKS_ALL) >= BITMAP_VERSION,
            None => {
                let old = Self {
                    pointer_width,
                    has_bitmap: false,
                };
                let new = Self {
                    pointer_width,
                    has_bitmap: true,
                };
                section_len % old.record_len() != 0 && section_len % new.record_len() == 0
            }
        };
        Self {
            pointer_width,
            has_bitmap,
        }
    }

    fn pointer_fields(&self) -> usize {
        // counters, (bitmap), function pointer, values
        if self.has_bitmap {
            4
        } else {
            3
        }
    }

    /// Offset of `NumCounters` from the start of the record
    fn counters_len_offset(&self) -> usize {
        16 + self.pointer_fields() * self.pointer_width
    }

    pub fn record_len(&self) -> usize {
        // num counters, two u16 value site counts and then the bitmap bytes if present
        let len = self.counters_len_offset() + 4 + 4 + if self.has_bitmap { 4 } else { 0 };
        align_to_8(len)
    }
}

fn align_to_8(len: usize) -> usize {
    (len + 7) & !7
}

impl ObjectMetadata {
    pub fn new(object_files: &[PathBuf]) -> Result<Self> {
        let mut result = Self::default();
        for file in object_files {
            result.add_object_file(file.as_path())?;
        }
        Ok(result)
    }

    pub fn add_object_file(&mut self, object: &Path) -> Result<()> {
        let binary_data = fs::read(object)?;
        let object_file = object::File::parse(&*binary_data)?;
        let endian = if object_file.is_little_endian() {
            Endianness::Little
        } else {
            Endianness::Big
        };

        // Relocatable objects have a section per comdat group so every match is read
        let cov_fun = llvm_sections(&object_file, LlvmSection::CoverageFunctions)?;
        if cov_fun.is_empty() {
            warn!("{} has no coverage function records", object.display());
        }
        for data in cov_fun {
            let records = parse_coverage_functions(endian, data)?;
            debug!("Parsed {} covfun records", records.len());
            self.add_function_records(records);
        }

        let prf_data = llvm_sections(&object_file, LlvmSection::ProfileData)?;
        if prf_data.is_empty() {
            warn!("{} has no profile data records", object.display());
        } else {
            let pointer_width = if object_file.is_64() { 8 } else { 4 };
            let raw_version = read_raw_version(&object_file, endian);
            for data in prf_data {
                let layout = ProfileDataLayout::detect(pointer_width, raw_version, data.len());
                debug!(
                    "Raw profile version {:?}, using data layout {:?}",
                    raw_version, layout
                );
                let records = parse_profile_data(endian, data, layout)?;
                debug!("Parsed {} prf_data records", records.len());
                self.add_profile_data(records);
            }
        }
        Ok(())
    }

    pub fn add_function_records(&mut self, records: impl IntoIterator<Item = FunctionRecordHeader>) {
        for record in records {
            // Unused functions get dummy records with a zero hash
            if record.fn_hash == 0 {
                continue;
            }
            self.structural_hashes
                .entry(record.name_hash)
                .or_insert(record.fn_hash);
        }
    }

    pub fn add_profile_data(&mut self, data: impl IntoIterator<Item = ProfileData>) {
        for record in data {
            self.counter_counts
                .entry(record.name_md5)
                .or_insert(record.counters_len);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.structural_hashes.is_empty() && self.counter_counts.is_empty()
    }
}

impl CoverageMetadata for ObjectMetadata {
    fn structural_hash(&self, unit: &ProgramUnit, function: &Function) -> Option<u64> {
        self.structural_hashes
            .get(&name_hash(unit, function))
            .copied()
    }

    fn counter_count(&self, unit: &ProgramUnit, function: &Function) -> Option<u32> {
        self.counter_counts.get(&name_hash(unit, function)).copied()
    }
}

impl LlvmSection {
    /// Section names for mach-o and elf followed by coff
    fn names(&self) -> &'static [&'static str] {
        match self {
            Self::CoverageFunctions => &["__llvm_covfun", ".lcovfun"],
            Self::ProfileData => &["__llvm_prf_data", ".lprfd"],
        }
    }
}

fn llvm_sections<'data>(
    object_file: &object::File<'data>,
    section: LlvmSection,
) -> Result<Vec<&'data [u8]>, SectionReadError> {
    let names = section.names();
    object_file
        .sections()
        .filter(|x| x.name().map(|name| names.contains(&name)).unwrap_or(false))
        .map(|x| x.data().map_err(|_| SectionReadError::EmptySection(section)))
        .collect()
}

/// The raw profile version is emitted as a symbol in instrumented objects, mach-o prefixes it with
/// an extra underscore.
fn is_raw_version_symbol(name: &str) -> bool {
    name == RAW_VERSION_SYMBOL || name.strip_prefix('_') == Some(RAW_VERSION_SYMBOL)
}

fn read_raw_version(object_file: &object::File<'_>, endian: Endianness) -> Option<u64> {
    let symbol = object_file
        .symbols()
        .find(|x| x.name().map(is_raw_version_symbol).unwrap_or(false))?;
    let section = object_file.section_by_index(symbol.section_index()?).ok()?;
    let bytes = section.data_range(symbol.address(), 8).ok()??;
    nom_u64::<_, nom::error::Error<&[u8]>>(endian)(bytes)
        .ok()
        .map(|(_, v)| v)
}

fn parse_function_record_header(
    endian: Endianness,
    input: &[u8],
) -> IResult<&[u8], FunctionRecordHeader> {
    let (input, name_hash) = nom_u64(endian)(input)?;
    let (input, data_len) = nom_u32(endian)(input)?;
    let (input, fn_hash) = nom_u64(endian)(input)?;
    let (input, filenames_ref) = nom_u64(endian)(input)?;
    Ok((
        input,
        FunctionRecordHeader {
            name_hash,
            data_len,
            fn_hash,
            filenames_ref,
        },
    ))
}

/// Each record in `__llvm_covfun` is a header followed by `data_len` bytes of encoded mapping
/// regions and padded so the next record is 8 byte aligned.
pub fn parse_coverage_functions(
    endian: Endianness,
    data: &[u8],
) -> Result<Vec<FunctionRecordHeader>, SectionReadError> {
    let mut res = vec![];
    let mut offset = 0;
    while offset < data.len() {
        if data.len() - offset < COVFUN_HEADER_LEN {
            warn!("{} bytes left in coverage functions", data.len() - offset);
            break;
        }
        let malformed = SectionReadError::Malformed {
            section: LlvmSection::CoverageFunctions,
            offset,
        };
        let (_, header) =
            parse_function_record_header(endian, &data[offset..]).map_err(|_| malformed)?;
        let end = offset + COVFUN_HEADER_LEN + header.data_len as usize;
        if end > data.len() {
            return Err(malformed);
        }
        res.push(header);
        offset = align_to_8(end);
    }
    Ok(res)
}

fn parse_profile_data_record(
    endian: Endianness,
    layout: ProfileDataLayout,
    input: &[u8],
) -> IResult<&[u8], ProfileData> {
    let (bytes, name_md5) = nom_u64(endian)(input)?;
    let (bytes, structural_hash) = nom_u64(endian)(bytes)?;
    let (bytes, _pointers) = take(layout.counters_len_offset() - 16)(bytes)?;
    let (bytes, counters_len) = nom_u32(endian)(bytes)?;
    Ok((
        bytes,
        ProfileData {
            name_md5,
            structural_hash,
            counters_len,
        },
    ))
}

pub fn parse_profile_data(
    endian: Endianness,
    data: &[u8],
    layout: ProfileDataLayout,
) -> Result<Vec<ProfileData>, SectionReadError> {
    let record_len = layout.record_len();
    let mut res = vec![];
    for (i, record) in data.chunks(record_len).enumerate() {
        if record.len() < record_len {
            warn!("{} bytes left in profile data", record.len());
            break;
        }
        let (_, data) =
            parse_profile_data_record(endian, layout, record).map_err(|_| {
                SectionReadError::Malformed {
                    section: LlvmSection::ProfileData,
                    offset: i * record_len,
                }
            })?;
        res.push(data);
    }
    Ok(res)
}
