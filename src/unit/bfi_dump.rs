use crate::unit::*;
use nom::bytes::complete::{tag, take_until};
use nom::character::complete::{digit1, space0};
use nom::combinator::{map_res, rest};
use nom::sequence::preceded;
use nom::IResult;
use std::io::Read;
use tracing::debug;

const FUNCTION_TAG: &str = "block-frequency-info: ";
const BLOCK_TAG: &str = "- ";
const FLOAT_TAG: &str = ": float = ";
const INT_TAG: &str = ", int = ";

/// Reader for the output of llvm's block frequency printer (`opt -passes='print<block-freq>'`).
/// The relevant lines look like:
///
/// ```text
/// block-frequency-info: main
///  - entry: float = 1.0, int = 8
///  - if.then: float = 0.625, int = 5
/// ```
///
/// Everything else in the dump is ignored. Only functions with bodies get printed so every
/// function read has a body, the first block printed is the entry block.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct BfiDump;

fn function_header(s: &str) -> IResult<&str, &str> {
    preceded(tag(FUNCTION_TAG), rest)(s)
}

fn is_block_line(s: &str) -> bool {
    s.trim_start().starts_with(BLOCK_TAG)
}

fn read_frequency(s: &str) -> IResult<&str, u64> {
    map_res(digit1, |x: &str| x.parse::<u64>())(s)
}

/// Returns the block name and its integer frequency. The float frequency and any trailing fields
/// such as `count` are skipped.
fn block_line(s: &str) -> IResult<&str, (&str, u64)> {
    let (s, _) = preceded(space0, tag(BLOCK_TAG))(s)?;
    let (s, name) = take_until(FLOAT_TAG)(s)?;
    let (s, _) = tag(FLOAT_TAG)(s)?;
    let (s, _float) = take_until(INT_TAG)(s)?;
    let (s, frequency) = preceded(tag(INT_TAG), read_frequency)(s)?;
    Ok((s, (name, frequency)))
}

struct PendingFunction {
    name: String,
    blocks: Vec<Block>,
}

impl PendingFunction {
    fn finish(self) -> Result<Function, UnitError> {
        let body = FrequencyModel::with_first_entry(&self.name, self.blocks)?;
        debug!(
            "Read {} blocks for {}",
            body.as_ref().map(|x| x.len()).unwrap_or_default(),
            self.name
        );
        Ok(Function {
            name: self.name,
            linkage: Linkage::External,
            body,
            coverage: EmbeddedCoverage::default(),
        })
    }
}

impl UnitReader for BfiDump {
    fn parse_bytes(input: &[u8]) -> Result<ProgramUnit, UnitError> {
        let text = std::str::from_utf8(input).map_err(|e| UnitError::MalformedDump {
            line: 1 + input[..e.valid_up_to()].iter().filter(|x| **x == b'\n').count(),
            reason: "invalid utf-8".to_string(),
        })?;
        let mut functions = vec![];
        let mut current: Option<PendingFunction> = None;
        for (index, line) in text.lines().enumerate() {
            if let Ok((_, name)) = function_header(line) {
                if let Some(pending) = current.take() {
                    functions.push(pending.finish()?);
                }
                current = Some(PendingFunction {
                    name: name.trim().to_string(),
                    blocks: vec![],
                });
            } else if is_block_line(line) {
                let pending = current.as_mut().ok_or_else(|| UnitError::MalformedDump {
                    line: index + 1,
                    reason: "block listed before any function".to_string(),
                })?;
                let (name, frequency) = block_line(line).map(|(_, x)| x).map_err(|_| {
                    UnitError::MalformedDump {
                        line: index + 1,
                        reason: format!("expected ` - <block>: float = <f>, int = <n>`: {}", line),
                    }
                })?;
                // Blocks are unnamed in a lot of IR (clang discards value names by default) so
                // those are named by their position instead
                let id = if name.is_empty() {
                    format!("%{}", pending.blocks.len())
                } else {
                    name.to_string()
                };
                pending.blocks.push(Block::new(id, frequency));
            }
        }
        if let Some(pending) = current.take() {
            functions.push(pending.finish()?);
        }
        Ok(ProgramUnit {
            source_file: None,
            functions,
        })
    }

    fn has_format(mut input: impl Read) -> bool {
        let mut s = String::new();
        if input.read_to_string(&mut s).is_ok() {
            s.lines().any(|x| x.starts_with(FUNCTION_TAG))
        } else {
            false
        }
    }
}
