use crate::unit::*;
use serde::Deserialize;
use std::io::Read;

/// A unit described directly in yaml. This is handy when the frequencies come from something other
/// than llvm or to attach the instrumentation metadata an instrumented build would have:
///
/// ```yaml
/// source_file: simple.c
/// functions:
///   - name: main
///     entry: entry
///     blocks:
///       - { id: entry, frequency: 16 }
///       - { id: if.then, frequency: 8 }
///     coverage:
///       structural_hash: 1311768467294899695
///       counters: 2
///   - name: helper
///     linkage: internal
///     blocks:
///       - { id: entry, frequency: 1 }
///   - name: printf
/// ```
///
/// A function without blocks is a declaration. When no entry is given the first block is used.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct YamlUnit;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UnitDescription {
    #[serde(default)]
    source_file: Option<String>,
    #[serde(default)]
    functions: Vec<FunctionDescription>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FunctionDescription {
    name: String,
    #[serde(default)]
    linkage: Linkage,
    #[serde(default)]
    entry: Option<String>,
    #[serde(default)]
    blocks: Vec<BlockDescription>,
    #[serde(default)]
    coverage: Option<CoverageDescription>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BlockDescription {
    id: String,
    frequency: u64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CoverageDescription {
    #[serde(default)]
    structural_hash: Option<u64>,
    #[serde(default)]
    counters: Option<u32>,
}

impl FunctionDescription {
    fn into_function(self) -> Result<Function, UnitError> {
        let blocks = self
            .blocks
            .into_iter()
            .map(|x| Block::new(x.id, x.frequency))
            .collect::<Vec<_>>();
        let body = match self.entry {
            Some(entry) if !blocks.is_empty() => {
                Some(FrequencyModel::new(&self.name, &BlockId(entry), blocks)?)
            }
            _ => FrequencyModel::with_first_entry(&self.name, blocks)?,
        };
        let coverage = self
            .coverage
            .map(|x| EmbeddedCoverage {
                structural_hash: x.structural_hash,
                counters: x.counters,
            })
            .unwrap_or_default();
        Ok(Function {
            name: self.name,
            linkage: self.linkage,
            body,
            coverage,
        })
    }
}

impl UnitReader for YamlUnit {
    fn parse_bytes(input: &[u8]) -> Result<ProgramUnit, UnitError> {
        let description: UnitDescription = serde_yaml::from_slice(input)?;
        let functions = description
            .functions
            .into_iter()
            .map(FunctionDescription::into_function)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ProgramUnit {
            source_file: description.source_file,
            functions,
        })
    }

    fn has_format(mut input: impl Read) -> bool {
        let mut s = String::new();
        if input.read_to_string(&mut s).is_ok() {
            s.lines().any(|x| x.starts_with("functions:"))
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNIT: &str = r#"
source_file: simple.c
functions:
  - name: main
    entry: entry
    blocks:
      - { id: entry, frequency: 16 }
      - { id: if.then, frequency: 8 }
    coverage:
      structural_hash: 1311768467294899695
      counters: 2
  - name: helper
    linkage: internal
    blocks:
      - { id: body, frequency: 1 }
  - name: printf
"#;

    #[test]
    fn parse_description() {
        assert!(YamlUnit::has_format(UNIT.as_bytes()));
        let unit = YamlUnit::parse_bytes(UNIT.as_bytes()).unwrap();
        assert_eq!(unit.source_file.as_deref(), Some("simple.c"));
        assert_eq!(unit.functions.len(), 3);

        let main = &unit.functions[0];
        assert_eq!(main.linkage, Linkage::External);
        assert_eq!(main.body.as_ref().unwrap().len(), 2);
        assert_eq!(
            main.coverage,
            EmbeddedCoverage {
                structural_hash: Some(1311768467294899695),
                counters: Some(2),
            }
        );

        let helper = &unit.functions[1];
        assert_eq!(helper.linkage, Linkage::Internal);
        assert_eq!(helper.body.as_ref().unwrap().entry().id, BlockId::from("body"));
        assert_eq!(helper.coverage, EmbeddedCoverage::default());

        assert!(unit.functions[2].is_declaration());
    }

    #[test]
    fn invalid_descriptions() {
        let missing_entry = "functions:\n  - name: f\n    entry: nope\n    blocks:\n      - { id: a, frequency: 1 }\n";
        assert!(matches!(
            YamlUnit::parse_bytes(missing_entry.as_bytes()),
            Err(UnitError::MissingEntry { .. })
        ));
        let negative = "functions:\n  - name: f\n    blocks:\n      - { id: a, frequency: -1 }\n";
        assert!(matches!(
            YamlUnit::parse_bytes(negative.as_bytes()),
            Err(UnitError::InvalidDescription(_))
        ));
        let typo = "functions:\n  - name: f\n    blcks: []\n";
        assert!(matches!(
            YamlUnit::parse_bytes(typo.as_bytes()),
            Err(UnitError::InvalidDescription(_))
        ));
    }
}
