use crate::identity::FunctionIdentity;
use crate::instrumentation_profile::types::NamedInstrProfRecord;
use crate::instrumentation_profile::{ProfileSink, SinkError};
use tracing::{debug, warn};

/// Builds the profile record for a function from its identity and synthesized counts
pub fn assemble(identity: FunctionIdentity, counts: Vec<u64>) -> NamedInstrProfRecord {
    NamedInstrProfRecord::new(identity.name, identity.hash.value(), counts)
}

/// Hands the record to the sink with a weight of one. Rejected records aren't retried, the error
/// is logged and returned so the caller can count the function as skipped.
pub fn submit(
    sink: &mut dyn ProfileSink,
    record: NamedInstrProfRecord,
    function: &str,
) -> Result<(), SinkError> {
    debug!(
        "Adding record for {} with hash {:#018x} and {} counters",
        record.name,
        record.hash,
        record.counts().len()
    );
    sink.add_record(record, 1).map_err(|e| {
        warn!("Failed to add profile record for {}: {}", function, e);
        e
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::FunctionHash;
    use crate::instrumentation_profile::ProfileWriter;

    #[test]
    fn assemble_uses_identity() {
        let identity = FunctionIdentity {
            name: "simple.c;helper".to_string(),
            hash: FunctionHash::Structural(0x1234),
        };
        let record = assemble(identity, vec![100, 50]);
        assert_eq!(record.name, "simple.c;helper");
        assert_eq!(record.hash, 0x1234);
        assert_eq!(record.counts(), &[100, 50]);

        let identity = FunctionIdentity {
            name: "main".to_string(),
            hash: FunctionHash::Fallback(7),
        };
        assert_eq!(assemble(identity, vec![1]).hash, 7);
    }

    #[test]
    fn submit_reports_rejections() {
        let mut sink = ProfileWriter::default();
        let record = NamedInstrProfRecord::new("main", 1, vec![100]);
        submit(&mut sink, record, "main").unwrap();
        let record = NamedInstrProfRecord::new("main", 1, vec![100, 1]);
        assert!(matches!(
            submit(&mut sink, record, "main"),
            Err(SinkError::CountMismatch { .. })
        ));
        assert_eq!(sink.profile().len(), 1);
    }
}
