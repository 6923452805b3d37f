//! The shard forwarder (C6, §4.4): publishes row envelopes onto the
//! partitioned stream keyed by `supplier_vaccineType`, preserving the
//! strictly-increasing `row_index` ordering contract within a partition.

use imms_support::{PartitionedQueue, RetryPolicy};
use log::error;

use crate::row::{Diagnostic, RowEnvelope};

/// Publishes `envelope` onto `queue` under `partition`. On terminal
/// publish failure the envelope is downgraded to an ACK-only failure
/// envelope (diagnostics: `UNHANDLED`) rather than dropped, so ACK
/// completion detection (C8) still sees one outcome per row (§4.4).
pub fn forward(
    queue: &dyn PartitionedQueue,
    policy: &RetryPolicy,
    partition: &str,
    mut envelope: RowEnvelope,
) -> RowEnvelope {
    let payload = match serde_json::to_vec(&envelope) {
        Ok(payload) => payload,
        Err(err) => {
            error!("row envelope {} failed to serialise: {err}", envelope.row_id);
            envelope.fhir = None;
            envelope.diagnostics.push(Diagnostic { code: Diagnostic::UNHANDLED.to_string(), message: err.to_string() });
            return envelope;
        }
    };

    let publish_result = policy.retry_sync(|| queue.publish(partition, payload.clone()));

    if let Err(err) = publish_result {
        error!("row envelope {} failed to publish to partition {partition} after retries: {err}", envelope.row_id);
        envelope.fhir = None;
        envelope.diagnostics.push(Diagnostic { code: Diagnostic::UNHANDLED.to_string(), message: err.to_string() });
    }

    envelope
}

#[cfg(test)]
mod tests {
    use super::*;
    use imms_support::queue::LocalPartitionedQueue;
    use std::time::Duration;

    fn envelope() -> RowEnvelope {
        RowEnvelope {
            row_id: "msg-1^0".to_string(),
            file_key: "FLU_Vaccinations_V5_X26_20250101T12000001.csv".to_string(),
            vaccine_type: "FLU".to_string(),
            supplier: "ACME".to_string(),
            created_at_formatted_string: "20250101T120000".to_string(),
            diagnostics: vec![],
            fhir: Some(serde_json::json!({"resourceType": "Immunization"})),
            action: None,
        }
    }

    #[test]
    fn successful_publish_leaves_the_envelope_unchanged() {
        let queue = LocalPartitionedQueue::new();
        let policy = RetryPolicy { max_attempts: 1, initial_interval: Duration::from_millis(1), max_interval: Duration::from_millis(1) };
        let forwarded = forward(&queue, &policy, "ACME_FLU", envelope());
        assert!(forwarded.fhir.is_some());
        assert!(forwarded.diagnostics.is_empty());
        assert_eq!(queue.len("ACME_FLU"), 1);
    }
}
