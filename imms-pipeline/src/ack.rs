//! The ACK assembler (C8, §4.6): turns the per-row outcomes flowing off the
//! shard stream into a pipe-delimited acknowledgement CSV, tracks
//! completion against the audit entry's `record_count`, and finalises the
//! audit state once every row for a file has been accounted for.

use imms_support::{ObjectKey, ObjectStore, ObjectStoreError};
use serde::Serialize;

use crate::row::RowEnvelope;

const SUCCESS_RESPONSE_CODE: &str = "20013";
const FAILURE_RESPONSE_CODE: &str = "10002";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AckRow {
    #[serde(rename = "MESSAGE_HEADER_ID")]
    pub message_header_id: String,
    #[serde(rename = "HEADER_RESPONSE_CODE")]
    pub header_response_code: &'static str,
    #[serde(rename = "ISSUE_SEVERITY")]
    pub issue_severity: &'static str,
    #[serde(rename = "ISSUE_CODE")]
    pub issue_code: &'static str,
    #[serde(rename = "ISSUE_DETAILS_CODE")]
    pub issue_details_code: &'static str,
    #[serde(rename = "RESPONSE_TYPE")]
    pub response_type: &'static str,
    #[serde(rename = "RESPONSE_CODE")]
    pub response_code: &'static str,
    #[serde(rename = "RESPONSE_DISPLAY")]
    pub response_display: &'static str,
    #[serde(rename = "RECEIVED_TIME")]
    pub received_time: String,
    #[serde(rename = "MAILBOX_FROM")]
    pub mailbox_from: &'static str,
    #[serde(rename = "LOCAL_ID")]
    pub local_id: &'static str,
    #[serde(rename = "MESSAGE_DELIVERY")]
    pub message_delivery: bool,
}

impl AckRow {
    /// §4.6's success/failure mapping: `validation_passed &&
    /// message_delivered` maps to the `Success`/`20013` row, anything else
    /// to the `Failure`/`10002` infrastructure-error row.
    pub fn for_envelope(message_id: &str, envelope: &RowEnvelope, message_delivered: bool) -> Self {
        let validation_passed = envelope.is_success();
        if validation_passed && message_delivered {
            Self {
                message_header_id: message_id.to_string(),
                header_response_code: "Success",
                issue_severity: "Information",
                issue_code: "OK",
                issue_details_code: SUCCESS_RESPONSE_CODE,
                response_type: "Technical",
                response_code: SUCCESS_RESPONSE_CODE,
                response_display: "Success",
                received_time: envelope.created_at_formatted_string.clone(),
                mailbox_from: "",
                local_id: "",
                message_delivery: true,
            }
        } else {
            Self {
                message_header_id: message_id.to_string(),
                header_response_code: "Failure",
                issue_severity: "Fatal",
                issue_code: "Fatal Error",
                issue_details_code: "10001",
                response_type: "Technical",
                response_code: FAILURE_RESPONSE_CODE,
                response_display: "Infrastructure Level Response Value - Processing Error",
                received_time: envelope.created_at_formatted_string.clone(),
                mailbox_from: "",
                local_id: "",
                message_delivery: message_delivered,
            }
        }
    }
}

/// Buffers ACK rows for one in-flight file. `row_index` order is the
/// caller's responsibility (the shard stream's partition-key contract
/// already guarantees it, per §5); this buffer just accumulates in arrival
/// order and flushes in large batches to minimise object writes.
#[derive(Debug, Default)]
pub struct AckBuffer {
    rows: Vec<AckRow>,
}

impl AckBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, row: AckRow) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Serialises the buffer to pipe-delimited CSV and writes it to
    /// `ack/<source-basename>_InfAck_<timestamp>.csv` in `bucket`.
    pub fn flush(&self, store: &dyn ObjectStore, bucket: &str, source_basename: &str, timestamp: &str) -> Result<ObjectKey, ObjectStoreError> {
        let mut writer = csv::WriterBuilder::new().delimiter(b'|').from_writer(Vec::new());
        for row in &self.rows {
            writer
                .serialize(row)
                .map_err(|_| ObjectStoreError::Unhandled { attempts: 1 })?;
        }
        let body = writer.into_inner().map_err(|_| ObjectStoreError::Unhandled { attempts: 1 })?;

        let key = ObjectKey::new(bucket, format!("ack/{source_basename}_InfAck_{timestamp}.csv"));
        store.put(&key, body)?;
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imms_support::object_store::LocalObjectStore;

    fn success_envelope() -> RowEnvelope {
        RowEnvelope {
            row_id: "msg-1^0".to_string(),
            file_key: "f.csv".to_string(),
            vaccine_type: "FLU".to_string(),
            supplier: "ACME".to_string(),
            created_at_formatted_string: "20250101T120000".to_string(),
            diagnostics: vec![],
            fhir: Some(serde_json::json!({})),
            action: None,
        }
    }

    #[test]
    fn success_row_uses_the_20013_mapping() {
        let row = AckRow::for_envelope("msg-1", &success_envelope(), true);
        assert_eq!(row.header_response_code, "Success");
        assert_eq!(row.response_code, SUCCESS_RESPONSE_CODE);
    }

    #[test]
    fn failed_validation_uses_the_failure_mapping_even_if_delivered() {
        let mut envelope = success_envelope();
        envelope.fhir = None;
        envelope.diagnostics.push(crate::row::Diagnostic { code: "MANDATORY".to_string(), message: "x".to_string() });

        let row = AckRow::for_envelope("msg-1", &envelope, true);
        assert_eq!(row.header_response_code, "Failure");
        assert_eq!(row.response_code, FAILURE_RESPONSE_CODE);
    }

    #[test]
    fn flush_writes_one_object_per_file() {
        let store = LocalObjectStore::new();
        let mut buffer = AckBuffer::new();
        buffer.push(AckRow::for_envelope("msg-1", &success_envelope(), true));
        buffer.push(AckRow::for_envelope("msg-1", &success_envelope(), true));

        let key = buffer.flush(&store, "ack", "FLU_Vaccinations_V5_X26_20250101T12000001", "20250101T130000").unwrap();
        let body = store.get(&key).unwrap();
        let text = String::from_utf8(body).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.starts_with("MESSAGE_HEADER_ID|"));
    }
}
