//! The pipeline orchestrator (C10, §4.7): promotes at most one audit entry
//! per partition to `Processing`, drives every row through C4/C5 → C6 →
//! C7 → C9, then hands the file off to C8's bookkeeping. Also owns the
//! watchdog sweep that fails a file stuck in `Processing` past its
//! deadline and releases its partition.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use diesel::PgConnection;
use imms_db::models::DbAuditEntry;
use imms_db::{audit, crud, delta, AuditError, CrudError, ReferenceCache};
use imms_support::{LogSink, ObjectKey, ObjectStore, ObjectStoreError, PartitionedQueue, QueueError, RetryPolicy};
use log::{info, warn};
use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

use crate::ack::{AckBuffer, AckRow};
use crate::filename::{self, FilenameError, ValidatedFile};
use crate::row::{self, ActionKind};
use crate::shard;

#[derive(Debug, Error, Diagnostic)]
pub enum OrchestratorError {
    #[error(transparent)]
    Filename(#[from] FilenameError),
    #[error(transparent)]
    Audit(#[from] AuditError),
    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// C3 → C1: validates and authorises an incoming object key, then creates
/// its audit entry in `Queued`.
pub fn intake_file(
    conn: &mut PgConnection,
    cache: &ReferenceCache,
    file_key: &str,
    required_operations: &[&str],
    record_count: Option<i32>,
) -> Result<(ValidatedFile, DbAuditEntry), OrchestratorError> {
    let validated = filename::validate(file_key, cache, required_operations)?;
    let entry = audit::create_queued(conn, &validated.file_key, &validated.supplier, &validated.vaccine_type, record_count)?;
    Ok((validated, entry))
}

/// C10: promotes the oldest `Queued` entry for `supplier_vaccineType` to
/// `Processing`, provided nothing in that partition already is.
pub fn dispatch_next(conn: &mut PgConnection, supplier: &str, vaccine_type: &str) -> Result<Option<DbAuditEntry>, OrchestratorError> {
    let Some(entry) = audit::next_queued_for_partition(conn, supplier, vaccine_type)? else {
        return Ok(None);
    };
    audit::advance_to_processing(conn, entry.id)?;
    Ok(Some(entry))
}

/// C10's watchdog: any entry still `Processing` after `deadline` has
/// elapsed since its last update is terminal — its partition is released
/// for the next queued file.
pub fn fail_if_stuck(conn: &mut PgConnection, entry: &DbAuditEntry, deadline: ChronoDuration, now: DateTime<Utc>) -> Result<bool, OrchestratorError> {
    if now - entry.updated_at < deadline {
        return Ok(false);
    }
    audit::fail_stuck_processing(conn, entry.id)?;
    warn!("audit entry {} exceeded its watchdog deadline and was marked Failed", entry.id);
    Ok(true)
}

pub struct FileOutcome {
    pub processed_rows: i32,
    pub failed: bool,
}

/// Drives one `Processing` file end to end: reads the source CSV, runs
/// every row through the converter/forwarder/CRUD/delta chain, writes the
/// ACK object, then finalises the audit entry (C8).
#[allow(clippy::too_many_arguments)]
pub fn process_file(
    conn: &mut PgConnection,
    cache: &ReferenceCache,
    source_store: &dyn ObjectStore,
    ack_store: &dyn ObjectStore,
    queue: &dyn PartitionedQueue,
    policy: &RetryPolicy,
    log_sink: &dyn LogSink,
    source_bucket: &str,
    ack_bucket: &str,
    entry: &DbAuditEntry,
) -> Result<FileOutcome, OrchestratorError> {
    let body = source_store.get(&ObjectKey::new(source_bucket, entry.file_key.clone()))?;

    let mut reader = csv::ReaderBuilder::new().delimiter(b'|').has_headers(true).from_reader(body.as_slice());
    let _headers = reader.headers()?.clone();

    let mut ack_buffer = AckBuffer::new();
    let mut processed = 0i32;
    let mut saw_unhandled = false;
    let partition = format!("{}_{}", entry.supplier, entry.vaccine_type);

    for (row_index, record) in reader.records().enumerate() {
        let record = record?;
        let columns: Vec<String> = record.iter().map(str::to_string).collect();
        let Some(flat) = imms_fhir::FlatRow::from_columns(&columns) else {
            warn!("row {row_index} in {} has an unexpected column count; skipping", entry.file_key);
            continue;
        };

        let envelope = row::process_row(
            &flat,
            row_index,
            &entry.id.to_string(),
            &entry.file_key,
            &entry.supplier,
            &entry.vaccine_type,
            cache,
            Utc::now(),
        );
        let envelope = shard::forward(queue, policy, &partition, envelope);

        let delivered = if envelope.has_unhandled_error() {
            saw_unhandled = true;
            false
        } else if let Some(resource) = envelope.fhir.clone() {
            match apply_mutation(conn, policy, log_sink, &entry.file_key, &entry.vaccine_type, envelope.action, &resource) {
                Ok(()) => true,
                Err(err) => {
                    warn!("row {} failed to apply: {err}", envelope.row_id);
                    false
                }
            }
        } else {
            // Row-level business validation failure: still an ACK outcome,
            // not an infrastructure failure, per §7's error taxonomy.
            true
        };

        ack_buffer.push(AckRow::for_envelope(&entry.id.to_string(), &envelope, delivered));
        processed += 1;
    }

    let timestamp = Utc::now().format("%Y%m%dT%H%M%S").to_string();
    let source_basename = entry.file_key.trim_end_matches(".csv");
    ack_buffer.flush(ack_store, ack_bucket, source_basename, &timestamp)?;

    audit::increment_processed_rows(conn, entry.id, processed)?;
    audit::finish(conn, entry.id, saw_unhandled)?;

    info!("file {} processed: {processed} row(s), failed={saw_unhandled}", entry.file_key);

    Ok(FileOutcome { processed_rows: processed, failed: saw_unhandled })
}

/// C7 (mutate) → C9 (delta): resolves the row's target id (by identifier
/// for UPDATE/DELETE, server-assigned for NEW), applies the mutation, then
/// projects the resulting flat record to the delta store.
#[allow(clippy::too_many_arguments)]
fn apply_mutation(
    conn: &mut PgConnection,
    policy: &RetryPolicy,
    log_sink: &dyn LogSink,
    source: &str,
    vaccine_type: &str,
    action: Option<ActionKind>,
    resource: &Value,
) -> Result<(), CrudError> {
    let (operation, imms_id, stored_resource) = match action {
        Some(ActionKind::New) => {
            let outcome = crud::create(conn, resource)?;
            (delta::Operation::Create, outcome.immunization.id, outcome.immunization.resource)
        }
        Some(ActionKind::Update) => {
            let existing = find_target(conn, resource)?;
            let updated = crud::update(conn, existing.id, resource)?;
            (delta::Operation::Update, updated.id, updated.resource)
        }
        Some(ActionKind::Delete) => {
            let existing = find_target(conn, resource)?;
            crud::delete(conn, existing.id)?;
            (delta::Operation::Delete, existing.id, resource.clone())
        }
        None => return Ok(()),
    };

    let (flat, conversion_errors) = imms_fhir::extract(&stored_resource);
    if !conversion_errors.is_empty() {
        warn!("delta projection for {imms_id} carried {} conversion error(s)", conversion_errors.len());
    }
    let flat_value = serde_json::to_value(&flat).unwrap_or(Value::Null);
    delta::project_best_effort(conn, policy, log_sink, imms_id, operation, source, &flat_value, vaccine_type);
    Ok(())
}

fn find_target(conn: &mut PgConnection, resource: &Value) -> Result<imms_db::models::DbImmunization, CrudError> {
    let identifier = resource
        .get("identifier")
        .and_then(Value::as_array)
        .and_then(|ids| ids.first())
        .ok_or(CrudError::MissingIdentifier)?;
    let system = identifier.get("system").and_then(Value::as_str).ok_or(CrudError::MissingIdentifier)?;
    let value = identifier.get("value").and_then(Value::as_str).ok_or(CrudError::MissingIdentifier)?;

    crud::find_by_identifier(conn, system, value)?.ok_or(CrudError::NotFound)
}
