//! The audit table (C1): the sole synchronisation point across ingest
//! workers. Every state transition is a conditional update guarded by the
//! row's current state, matching §5's "all state transitions are
//! conditional updates guarded by the current state" invariant — two
//! workers racing to advance the same file can't both succeed.

use chrono::Utc;
use diesel::prelude::*;
use diesel::PgConnection;
use miette::Diagnostic;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    DbAuditEntry, NewAuditEntry, AUDIT_STATUS_FAILED, AUDIT_STATUS_PROCESSED,
    AUDIT_STATUS_PROCESSING, AUDIT_STATUS_QUEUED,
};
use crate::schema::audit;
use crate::QueryError;

#[derive(Debug, Error, Diagnostic)]
pub enum AuditError {
    #[error("database error")]
    Db(#[from] QueryError),

    #[error("audit entry {0} was not in the expected state for this transition")]
    UnexpectedState(Uuid),
}

/// Creates a new entry in `Queued`, as C3 does on successful filename
/// validation.
pub fn create_queued(
    conn: &mut PgConnection,
    file_key: &str,
    supplier: &str,
    vaccine_type: &str,
    record_count: Option<i32>,
) -> Result<DbAuditEntry, AuditError> {
    let now = Utc::now();
    let new_entry = NewAuditEntry {
        id: Uuid::new_v4(),
        file_key,
        row_index: 0,
        supplier,
        vaccine_type,
        status: AUDIT_STATUS_QUEUED,
        record_count,
        processed_rows: 0,
        created_at: now,
        updated_at: now,
    };

    diesel::insert_into(audit::table)
        .values(&new_entry)
        .get_result(conn)
        .map_err(AuditError::from)
}

/// C10 promoting the next queued entry in a partition to `Processing`.
/// Fails with `UnexpectedState` if another worker already advanced it
/// (the `status.eq(Queued)` filter makes this a single conditional
/// update, not a read-then-write race).
pub fn advance_to_processing(conn: &mut PgConnection, id: Uuid) -> Result<(), AuditError> {
    let updated = diesel::update(audit::table.find(id))
        .filter(audit::status.eq(AUDIT_STATUS_QUEUED))
        .set((audit::status.eq(AUDIT_STATUS_PROCESSING), audit::updated_at.eq(Utc::now())))
        .execute(conn)?;

    if updated == 0 {
        return Err(AuditError::UnexpectedState(id));
    }
    Ok(())
}

/// C8 incrementing the processed-row counter as rows complete.
pub fn increment_processed_rows(conn: &mut PgConnection, id: Uuid, by: i32) -> Result<DbAuditEntry, AuditError> {
    diesel::update(audit::table.find(id))
        .set((
            audit::processed_rows.eq(audit::processed_rows + by),
            audit::updated_at.eq(Utc::now()),
        ))
        .get_result(conn)
        .map_err(AuditError::from)
}

/// C8 transitioning to a terminal state once `processed_rows ==
/// record_count` (`Processed`) or an infrastructure-level failure is
/// observed (`Failed`). Only valid from `Processing`.
pub fn finish(conn: &mut PgConnection, id: Uuid, failed: bool) -> Result<(), AuditError> {
    let status = if failed { AUDIT_STATUS_FAILED } else { AUDIT_STATUS_PROCESSED };

    let updated = diesel::update(audit::table.find(id))
        .filter(audit::status.eq(AUDIT_STATUS_PROCESSING))
        .set((audit::status.eq(status), audit::updated_at.eq(Utc::now())))
        .execute(conn)?;

    if updated == 0 {
        return Err(AuditError::UnexpectedState(id));
    }
    Ok(())
}

/// C10's watchdog: a file stuck in `Processing` past its deadline is
/// marked `Failed` so its successor can be promoted.
pub fn fail_stuck_processing(conn: &mut PgConnection, id: Uuid) -> Result<(), AuditError> {
    let updated = diesel::update(audit::table.find(id))
        .filter(audit::status.eq(AUDIT_STATUS_PROCESSING))
        .set((audit::status.eq(AUDIT_STATUS_FAILED), audit::updated_at.eq(Utc::now())))
        .execute(conn)?;

    if updated == 0 {
        return Err(AuditError::UnexpectedState(id));
    }
    Ok(())
}

/// All entries currently `Processing`, for the orchestrator's watchdog
/// sweep over every partition at once.
pub fn list_processing(conn: &mut PgConnection) -> Result<Vec<DbAuditEntry>, AuditError> {
    audit::table
        .filter(audit::status.eq(AUDIT_STATUS_PROCESSING))
        .select(DbAuditEntry::as_select())
        .load(conn)
        .map_err(AuditError::from)
}

/// Every distinct `(supplier, vaccine_type)` partition with at least one
/// `Queued` entry, for the orchestrator's dispatch sweep.
pub fn partitions_with_queued_entries(conn: &mut PgConnection) -> Result<Vec<(String, String)>, AuditError> {
    audit::table
        .filter(audit::status.eq(AUDIT_STATUS_QUEUED))
        .select((audit::supplier, audit::vaccine_type))
        .distinct()
        .load(conn)
        .map_err(AuditError::from)
}

/// The oldest `Queued` entry for a partition, if any is eligible to start
/// (i.e. nothing in that partition is currently `Processing`).
pub fn next_queued_for_partition(
    conn: &mut PgConnection,
    supplier: &str,
    vaccine_type: &str,
) -> Result<Option<DbAuditEntry>, AuditError> {
    let in_flight: i64 = audit::table
        .filter(audit::supplier.eq(supplier))
        .filter(audit::vaccine_type.eq(vaccine_type))
        .filter(audit::status.eq(AUDIT_STATUS_PROCESSING))
        .count()
        .get_result(conn)?;

    if in_flight > 0 {
        return Ok(None);
    }

    audit::table
        .filter(audit::supplier.eq(supplier))
        .filter(audit::vaccine_type.eq(vaccine_type))
        .filter(audit::status.eq(AUDIT_STATUS_QUEUED))
        .order_by(audit::created_at.asc())
        .first(conn)
        .optional()
        .map_err(AuditError::from)
}
