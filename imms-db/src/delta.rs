//! The delta projector (C9, §4.8): on every successful C7 mutation,
//! appends a flat-record snapshot to the append-only delta store. Writes
//! are best-effort but durable once persisted — a temporary failure
//! retries with backoff, then logs a warning rather than rolling back the
//! CRUD mutation that triggered it.

use chrono::Utc;
use diesel::prelude::*;
use diesel::PgConnection;
use imms_support::{LogSink, RetryPolicy};
use serde_json::Value;
use uuid::Uuid;

use crate::models::NewDeltaEntry;
use crate::schema::delta_entries;
use crate::QueryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

/// Writes one delta entry. The CRUD mutation this follows has already
/// committed, so a failure here is never allowed to propagate as an error
/// the caller must roll anything back for — call [`project_best_effort`]
/// from ordinary call sites instead of this directly.
fn insert_delta_entry(
    conn: &mut PgConnection,
    imms_id: Uuid,
    operation: Operation,
    source: &str,
    flat: &Value,
    vaccine_type: &str,
) -> QueryResult<()> {
    let entry = NewDeltaEntry {
        imms_id,
        date_time_stamp: Utc::now(),
        operation: operation.as_str(),
        source,
        flat,
        vaccine_type,
    };

    diesel::insert_into(delta_entries::table)
        .values(&entry)
        .execute(conn)?;
    Ok(())
}

/// Retries `insert_delta_entry` per the shared retry policy; on exhaustion
/// logs a warning and returns without error, matching §4.8's "surface a
/// log-only warning — the CRUD mutation is not rolled back".
pub fn project_best_effort(
    conn: &mut PgConnection,
    policy: &RetryPolicy,
    log_sink: &dyn LogSink,
    imms_id: Uuid,
    operation: Operation,
    source: &str,
    flat: &Value,
    vaccine_type: &str,
) {
    let result = policy.retry_sync(|| insert_delta_entry(conn, imms_id, operation, source, flat, vaccine_type));

    if let Err(err) = result {
        log_sink.warn(&format!(
            "delta projection for immunization {imms_id} ({operation:?}) failed after retries \
            and will not be retried further: {err}",
        ));
    }
}

/// Supports C9's secondary index `SearchIndex(Operation, DateTimeStamp)`:
/// a range scan over entries for a given operation, most recent first.
pub fn recent_by_operation(
    conn: &mut PgConnection,
    operation: Operation,
    limit: i64,
) -> Result<Vec<crate::models::DbDeltaEntry>, QueryError> {
    delta_entries::table
        .filter(delta_entries::operation.eq(operation.as_str()))
        .order_by(delta_entries::date_time_stamp.desc())
        .limit(limit)
        .load(conn)
}
