use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;
use uuid::Uuid;

/// The six audit states an ingested row moves through (§3, §C1 lifecycle).
/// Stored as text rather than a Postgres enum so new states can be added
/// without a migration that rewrites every row.
pub const AUDIT_STATUS_QUEUED: &str = "Queued";
pub const AUDIT_STATUS_PROCESSING: &str = "Processing";
pub const AUDIT_STATUS_PROCESSED: &str = "Processed";
pub const AUDIT_STATUS_FAILED: &str = "Failed";

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::audit)]
pub struct NewAuditEntry<'a> {
    pub id: Uuid,
    pub file_key: &'a str,
    pub row_index: i32,
    pub supplier: &'a str,
    pub vaccine_type: &'a str,
    pub status: &'a str,
    pub record_count: Option<i32>,
    pub processed_rows: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Identifiable, Queryable, Selectable)]
#[diesel(table_name = crate::schema::audit)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DbAuditEntry {
    pub id: Uuid,
    pub file_key: String,
    pub row_index: i32,
    pub supplier: String,
    pub vaccine_type: String,
    pub status: String,
    pub record_count: Option<i32>,
    pub processed_rows: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::immunizations)]
pub struct NewImmunization<'a> {
    pub id: Uuid,
    pub identifier_system: &'a str,
    pub identifier_value: &'a str,
    pub nhs_number: Option<&'a str>,
    pub version: i32,
    pub deleted: bool,
    pub resource: &'a Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Identifiable, Queryable, Selectable)]
#[diesel(table_name = crate::schema::immunizations)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DbImmunization {
    pub id: Uuid,
    pub identifier_system: String,
    pub identifier_value: String,
    pub nhs_number: Option<String>,
    pub version: i32,
    pub deleted: bool,
    pub resource: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::delta_entries)]
pub struct NewDeltaEntry<'a> {
    pub imms_id: Uuid,
    pub date_time_stamp: DateTime<Utc>,
    pub operation: &'a str,
    pub source: &'a str,
    pub flat: &'a Value,
    pub vaccine_type: &'a str,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::delta_entries)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DbDeltaEntry {
    pub imms_id: Uuid,
    pub date_time_stamp: DateTime<Utc>,
    pub operation: String,
    pub source: String,
    pub flat: Value,
    pub vaccine_type: String,
}
