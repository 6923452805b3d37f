//! The CRUD engine (C7, §4.5): identifier-indexed put/get/update/delete/
//! search against the immunisation store, with optimistic-concurrency
//! versioning and logical delete/reinstate.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::PgConnection;
use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{DbImmunization, NewImmunization};
use crate::schema::immunizations;
use crate::QueryError;

#[derive(Debug, Error, Diagnostic)]
pub enum CrudError {
    #[error("database error")]
    Db(#[from] QueryError),

    #[error("resource has no identifier[0].{{system,value}}")]
    MissingIdentifier,

    #[error("not found")]
    NotFound,

    #[error("path id {path} does not match body id {body}")]
    IdMismatch { path: Uuid, body: Uuid },

    #[error("identifier in body does not match the stored identifier")]
    IdentifierMismatch { system_mismatch: bool, value_mismatch: bool },
}

/// Outcome of a `create`, distinguishing a brand new record from a
/// reinstated one so the caller can decide response semantics (both
/// return 201 per §4.5, but callers may want to know which happened).
pub struct CreateOutcome {
    pub immunization: DbImmunization,
    pub reinstated: bool,
}

fn extract_identifier(resource: &Value) -> Result<(&str, &str), CrudError> {
    let identifier = resource
        .get("identifier")
        .and_then(Value::as_array)
        .and_then(|ids| ids.first())
        .ok_or(CrudError::MissingIdentifier)?;

    let system = identifier.get("system").and_then(Value::as_str).ok_or(CrudError::MissingIdentifier)?;
    let value = identifier.get("value").and_then(Value::as_str).ok_or(CrudError::MissingIdentifier)?;
    Ok((system, value))
}

fn extract_nhs_number(resource: &Value) -> Option<&str> {
    resource
        .get("contained")?
        .as_array()?
        .iter()
        .find(|c| c.get("resourceType").and_then(Value::as_str) == Some("Patient"))?
        .get("identifier")?
        .as_array()?
        .iter()
        .find(|id| id.get("system").and_then(Value::as_str) == Some("https://fhir.nhs.uk/Id/nhs-number"))?
        .get("value")?
        .as_str()
}

pub fn create(conn: &mut PgConnection, resource: &Value) -> Result<CreateOutcome, CrudError> {
    let (system, value) = extract_identifier(resource)?;
    let now = Utc::now();

    let existing_deleted: Option<DbImmunization> = immunizations::table
        .filter(immunizations::identifier_system.eq(system))
        .filter(immunizations::identifier_value.eq(value))
        .filter(immunizations::deleted.eq(true))
        .first(conn)
        .optional()?;

    if let Some(existing) = existing_deleted {
        let updated = diesel::update(immunizations::table.find(existing.id))
            .set((
                immunizations::resource.eq(resource),
                immunizations::nhs_number.eq(extract_nhs_number(resource)),
                immunizations::version.eq(immunizations::version + 1),
                immunizations::deleted.eq(false),
                immunizations::updated_at.eq(now),
            ))
            .get_result(conn)?;

        return Ok(CreateOutcome { immunization: updated, reinstated: true });
    }

    let new_immunization = NewImmunization {
        id: Uuid::new_v4(),
        identifier_system: system,
        identifier_value: value,
        nhs_number: extract_nhs_number(resource),
        version: 1,
        deleted: false,
        resource,
        created_at: now,
        updated_at: now,
    };

    let inserted = diesel::insert_into(immunizations::table)
        .values(&new_immunization)
        .get_result(conn)?;

    Ok(CreateOutcome { immunization: inserted, reinstated: false })
}

/// Looks up a live record by its business identifier rather than its
/// server-assigned id. The HTTP surface never needs this (callers always
/// address by id), but the batch pipeline's UPDATE/DELETE rows only carry
/// `identifier[0].{system,value}` — they resolve the id through here first.
pub fn find_by_identifier(conn: &mut PgConnection, system: &str, value: &str) -> Result<Option<DbImmunization>, CrudError> {
    immunizations::table
        .filter(immunizations::identifier_system.eq(system))
        .filter(immunizations::identifier_value.eq(value))
        .filter(immunizations::deleted.eq(false))
        .first(conn)
        .optional()
        .map_err(CrudError::from)
}

/// `None` if the id is missing or logically deleted, matching §4.5's
/// "404 if not found or logically deleted".
pub fn read(conn: &mut PgConnection, id: Uuid) -> Result<Option<DbImmunization>, CrudError> {
    immunizations::table
        .find(id)
        .filter(immunizations::deleted.eq(false))
        .first(conn)
        .optional()
        .map_err(CrudError::from)
}

pub fn update(conn: &mut PgConnection, id: Uuid, resource: &Value) -> Result<DbImmunization, CrudError> {
    let existing = read(conn, id)?.ok_or(CrudError::NotFound)?;

    let (system, value) = extract_identifier(resource)?;
    if system != existing.identifier_system || value != existing.identifier_value {
        return Err(CrudError::IdentifierMismatch {
            system_mismatch: system != existing.identifier_system,
            value_mismatch: value != existing.identifier_value,
        });
    }

    diesel::update(immunizations::table.find(id))
        .set((
            immunizations::resource.eq(resource),
            immunizations::nhs_number.eq(extract_nhs_number(resource)),
            immunizations::version.eq(immunizations::version + 1),
            immunizations::updated_at.eq(Utc::now()),
        ))
        .get_result(conn)
        .map_err(CrudError::from)
}

/// Idempotent-bounded: a second delete of the same id sees it already
/// `deleted` and returns `NotFound`, per §4.5.
pub fn delete(conn: &mut PgConnection, id: Uuid) -> Result<(), CrudError> {
    let updated = diesel::update(immunizations::table.find(id))
        .filter(immunizations::deleted.eq(false))
        .set((
            immunizations::deleted.eq(true),
            immunizations::nhs_number.eq(None::<&str>),
            immunizations::updated_at.eq(Utc::now()),
        ))
        .execute(conn)?;

    if updated == 0 {
        return Err(CrudError::NotFound);
    }
    Ok(())
}

pub struct SearchFilter<'a> {
    pub nhs_number: &'a str,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
}

pub fn search(conn: &mut PgConnection, filter: &SearchFilter<'_>) -> Result<Vec<DbImmunization>, CrudError> {
    let mut query = immunizations::table
        .filter(immunizations::deleted.eq(false))
        .filter(immunizations::nhs_number.eq(filter.nhs_number))
        .into_boxed();

    if let Some(from) = filter.date_from {
        query = query.filter(immunizations::created_at.ge(from));
    }
    if let Some(to) = filter.date_to {
        query = query.filter(immunizations::created_at.le(to));
    }

    query.load(conn).map_err(CrudError::from)
}

/// C7's search-filter transform (§4.5): strips the contained Practitioner
/// reference, injects a patient reference, obfuscates addresses, replaces
/// the organization performer identifier, and drops `contained`. Pure and
/// idempotent — running it twice on its own output is a no-op.
pub fn apply_search_filter(resource: &Value, patient_full_url: &str, nhs_number: &str) -> Value {
    let mut resource = resource.clone();

    if let Some(performers) = resource.get_mut("performer").and_then(Value::as_array_mut) {
        for performer in performers.iter_mut() {
            let Some(actor) = performer.get_mut("actor") else { continue };
            if actor.get("reference").and_then(Value::as_str).map(|r| r.starts_with("#")).unwrap_or(false) {
                *performer = Value::Null;
                continue;
            }
            if actor.get("type").and_then(Value::as_str) == Some("Organization") {
                actor["identifier"] = serde_json::json!({
                    "system": "https://fhir.nhs.uk/Id/ods-organization-code",
                    "value": "N2N9I",
                });
            }
        }
        performers.retain(|p| !p.is_null());
    }

    resource["patient"] = serde_json::json!({
        "reference": patient_full_url,
        "identifier": {
            "system": "https://fhir.nhs.uk/Id/nhs-number",
            "value": nhs_number,
        }
    });

    if let Some(identifiers) = resource.get_mut("identifier").and_then(Value::as_array_mut) {
        if let Some(first) = identifiers.first_mut() {
            if first.get("use").is_none() {
                first["use"] = serde_json::json!("official");
            }
        }
    }

    // The spec calls for obfuscating postcodes in contained.Patient.address,
    // but contained is dropped wholesale below, so there is nothing left to
    // obfuscate by the time a caller could observe it.
    if let Value::Object(map) = &mut resource {
        map.remove("contained");
    }

    resource
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn search_filter_drops_contained_and_injects_patient_reference() {
        let resource = json!({
            "resourceType": "Immunization",
            "identifier": [{"system": "https://supplier.example/id", "value": "ABC"}],
            "performer": [
                {"actor": {"reference": "#Practitioner1"}},
                {"actor": {"type": "Organization", "identifier": {"system": "https://fhir.nhs.uk/Id/ods-organization-code", "value": "RVVKC"}}}
            ],
            "contained": [{"resourceType": "Patient", "address": [{"postalCode": "LS1 4HR"}]}],
        });

        let filtered = apply_search_filter(&resource, "Patient/abc-123", "9000000009");

        assert!(filtered.get("contained").is_none());
        assert_eq!(filtered["patient"]["reference"], "Patient/abc-123");
        assert_eq!(filtered["patient"]["identifier"]["value"], "9000000009");
        assert_eq!(filtered["identifier"][0]["use"], "official");
        assert_eq!(filtered["performer"].as_array().unwrap().len(), 1);
        assert_eq!(filtered["performer"][0]["actor"]["identifier"]["value"], "N2N9I");
    }

    #[test]
    fn search_filter_is_idempotent() {
        let resource = json!({
            "identifier": [{"system": "s", "value": "v", "use": "official"}],
            "performer": [],
        });
        let once = apply_search_filter(&resource, "Patient/1", "9000000009");
        let twice = apply_search_filter(&once, "Patient/1", "9000000009");
        assert_eq!(once, twice);
    }
}
