//! The CRUD route handlers (C7, §4.5/§6): thin adapters from Rocket's
//! request/response types onto `imms_db::crud`. Every resource body and
//! response body is a raw FHIR `serde_json::Value` — this surface never
//! needs its own typed Immunization struct, it passes resources straight
//! through to the store.

use chrono::{DateTime, Utc};
use imms_db::crud::{self, CrudError, SearchFilter};
use rocket::form::FromForm;
use rocket::http::{Header, Status};
use rocket::response::Responder;
use rocket::serde::json::Json;
use rocket::{Request, Response};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::Db;

/// A resource body with a status code and the `Location`/`ETag` headers
/// §6 specifies for create/update; `rocket::serde::json::Json` alone
/// can't carry extra headers.
pub struct ResourceResponse {
    status: Status,
    location: Option<String>,
    etag: Option<i32>,
    body: Value,
}

impl<'r, 'o: 'r> Responder<'r, 'o> for ResourceResponse {
    fn respond_to(self, request: &'r Request<'_>) -> rocket::response::Result<'o> {
        let mut response = Response::build_from(Json(self.body).respond_to(request)?);
        response.status(self.status);
        if let Some(location) = self.location {
            response.header(Header::new("Location", location));
        }
        if let Some(version) = self.etag {
            response.header(Header::new("ETag", version.to_string()));
        }
        response.ok()
    }
}

fn parse_id(id: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(id).map_err(|_| ApiError::MalformedId(id.to_string()))
}

#[rocket::post("/Immunization", data = "<resource>")]
pub async fn create(db: Db, resource: Json<Value>) -> Result<ResourceResponse, ApiError> {
    let resource = resource.into_inner();
    let outcome = db.run(move |conn| crud::create(conn, &resource)).await?;

    Ok(ResourceResponse {
        status: Status::Created,
        location: Some(format!("Immunization/{}", outcome.immunization.id)),
        etag: Some(outcome.immunization.version),
        body: outcome.immunization.resource,
    })
}

#[rocket::get("/Immunization/<id>")]
pub async fn read(db: Db, id: &str) -> Result<Json<Value>, ApiError> {
    let id = parse_id(id)?;
    let record = db.run(move |conn| crud::read(conn, id)).await?;
    record
        .map(|r| Json(r.resource))
        .ok_or_else(|| ApiError::from(CrudError::NotFound))
}

#[rocket::put("/Immunization/<id>", data = "<resource>")]
pub async fn update(db: Db, id: &str, resource: Json<Value>) -> Result<ResourceResponse, ApiError> {
    let id = parse_id(id)?;
    let resource = resource.into_inner();

    // Resources created by this surface always carry their own `id`; a
    // body without one can never match the path, so it's a mismatch
    // against the nil id rather than a separate error kind.
    let body_id = resource
        .get("id")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or(Uuid::nil());

    if body_id != id {
        return Err(ApiError::from(CrudError::IdMismatch { path: id, body: body_id }));
    }

    let updated = db.run(move |conn| crud::update(conn, id, &resource)).await?;

    Ok(ResourceResponse {
        status: Status::Ok,
        location: None,
        etag: Some(updated.version),
        body: updated.resource,
    })
}

#[rocket::delete("/Immunization/<id>")]
pub async fn delete(db: Db, id: &str) -> Result<Status, ApiError> {
    let id = parse_id(id)?;
    db.run(move |conn| crud::delete(conn, id)).await?;
    Ok(Status::NoContent)
}

#[derive(FromForm)]
pub struct PatientQuery<'r> {
    identifier: &'r str,
}

#[derive(FromForm)]
pub struct DateQuery<'r> {
    start: Option<&'r str>,
    end: Option<&'r str>,
}

#[derive(FromForm)]
pub struct SearchQuery<'r> {
    patient: PatientQuery<'r>,
    #[field(name = "-date")]
    date: DateQuery<'r>,
}

fn parse_token(token: &str) -> &str {
    token.rsplit('|').next().unwrap_or(token)
}

#[rocket::get("/Immunization?<query..>")]
pub async fn search(db: Db, query: SearchQuery<'_>) -> Result<Json<Value>, ApiError> {
    let nhs_number = parse_token(query.patient.identifier).to_string();
    let date_from = query
        .date
        .start
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc));
    let date_to = query
        .date
        .end
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc));

    let lookup_nhs_number = nhs_number.clone();
    let records = db
        .run(move |conn| {
            let filter = SearchFilter { nhs_number: &lookup_nhs_number, date_from, date_to };
            crud::search(conn, &filter)
        })
        .await?;

    let patient_full_url = format!("Patient/{nhs_number}");
    let entries: Vec<Value> = records
        .into_iter()
        .map(|record| {
            let filtered = crud::apply_search_filter(&record.resource, &patient_full_url, &nhs_number);
            json!({
                "fullUrl": format!("Immunization/{}", record.id),
                "resource": filtered,
                "search": { "mode": "match" },
            })
        })
        .collect();

    Ok(Json(json!({
        "resourceType": "Bundle",
        "type": "searchset",
        "total": entries.len(),
        "entry": entries,
    })))
}

#[rocket::get("/_ping")]
pub fn ping() -> &'static str {
    "OK"
}

#[rocket::get("/_status")]
pub async fn status(db: Db) -> Result<&'static str, ApiError> {
    use diesel::RunQueryDsl;

    db.run(|conn| diesel::sql_query("select 1").execute(conn))
        .await
        .map_err(CrudError::from)?;

    Ok("OK")
}
