//! Maps the CRUD engine's error taxonomy (§7) onto HTTP responses: every
//! user-visible failure at this layer is a FHIR `OperationOutcome`
//! resource, per §6's "unknown path/method" and §4.5's per-operation
//! status codes.

use imms_db::CrudError;
use miette::Diagnostic;
use rocket::http::Status;
use rocket::response::Responder;
use rocket::serde::json::Json;
use rocket::{Request, Response};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ApiError {
    #[error("malformed id: {0}")]
    MalformedId(String),

    #[error(transparent)]
    Crud(#[from] CrudError),
}

fn operation_outcome(severity: &str, code: &str, diagnostics: String) -> Value {
    json!({
        "resourceType": "OperationOutcome",
        "issue": [{
            "severity": severity,
            "code": code,
            "diagnostics": diagnostics,
        }],
    })
}

/// Postgres reports the live-identifier partial unique index violation as
/// a plain `DatabaseError(UniqueViolation, ..)`; `create` doesn't
/// pre-check for a live collision (it only checks for a deleted one, to
/// reinstate), so this is the only place that distinguishes the two.
fn is_identifier_unique_violation(err: &diesel::result::Error) -> bool {
    matches!(
        err,
        diesel::result::Error::DatabaseError(diesel::result::DatabaseErrorKind::UniqueViolation, _)
    )
}

impl ApiError {
    fn status(&self) -> Status {
        match self {
            ApiError::MalformedId(_) => Status::BadRequest,
            ApiError::Crud(CrudError::MissingIdentifier) => Status::BadRequest,
            ApiError::Crud(CrudError::NotFound) => Status::NotFound,
            ApiError::Crud(CrudError::IdMismatch { .. }) => Status::BadRequest,
            ApiError::Crud(CrudError::IdentifierMismatch { .. }) => Status::BadRequest,
            ApiError::Crud(CrudError::Db(err)) if is_identifier_unique_violation(err) => {
                Status::UnprocessableEntity
            }
            ApiError::Crud(CrudError::Db(_)) => Status::InternalServerError,
        }
    }

    fn outcome(&self) -> Value {
        match self {
            ApiError::MalformedId(id) => {
                operation_outcome("error", "value", format!("'{id}' is not a valid id"))
            }
            ApiError::Crud(CrudError::MissingIdentifier) => {
                operation_outcome("error", "required", self.to_string())
            }
            ApiError::Crud(CrudError::NotFound) => operation_outcome("error", "not-found", self.to_string()),
            ApiError::Crud(CrudError::IdMismatch { path, body }) => operation_outcome(
                "error",
                "invalid",
                format!("path id {path} does not match body id {body}"),
            ),
            ApiError::Crud(CrudError::IdentifierMismatch { system_mismatch, value_mismatch }) => {
                let field = match (system_mismatch, value_mismatch) {
                    (true, true) => "system and value",
                    (true, false) => "system",
                    (false, true) => "value",
                    (false, false) => "neither field",
                };
                operation_outcome(
                    "error",
                    "invalid",
                    format!("identifier {field} does not match the stored identifier"),
                )
            }
            ApiError::Crud(CrudError::Db(err)) if is_identifier_unique_violation(err) => {
                operation_outcome("error", "duplicate", "identifier already in use by a live record".into())
            }
            ApiError::Crud(CrudError::Db(_)) => operation_outcome("fatal", "exception", self.to_string()),
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for ApiError {
    fn respond_to(self, request: &'r Request<'_>) -> rocket::response::Result<'o> {
        if self.status().code == Status::InternalServerError.code {
            log::error!("{self}");
        } else {
            log::warn!("{self}");
        }

        Response::build_from(Json(self.outcome()).respond_to(request)?)
            .status(self.status())
            .ok()
    }
}
