mod error;
mod immunization;

use rocket::http::{Header, Status};
use rocket::response::Responder;
use rocket::serde::json::Json;
use rocket::{Catcher, Request, Response, Route};
use serde_json::{json, Value};

pub fn routes() -> Vec<Route> {
    rocket::routes![
        immunization::create,
        immunization::read,
        immunization::update,
        immunization::delete,
        immunization::search,
        immunization::ping,
        immunization::status,
    ]
}

fn operation_outcome(code: &str, diagnostics: String) -> Value {
    json!({
        "resourceType": "OperationOutcome",
        "issue": [{ "severity": "error", "code": code, "diagnostics": diagnostics }],
    })
}

/// §6: unknown path → 404 with an `OperationOutcome`.
#[rocket::catch(404)]
fn not_found(req: &Request) -> Json<Value> {
    Json(operation_outcome("not-found", format!("no resource at {}", req.uri())))
}

/// §6: unknown method → 405 with `Allow: GET, POST, PUT, DELETE` and an
/// `OperationOutcome`. Rocket's router reports this as 404 when no route
/// matches any method either, so this catcher only fires for a path that
/// exists under a different method.
struct MethodNotAllowed;

impl<'r, 'o: 'r> Responder<'r, 'o> for MethodNotAllowed {
    fn respond_to(self, request: &'r Request<'_>) -> rocket::response::Result<'o> {
        let body = operation_outcome("not-supported", "method not allowed on this resource".into());
        let mut response = Response::build_from(Json(body).respond_to(request)?);
        response.status(Status::MethodNotAllowed);
        response.header(Header::new("Allow", "GET, POST, PUT, DELETE"));
        response.ok()
    }
}

#[rocket::catch(405)]
fn method_not_allowed() -> MethodNotAllowed {
    MethodNotAllowed
}

pub fn catchers() -> Vec<Catcher> {
    rocket::catchers![not_found, method_not_allowed]
}
