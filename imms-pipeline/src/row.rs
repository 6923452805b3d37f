//! The row processor (C5, §4.3): for each CSV row, builds a FHIR resource
//! skeleton, validates it, derives the row's vaccine type from the
//! reference cache, and produces the envelope the shard forwarder (C6)
//! publishes.

use imms_db::ReferenceCache;
use imms_fhir::{build_skeleton, ActionFlag, FlatRow, SkeletonError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: String,
    pub message: String,
}

impl Diagnostic {
    pub const MANDATORY: &'static str = "MANDATORY";
    pub const VALIDATION: &'static str = "VALIDATION";
    pub const VACCINE_TYPE_MISMATCH: &'static str = "VACCINE_TYPE_MISMATCH";
    pub const UNHANDLED: &'static str = "UNHANDLED";

    fn new(code: &str, message: impl Into<String>) -> Self {
        Self { code: code.to_string(), message: message.into() }
    }
}

/// The per-row outcome published onto the shard stream (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowEnvelope {
    pub row_id: String,
    pub file_key: String,
    pub vaccine_type: String,
    pub supplier: String,
    pub created_at_formatted_string: String,
    pub diagnostics: Vec<Diagnostic>,
    pub fhir: Option<Value>,
    pub action: Option<ActionKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    New,
    Update,
    Delete,
}

impl From<ActionFlag> for ActionKind {
    fn from(action: ActionFlag) -> Self {
        match action {
            ActionFlag::New => Self::New,
            ActionFlag::Update => Self::Update,
            ActionFlag::Delete => Self::Delete,
        }
    }
}

impl RowEnvelope {
    pub fn is_success(&self) -> bool {
        self.fhir.is_some() && self.diagnostics.is_empty()
    }

    pub fn has_unhandled_error(&self) -> bool {
        self.diagnostics.iter().any(|d| d.code == Diagnostic::UNHANDLED)
    }
}

/// Pre-validation (§4.3): field-level presence/format checks a FHIR
/// builder can't express, run before the skeleton is trusted.
fn pre_validate(row: &FlatRow) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    if row.unique_id.is_empty() || row.unique_id_uri.is_empty() {
        diagnostics.push(Diagnostic::new(Diagnostic::MANDATORY, "identifier[0].{system,value} is required"));
    }
    if row.date_and_time.is_empty() {
        diagnostics.push(Diagnostic::new(Diagnostic::MANDATORY, "DATE_AND_TIME is required"));
    }
    diagnostics
}

/// FHIR-level validation (§4.3): required fields/cardinalities/code-system
/// constraints on the built skeleton.
fn validate_fhir(resource: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    if resource.get("patient").and_then(|p| p.get("reference")).and_then(Value::as_str).is_none() {
        diagnostics.push(Diagnostic::new(Diagnostic::VALIDATION, "patient.reference is required"));
    }
    if resource
        .get("identifier")
        .and_then(Value::as_array)
        .and_then(|ids| ids.first())
        .and_then(|id| id.get("value"))
        .and_then(Value::as_str)
        .is_none()
    {
        diagnostics.push(Diagnostic::new(Diagnostic::VALIDATION, "identifier[0].value is required"));
    }
    diagnostics
}

fn extract_disease_codes(resource: &Value) -> Vec<&str> {
    resource
        .get("protocolApplied")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|p| p.get("targetDisease"))
        .filter_map(Value::as_array)
        .flatten()
        .filter_map(|d| d.get("coding"))
        .filter_map(Value::as_array)
        .flatten()
        .filter_map(|c| c.get("code"))
        .filter_map(Value::as_str)
        .collect()
}

/// Processes one CSV row into a [`RowEnvelope`], matching it against
/// `filename_vaccine_type` (the file's declared vaccine type) via the
/// reference cache's disease-code mapping.
pub fn process_row(
    row: &FlatRow,
    row_index: usize,
    message_id: &str,
    file_key: &str,
    supplier: &str,
    filename_vaccine_type: &str,
    cache: &ReferenceCache,
    now: chrono::DateTime<chrono::Utc>,
) -> RowEnvelope {
    let row_id = format!("{message_id}^{row_index}");
    let created_at_formatted_string = now.format("%Y%m%dT%H%M%S").to_string();

    let action = match ActionFlag::parse(&row.action_flag) {
        Ok(action) => action,
        Err(err) => {
            return RowEnvelope {
                row_id,
                file_key: file_key.to_string(),
                vaccine_type: filename_vaccine_type.to_string(),
                supplier: supplier.to_string(),
                created_at_formatted_string,
                diagnostics: vec![Diagnostic::new(Diagnostic::MANDATORY, skeleton_error_message(&err))],
                fhir: None,
                action: None,
            };
        }
    };

    let mut diagnostics = pre_validate(row);
    let resource = build_skeleton(row, action);
    diagnostics.extend(validate_fhir(&resource));

    if diagnostics.is_empty() {
        let disease_codes = extract_disease_codes(&resource);
        match cache.disease_codes_to_vaccine_type(&disease_codes) {
            Some(resolved) if resolved == filename_vaccine_type => {}
            Some(resolved) => diagnostics.push(Diagnostic::new(
                Diagnostic::VACCINE_TYPE_MISMATCH,
                format!("row resolves to vaccine type {resolved:?}, file declares {filename_vaccine_type:?}"),
            )),
            None => diagnostics.push(Diagnostic::new(
                Diagnostic::VACCINE_TYPE_MISMATCH,
                "no disease code in the row maps to a known vaccine type",
            )),
        }
    }

    let fhir = if diagnostics.is_empty() { Some(resource) } else { None };

    RowEnvelope {
        row_id,
        file_key: file_key.to_string(),
        vaccine_type: filename_vaccine_type.to_string(),
        supplier: supplier.to_string(),
        created_at_formatted_string,
        diagnostics,
        fhir,
        action: Some(ActionKind::from(action)),
    }
}

fn skeleton_error_message(err: &SkeletonError) -> String {
    err.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_cache() -> ReferenceCache {
        ReferenceCache::from_parts([], [], [])
    }

    fn minimal_row() -> FlatRow {
        FlatRow {
            unique_id: "ABC".into(),
            unique_id_uri: "https://supplier.example/id".into(),
            date_and_time: "20250101T120000".into(),
            action_flag: "NEW".into(),
            ..Default::default()
        }
    }

    #[test]
    fn missing_action_flag_is_a_mandatory_diagnostic() {
        let row = FlatRow { action_flag: "".into(), ..minimal_row() };
        let envelope = process_row(
            &row,
            0,
            "msg-1",
            "FLU_Vaccinations_V5_X26_20250101T12000001.csv",
            "ACME",
            "FLU",
            &empty_cache(),
            chrono::Utc::now(),
        );
        assert!(envelope.fhir.is_none());
        assert!(envelope.action.is_none());
        assert_eq!(envelope.diagnostics.len(), 1);
    }

    #[test]
    fn unresolved_vaccine_type_is_a_mismatch_diagnostic() {
        let envelope = process_row(
            &minimal_row(),
            0,
            "msg-1",
            "FLU_Vaccinations_V5_X26_20250101T12000001.csv",
            "ACME",
            "FLU",
            &empty_cache(),
            chrono::Utc::now(),
        );
        assert!(envelope.fhir.is_none());
        assert!(envelope.diagnostics.iter().any(|d| d.code == Diagnostic::VACCINE_TYPE_MISMATCH));
    }

    #[test]
    fn matching_vaccine_type_produces_a_successful_envelope() {
        let mut row = minimal_row();
        row.vaccination_procedure_code = "123".into();

        let cache = ReferenceCache::from_parts([], [], [("123".to_string(), "FLU".to_string())]);
        let envelope = process_row(
            &row,
            2,
            "msg-1",
            "FLU_Vaccinations_V5_X26_20250101T12000001.csv",
            "ACME",
            "FLU",
            &cache,
            chrono::Utc::now(),
        );

        assert!(envelope.is_success());
        assert_eq!(envelope.row_id, "msg-1^2");
        assert_eq!(envelope.action, Some(ActionKind::New));
    }
}
