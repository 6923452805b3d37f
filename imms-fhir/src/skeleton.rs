//! The reverse direction of the converter: builds a FHIR Immunization
//! resource skeleton from a flat CSV row, for the row processor (C5). This
//! is deliberately a skeleton, not a full round-trip inverse of
//! [`crate::extract::extract`] — pre-validation and FHIR validation (also
//! C5's job) fill in anything this builder leaves absent, and reject the
//! row if a required field never arrives.

use serde_json::{json, Value};

use crate::errors::SkeletonError;
use crate::flat::FlatRow;

/// The three row-level operations a flat row can request, resolved
/// case-insensitively from `ACTION_FLAG` (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionFlag {
    New,
    Update,
    Delete,
}

impl ActionFlag {
    pub fn parse(raw: &str) -> Result<Self, SkeletonError> {
        if raw.trim().is_empty() {
            return Err(SkeletonError::MissingActionFlag);
        }
        match raw.trim().to_ascii_uppercase().as_str() {
            "NEW" => Ok(Self::New),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            other => Err(SkeletonError::UnrecognisedActionFlag(other.to_string())),
        }
    }
}

/// Builds a skeleton Immunization resource from `row`. Fields left blank in
/// the row are simply omitted rather than defaulted, so downstream
/// validation can distinguish "absent" from "present but empty".
pub fn build_skeleton(row: &FlatRow, action: ActionFlag) -> Value {
    let mut contained = Vec::new();
    contained.push(build_patient(row));
    if !row.performing_professional_forename.is_empty() || !row.performing_professional_surname.is_empty() {
        contained.push(build_practitioner(row));
    }

    let mut resource = json!({
        "resourceType": "Immunization",
        "contained": contained,
        "status": match action {
            ActionFlag::Delete => "entered-in-error",
            _ => "completed",
        },
        "identifier": [non_empty_object(&row.unique_id_uri, &row.unique_id)],
        "patient": {"reference": "#Patient1"},
        "recorded": blank_to_null(&row.recorded_date),
        "primarySource": parse_primary_source(&row.primary_source),
        "lotNumber": blank_to_null(&row.batch_number),
        "expirationDate": blank_to_null(&row.expiry_date),
        "manufacturer": { "display": blank_to_null(&row.vaccine_manufacturer) },
        "site": coding_object(&row.site_of_vaccination_code, &row.site_of_vaccination_term),
        "route": coding_object(&row.route_of_vaccination_code, &row.route_of_vaccination_term),
        "doseQuantity": {
            "value": row.dose_amount.parse::<f64>().ok(),
            "code": blank_to_null(&row.dose_unit_code),
            "unit": blank_to_null(&row.dose_unit_term),
        },
        "vaccineCode": coding_object(&row.vaccine_product_code, &row.vaccine_product_term),
        "location": {
            "identifier": {
                "value": blank_to_null(&row.location_code),
                "system": blank_to_null(&row.location_code_type_uri),
            }
        },
        "performer": [{
            "actor": {
                "type": "Organization",
                "identifier": {
                    "value": blank_to_null(&row.site_code),
                    "system": blank_to_null(&row.site_code_type_uri),
                }
            }
        }],
    });

    if !row.date_and_time.is_empty() {
        resource["occurrenceDateTime"] = json!(row.date_and_time);
    }

    // protocolApplied[0].targetDisease carries the disease coding the row
    // processor resolves a vaccine type from (§4.3); the flat schema has no
    // separate disease column, so the vaccination procedure code — a
    // disease-specific SNOMED concept — doubles as that coding.
    if !row.vaccination_procedure_code.is_empty() || !row.dose_sequence.is_empty() {
        let mut protocol = serde_json::Map::new();
        if !row.vaccination_procedure_code.is_empty() {
            protocol.insert(
                "targetDisease".to_string(),
                json!([coding_object(&row.vaccination_procedure_code, &row.vaccination_procedure_term)]),
            );
        }
        if let Ok(n) = row.dose_sequence.parse::<u64>() {
            protocol.insert("doseNumberPositiveInt".to_string(), json!(n));
        }
        resource["protocolApplied"] = json!([Value::Object(protocol)]);
    }
    if !row.vaccination_procedure_code.is_empty() {
        resource["extension"] = json!([{
            "url": "https://fhir.hl7.org.uk/StructureDefinition/Extension-UKCore-VaccinationProcedure",
            "valueCodeableConcept": coding_object(&row.vaccination_procedure_code, &row.vaccination_procedure_term),
        }]);
    }
    if !row.indication_code.is_empty() {
        resource["reasonCode"] = json!([coding_object(&row.indication_code, "")]);
    }

    resource
}

fn build_patient(row: &FlatRow) -> Value {
    let mut identifiers = Vec::new();
    if !row.nhs_number.is_empty() {
        identifiers.push(json!({
            "system": "https://fhir.nhs.uk/Id/nhs-number",
            "value": row.nhs_number,
        }));
    }

    json!({
        "resourceType": "Patient",
        "id": "Patient1",
        "identifier": identifiers,
        "name": [{
            "use": "official",
            "given": row.person_forename.split(' ').filter(|s| !s.is_empty()).collect::<Vec<_>>(),
            "family": row.person_surname,
        }],
        "gender": gender_from_code(&row.person_gender_code),
        "birthDate": blank_to_null(&row.person_dob),
        "address": [{
            "use": "home",
            "postalCode": row.person_postcode,
        }],
    })
}

fn build_practitioner(row: &FlatRow) -> Value {
    json!({
        "resourceType": "Practitioner",
        "id": "Practitioner1",
        "name": [{
            "given": row.performing_professional_forename.split(' ').filter(|s| !s.is_empty()).collect::<Vec<_>>(),
            "family": row.performing_professional_surname,
        }],
    })
}

fn gender_from_code(code: &str) -> Option<&'static str> {
    match code {
        "1" => Some("male"),
        "2" => Some("female"),
        "9" => Some("other"),
        "0" => Some("unknown"),
        _ => None,
    }
}

fn parse_primary_source(value: &str) -> Option<bool> {
    match value {
        "TRUE" => Some(true),
        "FALSE" => Some(false),
        _ => None,
    }
}

fn blank_to_null(value: &str) -> Option<&str> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn non_empty_object(system: &str, value: &str) -> Value {
    json!({
        "system": blank_to_null(system),
        "value": blank_to_null(value),
    })
}

fn coding_object(code: &str, term: &str) -> Value {
    if code.is_empty() {
        return Value::Null;
    }
    json!({
        "coding": [{
            "system": "http://snomed.info/sct",
            "code": code,
            "display": blank_to_null(term),
        }]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row() -> FlatRow {
        FlatRow {
            nhs_number: "9000000009".to_string(),
            person_forename: "Janet".to_string(),
            person_surname: "Smith".to_string(),
            person_gender_code: "2".to_string(),
            action_flag: "NEW".to_string(),
            primary_source: "TRUE".to_string(),
            dose_amount: "0.5".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn action_flag_parses_case_insensitively() {
        assert_eq!(ActionFlag::parse("new").unwrap(), ActionFlag::New);
        assert_eq!(ActionFlag::parse("Update").unwrap(), ActionFlag::Update);
        assert_eq!(ActionFlag::parse("DELETE").unwrap(), ActionFlag::Delete);
    }

    #[test]
    fn blank_action_flag_is_missing_not_unrecognised() {
        assert!(matches!(
            ActionFlag::parse(""),
            Err(SkeletonError::MissingActionFlag)
        ));
    }

    #[test]
    fn unrecognised_action_flag_is_reported() {
        assert!(matches!(
            ActionFlag::parse("MODIFY"),
            Err(SkeletonError::UnrecognisedActionFlag(_))
        ));
    }

    #[test]
    fn builds_patient_with_official_name_and_nhs_number() {
        let resource = build_skeleton(&sample_row(), ActionFlag::New);
        let patient = &resource["contained"][0];
        assert_eq!(patient["resourceType"], "Patient");
        assert_eq!(patient["name"][0]["family"], "Smith");
        assert_eq!(patient["identifier"][0]["value"], "9000000009");
        assert_eq!(resource["primarySource"], true);
    }
}
