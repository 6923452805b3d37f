//! The C4 extractor: a pure `FHIR -> (FlatRow, Vec<ConversionError>)`
//! function built from the selection-rule contracts in §4.2. Each rule is
//! its own small function so a single malformed field degrades to an empty
//! string and a recorded diagnostic rather than aborting the whole row,
//! mirroring the original converter's per-field try/except.

use chrono::{DateTime, FixedOffset};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::dates::{to_flat_date, to_flat_date_time};
use crate::flat::{ConversionError, FlatRow};
use crate::json::Json;

const NHS_NUMBER_SYSTEM: &str = "https://fhir.nhs.uk/Id/nhs-number";
const ODS_ORGANIZATION_CODE_SYSTEM: &str = "https://fhir.nhs.uk/Id/ods-organization-code";
const DEFAULT_LOCATION_CODE: &str = "X99999";
const VACCINATION_PROCEDURE_EXTENSION: &str =
    "https://fhir.hl7.org.uk/StructureDefinition/Extension-UKCore-VaccinationProcedure";
const SNOMED_SYSTEM: &str = "http://snomed.info/sct";

/// Runs every selection rule against `resource` and returns the flat row
/// alongside any per-field diagnostics. Never panics and never returns
/// `Err`: a field that cannot be extracted becomes `""` plus a
/// `ConversionError`, exactly as the original converter behaves.
pub fn extract(resource: &Value) -> (FlatRow, Vec<ConversionError>) {
    let root = Json::root(resource);
    let mut errors = Vec::new();

    let occurrence_time = parse_occurrence_time(&root);
    let patient = find_contained(resource, "Patient");
    let practitioner = find_contained(resource, "Practitioner");

    let (person_forename, person_surname) =
        extract_person_names(patient, occurrence_time, &mut errors, "Patient");
    let (performing_professional_forename, performing_professional_surname) =
        extract_person_names(practitioner, occurrence_time, &mut errors, "Practitioner");

    let person_postcode = extract_postcode(patient, occurrence_time);
    let (site_code, site_code_type_uri) = extract_site_code(resource);
    let (location_code, location_code_type_uri) = extract_location(resource);

    let person_dob = to_flat_date(patient.and_then(|p| p.get("birthDate")).and_then(Value::as_str));

    let date_and_time = to_flat_date_time(root.get("occurrenceDateTime").as_ref().as_str_allow_empty());

    let recorded_date = to_flat_date(root.get("recorded").as_ref().as_str_allow_empty());

    let expiry_date = to_flat_date(root.get("expirationDate").as_ref().as_str_allow_empty());

    let person_gender_code = patient
        .and_then(|p| p.get("gender"))
        .and_then(Value::as_str)
        .map(extract_gender_code)
        .unwrap_or_default();

    let nhs_number = patient.map(extract_nhs_number).unwrap_or_default();

    let primary_source = root
        .get("primarySource")
        .as_ref()
        .as_bool()
        .map(|b| if b { "TRUE" } else { "FALSE" }.to_string())
        .unwrap_or_default();

    let dose_amount = extract_dose_amount(&root, &mut errors);

    let (vaccination_procedure_code, vaccination_procedure_term) =
        extract_extension_coding(resource, VACCINATION_PROCEDURE_EXTENSION);
    let (vaccine_product_code, vaccine_product_term) =
        extract_first_coding(resource.get("vaccineCode"), Some(SNOMED_SYSTEM));
    let (site_of_vaccination_code, site_of_vaccination_term) =
        extract_first_coding(resource.get("site"), None);
    let (route_of_vaccination_code, route_of_vaccination_term) =
        extract_first_coding(resource.get("route"), None);
    let (indication_code, _) = resource
        .get("reasonCode")
        .and_then(Value::as_array)
        .and_then(|codes| codes.first())
        .map(|rc| extract_first_coding(Some(rc), None))
        .unwrap_or_default();

    let dose_sequence = resource
        .get("protocolApplied")
        .and_then(Value::as_array)
        .and_then(|p| p.first())
        .and_then(|p| p.get("doseNumberPositiveInt"))
        .and_then(Value::as_u64)
        .map(|n| n.to_string())
        .unwrap_or_default();

    let vaccine_manufacturer = resource
        .get("manufacturer")
        .and_then(|m| m.get("display"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let batch_number = resource
        .get("lotNumber")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let dose_unit_code = root
        .get("doseQuantity")
        .as_ref()
        .get("code")
        .as_ref()
        .as_str()
        .unwrap_or_default()
        .to_string();
    let dose_unit_term = root
        .get("doseQuantity")
        .as_ref()
        .get("unit")
        .as_ref()
        .as_str()
        .unwrap_or_default()
        .to_string();

    let unique_id = root
        .get("identifier")
        .as_ref()
        .index(0)
        .as_ref()
        .get("value")
        .as_ref()
        .as_str()
        .unwrap_or_default()
        .to_string();
    let unique_id_uri = root
        .get("identifier")
        .as_ref()
        .index(0)
        .as_ref()
        .get("system")
        .as_ref()
        .as_str()
        .unwrap_or_default()
        .to_string();

    let row = FlatRow {
        nhs_number,
        person_forename,
        person_surname,
        person_dob,
        person_gender_code,
        person_postcode,
        date_and_time,
        site_code: site_code.unwrap_or_default(),
        site_code_type_uri: site_code_type_uri.unwrap_or_default(),
        unique_id,
        unique_id_uri,
        action_flag: String::new(),
        performing_professional_forename,
        performing_professional_surname,
        recorded_date,
        expiry_date,
        primary_source,
        dose_amount,
        location_code,
        location_code_type_uri,
        vaccination_procedure_code,
        vaccination_procedure_term,
        dose_sequence,
        vaccine_product_code,
        vaccine_product_term,
        vaccine_manufacturer,
        batch_number,
        site_of_vaccination_code,
        site_of_vaccination_term,
        route_of_vaccination_code,
        route_of_vaccination_term,
        dose_unit_code,
        dose_unit_term,
        indication_code,
        ..Default::default()
    };

    (row, errors)
}

fn parse_occurrence_time(root: &Json<'_>) -> Option<DateTime<FixedOffset>> {
    let raw = root.get("occurrenceDateTime").as_ref().as_str()?.to_string();
    DateTime::parse_from_rfc3339(&raw)
        .or_else(|_| format!("{raw}+00:00").parse::<DateTime<FixedOffset>>())
        .ok()
}

fn find_contained<'a>(resource: &'a Value, resource_type: &str) -> Option<&'a Value> {
    resource
        .get("contained")?
        .as_array()?
        .iter()
        .find(|c| c.get("resourceType").and_then(Value::as_str) == Some(resource_type))
}

/// A name's `period`, when present, must contain `occurrence_time`. Absent
/// period is treated as always-current, matching `is_current_period`.
fn is_current_period(name: &Value, occurrence_time: Option<DateTime<FixedOffset>>) -> bool {
    let Some(period) = name.get("period").and_then(Value::as_object) else {
        return true;
    };
    let Some(occurrence_time) = occurrence_time else {
        return true;
    };

    let start = period
        .get("start")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok());
    let end = period
        .get("end")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok());

    start.is_none_or(|s| s <= occurrence_time) && end.is_none_or(|e| occurrence_time <= e)
}

fn select_name<'a>(
    names: &'a [Value],
    occurrence_time: Option<DateTime<FixedOffset>>,
) -> Option<&'a Value> {
    if let Some(official) = names.iter().find(|n| {
        n.get("use").and_then(Value::as_str) == Some("official")
            && is_current_period(n, occurrence_time)
    }) {
        return Some(official);
    }

    if let Some(current) = names.iter().find(|n| {
        is_current_period(n, occurrence_time) && n.get("use").and_then(Value::as_str) != Some("old")
    }) {
        return Some(current);
    }

    names.first()
}

fn joined_given(name: &Value) -> String {
    name.get("given")
        .and_then(Value::as_array)
        .map(|given| {
            given
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default()
}

fn extract_person_names(
    person: Option<&Value>,
    occurrence_time: Option<DateTime<FixedOffset>>,
    errors: &mut Vec<ConversionError>,
    resource_type: &str,
) -> (String, String) {
    let Some(person) = person else {
        return (String::new(), String::new());
    };
    let Some(names) = person.get("name").and_then(Value::as_array) else {
        return (String::new(), String::new());
    };

    let candidates: Vec<Value> = if resource_type == "Practitioner" {
        names
            .iter()
            .filter(|n| n.get("given").is_some() || n.get("family").is_some())
            .cloned()
            .collect()
    } else {
        names.clone()
    };

    if candidates.is_empty() {
        return (String::new(), String::new());
    }

    match select_name(&candidates, occurrence_time) {
        Some(name) => {
            let forename = joined_given(name);
            let surname = name
                .get("family")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            (forename, surname)
        }
        None => {
            errors.push(ConversionError::parsing(
                "$.name",
                format!("no usable {resource_type} name"),
            ));
            (String::new(), String::new())
        }
    }
}

fn extract_postcode(patient: Option<&Value>, occurrence_time: Option<DateTime<FixedOffset>>) -> String {
    const FALLBACK: &str = "ZZ99 3CZ";

    let Some(addresses) = patient.and_then(|p| p.get("address")).and_then(Value::as_array) else {
        return FALLBACK.to_string();
    };

    let valid: Vec<&Value> = addresses
        .iter()
        .filter(|a| a.get("postalCode").is_some() && is_current_period(a, occurrence_time))
        .collect();
    if valid.is_empty() {
        return FALLBACK.to_string();
    }

    let is_postal = |a: &&Value| a.get("type").and_then(Value::as_str) == Some("postal");
    let is_old = |a: &&Value| a.get("use").and_then(Value::as_str) == Some("old");

    let selected = valid
        .iter()
        .find(|a| a.get("use").and_then(Value::as_str) == Some("home") && !is_postal(a))
        .or_else(|| valid.iter().find(|a| !is_old(a) && !is_postal(a)))
        .or_else(|| valid.iter().find(|a| !is_old(a)))
        .or_else(|| valid.first())
        .expect("valid is non-empty");

    selected
        .get("postalCode")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(FALLBACK)
        .to_string()
}

fn extract_site_code(resource: &Value) -> (Option<String>, Option<String>) {
    let Some(performers) = resource.get("performer").and_then(Value::as_array) else {
        return (None, None);
    };

    let has_identifier = |p: &&Value| {
        p.get("actor")
            .and_then(|a| a.get("identifier"))
            .is_some()
    };
    let valid: Vec<&Value> = performers.iter().filter(has_identifier).collect();
    if valid.is_empty() {
        return (None, None);
    }

    fn actor_type(p: &Value) -> Option<&str> {
        p.get("actor").and_then(|a| a.get("type")).and_then(Value::as_str)
    }
    fn identifier_system(p: &Value) -> Option<&str> {
        p.get("actor")
            .and_then(|a| a.get("identifier"))
            .and_then(|i| i.get("system"))
            .and_then(Value::as_str)
    }

    let selected = valid
        .iter()
        .find(|p| actor_type(p) == Some("Organization") && identifier_system(p) == Some(ODS_ORGANIZATION_CODE_SYSTEM))
        .or_else(|| valid.iter().find(|p| identifier_system(p) == Some(ODS_ORGANIZATION_CODE_SYSTEM)))
        .or_else(|| valid.iter().find(|p| actor_type(p) == Some("Organization")))
        .or_else(|| valid.first())
        .expect("valid is non-empty");

    let identifier = selected.get("actor").and_then(|a| a.get("identifier"));
    (
        identifier.and_then(|i| i.get("value")).and_then(Value::as_str).map(String::from),
        identifier.and_then(|i| i.get("system")).and_then(Value::as_str).map(String::from),
    )
}

fn extract_location(resource: &Value) -> (String, String) {
    let identifier = resource.get("location").and_then(|l| l.get("identifier"));
    let code = identifier
        .and_then(|i| i.get("value"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_LOCATION_CODE)
        .to_string();
    let uri = identifier
        .and_then(|i| i.get("system"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(ODS_ORGANIZATION_CODE_SYSTEM)
        .to_string();
    (code, uri)
}

fn extract_gender_code(gender: &str) -> String {
    match gender {
        "male" => "1",
        "female" => "2",
        "other" => "9",
        "unknown" => "0",
        _ => "",
    }
    .to_string()
}

fn extract_nhs_number(patient: &Value) -> String {
    patient
        .get("identifier")
        .and_then(Value::as_array)
        .and_then(|ids| {
            ids.iter()
                .find(|id| id.get("system").and_then(Value::as_str) == Some(NHS_NUMBER_SYSTEM))
        })
        .and_then(|id| id.get("value"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn extract_dose_amount(root: &Json<'_>, errors: &mut Vec<ConversionError>) -> String {
    let dose_quantity = root.get("doseQuantity");
    let value = dose_quantity.as_ref().get("value");
    let number = match value.as_ref().as_number() {
        Some(n) => n,
        None => return String::new(),
    };

    match number.to_string().parse::<Decimal>() {
        Ok(decimal) => decimal.normalize().to_string(),
        Err(err) => {
            errors.push(ConversionError::parsing("$.doseQuantity.value", err));
            String::new()
        }
    }
}

/// Picks `coding[0]` unless `preferred_system` is given and some entry
/// matches it, in which case that entry wins. Returns `(code, display)`.
fn extract_first_coding(concept: Option<&Value>, preferred_system: Option<&str>) -> (String, String) {
    let Some(codings) = concept.and_then(|c| c.get("coding")).and_then(Value::as_array) else {
        return (String::new(), String::new());
    };
    if codings.is_empty() {
        return (String::new(), String::new());
    }

    let selected = preferred_system
        .and_then(|system| {
            codings
                .iter()
                .find(|c| c.get("system").and_then(Value::as_str) == Some(system))
        })
        .unwrap_or(&codings[0]);

    (
        selected.get("code").and_then(Value::as_str).unwrap_or_default().to_string(),
        selected.get("display").and_then(Value::as_str).unwrap_or_default().to_string(),
    )
}

fn extract_extension_coding(resource: &Value, extension_url: &str) -> (String, String) {
    let Some(extensions) = resource.get("extension").and_then(Value::as_array) else {
        return (String::new(), String::new());
    };
    let Some(extension) = extensions
        .iter()
        .find(|e| e.get("url").and_then(Value::as_str) == Some(extension_url))
    else {
        return (String::new(), String::new());
    };

    extract_first_coding(extension.get("valueCodeableConcept"), None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_resource() -> Value {
        json!({
            "resourceType": "Immunization",
            "occurrenceDateTime": "2025-04-06T13:28:17+00:00",
            "recorded": "2021-02-07",
            "expirationDate": "2021-07-02",
            "primarySource": true,
            "identifier": [{"system": "https://supplier.example/id", "value": "ABC123"}],
            "doseQuantity": {"value": 0.5, "unit": "milliliter"},
            "performer": [{
                "actor": {
                    "type": "Organization",
                    "identifier": {"system": "https://fhir.nhs.uk/Id/ods-organization-code", "value": "RVVKC"}
                }
            }],
            "contained": [{
                "resourceType": "Patient",
                "birthDate": "1965-02-28",
                "gender": "female",
                "identifier": [{"system": "https://fhir.nhs.uk/Id/nhs-number", "value": "9000000009"}],
                "name": [{"use": "official", "given": ["Janet"], "family": "Smith"}],
                "address": [{"use": "home", "postalCode": "LS1 4HR"}]
            }]
        })
    }

    #[test]
    fn extracts_person_and_dates() {
        let (row, errors) = extract(&base_resource());
        assert!(errors.is_empty());
        assert_eq!(row.person_forename, "Janet");
        assert_eq!(row.person_surname, "Smith");
        assert_eq!(row.person_dob, "19650228");
        assert_eq!(row.recorded_date, "20210207");
        assert_eq!(row.expiry_date, "20210702");
        assert_eq!(row.date_and_time, "20250406T13281700");
        assert_eq!(row.person_gender_code, "2");
        assert_eq!(row.nhs_number, "9000000009");
        assert_eq!(row.primary_source, "TRUE");
        assert_eq!(row.person_postcode, "LS1 4HR");
        assert_eq!(row.site_code, "RVVKC");
        assert_eq!(row.unique_id, "ABC123");
    }

    #[test]
    fn falls_back_to_default_postcode_when_no_patient() {
        let resource = json!({"occurrenceDateTime": "2025-04-06T13:28:17+00:00"});
        let (row, _) = extract(&resource);
        assert_eq!(row.person_postcode, "ZZ99 3CZ");
        assert_eq!(row.location_code, "X99999");
    }

    #[test]
    fn unknown_gender_is_blank() {
        let mut resource = base_resource();
        resource["contained"][0]["gender"] = json!("nonbinary");
        let (row, _) = extract(&resource);
        assert_eq!(row.person_gender_code, "");
    }
}
