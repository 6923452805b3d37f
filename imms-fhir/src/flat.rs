//! The 34-column flat record (§3 of the spec) plus the 35th synthetic
//! `CONVERSION_ERRORS` field that never reaches downstream CSV but flows
//! through the internal envelope.

use serde::{Deserialize, Serialize};

/// The fixed column order. A `const` array, not a mutable module-level
/// list: the original implementation built this list by popping
/// `ACTION_FLAG` off a shared list on every call, which meant the second
/// call to convert a row saw one fewer column than the first. Here the
/// order is immutable and `ACTION_FLAG` is always assigned explicitly
/// rather than iterated.
pub const FIELD_ORDER: [&str; 34] = [
    "NHS_NUMBER",
    "PERSON_FORENAME",
    "PERSON_SURNAME",
    "PERSON_DOB",
    "PERSON_GENDER_CODE",
    "PERSON_POSTCODE",
    "DATE_AND_TIME",
    "SITE_CODE",
    "SITE_CODE_TYPE_URI",
    "UNIQUE_ID",
    "UNIQUE_ID_URI",
    "ACTION_FLAG",
    "PERFORMING_PROFESSIONAL_FORENAME",
    "PERFORMING_PROFESSIONAL_SURNAME",
    "RECORDED_DATE",
    "PRIMARY_SOURCE",
    "VACCINATION_PROCEDURE_CODE",
    "VACCINATION_PROCEDURE_TERM",
    "DOSE_SEQUENCE",
    "VACCINE_PRODUCT_CODE",
    "VACCINE_PRODUCT_TERM",
    "VACCINE_MANUFACTURER",
    "BATCH_NUMBER",
    "EXPIRY_DATE",
    "SITE_OF_VACCINATION_CODE",
    "SITE_OF_VACCINATION_TERM",
    "ROUTE_OF_VACCINATION_CODE",
    "ROUTE_OF_VACCINATION_TERM",
    "DOSE_AMOUNT",
    "DOSE_UNIT_CODE",
    "DOSE_UNIT_TERM",
    "INDICATION_CODE",
    "LOCATION_CODE",
    "LOCATION_CODE_TYPE_URI",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionError {
    pub code: String,
    pub message: String,
}

impl ConversionError {
    pub const PARSING_ERROR: &'static str = "PARSING_ERROR";

    pub fn parsing(path: &str, message: impl std::fmt::Display) -> Self {
        Self {
            code: Self::PARSING_ERROR.to_string(),
            message: format!("{path}: {message}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatRow {
    pub nhs_number: String,
    pub person_forename: String,
    pub person_surname: String,
    pub person_dob: String,
    pub person_gender_code: String,
    pub person_postcode: String,
    pub date_and_time: String,
    pub site_code: String,
    pub site_code_type_uri: String,
    pub unique_id: String,
    pub unique_id_uri: String,
    pub action_flag: String,
    pub performing_professional_forename: String,
    pub performing_professional_surname: String,
    pub recorded_date: String,
    pub primary_source: String,
    pub vaccination_procedure_code: String,
    pub vaccination_procedure_term: String,
    pub dose_sequence: String,
    pub vaccine_product_code: String,
    pub vaccine_product_term: String,
    pub vaccine_manufacturer: String,
    pub batch_number: String,
    pub expiry_date: String,
    pub site_of_vaccination_code: String,
    pub site_of_vaccination_term: String,
    pub route_of_vaccination_code: String,
    pub route_of_vaccination_term: String,
    pub dose_amount: String,
    pub dose_unit_code: String,
    pub dose_unit_term: String,
    pub indication_code: String,
    pub location_code: String,
    pub location_code_type_uri: String,
}

impl FlatRow {
    /// Columns in `FIELD_ORDER`, as they'd be written to a pipe-delimited
    /// CSV row. `ACTION_FLAG` included, `CONVERSION_ERRORS` excluded.
    pub fn to_columns(&self) -> [&str; 34] {
        [
            &self.nhs_number,
            &self.person_forename,
            &self.person_surname,
            &self.person_dob,
            &self.person_gender_code,
            &self.person_postcode,
            &self.date_and_time,
            &self.site_code,
            &self.site_code_type_uri,
            &self.unique_id,
            &self.unique_id_uri,
            &self.action_flag,
            &self.performing_professional_forename,
            &self.performing_professional_surname,
            &self.recorded_date,
            &self.primary_source,
            &self.vaccination_procedure_code,
            &self.vaccination_procedure_term,
            &self.dose_sequence,
            &self.vaccine_product_code,
            &self.vaccine_product_term,
            &self.vaccine_manufacturer,
            &self.batch_number,
            &self.expiry_date,
            &self.site_of_vaccination_code,
            &self.site_of_vaccination_term,
            &self.route_of_vaccination_code,
            &self.route_of_vaccination_term,
            &self.dose_amount,
            &self.dose_unit_code,
            &self.dose_unit_term,
            &self.indication_code,
            &self.location_code,
            &self.location_code_type_uri,
        ]
    }

    pub fn from_columns(columns: &[String]) -> Option<Self> {
        if columns.len() != 34 {
            return None;
        }
        Some(Self {
            nhs_number: columns[0].clone(),
            person_forename: columns[1].clone(),
            person_surname: columns[2].clone(),
            person_dob: columns[3].clone(),
            person_gender_code: columns[4].clone(),
            person_postcode: columns[5].clone(),
            date_and_time: columns[6].clone(),
            site_code: columns[7].clone(),
            site_code_type_uri: columns[8].clone(),
            unique_id: columns[9].clone(),
            unique_id_uri: columns[10].clone(),
            action_flag: columns[11].clone(),
            performing_professional_forename: columns[12].clone(),
            performing_professional_surname: columns[13].clone(),
            recorded_date: columns[14].clone(),
            primary_source: columns[15].clone(),
            vaccination_procedure_code: columns[16].clone(),
            vaccination_procedure_term: columns[17].clone(),
            dose_sequence: columns[18].clone(),
            vaccine_product_code: columns[19].clone(),
            vaccine_product_term: columns[20].clone(),
            vaccine_manufacturer: columns[21].clone(),
            batch_number: columns[22].clone(),
            expiry_date: columns[23].clone(),
            site_of_vaccination_code: columns[24].clone(),
            site_of_vaccination_term: columns[25].clone(),
            route_of_vaccination_code: columns[26].clone(),
            route_of_vaccination_term: columns[27].clone(),
            dose_amount: columns[28].clone(),
            dose_unit_code: columns[29].clone(),
            dose_unit_term: columns[30].clone(),
            indication_code: columns[31].clone(),
            location_code: columns[32].clone(),
            location_code_type_uri: columns[33].clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_order_matches_struct_column_count() {
        assert_eq!(FIELD_ORDER.len(), 34);
        assert_eq!(FlatRow::default().to_columns().len(), 34);
    }

    #[test]
    fn round_trips_through_columns() {
        let mut row = FlatRow::default();
        row.nhs_number = "9000000009".to_string();
        row.action_flag = "NEW".to_string();

        let columns: Vec<String> = row.to_columns().iter().map(|s| s.to_string()).collect();
        let parsed = FlatRow::from_columns(&columns).unwrap();
        assert_eq!(parsed, row);
    }
}
