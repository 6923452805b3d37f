//! The filename validator (C3, §4.1): parses and authorises an incoming
//! object key before any row is read.

use chrono::NaiveDateTime;
use imms_db::ReferenceCache;
use miette::Diagnostic;
use thiserror::Error;

const SUPPORTED_VERSION: &str = "V5";
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S";

#[derive(Debug, Error, Diagnostic)]
pub enum FilenameError {
    #[error("object key {0:?} does not match <VaccineType>_Vaccinations_<version>_<ODSCode>_<timestamp>.csv")]
    InvalidFileKey(String),

    #[error("object key {0:?} declares version {1:?}, expected {SUPPORTED_VERSION}")]
    UnsupportedVersion(String, String),

    #[error("ODS code {0:?} does not map to a known supplier")]
    UnknownOdsCode(String),

    #[error("supplier {supplier:?} lacks {vaccine_type}_{operation} or {vaccine_type}_FULL permission")]
    VaccineTypePermissions {
        supplier: String,
        vaccine_type: String,
        operation: String,
    },
}

/// The outcome of validating and authorising an incoming file key (§4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedFile {
    pub supplier: String,
    pub vaccine_type: String,
    pub ods_code: String,
    pub timestamp: NaiveDateTime,
    pub file_key: String,
}

impl ValidatedFile {
    /// §3's `queue_name`, the single-flight partition this file belongs to.
    pub fn queue_name(&self) -> String {
        format!("{}_{}", self.supplier, self.vaccine_type)
    }
}

struct ParsedKey {
    vaccine_type: String,
    version: String,
    ods_code: String,
    timestamp: NaiveDateTime,
}

fn parse_key(file_key: &str) -> Result<ParsedKey, FilenameError> {
    let basename = file_key.strip_suffix(".csv").ok_or_else(|| FilenameError::InvalidFileKey(file_key.to_string()))?;
    let parts: Vec<&str> = basename.split('_').collect();

    let ([vaccine_type, literal, version, ods_code, timestamp_raw], true) = (
        [
            parts.first().copied().unwrap_or_default(),
            parts.get(1).copied().unwrap_or_default(),
            parts.get(2).copied().unwrap_or_default(),
            parts.get(3).copied().unwrap_or_default(),
            parts.get(4).copied().unwrap_or_default(),
        ],
        parts.len() == 5,
    ) else {
        return Err(FilenameError::InvalidFileKey(file_key.to_string()));
    };

    if literal != "Vaccinations"
        || vaccine_type.is_empty()
        || version.is_empty()
        || ods_code.is_empty()
        || timestamp_raw.is_empty()
    {
        return Err(FilenameError::InvalidFileKey(file_key.to_string()));
    }

    // The trailing two digits (e.g. the `01` in `...T120000_01`) are a
    // disambiguating sequence suffix, not a fractional-second component;
    // chrono has no format specifier for an un-delimited 2-digit fraction,
    // so the base timestamp and the suffix are parsed separately.
    if timestamp_raw.len() != 17 {
        return Err(FilenameError::InvalidFileKey(file_key.to_string()));
    }
    let (base, suffix) = timestamp_raw.split_at(15);
    if !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FilenameError::InvalidFileKey(file_key.to_string()));
    }
    let timestamp = NaiveDateTime::parse_from_str(base, TIMESTAMP_FORMAT)
        .map_err(|_| FilenameError::InvalidFileKey(file_key.to_string()))?;

    Ok(ParsedKey {
        vaccine_type: vaccine_type.to_string(),
        version: version.to_string(),
        ods_code: ods_code.to_string(),
        timestamp,
    })
}

/// Parses `file_key`, resolves its ODS code to a supplier via the
/// reference cache, and checks that `supplier_permissions[supplier]`
/// grants every operation in `required_operations` for the file's vaccine
/// type (either `<VaccineType>_<op>` or `<VaccineType>_FULL`).
pub fn validate(
    file_key: &str,
    cache: &ReferenceCache,
    required_operations: &[&str],
) -> Result<ValidatedFile, FilenameError> {
    let parsed = parse_key(file_key)?;

    if parsed.version != SUPPORTED_VERSION {
        return Err(FilenameError::UnsupportedVersion(file_key.to_string(), parsed.version));
    }

    let supplier = cache
        .supplier_for_ods_code(&parsed.ods_code)
        .ok_or_else(|| FilenameError::UnknownOdsCode(parsed.ods_code.clone()))?
        .to_string();

    for operation in required_operations {
        if !cache.has_permission(&supplier, &parsed.vaccine_type, operation) {
            return Err(FilenameError::VaccineTypePermissions {
                supplier,
                vaccine_type: parsed.vaccine_type,
                operation: operation.to_string(),
            });
        }
    }

    Ok(ValidatedFile {
        supplier,
        vaccine_type: parsed.vaccine_type,
        ods_code: parsed.ods_code,
        timestamp: parsed.timestamp,
        file_key: file_key.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_a_key_with_too_few_fields() {
        assert!(matches!(parse_key("FLU_Vaccinations_V5_X26.csv"), Err(FilenameError::InvalidFileKey(_))));
    }

    #[test]
    fn rejects_an_unparseable_timestamp() {
        assert!(matches!(
            parse_key("FLU_Vaccinations_V5_X26_not-a-time.csv"),
            Err(FilenameError::InvalidFileKey(_))
        ));
    }

    #[test]
    fn parses_a_well_formed_key() {
        let parsed = parse_key("FLU_Vaccinations_V5_X26_20250101T12000001.csv").unwrap();
        assert_eq!(parsed.vaccine_type, "FLU");
        assert_eq!(parsed.version, "V5");
        assert_eq!(parsed.ods_code, "X26");
    }

    #[test]
    fn queue_name_joins_supplier_and_vaccine_type() {
        let file = ValidatedFile {
            supplier: "ACME".to_string(),
            vaccine_type: "FLU".to_string(),
            ods_code: "X26".to_string(),
            timestamp: parse_key("FLU_Vaccinations_V5_X26_20250101T12000001.csv").unwrap().timestamp,
            file_key: "FLU_Vaccinations_V5_X26_20250101T12000001.csv".to_string(),
        };
        assert_eq!(file.queue_name(), "ACME_FLU");
    }
}
