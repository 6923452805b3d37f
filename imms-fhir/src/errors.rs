use miette::Diagnostic;
use thiserror::Error;

/// Errors raised building the CSV→FHIR skeleton for a row (§4.3). Distinct
/// from `flat::ConversionError`, which is data carried *inside* a converted
/// record rather than a failure of the conversion call itself.
#[derive(Debug, Error, Diagnostic)]
pub enum SkeletonError {
    #[error("row has no ACTION_FLAG value")]
    MissingActionFlag,

    #[error("unrecognised ACTION_FLAG {0:?}, expected NEW, UPDATE or DELETE")]
    UnrecognisedActionFlag(String),

    #[error("row is missing required field {0}")]
    MissingRequiredField(&'static str),
}
