//! Schema-driven mapping between a FHIR Immunization resource and the fixed
//! 34-column flat record (§4.2), plus the reverse CSV-to-FHIR skeleton
//! builder used by the row processor (§4.3).

pub mod dates;
pub mod errors;
pub mod extract;
pub mod flat;
pub mod json;
pub mod skeleton;

pub use errors::SkeletonError;
pub use extract::extract;
pub use flat::{ConversionError, FlatRow, FIELD_ORDER};
pub use skeleton::{build_skeleton, ActionFlag};
