//! The read-only reference cache (C2): ODS-code-to-supplier lookup,
//! supplier permission grants, and the disease-code-to-vaccine-type
//! mapping, loaded into memory once at startup. Mirrors the shape of a
//! `Taxa`-style cache — a small set of immutable maps built from a single
//! pass over the reference tables rather than queried per row — but keyed
//! by plain strings instead of a generated enum, since these codes come
//! from an externally-governed list (ODS, SNOMED) rather than a fixed set
//! this crate defines.
//!
//! The cache is mutated only by a separate sync job outside this crate's
//! scope; nothing here writes to these tables.

use diesel::prelude::*;
use diesel::PgConnection;
use hashbrown::{HashMap, HashSet};

use crate::schema::{disease_vaccine_types, supplier_permissions, suppliers};

#[derive(Debug, Clone)]
pub struct ReferenceCache {
    ods_to_supplier: HashMap<String, String>,
    supplier_permissions: HashMap<String, HashSet<String>>,
    disease_to_vaccine_type: HashMap<String, String>,
}

impl ReferenceCache {
    /// Builds a cache directly from in-memory fixture data, bypassing
    /// Postgres. Used by this crate's own tests and by other crates in the
    /// workspace (the row processor, the filename validator) to compose a
    /// `ReferenceCache` for unit tests without a live database.
    pub fn from_parts(
        ods_to_supplier: impl IntoIterator<Item = (String, String)>,
        supplier_permissions: impl IntoIterator<Item = (String, String)>,
        disease_to_vaccine_type: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        let mut permissions: HashMap<String, HashSet<String>> = HashMap::new();
        for (supplier, permission) in supplier_permissions {
            permissions.entry(supplier).or_default().insert(permission);
        }
        Self {
            ods_to_supplier: ods_to_supplier.into_iter().collect(),
            supplier_permissions: permissions,
            disease_to_vaccine_type: disease_to_vaccine_type.into_iter().collect(),
        }
    }

    pub fn load(conn: &mut PgConnection) -> QueryResult<Self> {
        let ods_to_supplier: HashMap<String, String> = suppliers::table
            .select((suppliers::ods_code, suppliers::supplier_name))
            .load::<(String, String)>(conn)?
            .into_iter()
            .collect();

        let mut supplier_permissions: HashMap<String, HashSet<String>> = HashMap::new();
        for (supplier, permission) in supplier_permissions::table
            .select((
                supplier_permissions::supplier_name,
                supplier_permissions::permission,
            ))
            .load::<(String, String)>(conn)?
        {
            supplier_permissions.entry(supplier).or_default().insert(permission);
        }

        let disease_to_vaccine_type: HashMap<String, String> = disease_vaccine_types::table
            .select((
                disease_vaccine_types::disease_code,
                disease_vaccine_types::vaccine_type,
            ))
            .load::<(String, String)>(conn)?
            .into_iter()
            .collect();

        Ok(Self {
            ods_to_supplier,
            supplier_permissions,
            disease_to_vaccine_type,
        })
    }

    /// §4.1: filename validation resolves an ODS code to a known supplier.
    pub fn supplier_for_ods_code(&self, ods_code: &str) -> Option<&str> {
        self.ods_to_supplier.get(ods_code).map(String::as_str)
    }

    /// §4.1: `<VaccineType>_<operation>` or `<VaccineType>_FULL` must be
    /// present in the supplier's permission set.
    pub fn has_permission(&self, supplier: &str, vaccine_type: &str, operation: &str) -> bool {
        let Some(granted) = self.supplier_permissions.get(supplier) else {
            return false;
        };
        granted.contains(&format!("{vaccine_type}_{operation}"))
            || granted.contains(&format!("{vaccine_type}_FULL"))
    }

    /// §4.3: `disease_codes_to_vaccine_type`. Returns `None` when no
    /// disease code in the resource maps to a known vaccine type, or the
    /// codes present map to more than one distinct type.
    pub fn disease_codes_to_vaccine_type(&self, disease_codes: &[&str]) -> Option<&str> {
        let mut resolved = disease_codes
            .iter()
            .filter_map(|code| self.disease_to_vaccine_type.get(*code));

        let first = resolved.next()?;
        if resolved.all(|vt| vt == first) {
            Some(first.as_str())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(
        ods: &[(&str, &str)],
        perms: &[(&str, &str)],
        diseases: &[(&str, &str)],
    ) -> ReferenceCache {
        ReferenceCache::from_parts(
            ods.iter().map(|(a, b)| (a.to_string(), b.to_string())),
            perms.iter().map(|(a, b)| (a.to_string(), b.to_string())),
            diseases.iter().map(|(a, b)| (a.to_string(), b.to_string())),
        )
    }

    #[test]
    fn permission_accepts_specific_or_full_grant() {
        let cache = cache(&[], &[("ACME", "FLU_CREATE"), ("ACME", "COVID_FULL")], &[]);
        assert!(cache.has_permission("ACME", "FLU", "CREATE"));
        assert!(!cache.has_permission("ACME", "FLU", "DELETE"));
        assert!(cache.has_permission("ACME", "COVID", "DELETE"));
        assert!(!cache.has_permission("OTHER", "FLU", "CREATE"));
    }

    #[test]
    fn disease_codes_must_agree_on_a_single_vaccine_type() {
        let cache = cache(&[], &[], &[("123", "FLU"), ("456", "FLU"), ("789", "COVID")]);
        assert_eq!(cache.disease_codes_to_vaccine_type(&["123", "456"]), Some("FLU"));
        assert_eq!(cache.disease_codes_to_vaccine_type(&["123", "789"]), None);
        assert_eq!(cache.disease_codes_to_vaccine_type(&["unknown"]), None);
    }
}
