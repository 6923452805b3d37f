//! Diesel table definitions (§3, §4.7 of the data model). Postgres stands
//! in for the key/value and wide-column stores the design describes: the
//! immunisation store's `Immunization#<id>` / `Patient#<nhs_number>` keying
//! becomes a unique-indexed `id` column plus a non-unique `nhs_number`
//! index, and the delta store's `(ImmsID, DateTimeStamp)` key plus
//! `SearchIndex` GSI become a composite primary key plus a regular index.

diesel::table! {
    use diesel::sql_types::*;

    audit (id) {
        id -> Uuid,
        file_key -> Text,
        row_index -> Int4,
        supplier -> Text,
        vaccine_type -> Text,
        status -> Text,
        record_count -> Nullable<Int4>,
        processed_rows -> Int4,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    immunizations (id) {
        id -> Uuid,
        identifier_system -> Text,
        identifier_value -> Text,
        nhs_number -> Nullable<Text>,
        version -> Int4,
        deleted -> Bool,
        resource -> Jsonb,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    delta_entries (imms_id, date_time_stamp) {
        imms_id -> Uuid,
        date_time_stamp -> Timestamptz,
        operation -> Text,
        source -> Text,
        flat -> Jsonb,
        vaccine_type -> Text,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    suppliers (ods_code) {
        ods_code -> Text,
        supplier_name -> Text,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    supplier_permissions (supplier_name, permission) {
        supplier_name -> Text,
        permission -> Text,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    disease_vaccine_types (disease_code) {
        disease_code -> Text,
        vaccine_type -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    audit,
    immunizations,
    delta_entries,
    suppliers,
    supplier_permissions,
    disease_vaccine_types,
);
