pub mod audit;
pub mod crud;
pub mod delta;
pub mod migrations;
pub mod models;
pub mod reference_cache;
mod schema;
pub mod url;

pub use audit::AuditError;
pub use crud::CrudError;
pub use migrations::{run_migrations, MigrationError};
pub use reference_cache::ReferenceCache;
pub use url::{postgres_url_from_environment, try_postgres_url_from_environment, PostgresUrlError};

pub use diesel::{Connection, PgConnection};

/// Every fallible Diesel call in this crate returns `diesel::result::Error`
/// directly rather than a crate-specific wrapper; the higher-level errors
/// in `audit`/`crud`/`migrations` wrap it with `#[source]` where they add
/// their own variants.
pub type QueryError = diesel::result::Error;
