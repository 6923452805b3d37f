use crate::reference_cache::ReferenceCache;
use crate::QueryError;
use diesel::sql_types::BigInt;
use diesel::{Connection, ConnectionError, PgConnection, RunQueryDsl};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::{info, warn};
use miette::Diagnostic;
use std::error::Error;
use thiserror::Error;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("../migrations");
const MIGRATION_LOCK_ID: i64 = 844_201;

#[derive(Debug, Error, Diagnostic)]
pub enum MigrationError {
    #[error("couldn't build the Postgres connection string")]
    InvalidPostgresUrl(#[source] crate::url::PostgresUrlError),

    #[error("couldn't connect to database")]
    FailedToConnectToDatabase(#[source] ConnectionError),

    #[error("error acquiring migrations lock")]
    FailedToAcquireMigrationsLock(#[source] QueryError),

    #[error("error running migrations")]
    FailedToRunMigrations(#[source] Box<dyn Error + Send + Sync>),

    #[error("error loading reference cache")]
    FailedToLoadReferenceCache(#[source] QueryError),
}

/// Runs any pending migrations and returns a freshly loaded reference
/// cache, guarded by a Postgres advisory lock so concurrent instances
/// starting up at once don't race to apply the same migration twice.
pub fn run_migrations() -> Result<ReferenceCache, MigrationError> {
    let url = crate::try_postgres_url_from_environment().map_err(MigrationError::InvalidPostgresUrl)?;

    let mut conn =
        PgConnection::establish(&url).map_err(MigrationError::FailedToConnectToDatabase)?;

    info!("Acquiring migrations lock");
    diesel::sql_query("select pg_advisory_lock($1);")
        .bind::<BigInt, _>(MIGRATION_LOCK_ID)
        .execute(&mut conn)
        .map_err(MigrationError::FailedToAcquireMigrationsLock)?;

    info!("Running any pending migrations");
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(MigrationError::FailedToRunMigrations)?;

    info!("Loading reference cache");
    let cache =
        ReferenceCache::load(&mut conn).map_err(MigrationError::FailedToLoadReferenceCache)?;

    let unlock_result = diesel::sql_query("select pg_advisory_unlock($1);")
        .bind::<BigInt, _>(MIGRATION_LOCK_ID)
        .execute(&mut conn);

    if let Err(e) = unlock_result {
        warn!(
            "Failed to unlock migrations lock. It will be unlocked when the connection is \
            dropped, but this still may be indicative of an application issue. Error: {:?}",
            e,
        );
    }

    Ok(cache)
}
