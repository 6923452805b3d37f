//! Builds the Postgres connection string the immunisation store connects
//! with, from `POSTGRES_*`-prefixed environment variables. Grounded on the
//! same figment-extraction shape every other environment-sourced config in
//! this workspace uses, but — unlike the teacher, which panics on a bad
//! password — every failure here is a typed `PostgresUrlError` so a caller
//! (migrations, the pipeline, the API) can report it through `miette`
//! instead of aborting the process with no diagnostic chain.

use miette::Diagnostic;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, PartialEq, Deserialize)]
struct PostgresConfig {
    user: String,
    password: Option<String>,
    password_file: Option<PathBuf>,
    db: String,
}

#[derive(Debug, Error, Diagnostic)]
pub enum PostgresUrlError {
    #[error("Postgres configuration environment variable(s) missing or invalid")]
    MissingConfig(#[source] figment::Error),

    #[error("neither POSTGRES_PASSWORD nor POSTGRES_PASSWORD_FILE was provided")]
    MissingPassword,

    #[error("failed to read Postgres password file {}", path.display())]
    PasswordFileUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Postgres password contains an embedded newline and would be insecurely truncated")]
    PasswordHasEmbeddedNewline,
}

fn resolve_postgres_config() -> Result<PostgresConfig, PostgresUrlError> {
    let provider = figment::providers::Env::prefixed("POSTGRES_");
    figment::Figment::from(provider).extract().map_err(PostgresUrlError::MissingConfig)
}

fn resolve_password(config: &PostgresConfig) -> Result<String, PostgresUrlError> {
    let password = if let Some(password) = &config.password {
        password.clone()
    } else if let Some(path) = &config.password_file {
        std::fs::read_to_string(path)
            .map_err(|source| PostgresUrlError::PasswordFileUnreadable { path: path.clone(), source })?
    } else {
        return Err(PostgresUrlError::MissingPassword);
    };

    // Trim a single trailing newline (the common case of a password stored
    // in a file with an editor-added terminator) but refuse anything with
    // an embedded newline rather than silently truncating it.
    let password = password.strip_suffix('\n').unwrap_or(&password).to_string();
    if password.contains('\n') {
        return Err(PostgresUrlError::PasswordHasEmbeddedNewline);
    }

    Ok(password)
}

pub fn try_postgres_url_from_environment() -> Result<String, PostgresUrlError> {
    let config = resolve_postgres_config()?;
    let password = resolve_password(&config)?;
    let password = utf8_percent_encode(&password, NON_ALPHANUMERIC);

    Ok(format!("postgres://{}:{}@db/{}", config.user, password, config.db))
}

/// Panics on failure, matching the rest of this workspace's startup-time
/// convention: a missing or malformed `POSTGRES_*` configuration is not
/// something any binary here can recover from, so it fails fast with the
/// full `miette::Diagnostic` chain rather than limping on with no database.
pub fn postgres_url_from_environment() -> String {
    match try_postgres_url_from_environment() {
        Ok(url) => url,
        Err(err) => panic!("{:?}", miette::Report::new(err)),
    }
}
