mod api;

use rocket::fairing::AdHoc;
use rocket::figment::map;
use rocket::figment::value::Value;
use rocket::{Build, Rocket, figment, launch};
use rocket_sync_db_pools::database as sync_database;
use rocket_sync_db_pools::diesel::PgConnection;

#[sync_database("imms")]
pub struct Db(PgConnection);

/// Applies any pending migrations before the server starts accepting
/// requests. Guarded by the same Postgres advisory lock the batch
/// pipeline uses, so it's safe for both binaries to run this at once.
async fn run_migrations(rocket: Rocket<Build>) -> Rocket<Build> {
    tokio::task::spawn_blocking(imms_db::run_migrations)
        .await
        .expect("migrations task panicked")
        .expect("failed to run migrations");

    rocket
}

/// Rocket's sync-pool size when `IMMS_DB_POOL_SIZE` is unset. Sized for a
/// handful of concurrent CRUD requests per worker thread rather than the
/// bulk-ingest concurrency `imms-pipeline` needs, since that binary holds
/// a single long-lived connection instead of a pool.
const DEFAULT_DB_POOL_SIZE: u32 = 10;

fn db_pool_size() -> u32 {
    std::env::var("IMMS_DB_POOL_SIZE").ok().and_then(|raw| raw.parse().ok()).unwrap_or(DEFAULT_DB_POOL_SIZE)
}

fn get_figment_with_constructed_db_url() -> figment::Figment {
    let url = imms_db::postgres_url_from_environment();
    let pool_size = db_pool_size();
    rocket::Config::figment().merge((
        "databases",
        map!["imms" => map!["url" => Value::from(url), "pool_size" => Value::from(pool_size)]],
    ))
}

#[launch]
fn rocket() -> _ {
    rocket::custom(get_figment_with_constructed_db_url())
        .mount("/", api::routes())
        .register("/", api::catchers())
        .attach(Db::fairing())
        .attach(AdHoc::on_ignite("Migrations", run_migrations))
}

#[cfg(test)]
mod tests {
    use super::*;

    pub async fn get_db() -> Db {
        let config = get_figment_with_constructed_db_url()
            .merge(("port", 0))
            .merge(("databases", map!["imms" => map!["pool_size" => 3]]));

        let rocket = rocket::custom(config)
            .attach(Db::fairing())
            .ignite()
            .await
            .expect("Rocket failed to ignite");

        Db::get_one(&rocket)
            .await
            .expect("Failed to get a database connection")
    }

    #[tokio::test]
    async fn connect_to_db() {
        let db = get_db().await;

        db.run(|_| ()).await;
    }
}
