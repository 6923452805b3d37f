mod ack;
mod config;
mod filename;
mod orchestrator;
mod row;
mod shard;

use std::collections::HashSet;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use diesel::{Connection, PgConnection};
use imms_support::object_store::LocalObjectStore;
use imms_support::queue::LocalPartitionedQueue;
use imms_support::{LogSink, ObjectStore, RetryPolicy, StandardLogSink};
use log::{info, warn};
use miette::IntoDiagnostic;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;

/// Files this worker has already created an audit entry for. A real
/// deployment tracks this implicitly (the source bucket PUT event fires
/// once); the local object store has no event stream, so the intake sweep
/// needs its own memory of what it has already seen.
type SeenFiles = HashSet<String>;

#[tokio::main]
async fn main() -> miette::Result<()> {
    env_logger::init();

    let config = PipelineConfig::from_environment().into_diagnostic()?;
    let cache = imms_db::run_migrations().into_diagnostic()?;
    let url = imms_db::try_postgres_url_from_environment().into_diagnostic()?;
    let mut conn = PgConnection::establish(&url).into_diagnostic()?;

    let source_store = LocalObjectStore::new();
    let ack_store = LocalObjectStore::new();
    let queue = LocalPartitionedQueue::new();
    let policy = RetryPolicy::default();
    let log_sink = StandardLogSink;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            cancel.cancel();
        });
    }

    let mut seen = SeenFiles::new();

    info!("imms-pipeline started, polling {} every {}ms", config.source_bucket_name, config.poll_interval_ms);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("shutdown requested, exiting");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(config.poll_interval_ms)) => {}
        }

        if let Err(err) = intake_new_files(&mut conn, &cache, &config, &source_store, &mut seen) {
            warn!("intake sweep failed: {err}");
        }

        if let Err(err) = run_watchdog_sweep(&mut conn, &config) {
            warn!("watchdog sweep failed: {err}");
        }

        if let Err(err) = drain_ready_partitions(&mut conn, &cache, &config, &source_store, &ack_store, &queue, &policy, &log_sink) {
            warn!("partition drain failed: {err}");
        }
    }

    Ok(())
}

/// C3 → C1: lists the source bucket for keys not yet seen, validates and
/// authorises each, and creates its `Queued` audit entry.
fn intake_new_files(
    conn: &mut PgConnection,
    cache: &imms_db::ReferenceCache,
    config: &PipelineConfig,
    source_store: &LocalObjectStore,
    seen: &mut SeenFiles,
) -> miette::Result<()> {
    let keys = source_store.list(&config.source_bucket_name, "").into_diagnostic()?;
    for key in keys {
        if !seen.insert(key.clone()) {
            continue;
        }
        match orchestrator::intake_file(conn, cache, &key, &["CREATE", "UPDATE", "DELETE"], None) {
            Ok((validated, entry)) => {
                info!("queued {} for partition {}", entry.file_key, validated.queue_name());
            }
            Err(err) => {
                warn!("rejected {key}: {err}");
            }
        }
    }
    Ok(())
}

/// C10's watchdog sweep: fails any entry that has been `Processing` longer
/// than `watchdog_minutes`.
fn run_watchdog_sweep(conn: &mut PgConnection, config: &PipelineConfig) -> miette::Result<()> {
    let stuck = imms_db::audit::list_processing(conn).into_diagnostic()?;

    let deadline = ChronoDuration::minutes(config.watchdog_minutes);
    let now = chrono::Utc::now();
    for entry in stuck {
        orchestrator::fail_if_stuck(conn, &entry, deadline, now).into_diagnostic()?;
    }
    Ok(())
}

/// C10's dispatch loop: for every partition with a `Queued` entry and
/// nothing `Processing`, promotes and fully processes one file.
#[allow(clippy::too_many_arguments)]
fn drain_ready_partitions(
    conn: &mut PgConnection,
    cache: &imms_db::ReferenceCache,
    config: &PipelineConfig,
    source_store: &LocalObjectStore,
    ack_store: &LocalObjectStore,
    queue: &LocalPartitionedQueue,
    policy: &RetryPolicy,
    log_sink: &dyn LogSink,
) -> miette::Result<()> {
    let partitions = imms_db::audit::partitions_with_queued_entries(conn).into_diagnostic()?;

    for (supplier, vaccine_type) in partitions {
        let Some(entry) = orchestrator::dispatch_next(conn, &supplier, &vaccine_type).into_diagnostic()? else {
            continue;
        };
        orchestrator::process_file(
            conn,
            cache,
            source_store,
            ack_store,
            queue,
            policy,
            log_sink,
            &config.source_bucket_name,
            &config.ack_bucket_name,
            &entry,
        )
        .into_diagnostic()?;
    }

    Ok(())
}
