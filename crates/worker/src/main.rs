//! `encbatch-worker` -- batch encoding runner.
//!
//! Submits a list of encoding jobs to the remote encoding service while
//! keeping its queue at a target size, retries transient failures, and
//! logs every job that had to be given up. See [`config`] for the
//! configuration keys; `KEY=value` arguments override them.
//!
//! [`config`]: encbatch_worker::config

use std::sync::Arc;

use encbatch_cloud::HttpEncodingService;
use encbatch_core::dispatcher::JobDispatcher;
use encbatch_worker::config::{BatchConfig, RunMode};
use encbatch_worker::driver::{BatchDriver, DriverSettings};
use encbatch_worker::{jobs, sequential, telemetry};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = BatchConfig::load(std::env::args().skip(1))?;

    // --- Tracing ---
    telemetry::init(config.log_format);
    tracing::info!(
        api_url = %config.api_url,
        target_queue_size = config.target_queue_size,
        max_retries = config.max_retries,
        run_mode = ?config.run_mode,
        "Loaded batch configuration",
    );

    // --- Jobs ---
    let descriptors = jobs::resolve(&config.jobs)?;
    let dispatcher = JobDispatcher::new(descriptors, config.retry_policy())?;
    tracing::info!(jobs = dispatcher.jobs().len(), "Job list loaded");

    // --- Encoding service ---
    let service = Arc::new(HttpEncodingService::new(
        config.api_url.clone(),
        config.request_timeout,
    )?);

    // --- Shutdown ---
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    let outcome = match config.run_mode {
        RunMode::Batch => {
            BatchDriver::new(Arc::clone(&service), DriverSettings::from(&config))
                .run(dispatcher, cancel)
                .await
        }
        RunMode::Sequential => {
            let options = config.poll_options();
            sequential::run_sequential(&*service, dispatcher, &options, &cancel).await
        }
    };

    if outcome.cancelled {
        tracing::warn!("Stopped early; unfinished jobs were not resubmitted");
    }

    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), stopping batch run");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, stopping batch run");
        }
    }
}
