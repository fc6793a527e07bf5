use habitkeep_core::state::SyncState;
use habitkeep_core::sync::{spawn_probe, Connectivity, HttpProbe};
use tokio::task::JoinHandle;

use crate::app::App;
use crate::commands::common::format_report;
use crate::error::CliError;

pub async fn run_sync(app: &App, as_json: bool) -> Result<(), CliError> {
    let orchestrator = app.orchestrator(Connectivity::new(true))?;
    let report = orchestrator.sync().await;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", format_report(&report));
    }

    if report.success {
        Ok(())
    } else {
        Err(CliError::SyncFailed(report.errors.join("\n")))
    }
}

/// Sync in the background until Ctrl-C
pub async fn run_sync_watch(app: &App) -> Result<(), CliError> {
    let endpoint = app.endpoint()?;
    let connectivity = Connectivity::new(true);
    let orchestrator = app.orchestrator(connectivity.clone())?;

    let probe = HttpProbe::new(
        format!("{}/auth/v1/health", endpoint.url),
        app.settings.request_timeout(),
    )?;
    let probe_task = spawn_probe(
        connectivity,
        probe,
        app.settings.connectivity_poll_interval(),
        orchestrator.shutdown_signal(),
    );
    let sync_task = orchestrator.spawn();

    println!(
        "Syncing every {}s; press Ctrl-C to stop",
        app.settings.sync_interval().as_secs()
    );
    let mut states = orchestrator.subscribe_state();
    let stopped = loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => break result,
            changed = states.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let state = *states.borrow_and_update();
                let finished = matches!(state, SyncState::Synced | SyncState::Error);
                match orchestrator.last_report().filter(|_| finished) {
                    Some(report) => println!("{}: {}", state.label(), format_report(&report)),
                    None => println!("{}", state.label()),
                }
            }
        }
    };

    orchestrator.shutdown();
    join_task("sync loop", sync_task).await;
    join_task("connectivity probe", probe_task).await;
    stopped?;
    Ok(())
}

async fn join_task(name: &str, task: JoinHandle<()>) {
    if let Err(error) = task.await {
        tracing::error!("{name} task failed: {error}");
    }
}
