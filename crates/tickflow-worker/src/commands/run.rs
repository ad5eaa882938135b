use std::process::ExitCode;
use std::sync::Arc;

use serde_json::json;
use tickflow_core::{IngestConfig, IngestJob, Job, Scheduler};
use tracing::{error, info};

use super::{build_orchestrator, interrupt_signal};
use crate::error::CliError;
use crate::output;

/// Bootstrap immediately and refresh on the configured cadence until Ctrl-C.
pub async fn run(config: &IngestConfig, pretty: bool) -> Result<ExitCode, CliError> {
    let orchestrator = build_orchestrator(config)?;
    let scheduler = Scheduler::new(interrupt_signal());

    let bootstrap: Arc<dyn Job> = Arc::new(IngestJob::bootstrap(orchestrator.clone()));
    let incremental: Arc<dyn Job> = Arc::new(IngestJob::incremental(orchestrator));

    info!(
        delay_seconds = config.jobs.delay.as_secs_f64(),
        period_seconds = config.jobs.period.as_secs_f64(),
        "scheduling jobs"
    );
    let bootstrap = scheduler.run_once(bootstrap);
    let incremental = scheduler.run_every(incremental, config.jobs.period, config.jobs.delay);

    let ((bootstrap_state, bootstrap_report), incremental_state) =
        tokio::join!(bootstrap.join_with_report(), incremental.join());

    let states = [("bootstrap", bootstrap_state), ("incremental", incremental_state)];
    for (name, state) in states {
        if state.is_suspended() {
            error!(job = name, "job suspended after a fault");
        } else {
            info!(job = name, ?state, "job stopped");
        }
    }

    output::print_json(
        &json!({
            "bootstrap": bootstrap_state,
            "incremental": incremental_state,
            "bootstrapReport": bootstrap_report,
        }),
        pretty,
    )?;

    if states.iter().any(|(_, state)| state.is_suspended()) {
        return Ok(ExitCode::from(3));
    }
    Ok(ExitCode::SUCCESS)
}
