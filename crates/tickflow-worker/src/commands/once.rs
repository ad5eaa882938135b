use std::process::ExitCode;

use tickflow_core::IngestConfig;
use tracing::info;

use super::{build_orchestrator, interrupt_signal};
use crate::error::CliError;
use crate::output;

pub async fn bootstrap(config: &IngestConfig, pretty: bool) -> Result<ExitCode, CliError> {
    let orchestrator = build_orchestrator(config)?;
    let shutdown = interrupt_signal();

    let report = orchestrator.bootstrap(&shutdown).await?;
    info!(run_id = %report.run_id, written = report.written, "bootstrap finished");
    output::print_json(&report, pretty)?;
    Ok(ExitCode::SUCCESS)
}

pub async fn refresh(config: &IngestConfig, pretty: bool) -> Result<ExitCode, CliError> {
    let orchestrator = build_orchestrator(config)?;
    let shutdown = interrupt_signal();

    let report = orchestrator.incremental(&shutdown).await?;
    info!(run_id = %report.run_id, written = report.written, "refresh finished");
    output::print_json(&report, pretty)?;
    Ok(ExitCode::SUCCESS)
}
