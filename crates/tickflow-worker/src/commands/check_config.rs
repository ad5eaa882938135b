use std::process::ExitCode;

use tickflow_core::IngestConfig;

use crate::error::CliError;
use crate::output;

pub fn run(config: &IngestConfig, pretty: bool) -> Result<ExitCode, CliError> {
    output::print_json(&config.summary(), pretty)?;
    Ok(ExitCode::SUCCESS)
}
