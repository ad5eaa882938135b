use std::process::ExitCode;

use tickflow_warehouse::Warehouse;

use crate::error::CliError;
use crate::output;

pub fn run(warehouse: &Warehouse, pretty: bool) -> Result<ExitCode, CliError> {
    let stocks = warehouse.list_stocks()?;
    output::print_json(&stocks, pretty)?;
    Ok(ExitCode::SUCCESS)
}
