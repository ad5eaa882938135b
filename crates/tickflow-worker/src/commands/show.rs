use std::process::ExitCode;

use tickflow_core::{Interval, Symbol};
use tickflow_warehouse::Warehouse;

use crate::cli::ShowArgs;
use crate::error::CliError;
use crate::output;

pub fn run(warehouse: &Warehouse, args: &ShowArgs, pretty: bool) -> Result<ExitCode, CliError> {
    let symbol = Symbol::parse(&args.symbol)?;
    let interval = args.interval.parse::<Interval>()?;

    let stored = warehouse
        .latest_points(symbol.as_str(), interval.as_str(), args.limit)?
        .ok_or(CliError::PartitionNotFound { symbol, interval })?;

    output::print_json(&stored, pretty)?;
    Ok(ExitCode::SUCCESS)
}
