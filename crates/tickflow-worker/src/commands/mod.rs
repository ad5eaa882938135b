mod check_config;
mod once;
mod run;
mod show;
mod stocks;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use tickflow_core::config::{self, IngestConfig};
use tickflow_core::shutdown::{self, Shutdown};
use tickflow_core::{
    AggregateStore, Orchestrator, RateGateway, ReqwestHttpClient, TokenBucket, TwelveDataClient,
    WarehouseStore,
};
use tickflow_warehouse::Warehouse;
use tracing::{info, warn};

use crate::cli::{Cli, Command};
use crate::error::CliError;

pub async fn dispatch(cli: &Cli) -> Result<ExitCode, CliError> {
    let config_path = config::resolve_config_path(cli.config.clone());

    match &cli.command {
        Command::Run => run::run(&load(&config_path)?, cli.pretty).await,
        Command::Bootstrap => once::bootstrap(&load(&config_path)?, cli.pretty).await,
        Command::Refresh => once::refresh(&load(&config_path)?, cli.pretty).await,
        Command::CheckConfig => check_config::run(&load(&config_path)?, cli.pretty),
        Command::Show(args) => {
            let warehouse = open_warehouse(&config_path)?;
            show::run(&warehouse, args, cli.pretty)
        }
        Command::Stocks => {
            let warehouse = open_warehouse(&config_path)?;
            stocks::run(&warehouse, cli.pretty)
        }
    }
}

fn load(path: &Path) -> Result<IngestConfig, CliError> {
    let config = IngestConfig::load(path)?;
    info!(
        path = %path.display(),
        work_items = config.jobs.work_items.len(),
        "configuration loaded"
    );
    Ok(config)
}

fn open_warehouse(path: &Path) -> Result<Warehouse, CliError> {
    let config = config::load_warehouse_config(path)?;
    Ok(Warehouse::open(config)?)
}

/// Everything a run needs, built from one validated configuration.
pub(crate) fn build_orchestrator(config: &IngestConfig) -> Result<Orchestrator, CliError> {
    let warehouse = Warehouse::open(config.warehouse.clone())?;
    info!(path = %warehouse.db_path().display(), "warehouse opened");

    let bucket = TokenBucket::new(config.rate_limit.clone())?;
    let client = TwelveDataClient::new(
        config.provider.clone(),
        Arc::new(ReqwestHttpClient::new()),
    );
    let gateway = Arc::new(RateGateway::new(bucket, client));
    let store: Arc<dyn AggregateStore> = Arc::new(WarehouseStore::new(warehouse));

    Ok(Orchestrator::new(
        gateway,
        store,
        config.jobs.work_items.clone(),
    ))
}

/// Shutdown signal triggered by Ctrl-C.
pub(crate) fn interrupt_signal() -> Shutdown {
    let (trigger, shutdown) = shutdown::channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received; shutting down");
                trigger.trigger();
            }
            Err(error) => warn!(%error, "could not listen for Ctrl-C"),
        }
    });
    shutdown
}
