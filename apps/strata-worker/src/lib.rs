pub mod error;
pub mod worker;

pub use error::{Error, Result};

use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use strata_service::StrataService;
use strata_storage::store::Store;

#[derive(Debug, Parser)]
#[command(
	version = strata_cli::VERSION,
	rename_all = "kebab",
	styles = strata_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE", env = strata_cli::CONFIG_ENV)]
	pub config: PathBuf,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = strata_config::load(&args.config)?;
	let filter =
		EnvFilter::try_new(&config.service.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).init();

	let store = Store::open(&config.storage).await.map_err(Error::from)?;
	let service = StrataService::new(config, store);

	worker::run_worker(Arc::new(service)).await
}
