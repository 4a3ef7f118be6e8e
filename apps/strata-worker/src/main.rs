use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = strata_worker::Args::parse();

	strata_worker::run(args).await
}
