use clap::Parser;
use msb_cli::{cli::Cli, commands, logging};

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	if let Err(err) = commands::dispatch(cli).await {
		// Daemon error envelopes were already printed as JSON
		if !err.is_output_already_printed() {
			eprintln!("error: {err:#}");
		}
		std::process::exit(1);
	}
}
