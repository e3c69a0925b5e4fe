mod cache;
mod cli;
mod config;
mod context;
mod ledger;
mod notify;
mod reconcile;
mod store;
mod sync;
mod tag;
mod utils;

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use crate::cli::{Cli, Command};
use crate::config::Settings;
use crate::context::AppContext;
use crate::notify::{Confirmation, FixedConfirmation, TerminalConfirmation};

#[tokio::main(flavor = "current_thread")]
async fn main() {
	let args = Cli::parse();

	// Initialize tracing subscriber with debug logging for this crate
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env()
				.add_directive(
					"ledger_link_sync=debug"
						.parse()
						.unwrap_or_else(|_| tracing::Level::DEBUG.into()),
				)
				.add_directive(tracing::Level::INFO.into()),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	info!("Starting ledger link sync");

	let settings = match Settings::from_env().await {
		Ok(settings) => settings,
		Err(e) => {
			error!("Failed to load settings: {}", e);
			return;
		}
	};

	let confirmation: Arc<dyn Confirmation> = if args.yes {
		Arc::new(FixedConfirmation(true))
	} else {
		Arc::new(TerminalConfirmation)
	};
	let context = match AppContext::start(settings, confirmation).await {
		Ok(context) => context,
		Err(e) => {
			error!("Failed to start: {}", e);
			return;
		}
	};

	info!("Created context, cache at {:?}", context.settings.data_dir);

	let command = args.command.unwrap_or(Command::Status);
	if let Err(e) = cli::run(&context, command).await {
		error!("{}", e);
	}
}
