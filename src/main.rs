mod cli;
mod db;
mod error;
mod extractor;
mod filter;
mod html;
mod models;
mod scraper;
mod session;
mod settings;
mod store;
mod sync;
mod transport;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init {
            store,
            base_url,
            login,
        } => cli::init::run(store, base_url, login),
        Commands::Run { date, json } => cli::run::run(date.as_deref(), json),
        Commands::Apps => cli::listing::apps(),
        Commands::Clients { app_id } => cli::listing::clients(&app_id),
        Commands::Status => cli::status::run(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
