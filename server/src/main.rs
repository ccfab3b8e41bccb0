use clap::Parser;
use dotenvy::dotenv;
use tracing::Level;

mod archive;
mod bus;
mod config;
mod error;
mod gaps;
mod guards;
mod indexer;
mod materialise;
mod node;
mod routes;
mod server;
mod store;
mod stream;

use crate::config::{load_config, CLIArguments};
use crate::server::Server;

#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    dotenv().ok();

    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let cli_args = CLIArguments::parse();
    let config_path = cli_args.config_path.unwrap_or(String::new());
    let config = load_config(&config_path).expect("Irrecoverable error: fail to load config");

    Server::new(config).await?.start().await?;

    Ok(())
}
