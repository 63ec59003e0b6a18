//! herdsync - operator CLI for the Herdsync sync engine

mod auth;
mod cli;
mod commands;
mod config_profiles;
mod error;


use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::auth_cmd::run_auth;
use crate::commands::common::{resolve_db_path, ResolvedProfile};
use crate::commands::config::run_config;
use crate::commands::queue::run_queue;
use crate::commands::status::run_status;
use crate::commands::sync::{run_pull, run_push_all, run_sync, run_watch};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "herdsync=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let resolved = ResolvedProfile::load(cli.profile.as_deref())?;
    let db_path = resolve_db_path(cli.db_path, &resolved.name);

    match cli.command {
        Commands::Sync { force_reference } => run_sync(force_reference, &db_path, &resolved).await,
        Commands::Pull { entity } => run_pull(entity, &db_path, &resolved).await,
        Commands::PushAll => run_push_all(&db_path, &resolved).await,
        Commands::Queue { command } => run_queue(command, &db_path, &resolved).await,
        Commands::Status { json } => run_status(json, &db_path, &resolved).await,
        Commands::Watch { no_initial_sync } => {
            run_watch(no_initial_sync, &db_path, &resolved).await
        }
        Commands::Auth { command } => run_auth(command, &resolved).await,
        Commands::Config { command } => run_config(command, cli.profile.as_deref()),
    }
}
