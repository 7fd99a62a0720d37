//! Keepsake CLI - local-first notes from the command line
//!
//! Every invocation acts as one device: it opens the local database, syncs
//! with the shared remote document file, runs the command and uploads what
//! changed before exiting.

mod cli;
mod commands;
mod error;


use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::account::run_delete_account;
use crate::commands::add::run_add;
use crate::commands::common::CliPaths;
use crate::commands::delete::run_delete;
use crate::commands::edit::run_edit;
use crate::commands::list::run_list;
use crate::commands::profile::run_profile;
use crate::commands::status::run_status;
use crate::commands::sync::run_sync;
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

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("keepsake=info,keepsake_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let paths = CliPaths::resolve(cli.db_path, cli.remote_path, cli.config, cli.user)?;

    match cli.command {
        Some(Commands::Add { content }) => run_add(&content, &paths).await?,
        Some(Commands::List { limit, json }) => run_list(limit, json, &paths).await?,
        Some(Commands::Edit { id, title, body }) => run_edit(&id, title, body, &paths).await?,
        Some(Commands::Delete { id }) => run_delete(&id, &paths).await?,
        Some(Commands::Profile { command }) => run_profile(command, &paths).await?,
        Some(Commands::Sync) => run_sync(&paths).await?,
        Some(Commands::Status { json }) => run_status(json, &paths).await?,
        Some(Commands::DeleteAccount { yes }) => run_delete_account(yes, &paths).await?,
        None => {
            // Quick capture mode: keepsake "my thought"
            if cli.note.is_empty() {
                Cli::command().print_help().map_err(CliError::Io)?;
                println!();
            } else {
                run_add(&cli.note, &paths).await?;
            }
        }
    }

    Ok(())
}
