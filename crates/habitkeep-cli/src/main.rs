//! habitkeep CLI - track habits offline and sync them later
//!
//! Every command works against the local store; only `sync` and `auth` need
//! the network.

mod app;
mod auth;
mod cli;
mod commands;
mod error;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::app::App;
use crate::cli::{Cli, Commands};
use crate::commands::auth_cmd::run_auth;
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::habits::{
    run_add, run_delete, run_done, run_edit, run_list, run_undo, HabitFields,
};
use crate::commands::queue::run_queue;
use crate::commands::stats::run_stats;
use crate::commands::sync::{run_sync, run_sync_watch};
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
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("habitkeep=info")),
        )
        .init();

    let cli = Cli::parse();
    let db_path = cli.db_path;

    match cli.command {
        Commands::Add {
            name,
            description,
            color,
            icon,
            frequency,
        } => {
            let app = App::open(db_path).await?;
            let fields = HabitFields {
                name: None,
                description,
                clear_description: false,
                color,
                icon,
                frequency,
            };
            run_add(&app, &name, fields).await
        }
        Commands::List { json } => run_list(&App::open(db_path).await?, json).await,
        Commands::Edit {
            id,
            name,
            description,
            clear_description,
            color,
            icon,
            frequency,
        } => {
            let app = App::open(db_path).await?;
            let fields = HabitFields {
                name,
                description,
                clear_description,
                color,
                icon,
                frequency,
            };
            run_edit(&app, &id, fields).await
        }
        Commands::Delete { id } => run_delete(&App::open(db_path).await?, &id).await,
        Commands::Done { id, date } => run_done(&App::open(db_path).await?, &id, date).await,
        Commands::Undo { id, date } => run_undo(&App::open(db_path).await?, &id, date).await,
        Commands::Stats { id, json } => {
            run_stats(&App::open(db_path).await?, id.as_deref(), json).await
        }
        Commands::Queue { json } => run_queue(&App::open(db_path).await?, json).await,
        Commands::Sync { watch, json } => {
            let app = App::open(db_path).await?;
            if watch {
                run_sync_watch(&app).await
            } else {
                run_sync(&app, json).await
            }
        }
        Commands::Auth { command } => run_auth(&App::open(db_path).await?, command).await,
        Commands::Config { command } => run_config(command, db_path),
        Commands::Completions { shell, output } => run_completions(shell, output.as_deref()),
    }
}
