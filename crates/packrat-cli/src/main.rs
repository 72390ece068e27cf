//! Packrat CLI - Scheduled backups to S3
//!
//! Usage:
//!   packrat init                 Initialize database
//!   packrat serve --port 5000    Start web server and scheduler
//!   packrat jobs                 List configured backup jobs
//!   packrat run <job>            Run a backup job immediately

mod cli;
mod commands;

#[cfg(test)]
mod tests;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    match cli.command {
        Commands::Init => commands::cmd_init(&cli.db, cli.no_encrypt),
        Commands::Serve {
            port,
            host,
            no_auth,
            api_key,
        } => commands::cmd_serve(&cli.db, &host, port, no_auth, api_key, cli.no_encrypt).await,
        Commands::Jobs => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_jobs(&db)
        }
        Commands::Run { job } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_run(&db, &job).await
        }
        Commands::History { job, limit } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_history(&db, job.as_deref(), limit)
        }
        Commands::Retention => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_retention(&db).await
        }
        Commands::Status => commands::cmd_status(&cli.db, cli.no_encrypt),
    }
}
