//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI arguments.
//! The actual command implementations are in the `commands` module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Packrat - Scheduled backups to S3
#[derive(Parser)]
#[command(name = "packrat")]
#[command(about = "Self-hosted recurring backup service", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database path
    #[arg(long, default_value = "packrat.db", global = true)]
    pub db: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable database encryption (not recommended for production)
    ///
    /// By default, the database is encrypted using SQLCipher.
    /// Set PACKRAT_DB_KEY environment variable with your passphrase.
    /// Use --no-encrypt only for development or testing.
    #[arg(long, global = true)]
    pub no_encrypt: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database
    Init,

    /// Start the web server and scheduler
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "5000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Disable authentication (for local development only)
        ///
        /// WARNING: Do not use this flag when exposing the server to a network.
        /// By default, the server requires a bearer API key on every request.
        #[arg(long)]
        no_auth: bool,

        /// API key accepted for bearer authentication (repeatable)
        ///
        /// Keys given here are merged with the comma-separated
        /// PACKRAT_API_KEYS environment variable.
        #[arg(long)]
        api_key: Vec<String>,
    },

    /// List configured backup jobs
    Jobs,

    /// Run a backup job immediately
    Run {
        /// Job ID or name
        job: String,
    },

    /// Show recent run history
    History {
        /// Filter by job ID or name
        #[arg(long)]
        job: Option<String>,

        /// Number of runs to show
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Apply retention policies now (delete expired archives)
    Retention,

    /// Show database status (encryption, size, etc.)
    Status,
}
