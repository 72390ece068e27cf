//! Core command implementations and shared utilities
//!
//! This module contains:
//! - `open_db` - Shared utility to open the database
//! - `cmd_init` - Initialize the database
//! - `cmd_status` - Show database status

use std::path::Path;

use anyhow::{Context, Result};
use packrat_core::Database;

/// Open database with encryption by default, or unencrypted if --no-encrypt
pub fn open_db(db_path: &Path, no_encrypt: bool) -> Result<Database> {
    let path_str = db_path.to_str().unwrap();
    if no_encrypt {
        Database::new_unencrypted(path_str).context("Failed to open database (unencrypted)")
    } else {
        Database::new(path_str).context("Failed to open database")
    }
}

pub fn cmd_init(db_path: &Path, no_encrypt: bool) -> Result<()> {
    println!("🔧 Initializing database at {}...", db_path.display());

    // Opening runs schema migrations
    let db = open_db(db_path, no_encrypt)?;

    let jobs = db.count_jobs().context("Failed to read job table")?;
    if jobs > 0 {
        println!("   Found {} existing job(s)", jobs);
    }

    if no_encrypt {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else {
        println!("   🔒 Encryption: ENABLED");
    }

    println!("✅ Database initialized successfully!");
    println!();
    println!("Next steps:");
    println!("  1. Start the server and scheduler: packrat serve");
    println!("  2. Configure S3 credentials: PUT /api/settings/s3");
    println!("  3. Create a backup job: POST /api/jobs");

    Ok(())
}

pub fn cmd_status(db_path: &Path, no_encrypt: bool) -> Result<()> {
    use packrat_core::db::DB_KEY_ENV;
    use std::fs;

    println!();
    println!("📊 Packrat Status");
    println!("   ─────────────────────────────────────────────────────────────");

    // Database path
    println!("   Database: {}", db_path.display());

    // Check if database file exists and get size
    if db_path.exists() {
        if let Ok(metadata) = fs::metadata(db_path) {
            let size_kb = metadata.len() as f64 / 1024.0;
            if size_kb < 1024.0 {
                println!("   Size: {:.1} KB", size_kb);
            } else {
                println!("   Size: {:.1} MB", size_kb / 1024.0);
            }
        }
    } else {
        println!("   Size: (database not initialized)");
    }

    // Check encryption status
    let has_key = std::env::var(DB_KEY_ENV).is_ok();
    if no_encrypt {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else if has_key {
        println!("   🔒 Encryption: ENABLED ({}=***)", DB_KEY_ENV);
    } else {
        println!("   ❌ Encryption: REQUIRED but {} not set", DB_KEY_ENV);
    }

    // Try to open the database and show stats
    if db_path.exists() {
        match open_db(db_path, no_encrypt) {
            Ok(db) => {
                println!();
                if let (Ok(total), Ok(enabled)) = (db.count_jobs(), db.count_enabled_jobs()) {
                    println!("   Jobs: {} ({} enabled)", total, enabled);
                }
                if let Ok(summary) = db.history_summary() {
                    println!("   Runs: {} total, {} active", summary.total, summary.active);
                    if summary.total > 0 {
                        println!("   Success rate: {:.1}%", summary.success_rate);
                    }
                }
                if let Ok(Some(at)) = db.last_successful_backup() {
                    println!(
                        "   Last successful backup: {}",
                        at.format("%Y-%m-%d %H:%M UTC")
                    );
                }
                match db.get_s3_settings() {
                    Ok(Some(settings)) => {
                        println!("   S3: configured (bucket: {})", settings.bucket)
                    }
                    _ => println!("   S3: not configured"),
                }
            }
            Err(e) => {
                println!();
                println!("   ❌ Error opening database: {}", e);
                if !no_encrypt && !has_key {
                    println!("      Set {} or use --no-encrypt", DB_KEY_ENV);
                } else if has_key {
                    println!("      (Check if {} is correct)", DB_KEY_ENV);
                }
            }
        }
    }

    println!();
    Ok(())
}
