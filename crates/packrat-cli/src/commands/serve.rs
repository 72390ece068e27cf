//! Server command implementation

use std::path::Path;

use anyhow::Result;

use super::open_db;

pub async fn cmd_serve(
    db_path: &Path,
    host: &str,
    port: u16,
    no_auth: bool,
    api_key_args: Vec<String>,
    no_encrypt: bool,
) -> Result<()> {
    println!("🚀 Starting Packrat web server...");
    println!("   Database: {}", db_path.display());
    println!("   Listening: http://{}:{}", host, port);

    // Merge --api-key flags with the environment (comma-separated)
    let mut api_keys: Vec<String> = std::env::var("PACKRAT_API_KEYS")
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    for key in api_key_args {
        if !key.is_empty() && !api_keys.contains(&key) {
            api_keys.push(key);
        }
    }

    // Parse allowed CORS origins from the environment (comma-separated)
    let allowed_origins: Vec<String> = std::env::var("PACKRAT_ALLOWED_ORIGINS")
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if no_auth {
        println!();
        println!("   ⚠️  Authentication DISABLED - do not expose to network!");
    } else {
        if api_keys.is_empty() {
            println!("   🔑 API keys: none configured");
            println!("      Every request except /api/health will be rejected.");
            println!("      Set PACKRAT_API_KEYS or pass --api-key.");
        } else {
            println!("   🔑 API keys: {} configured", api_keys.len());
        }
        if !allowed_origins.is_empty() {
            println!(
                "   🌐 CORS origins: {} (PACKRAT_ALLOWED_ORIGINS)",
                allowed_origins.join(", ")
            );
        }
    }
    if no_encrypt {
        println!("   ⚠️  Encryption DISABLED (--no-encrypt)");
    }
    println!();
    println!("   Press Ctrl+C to stop");

    let db = open_db(db_path, no_encrypt)?;

    let config = packrat_server::ServerConfig {
        require_auth: !no_auth,
        allowed_origins,
        api_keys,
    };

    packrat_server::serve_with_config(db, host, port, config).await?;

    Ok(())
}
