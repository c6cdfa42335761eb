//! Creates the configured schema and applies the SQL migrations.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use etl::config::Config;

#[derive(Parser, Debug)]
#[command(name = "migrate", about = "Applies the SIPI administrations schema")]
struct Args {
    /// Directory of migrations to apply instead of the embedded ones
    #[arg(long)]
    source: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    etl::cli::init_tracing();
    let config = Config::from_env().context("Invalid configuration")?;

    println!("=== SIPI Migrations ===");
    println!("Database: {}", config.redacted_database_url());
    println!("Schema: {}", config.database_schema);

    let pool = etl::db::connect(&config)
        .await
        .context("Failed to connect to database")?;

    etl::db::ensure_schema(&pool, &config.database_schema)
        .await
        .context("Failed to create schema")?;
    etl::db::run_migrations(&pool, args.source)
        .await
        .context("Failed to apply migrations")?;

    println!("✓ Migrations applied");
    Ok(())
}
