//! Shared entry point of the `etl-*` binaries.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::config::Config;
use crate::db;
use crate::error::EtlError;
use crate::extract::HttpFetcher;
use crate::regions::Region;
use crate::run;
use crate::transform::Transformed;

#[derive(Parser, Debug)]
#[command(about = "Loads a region's administrative structure into SIPI")]
pub struct Args {
    /// Dry run - extract and transform, print a sample, load nothing
    #[arg(long, default_value = "false")]
    pub dry_run: bool,
}

/// `info` by default, overridable through `RUST_LOG`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();
}

pub async fn region_main(region: Region) -> Result<()> {
    let args = Args::parse();
    init_tracing();
    let config = Config::from_env().context("Invalid configuration")?;

    println!("{:=<80}", "");
    println!("ETL ADMINISTRACIONES - {}", region.nombre().to_uppercase());
    println!("{:=<80}", "");

    let fetch = HttpFetcher::new(config.http_timeout)?;

    if args.dry_run {
        println!("Dry run - nothing will be written");
        let transformed = run::extract_and_transform(region, Uuid::nil(), &fetch, Utc::now()).await?;
        print_transformed(&transformed);
        println!("\nSample envelopes:");
        println!("{}", run::dry_run_sample(&transformed)?);
        return Ok(());
    }

    let pool = db::connect(&config)
        .await
        .context("Failed to connect to database")?;

    let comunidad = match run::find_comunidad(&pool, region).await {
        Ok(comunidad) => comunidad,
        Err(e @ EtlError::RegionNotSeeded { .. }) => {
            eprintln!("✗ Comunidad Autónoma de {} no encontrada", region.nombre());
            eprintln!("  Ejecuta primero el seeding geográfico");
            return Err(e.into());
        }
        Err(e) => return Err(e).context("Failed to look up comunidad autónoma"),
    };
    println!("✓ Comunidad Autónoma: {} (ID: {})", comunidad.nombre, comunidad.id);

    let result = async {
        let transformed =
            run::extract_and_transform(region, comunidad.id, &fetch, Utc::now()).await?;
        print_transformed(&transformed);
        println!("Cargando datos en base de datos...");
        let stats = run::load(&pool, &config, &transformed).await?;
        Ok::<_, EtlError>((transformed, stats))
    }
    .await;

    println!("\n{:=<80}", "");
    match result {
        Ok((transformed, stats)) => {
            println!("✓ ETL COMPLETADO");
            println!("  - Administraciones: {}", stats.administraciones);
            println!("  - Titulares: {}", stats.titulares);
            println!("  - Total: {} registros", stats.loaded);
            if stats.unchanged > 0 {
                println!("  - Sin cambios: {}", stats.unchanged);
            }
            let skipped = stats.skipped + transformed.skipped;
            if skipped > 0 {
                println!("  - Omitidos: {}", skipped);
            }
            let errors = stats.errors + transformed.errors;
            if errors > 0 {
                println!("  ⚠ Errores: {}", errors);
            }
            println!("{:=<80}", "");
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ ERROR: {}", e);
            println!("{:=<80}", "");
            Err(e).with_context(|| format!("ETL for {} failed", region))
        }
    }
}

fn print_transformed(transformed: &Transformed) {
    println!(
        "Transformados: {} administraciones, {} titulares ({} omitidos, {} errores)",
        transformed.administraciones(),
        transformed.titulares(),
        transformed.skipped,
        transformed.errors
    );
}
