//! Manual maintenance of the administration tree.
//!
//! Every change is validated against the whole arena (no cycles, no
//! destructive overwrites) before it is written, in one transaction.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use etl::config::Config;
use etl::hierarchy::Hierarchy;
use etl::model::{administracion_id, Administracion};

#[derive(Parser, Debug)]
#[command(name = "hierarchy", about = "Inspects and reorganizes the administration tree")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the current tree
    Tree {
        /// Evaluation instant (RFC 3339), defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Move an administration under another one, or to the top level
    Reparent {
        id: Uuid,
        #[arg(long)]
        parent: Option<Uuid>,
    },
    /// End an administration's validity and its current holder's term
    Close { id: Uuid },
    /// Close an administration and replace it, moving its children
    Supersede {
        id: Uuid,
        #[arg(long)]
        nombre: String,
        #[arg(long)]
        codigo: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    etl::cli::init_tracing();
    let config = Config::from_env().context("Invalid configuration")?;
    let pool = etl::db::connect(&config)
        .await
        .context("Failed to connect to database")?;

    let mut tx = pool.begin().await?;
    let rows = etl::db::load_administraciones(&mut tx).await?;
    let mut hierarchy = Hierarchy::from_rows(rows).context("Stored hierarchy is inconsistent")?;
    let now = Utc::now();

    match args.command {
        Command::Tree { at } => {
            let at = at.unwrap_or(now);
            println!("=== Administraciones vigentes a {} ===", at.to_rfc3339());
            for root in hierarchy.current_roots(at) {
                print_subtree(&hierarchy, root, at, 0);
            }
        }
        Command::Reparent { id, parent } => {
            hierarchy.set_parent(id, parent)?;
            etl::db::update_parent(&mut tx, id, parent).await?;
            let path: Vec<&str> = hierarchy
                .ancestors(id)
                .into_iter()
                .rev()
                .map(|a| a.nombre.as_str())
                .collect();
            println!("✓ Reparented {}", id);
            println!("  Path: {}", path.join(" > "));
        }
        Command::Close { id } => {
            hierarchy.close(id, now)?;
            etl::db::close_administracion(&mut tx, id, now).await?;
            println!("✓ Closed {} at {}", id, now.to_rfc3339());
        }
        Command::Supersede { id, nombre, codigo } => {
            let current = hierarchy
                .get(id)
                .cloned()
                .ok_or(etl::error::HierarchyError::NotFound(id))?;
            let replacement = Administracion {
                id: administracion_id(codigo.as_deref(), current.comunidad_autonoma_id, &nombre),
                nombre,
                codigo_oficial: codigo,
                ..current
            };
            let replacement_id = replacement.id;
            let moved = hierarchy.supersede(id, replacement, now)?;

            etl::db::close_administracion(&mut tx, id, now).await?;
            let stored = hierarchy
                .get(replacement_id)
                .context("Replacement missing after supersede")?;
            etl::db::insert_administracion(&mut tx, stored).await?;
            for child in &moved {
                etl::db::update_parent(&mut tx, *child, Some(replacement_id)).await?;
            }
            println!("✓ Superseded {} with {}", id, replacement_id);
            println!("  Moved children: {}", moved.len());
        }
    }

    tx.commit().await?;
    Ok(())
}

fn print_subtree(hierarchy: &Hierarchy, node: &Administracion, at: DateTime<Utc>, depth: usize) {
    println!(
        "{}{} [{}] {}",
        "  ".repeat(depth),
        node.nombre,
        node.tipo_organo.as_deref().unwrap_or("-"),
        node.codigo_oficial.as_deref().unwrap_or("")
    );
    for child in hierarchy.current_children(node.id, at) {
        print_subtree(hierarchy, child, at, depth + 1);
    }
}
