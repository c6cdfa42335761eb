//! PostgreSQL access: pool setup, the transactional load session, and the
//! queries behind region lookup and hierarchy maintenance.

use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Connection, PgConnection, PgPool, Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use crate::config::{is_identifier, Config};
use crate::error::{ConfigError, EtlError, Result};
use crate::load::{FlushReport, LoadSession};
use crate::model::{Administracion, AdministracionTitular};

const ADMINISTRACION_COLUMNS: &str = "id, nombre, codigo_oficial, ambito, administracion_padre_id, \
     nivel_jerarquico, tipo_organo, orden_jerarquico, valido_desde, valido_hasta, activa, \
     comunidad_autonoma_id, provincia_id, municipio_id";

/// Connects with the configured schema as `search_path`.
pub async fn connect(config: &Config) -> Result<PgPool> {
    let options = PgConnectOptions::from_str(&config.database_url)?
        .options([("search_path", config.database_schema.as_str())]);
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await?;
    tracing::info!(url = %config.redacted_database_url(), schema = %config.database_schema, "connected to database");
    Ok(pool)
}

/// Creates `schema` if it does not exist yet.
pub async fn ensure_schema(pool: &PgPool, schema: &str) -> Result<()> {
    if !is_identifier(schema) {
        return Err(ConfigError::InvalidSchema(schema.to_string()).into());
    }
    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", schema))
        .execute(pool)
        .await?;
    Ok(())
}

/// Applies the embedded migrations, or those found in `source`.
pub async fn run_migrations(pool: &PgPool, source: Option<PathBuf>) -> Result<()> {
    let migrator = match source {
        Some(dir) => {
            if !dir.is_dir() {
                return Err(EtlError::MigrationSource(dir));
            }
            Migrator::new(dir).await?
        }
        None => sqlx::migrate!(),
    };
    tracing::info!(available = migrator.iter().count(), "applying migrations");
    migrator.run(pool).await?;
    Ok(())
}

/// `sqlx::Error::Database` is a statement the server rejected; the
/// transaction survives once its savepoint is rolled back. Anything else
/// means the connection or the transaction is gone.
fn is_row_level(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(_))
}

// ============================================================================
// Load session
// ============================================================================

pub struct PgSession {
    tx: Transaction<'static, Postgres>,
    administraciones: Vec<Administracion>,
    titulares: Vec<AdministracionTitular>,
}

impl PgSession {
    pub async fn begin(pool: &PgPool) -> Result<Self> {
        Ok(Self {
            tx: pool.begin().await?,
            administraciones: Vec::new(),
            titulares: Vec::new(),
        })
    }

    async fn flush_administraciones(&mut self, report: &mut FlushReport) -> Result<()> {
        let rows = std::mem::take(&mut self.administraciones);
        if rows.is_empty() {
            return Ok(());
        }

        let mut savepoint = self.tx.begin().await?;
        match insert_administraciones(&mut savepoint, &rows).await {
            Ok(inserted) => {
                savepoint.commit().await?;
                for row in &rows {
                    if inserted.contains(&row.id) {
                        report.inserted.push(row.id);
                    } else {
                        report.unchanged.push(row.id);
                    }
                }
                return Ok(());
            }
            Err(e) if is_row_level(&e) => {
                savepoint.rollback().await?;
                tracing::debug!(error = %e, rows = rows.len(), "batch rejected, isolating rows");
            }
            Err(e) => return Err(e.into()),
        }

        for row in rows {
            let mut savepoint = self.tx.begin().await?;
            match insert_administraciones(&mut savepoint, std::slice::from_ref(&row)).await {
                Ok(inserted) => {
                    savepoint.commit().await?;
                    if inserted.contains(&row.id) {
                        report.inserted.push(row.id);
                    } else {
                        report.unchanged.push(row.id);
                    }
                }
                Err(e) if is_row_level(&e) => {
                    savepoint.rollback().await?;
                    report.failed.push((row.id, e.to_string()));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn flush_titulares(&mut self, report: &mut FlushReport) -> Result<()> {
        for row in std::mem::take(&mut self.titulares) {
            let mut savepoint = self.tx.begin().await?;
            match insert_titular(&mut savepoint, &row).await {
                Ok(true) => {
                    savepoint.commit().await?;
                    report.inserted.push(row.id);
                }
                Ok(false) => {
                    // Already present: undo the holder rotation too.
                    savepoint.rollback().await?;
                    report.unchanged.push(row.id);
                }
                Err(e) if is_row_level(&e) => {
                    savepoint.rollback().await?;
                    report.failed.push((row.id, e.to_string()));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LoadSession for PgSession {
    fn stage_administracion(&mut self, row: Administracion) {
        self.administraciones.push(row);
    }

    fn stage_titular(&mut self, row: AdministracionTitular) {
        self.titulares.push(row);
    }

    async fn flush(&mut self) -> Result<FlushReport> {
        let mut report = FlushReport::default();
        self.flush_administraciones(&mut report).await?;
        self.flush_titulares(&mut report).await?;
        Ok(report)
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

/// Multi-row insert; returns the ids that were actually written.
async fn insert_administraciones(
    conn: &mut PgConnection,
    rows: &[Administracion],
) -> Result<HashSet<Uuid>, sqlx::Error> {
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
        "INSERT INTO administraciones ({}) ",
        ADMINISTRACION_COLUMNS
    ));
    qb.push_values(rows, |mut b, row| {
        b.push_bind(row.id)
            .push_bind(row.nombre.clone())
            .push_bind(row.codigo_oficial.clone())
            .push_bind(row.ambito.clone())
            .push_bind(row.administracion_padre_id)
            .push_bind(row.nivel_jerarquico.clone())
            .push_bind(row.tipo_organo.clone())
            .push_bind(row.orden_jerarquico)
            .push_bind(row.valido_desde)
            .push_bind(row.valido_hasta)
            .push_bind(row.activa)
            .push_bind(row.comunidad_autonoma_id)
            .push_bind(row.provincia_id)
            .push_bind(row.municipio_id);
    });
    qb.push(" ON CONFLICT (id) DO NOTHING RETURNING id");

    let ids: Vec<Uuid> = qb.build_query_scalar().fetch_all(&mut *conn).await?;
    Ok(ids.into_iter().collect())
}

/// Closes the administration's current holder and inserts the new one.
/// Returns `false` when the row already existed.
async fn insert_titular(
    conn: &mut PgConnection,
    row: &AdministracionTitular,
) -> Result<bool, sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE administraciones_titulares
        SET fecha_fin = $2, updated_at = NOW()
        WHERE administracion_id = $1 AND fecha_fin IS NULL AND id <> $3 AND NOT is_deleted
        "#,
    )
    .bind(row.administracion_id)
    .bind(row.fecha_inicio)
    .bind(row.id)
    .execute(&mut *conn)
    .await?;

    let inserted: Option<Uuid> = sqlx::query_scalar(
        r#"
        INSERT INTO administraciones_titulares
            (id, administracion_id, nombre, apellidos, tipo_identificacion, identificacion,
             cargo, fecha_inicio, fecha_fin)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (id) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(row.id)
    .bind(row.administracion_id)
    .bind(&row.nombre)
    .bind(&row.apellidos)
    .bind(&row.tipo_identificacion)
    .bind(&row.identificacion)
    .bind(&row.cargo)
    .bind(row.fecha_inicio)
    .bind(row.fecha_fin)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(inserted.is_some())
}

// ============================================================================
// Lookups
// ============================================================================

/// Region matching one of `names` by name or official name, preferring
/// earlier names.
pub async fn find_region(pool: &PgPool, names: &[&str]) -> Result<Option<(Uuid, String)>> {
    let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    let row: Option<(Uuid, String)> = sqlx::query_as(
        r#"
        SELECT id, nombre
        FROM comunidades_autonomas
        WHERE NOT is_deleted AND (nombre = ANY($1) OR nombre_oficial = ANY($1))
        ORDER BY LEAST(
            COALESCE(array_position($1, nombre::text), 1000),
            COALESCE(array_position($1, nombre_oficial::text), 1000)
        )
        LIMIT 1
        "#,
    )
    .bind(&names)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn load_administraciones(conn: &mut PgConnection) -> Result<Vec<Administracion>> {
    let rows = sqlx::query_as::<_, Administracion>(&format!(
        "SELECT {} FROM administraciones WHERE NOT is_deleted",
        ADMINISTRACION_COLUMNS
    ))
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

// ============================================================================
// Hierarchy maintenance
// ============================================================================

pub async fn update_parent(conn: &mut PgConnection, id: Uuid, parent: Option<Uuid>) -> Result<()> {
    sqlx::query(
        "UPDATE administraciones SET administracion_padre_id = $2, updated_at = NOW() WHERE id = $1",
    )
    .bind(id)
    .bind(parent)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Ends the administration's validity and closes its open holder.
pub async fn close_administracion(
    conn: &mut PgConnection,
    id: Uuid,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE administraciones
        SET valido_hasta = $2, activa = FALSE, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(at)
    .execute(&mut *conn)
    .await?;

    let closed = sqlx::query(
        r#"
        UPDATE administraciones_titulares
        SET fecha_fin = $2, updated_at = NOW()
        WHERE administracion_id = $1 AND fecha_fin IS NULL AND NOT is_deleted
        "#,
    )
    .bind(id)
    .bind(at)
    .execute(&mut *conn)
    .await?;
    tracing::debug!(%id, titulares = closed.rows_affected(), "administración closed");
    Ok(())
}

pub async fn insert_administracion(conn: &mut PgConnection, row: &Administracion) -> Result<()> {
    insert_administraciones(conn, std::slice::from_ref(row)).await?;
    Ok(())
}
