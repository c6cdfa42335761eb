//! Extract → Transform → Load for one region.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::Config;
use crate::db::{self, PgSession};
use crate::error::{EtlError, Result};
use crate::extract::Fetch;
use crate::load::{LoadOptions, LoadStats, Loader};
use crate::regions::Region;
use crate::transform::{Transformed, Transformer};

/// How many envelopes a dry run prints.
pub const DRY_RUN_SAMPLE: usize = 5;

#[derive(Debug, Clone)]
pub struct Comunidad {
    pub id: Uuid,
    pub nombre: String,
}

/// Looks up the seeded region row the loaded administrations hang from.
pub async fn find_comunidad(pool: &PgPool, region: Region) -> Result<Comunidad> {
    match db::find_region(pool, region.lookup_names()).await? {
        Some((id, nombre)) => Ok(Comunidad { id, nombre }),
        None => Err(EtlError::RegionNotSeeded {
            region: region.nombre().to_string(),
        }),
    }
}

pub async fn extract_and_transform(
    region: Region,
    comunidad_autonoma_id: Uuid,
    fetch: &dyn Fetch,
    now: DateTime<Utc>,
) -> Result<Transformed> {
    let raw = region.extractor().extract(fetch).await?;
    tracing::info!(
        %region,
        estructura = raw.estructura.len(),
        titulares = raw.titulares.as_ref().map_or(0, |t| t.len()),
        "extracted"
    );
    Ok(region.transformer(comunidad_autonoma_id).transform(&raw, now))
}

/// Loads in a single transaction.
pub async fn load(pool: &PgPool, config: &Config, transformed: &Transformed) -> Result<LoadStats> {
    let session = PgSession::begin(pool).await?;
    Loader::new(session, LoadOptions::from(config))
        .load(&transformed.envelopes)
        .await
}

/// First envelopes, pretty-printed.
pub fn dry_run_sample(transformed: &Transformed) -> Result<String> {
    let sample = &transformed.envelopes[..transformed.envelopes.len().min(DRY_RUN_SAMPLE)];
    Ok(serde_json::to_string_pretty(sample)?)
}
