//! Loading: envelopes → persisted rows, in two phases and one transaction.
//!
//! Phase 1 writes administrations parents-first and records the
//! official-code → id table. Phase 2 resolves each titular against that
//! table. Nothing is visible to other readers until the final commit.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use uuid::Uuid;

use crate::config::{
    Config, DEFAULT_ADMIN_FLUSH_EVERY, DEFAULT_TITULAR_FLUSH_EVERY, MAX_ADMIN_FLUSH_EVERY,
};
use crate::error::Result;
use crate::hierarchy::order_parents_first;
use crate::model::{Administracion, AdministracionTitular, Envelope, NewAdministracion, NewTitular};

/// How many row failures are logged individually.
const LOGGED_FAILURES: usize = 5;

/// Outcome of writing the buffered rows.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlushReport {
    pub inserted: Vec<Uuid>,
    /// Rows whose id was already present.
    pub unchanged: Vec<Uuid>,
    /// Rows rejected by a constraint, with the database message.
    pub failed: Vec<(Uuid, String)>,
}

impl FlushReport {
    fn absorb(&mut self, other: FlushReport) {
        self.inserted.extend(other.inserted);
        self.unchanged.extend(other.unchanged);
        self.failed.extend(other.failed);
    }
}

/// Persistence seam for the loader. Staged rows are only written on
/// `flush`, and only become visible on `commit`.
///
/// `flush` returns `Err` only for failures that invalidate the whole run
/// (lost connection, aborted transaction). Per-row constraint violations
/// are reported in `FlushReport::failed`.
#[async_trait]
pub trait LoadSession: Send {
    fn stage_administracion(&mut self, row: Administracion);
    fn stage_titular(&mut self, row: AdministracionTitular);
    async fn flush(&mut self) -> Result<FlushReport>;
    async fn commit(self) -> Result<()>;
    async fn rollback(self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    pub admin_flush_every: usize,
    pub titular_flush_every: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            admin_flush_every: DEFAULT_ADMIN_FLUSH_EVERY,
            titular_flush_every: DEFAULT_TITULAR_FLUSH_EVERY,
        }
    }
}

impl From<&Config> for LoadOptions {
    fn from(config: &Config) -> Self {
        Self {
            admin_flush_every: config.admin_flush_every,
            titular_flush_every: config.titular_flush_every,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadStats {
    pub loaded: usize,
    pub errors: usize,
    pub administraciones: usize,
    pub titulares: usize,
    pub skipped: usize,
    pub unchanged: usize,
}

pub struct Loader<S> {
    session: S,
    options: LoadOptions,
    codes: HashMap<String, Uuid>,
    /// Codes whose row was rejected; their descendants are rejected too.
    failed_codes: HashSet<String>,
    seen: HashSet<Uuid>,
    stats: LoadStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Key<'a> {
    Codigo(&'a str),
    Id(Uuid),
}

impl<S: LoadSession> Loader<S> {
    pub fn new(session: S, options: LoadOptions) -> Self {
        Self {
            session,
            options: LoadOptions {
                admin_flush_every: options.admin_flush_every.clamp(1, MAX_ADMIN_FLUSH_EVERY),
                titular_flush_every: options.titular_flush_every.max(1),
            },
            codes: HashMap::new(),
            failed_codes: HashSet::new(),
            seen: HashSet::new(),
            stats: LoadStats::default(),
        }
    }

    /// Loads all envelopes and commits once. On a fatal error the session
    /// is rolled back and the error returned.
    pub async fn load(mut self, envelopes: &[Envelope]) -> Result<LoadStats> {
        let mut administraciones = Vec::new();
        let mut titulares = Vec::new();
        for envelope in envelopes {
            match envelope {
                Envelope::Administracion(a) => administraciones.push(a),
                Envelope::Titular(t) => titulares.push(t),
            }
        }

        let outcome = match self.load_administraciones(&administraciones).await {
            Ok(()) => self.load_titulares(&titulares).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                if let Err(e) = self.session.commit().await {
                    tracing::error!(error = %e, "commit failed, nothing was written");
                    return Err(e);
                }
                tracing::info!(
                    loaded = self.stats.loaded,
                    unchanged = self.stats.unchanged,
                    skipped = self.stats.skipped,
                    errors = self.stats.errors,
                    "load committed"
                );
                Ok(self.stats)
            }
            Err(e) => {
                tracing::error!(error = %e, "load aborted, rolling back");
                if let Err(rollback) = self.session.rollback().await {
                    tracing::error!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    // ====================================================================
    // Phase 1: administraciones
    // ====================================================================

    async fn load_administraciones(&mut self, rows: &[&NewAdministracion]) -> Result<()> {
        let items: Vec<(Key<'_>, Option<Key<'_>>)> = rows
            .iter()
            .map(|a| {
                let key = a
                    .codigo_oficial
                    .as_deref()
                    .map_or(Key::Id(a.id), Key::Codigo);
                (key, a.administracion_padre_codigo.as_deref().map(Key::Codigo))
            })
            .collect();
        let (order, cyclic) = order_parents_first(&items);

        for &idx in &cyclic {
            let row = rows[idx];
            self.stats.errors += 1;
            if self.stats.errors <= LOGGED_FAILURES {
                tracing::warn!(nombre = %row.nombre, codigo = ?row.codigo_oficial, "rejected: parent chain is cyclic");
            }
        }

        let mut staged = 0;
        for idx in order {
            let row = rows[idx];
            if !self.seen.insert(row.id) {
                self.stats.unchanged += 1;
                continue;
            }
            if let Some(padre) = row
                .administracion_padre_codigo
                .as_deref()
                .filter(|padre| self.failed_codes.contains(*padre))
            {
                self.stats.errors += 1;
                if self.stats.errors <= LOGGED_FAILURES {
                    tracing::warn!(nombre = %row.nombre, padre, "rejected: parent failed to load");
                }
                if let Some(codigo) = &row.codigo_oficial {
                    self.failed_codes.insert(codigo.clone());
                }
                continue;
            }
            let padre_id = row.administracion_padre_codigo.as_deref().and_then(|padre| {
                let id = self.codes.get(padre).copied();
                if id.is_none() {
                    tracing::debug!(nombre = %row.nombre, padre, "parent code not loaded; stored as root");
                }
                id
            });
            if let Some(codigo) = &row.codigo_oficial {
                self.codes.insert(codigo.clone(), row.id);
            }
            self.session.stage_administracion(row.clone().into_row(padre_id));
            staged += 1;

            if staged % self.options.admin_flush_every == 0 {
                self.flush_administraciones().await?;
                tracing::info!(staged, total = rows.len(), "administraciones flushed");
            }
        }
        self.flush_administraciones().await
    }

    async fn flush_administraciones(&mut self) -> Result<()> {
        let report = self.session.flush().await?;
        let failed: HashSet<Uuid> = report.failed.iter().map(|(id, _)| *id).collect();
        if !failed.is_empty() {
            let failed_codes = &mut self.failed_codes;
            self.codes.retain(|codigo, id| {
                let keep = !failed.contains(id);
                if !keep {
                    failed_codes.insert(codigo.clone());
                }
                keep
            });
        }
        self.stats.administraciones += report.inserted.len();
        self.record(report);
        Ok(())
    }

    // ====================================================================
    // Phase 2: titulares
    // ====================================================================

    async fn load_titulares(&mut self, rows: &[&NewTitular]) -> Result<()> {
        let mut batch = FlushReport::default();
        let mut staged = 0;
        for &row in rows {
            let Some(&administracion_id) = self.codes.get(&row.administracion_codigo) else {
                self.stats.skipped += 1;
                continue;
            };
            if !self.seen.insert(row.id) {
                self.stats.unchanged += 1;
                continue;
            }
            self.session
                .stage_titular(row.clone().into_row(administracion_id));
            staged += 1;

            if staged % self.options.titular_flush_every == 0 {
                batch.absorb(self.session.flush().await?);
            }
        }
        batch.absorb(self.session.flush().await?);
        self.stats.titulares += batch.inserted.len();
        self.record(batch);
        Ok(())
    }

    fn record(&mut self, report: FlushReport) {
        self.stats.loaded += report.inserted.len();
        self.stats.unchanged += report.unchanged.len();
        for (id, message) in report.failed {
            self.stats.errors += 1;
            if self.stats.errors <= LOGGED_FAILURES {
                tracing::warn!(%id, error = %message, "row rejected by database");
            }
        }
    }
}
