//! Transformation: raw frames → envelopes.
//!
//! Every region publishes the same kind of table under different column
//! names, so the row logic lives here and the regions only contribute their
//! alias lists and organ vocabularies.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::RowError;
use crate::extract::{Frame, RawDataset, Row};
use crate::model::{
    administracion_id, titular_id, Envelope, NewAdministracion, NewTitular, NivelJerarquico,
    CARGO_POR_DEFECTO, TIPO_ORGANO_GENERICO,
};

pub const MAX_NOMBRE: usize = 255;
pub const MAX_CODIGO: usize = 100;
pub const MAX_CARGO: usize = 100;

/// How many row errors are logged individually before summarizing.
const LOGGED_ERRORS: usize = 5;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Transformed {
    pub envelopes: Vec<Envelope>,
    pub skipped: usize,
    pub errors: usize,
}

impl Transformed {
    pub fn administraciones(&self) -> usize {
        self.envelopes
            .iter()
            .filter(|e| matches!(e, Envelope::Administracion(_)))
            .count()
    }

    pub fn titulares(&self) -> usize {
        self.envelopes.len() - self.administraciones()
    }
}

pub trait Transformer: Send + Sync {
    fn transform(&self, raw: &RawDataset, now: DateTime<Utc>) -> Transformed;
}

/// Regional organ-type vocabulary. Keys are matched exactly against the
/// upper-cased raw value.
#[derive(Debug, Clone)]
pub struct OrganTypeMap {
    entries: HashMap<&'static str, &'static str>,
}

impl OrganTypeMap {
    pub fn new(table: &[(&'static str, &'static str)]) -> Self {
        Self {
            entries: table.iter().copied().collect(),
        }
    }

    pub fn map(&self, raw: Option<&str>) -> &'static str {
        raw.and_then(|value| self.entries.get(value.to_uppercase().as_str()).copied())
            .unwrap_or(TIPO_ORGANO_GENERICO)
    }
}

/// Column aliases for a structure table, each probed in order.
#[derive(Debug, Clone, Copy)]
pub struct StructureColumns {
    pub nombre: &'static [&'static str],
    pub tipo: &'static [&'static str],
    pub codigo: &'static [&'static str],
    pub codigo_padre: &'static [&'static str],
    pub orden: &'static [&'static str],
}

/// Column aliases for a holders table.
#[derive(Debug, Clone, Copy)]
pub struct TitularColumns {
    pub codigo_organo: &'static [&'static str],
    pub nombre: &'static [&'static str],
    pub cargo: &'static [&'static str],
}

/// Table-driven transformer shared by all regions.
#[derive(Debug, Clone)]
pub struct RegionTransformer {
    pub region: &'static str,
    pub comunidad_autonoma_id: Option<Uuid>,
    pub estructura: StructureColumns,
    pub titulares: Option<TitularColumns>,
    pub organos: OrganTypeMap,
}

impl Transformer for RegionTransformer {
    fn transform(&self, raw: &RawDataset, now: DateTime<Utc>) -> Transformed {
        let mut out = Transformed::default();
        let mut errors = Vec::new();

        let codes = self.build_administraciones(&raw.estructura, now, &mut out, &mut errors);
        match (&raw.titulares, &self.titulares) {
            (Some(frame), Some(columns)) => {
                build_titulares(frame, columns, &codes, now, &mut out, &mut errors)
            }
            (Some(_), None) => {
                tracing::warn!(region = self.region, "titulares frame ignored: no column mapping")
            }
            _ => {}
        }

        out.errors = errors.len();
        report_errors(self.region, &errors);
        tracing::info!(
            region = self.region,
            administraciones = out.administraciones(),
            titulares = out.titulares(),
            skipped = out.skipped,
            errors = out.errors,
            "transformed"
        );
        out
    }
}

impl RegionTransformer {
    /// Emits one administration per usable row and returns the official
    /// codes that were emitted.
    fn build_administraciones(
        &self,
        frame: &Frame,
        now: DateTime<Utc>,
        out: &mut Transformed,
        errors: &mut Vec<(usize, RowError)>,
    ) -> HashSet<String> {
        let cols = &self.estructura;
        let mut codes = HashSet::new();

        for (idx, row) in frame.rows().enumerate() {
            let Some(nombre) = non_blank(row.probe(cols.nombre)) else {
                out.skipped += 1;
                continue;
            };
            let codigo = non_blank(row.probe(cols.codigo));
            let padre = non_blank(row.probe(cols.codigo_padre));

            let checked = check_len("nombre", nombre, MAX_NOMBRE)
                .and_then(|_| codigo.map_or(Ok(()), |c| check_len("codigo", c, MAX_CODIGO)));
            if let Err(e) = checked {
                errors.push((idx + 1, e));
                continue;
            }

            let tipo = self.organos.map(row.probe(cols.tipo));
            if let Some(codigo) = codigo {
                codes.insert(codigo.to_string());
            }
            out.envelopes.push(Envelope::Administracion(NewAdministracion {
                id: administracion_id(codigo, self.comunidad_autonoma_id, nombre),
                nombre: nombre.to_string(),
                codigo_oficial: codigo.map(str::to_string),
                ambito: Some(tipo.to_string()),
                administracion_padre_codigo: padre
                    .filter(|p| Some(*p) != codigo)
                    .map(str::to_string),
                nivel_jerarquico: NivelJerarquico::Autonomico,
                tipo_organo: tipo.to_string(),
                orden_jerarquico: row.probe(cols.orden).and_then(|o| o.trim().parse().ok()),
                comunidad_autonoma_id: self.comunidad_autonoma_id,
                activa: true,
                valido_desde: now,
            }));
        }
        codes
    }
}

fn build_titulares(
    frame: &Frame,
    cols: &TitularColumns,
    codes: &HashSet<String>,
    now: DateTime<Utc>,
    out: &mut Transformed,
    errors: &mut Vec<(usize, RowError)>,
) {
    for (idx, row) in frame.rows().enumerate() {
        let (Some(codigo), Some(nombre)) = (
            non_blank(row.probe(cols.codigo_organo)),
            non_blank(row.probe(cols.nombre)),
        ) else {
            out.skipped += 1;
            continue;
        };
        if !codes.contains(codigo) {
            out.skipped += 1;
            continue;
        }
        let cargo = cargo(&row, cols);

        let checked = check_len("nombre", nombre, MAX_NOMBRE)
            .and_then(|_| check_len("cargo", cargo, MAX_CARGO));
        if let Err(e) = checked {
            errors.push((idx + 1, e));
            continue;
        }

        out.envelopes.push(Envelope::Titular(NewTitular {
            id: titular_id(codigo, nombre, cargo),
            administracion_codigo: codigo.to_string(),
            nombre: nombre.to_string(),
            cargo: cargo.to_string(),
            fecha_inicio: now,
        }));
    }
}

fn cargo<'a>(row: &Row<'a>, cols: &TitularColumns) -> &'a str {
    non_blank(row.probe(cols.cargo)).unwrap_or(CARGO_POR_DEFECTO)
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn check_len(field: &'static str, value: &str, max: usize) -> Result<(), RowError> {
    let len = value.chars().count();
    if len > max {
        return Err(RowError::TooLong { field, max, len });
    }
    Ok(())
}

fn report_errors(region: &str, errors: &[(usize, RowError)]) {
    for (row, error) in errors.iter().take(LOGGED_ERRORS) {
        tracing::warn!(region, row, %error, "row rejected");
    }
    if errors.len() > LOGGED_ERRORS {
        tracing::warn!(region, "... and {} more row errors", errors.len() - LOGGED_ERRORS);
    }
}
