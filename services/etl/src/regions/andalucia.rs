//! Junta de Andalucía open-data portal: a single structure CSV in whatever
//! encoding and delimiter the exporter chose that day.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::extract::{decode_csv, Extractor, Fetch, RawDataset};
use crate::transform::{OrganTypeMap, RegionTransformer, StructureColumns};

pub const URL_ESTRUCTURA: &str = "https://datos.juntadeandalucia.es/api/v0/basic-data/all?format=csv";

pub const COLUMNS: StructureColumns = StructureColumns {
    nombre: &["nombre", "denominacion", "titulo"],
    tipo: &["tipo_organo", "tipo"],
    codigo: &["codigo", "id"],
    codigo_padre: &["codigo_padre", "id_padre"],
    orden: &["orden"],
};

const ORGANOS: &[(&str, &str)] = &[
    ("CONSEJERÍA", "CONSEJERIA"),
    ("CONSEJERIA", "CONSEJERIA"),
    ("DIRECCIÓN GENERAL", "DIRECCION_GENERAL"),
    ("DIRECCION GENERAL", "DIRECCION_GENERAL"),
    ("SECRETARÍA GENERAL", "SECRETARIA_GENERAL"),
    ("SECRETARIA GENERAL", "SECRETARIA_GENERAL"),
    ("AGENCIA", "AGENCIA"),
    ("SERVICIO", "SERVICIO"),
    ("CENTRO", "CENTRO"),
    ("DELEGACIÓN", "DELEGACION"),
];

pub struct AndaluciaExtractor;

#[async_trait]
impl Extractor for AndaluciaExtractor {
    async fn extract(&self, fetch: &dyn Fetch) -> Result<RawDataset> {
        let bytes = fetch.fetch(URL_ESTRUCTURA).await?;
        Ok(RawDataset {
            estructura: decode_csv(&bytes, "andalucia")?,
            titulares: None,
        })
    }
}

pub fn transformer(comunidad_autonoma_id: Uuid) -> RegionTransformer {
    RegionTransformer {
        region: "Andalucía",
        comunidad_autonoma_id: Some(comunidad_autonoma_id),
        estructura: COLUMNS,
        titulares: None,
        organos: OrganTypeMap::new(ORGANOS),
    }
}
