//! Gobierno de Aragón CKAN datastore: structure and office holders as two
//! UTF-8, comma-separated dumps.

use async_trait::async_trait;
use encoding_rs::UTF_8;
use uuid::Uuid;

use crate::error::Result;
use crate::extract::{decode_csv_with, Extractor, Fetch, RawDataset};
use crate::transform::{OrganTypeMap, RegionTransformer, StructureColumns, TitularColumns};

pub const URL_ESTRUCTURA: &str = "https://opendata.aragon.es/ckan/datastore/dump/a9677651-72d9-49b4-8f90-c401d15896b3?format=csv&bom=True";
pub const URL_TITULARES: &str = "https://opendata.aragon.es/ckan/datastore/dump/10107649-60f0-4519-906c-e2df6dfcd4de?format=csv&bom=True";

pub const COLUMNS: StructureColumns = StructureColumns {
    nombre: &["NOMBRE", "nombre", "nombre_organo", "denominacion"],
    tipo: &["TIPO", "tipo", "tipo_organo"],
    codigo: &["CODIGO", "codigo", "codigo_organo"],
    codigo_padre: &["CODIGO_PADRE", "codigo_padre", "CODIGO_SUPERIOR"],
    orden: &["ORDEN", "orden"],
};

pub const TITULAR_COLUMNS: TitularColumns = TitularColumns {
    codigo_organo: &["CODIGO_ORGANO", "codigo_organo"],
    nombre: &["NOMBRE_TITULAR", "nombre_titular", "nombre"],
    cargo: &["CARGO", "cargo"],
};

const ORGANOS: &[(&str, &str)] = &[
    ("CONSEJERÍA", "CONSEJERIA"),
    ("DIRECCIÓN GENERAL", "DIRECCION_GENERAL"),
    ("SECRETARÍA GENERAL", "SECRETARIA_GENERAL"),
    ("VICESECRETARÍA", "VICESECRETARIA"),
    ("SERVICIO", "SERVICIO"),
    ("CENTRO", "CENTRO"),
    ("AGENCIA", "AGENCIA"),
];

pub struct AragonExtractor;

#[async_trait]
impl Extractor for AragonExtractor {
    async fn extract(&self, fetch: &dyn Fetch) -> Result<RawDataset> {
        let estructura = fetch.fetch(URL_ESTRUCTURA).await?;
        let estructura = decode_csv_with(&estructura, "aragon estructura", UTF_8, b',')?;
        let titulares = fetch.fetch(URL_TITULARES).await?;
        let titulares = decode_csv_with(&titulares, "aragon titulares", UTF_8, b',')?;
        Ok(RawDataset {
            estructura,
            titulares: Some(titulares),
        })
    }
}

pub fn transformer(comunidad_autonoma_id: Uuid) -> RegionTransformer {
    RegionTransformer {
        region: "Aragón",
        comunidad_autonoma_id: Some(comunidad_autonoma_id),
        estructura: COLUMNS,
        titulares: Some(TITULAR_COLUMNS),
        organos: OrganTypeMap::new(ORGANOS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::tests::StaticFetcher;
    use crate::model::Envelope;
    use crate::transform::Transformer;
    use chrono::Utc;

    const ESTRUCTURA: &str = "\u{feff}_id,CODIGO,NOMBRE,nombre,TIPO,CODIGO_PADRE\n\
        1,C01,Consejería de Educación,ignorado,Consejería,\n\
        2,D01,Dirección General de Patrimonio Cultural,,DIRECCIÓN GENERAL,C01\n\
        3,V01,Vicesecretaría General,,VICESECRETARIA,C01\n";

    const TITULARES: &str = "\u{feff}_id,CODIGO_ORGANO,NOMBRE_TITULAR,CARGO\n\
        1,D01,María López,Directora General\n\
        2,C01,Pedro Sanz,\n\
        3,Z99,Nadie,Jefe\n";

    fn fetcher() -> StaticFetcher {
        StaticFetcher::default()
            .with(URL_ESTRUCTURA, ESTRUCTURA)
            .with(URL_TITULARES, TITULARES)
    }

    #[tokio::test]
    async fn test_extract_fetches_both_dumps() {
        let fetch = fetcher();
        let raw = AragonExtractor.extract(&fetch).await.unwrap();
        assert_eq!(raw.estructura.len(), 3);
        assert_eq!(raw.titulares.as_ref().map(|t| t.len()), Some(3));
        assert_eq!(raw.estructura.headers()[0], "_id");
        assert_eq!(
            *fetch.requested.lock().unwrap(),
            vec![URL_ESTRUCTURA.to_string(), URL_TITULARES.to_string()]
        );
    }

    #[tokio::test]
    async fn test_transform_links_holders_and_parents() {
        let raw = AragonExtractor.extract(&fetcher()).await.unwrap();
        let out = transformer(Uuid::nil()).transform(&raw, Utc::now());

        assert_eq!(out.administraciones(), 3);
        assert_eq!(out.titulares(), 2);
        assert_eq!(out.skipped, 1);

        let Envelope::Administracion(consejeria) = &out.envelopes[0] else {
            panic!("expected administracion");
        };
        assert_eq!(consejeria.nombre, "Consejería de Educación");
        assert_eq!(consejeria.tipo_organo, "CONSEJERIA");

        let Envelope::Administracion(vice) = &out.envelopes[2] else {
            panic!("expected administracion");
        };
        // Only the accented spelling is in the vocabulary.
        assert_eq!(vice.tipo_organo, "ORGANO");
        assert_eq!(vice.administracion_padre_codigo.as_deref(), Some("C01"));

        let cargos: Vec<&str> = out
            .envelopes
            .iter()
            .filter_map(|e| match e {
                Envelope::Titular(t) => Some(t.cargo.as_str()),
                Envelope::Administracion(_) => None,
            })
            .collect();
        assert_eq!(cargos, vec!["Directora General", "Titular"]);
    }

    #[tokio::test]
    async fn test_latin1_dump_is_rejected() {
        let (body, _, _) = encoding_rs::WINDOWS_1252.encode("CODIGO,NOMBRE\nC01,Consejería\n");
        let fetch = StaticFetcher::default()
            .with(URL_ESTRUCTURA, body.into_owned())
            .with(URL_TITULARES, TITULARES);
        assert!(AragonExtractor.extract(&fetch).await.is_err());
    }
}
