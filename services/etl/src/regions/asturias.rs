//! Principado de Asturias: the dataset is only reachable through its
//! datos.gob.es catalogue page, so the download link is scraped first.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use uuid::Uuid;

use crate::error::Result;
use crate::extract::{decode_csv, Extractor, Fetch, RawDataset};
use crate::transform::{OrganTypeMap, RegionTransformer, StructureColumns};

pub const URL_CATALOGO: &str = "https://datos.gob.es/es/catalogo/a03002951-estructuras-organicas";
pub const URL_FALLBACK: &str = "https://datos.gob.es/es/catalogo/a03002951-estructuras-organicas.csv";
const PORTAL_ORIGIN: &str = "https://datos.gob.es";

static HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"href\s*=\s*["']([^"']+)["']"#).expect("href pattern compiles")
});

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
    ("VICEPRESIDENCIA", "VICEPRESIDENCIA"),
    ("SECRETARÍA", "SECRETARIA_GENERAL"),
    ("SECRETARIA", "SECRETARIA_GENERAL"),
    ("DIRECCIÓN", "DIRECCION_GENERAL"),
    ("DIRECCION", "DIRECCION_GENERAL"),
    ("AGENCIA", "AGENCIA"),
    ("SERVICIO", "SERVICIO"),
    ("CENTRO", "CENTRO"),
    ("INSTITUTO", "INSTITUTO"),
    ("CONSEJO", "CONSEJO"),
    ("PRESIDENCIA", "PRESIDENCIA"),
];

pub struct AsturiasExtractor;

#[async_trait]
impl Extractor for AsturiasExtractor {
    async fn extract(&self, fetch: &dyn Fetch) -> Result<RawDataset> {
        let page = fetch.fetch(URL_CATALOGO).await?;
        let url = match find_dataset_link(&String::from_utf8_lossy(&page)) {
            Some(url) => url,
            None => {
                tracing::warn!(fallback = URL_FALLBACK, "no Asturias download link on catalogue page");
                URL_FALLBACK.to_string()
            }
        };
        tracing::info!(%url, "dataset URL");

        let bytes = fetch.fetch(&url).await?;
        Ok(RawDataset {
            estructura: decode_csv(&bytes, "asturias")?,
            titulares: None,
        })
    }
}

/// First `href` that points at a CSV or JSON download and mentions
/// Asturias, resolved against the portal origin when relative.
pub fn find_dataset_link(html: &str) -> Option<String> {
    HREF.captures_iter(html)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .find(|href| {
            let lower = href.to_lowercase();
            (lower.contains("csv") || lower.contains("json")) && lower.contains("astur")
        })
        .map(|href| {
            if href.starts_with("http") {
                href.to_string()
            } else {
                format!("{}{}", PORTAL_ORIGIN, href)
            }
        })
}

pub fn transformer(comunidad_autonoma_id: Uuid) -> RegionTransformer {
    RegionTransformer {
        region: "Asturias",
        comunidad_autonoma_id: Some(comunidad_autonoma_id),
        estructura: COLUMNS,
        titulares: None,
        organos: OrganTypeMap::new(ORGANOS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::tests::StaticFetcher;

    const PAGE: &str = r#"
        <html><body>
          <a href="/es/catalogo/otro-dataset.csv">Otro</a>
          <a class="btn" href='/es/datos/asturias/estructuras.CSV'>Descargar</a>
          <a href="https://example.org/asturias.json">JSON</a>
        </body></html>
    "#;

    #[test]
    fn test_first_matching_link_wins() {
        let link = find_dataset_link(PAGE);
        assert_eq!(
            link.as_deref(),
            Some("https://datos.gob.es/es/datos/asturias/estructuras.CSV")
        );
    }

    #[test]
    fn test_absolute_link_kept() {
        let html = r#"<a href="https://sede.asturias.es/estructura.json">x</a>"#;
        assert_eq!(
            find_dataset_link(html).as_deref(),
            Some("https://sede.asturias.es/estructura.json")
        );
    }

    #[test]
    fn test_no_matching_link() {
        let html = r#"<a href="/es/catalogo/otro.csv">x</a><a href="/asturias/info.html">y</a>"#;
        assert_eq!(find_dataset_link(html), None);
    }

    #[tokio::test]
    async fn test_extract_falls_back_when_page_has_no_link() {
        let fetch = StaticFetcher::default()
            .with(URL_CATALOGO, "<html>sin enlaces</html>")
            .with(URL_FALLBACK, "codigo;nombre;tipo\n1;Consejería de Cultura;CONSEJERIA\n");

        let raw = AsturiasExtractor.extract(&fetch).await.unwrap();
        assert_eq!(raw.estructura.len(), 1);
        assert_eq!(
            *fetch.requested.lock().unwrap(),
            vec![URL_CATALOGO.to_string(), URL_FALLBACK.to_string()]
        );
    }

    #[test]
    fn test_prefix_forms_map_to_generic_tags() {
        let map = OrganTypeMap::new(ORGANOS);
        assert_eq!(map.map(Some("Dirección")), "DIRECCION_GENERAL");
        // Full names are not prefixes of the vocabulary.
        assert_eq!(map.map(Some("Dirección General de Cultura")), "ORGANO");
    }
}
