//! Persisted rows and the transform → load envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for the deterministic surrogate identifiers.
const SIPI_NAMESPACE: Uuid = Uuid::from_u128(0x6d1f_4c2a_9b0e_4b7c_8e35_2f1a_0c9d_51e7);

pub const TIPO_ORGANO_GENERICO: &str = "ORGANO";
pub const CARGO_POR_DEFECTO: &str = "Titular";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NivelJerarquico {
    Estatal,
    Autonomico,
    Provincial,
    Local,
}

impl NivelJerarquico {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Estatal => "ESTATAL",
            Self::Autonomico => "AUTONOMICO",
            Self::Provincial => "PROVINCIAL",
            Self::Local => "LOCAL",
        }
    }
}

/// A row of `administraciones`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Administracion {
    pub id: Uuid,
    pub nombre: String,
    pub codigo_oficial: Option<String>,
    pub ambito: Option<String>,
    pub administracion_padre_id: Option<Uuid>,
    pub nivel_jerarquico: Option<String>,
    pub tipo_organo: Option<String>,
    pub orden_jerarquico: Option<i32>,
    pub valido_desde: DateTime<Utc>,
    pub valido_hasta: Option<DateTime<Utc>>,
    pub activa: bool,
    pub comunidad_autonoma_id: Option<Uuid>,
    pub provincia_id: Option<Uuid>,
    pub municipio_id: Option<Uuid>,
}

impl Administracion {
    /// A dated node is current inside its validity window. An undated node
    /// is current from `valido_desde` on unless it was deactivated.
    pub fn is_current_at(&self, at: DateTime<Utc>) -> bool {
        self.valido_desde <= at
            && match self.valido_hasta {
                Some(hasta) => hasta > at,
                None => self.activa,
            }
    }
}

/// A row of `administraciones_titulares`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AdministracionTitular {
    pub id: Uuid,
    pub administracion_id: Uuid,
    pub nombre: String,
    pub apellidos: Option<String>,
    pub tipo_identificacion: Option<String>,
    pub identificacion: Option<String>,
    pub cargo: Option<String>,
    pub fecha_inicio: DateTime<Utc>,
    pub fecha_fin: Option<DateTime<Utc>>,
}

/// Administration as produced by a transformer. The parent is still a
/// natural key; the loader resolves it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAdministracion {
    pub id: Uuid,
    pub nombre: String,
    pub codigo_oficial: Option<String>,
    pub ambito: Option<String>,
    pub administracion_padre_codigo: Option<String>,
    pub nivel_jerarquico: NivelJerarquico,
    pub tipo_organo: String,
    pub orden_jerarquico: Option<i32>,
    pub comunidad_autonoma_id: Option<Uuid>,
    pub activa: bool,
    pub valido_desde: DateTime<Utc>,
}

impl NewAdministracion {
    pub fn into_row(self, administracion_padre_id: Option<Uuid>) -> Administracion {
        Administracion {
            id: self.id,
            nombre: self.nombre,
            codigo_oficial: self.codigo_oficial,
            ambito: self.ambito,
            administracion_padre_id,
            nivel_jerarquico: Some(self.nivel_jerarquico.as_str().to_string()),
            tipo_organo: Some(self.tipo_organo),
            orden_jerarquico: self.orden_jerarquico,
            valido_desde: self.valido_desde,
            valido_hasta: None,
            activa: self.activa,
            comunidad_autonoma_id: self.comunidad_autonoma_id,
            provincia_id: None,
            municipio_id: None,
        }
    }
}

/// Office holder as produced by a transformer, keyed by the official code
/// of its administration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTitular {
    pub id: Uuid,
    pub administracion_codigo: String,
    pub nombre: String,
    pub cargo: String,
    pub fecha_inicio: DateTime<Utc>,
}

impl NewTitular {
    pub fn into_row(self, administracion_id: Uuid) -> AdministracionTitular {
        AdministracionTitular {
            id: self.id,
            administracion_id,
            nombre: self.nombre,
            apellidos: None,
            tipo_identificacion: None,
            identificacion: None,
            cargo: Some(self.cargo),
            fecha_inicio: self.fecha_inicio,
            fecha_fin: None,
        }
    }
}

/// `{"tipo": ..., "data": {...}}` record passed from a transformer to the loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tipo", content = "data", rename_all = "lowercase")]
pub enum Envelope {
    Administracion(NewAdministracion),
    Titular(NewTitular),
}

/// Scoped by region: official codes from different portals may collide.
pub fn administracion_id(
    codigo_oficial: Option<&str>,
    comunidad_autonoma_id: Option<Uuid>,
    nombre: &str,
) -> Uuid {
    let comunidad = comunidad_autonoma_id
        .map(|id| id.to_string())
        .unwrap_or_default();
    let key = match codigo_oficial {
        Some(codigo) => format!("administracion:{}:codigo:{}", comunidad, codigo),
        None => format!("administracion:{}:nombre:{}", comunidad, nombre),
    };
    Uuid::new_v5(&SIPI_NAMESPACE, key.as_bytes())
}

pub fn titular_id(administracion_codigo: &str, nombre: &str, cargo: &str) -> Uuid {
    let key = format!("titular:{}:{}:{}", administracion_codigo, nombre, cargo);
    Uuid::new_v5(&SIPI_NAMESPACE, key.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> NewAdministracion {
        NewAdministracion {
            id: administracion_id(Some("A01"), None, "Consejería de Cultura"),
            nombre: "Consejería de Cultura".to_string(),
            codigo_oficial: Some("A01".to_string()),
            ambito: Some("CONSEJERIA".to_string()),
            administracion_padre_codigo: None,
            nivel_jerarquico: NivelJerarquico::Autonomico,
            tipo_organo: "CONSEJERIA".to_string(),
            orden_jerarquico: None,
            comunidad_autonoma_id: None,
            activa: true,
            valido_desde: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_envelope_wire_shape() {
        let json = serde_json::to_value(Envelope::Administracion(sample())).unwrap();
        assert_eq!(json["tipo"], "administracion");
        assert_eq!(json["data"]["nombre"], "Consejería de Cultura");
        assert_eq!(json["data"]["nivel_jerarquico"], "AUTONOMICO");
    }

    #[test]
    fn test_ids_are_deterministic() {
        let region = Some(Uuid::new_v4());
        assert_eq!(
            administracion_id(Some("A01"), region, "x"),
            administracion_id(Some("A01"), region, "y")
        );
        assert_eq!(
            administracion_id(None, region, "Servicio"),
            administracion_id(None, region, "Servicio")
        );
        assert_ne!(
            administracion_id(None, region, "Servicio"),
            administracion_id(None, Some(Uuid::new_v4()), "Servicio")
        );
        assert_ne!(titular_id("A01", "Ana", "Consejera"), titular_id("A01", "Ana", "Directora"));
    }

    #[test]
    fn test_same_code_in_two_regions_gets_two_ids() {
        let first = Some(Uuid::from_u128(1));
        let second = Some(Uuid::from_u128(2));
        assert_ne!(
            administracion_id(Some("1"), first, "Consejería"),
            administracion_id(Some("1"), second, "Consejería")
        );
        // A name never collides with a code of the same spelling.
        assert_ne!(
            administracion_id(Some("Servicio"), first, "x"),
            administracion_id(None, first, "Servicio")
        );
    }

    #[test]
    fn test_closed_node_is_not_current() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let mut row = sample().into_row(None);
        assert!(row.is_current_at(t1));
        row.valido_hasta = Some(t1);
        row.activa = false;
        assert!(!row.is_current_at(t1));
        assert!(row.is_current_at(t0));
        row.valido_hasta = None;
        assert!(!row.is_current_at(t0));
    }
}
