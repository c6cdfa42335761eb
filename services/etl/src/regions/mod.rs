//! The autonomous communities with an ETL, and what each one contributes:
//! where its data lives, how it names its columns, and its organ vocabulary.

pub mod andalucia;
pub mod aragon;
pub mod asturias;

use std::fmt;

use uuid::Uuid;

use crate::extract::Extractor;
use crate::transform::RegionTransformer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Andalucia,
    Aragon,
    Asturias,
}

impl Region {
    pub const ALL: [Region; 3] = [Region::Andalucia, Region::Aragon, Region::Asturias];

    pub fn nombre(&self) -> &'static str {
        match self {
            Self::Andalucia => "Andalucía",
            Self::Aragon => "Aragón",
            Self::Asturias => "Asturias",
        }
    }

    /// Names accepted when looking up the seeded `comunidades_autonomas` row.
    pub fn lookup_names(&self) -> &'static [&'static str] {
        match self {
            Self::Andalucia => &["Andalucía"],
            Self::Aragon => &["Aragón"],
            Self::Asturias => &["Asturias", "Principado de Asturias"],
        }
    }

    pub fn extractor(&self) -> Box<dyn Extractor> {
        match self {
            Self::Andalucia => Box::new(andalucia::AndaluciaExtractor),
            Self::Aragon => Box::new(aragon::AragonExtractor),
            Self::Asturias => Box::new(asturias::AsturiasExtractor),
        }
    }

    pub fn transformer(&self, comunidad_autonoma_id: Uuid) -> RegionTransformer {
        match self {
            Self::Andalucia => andalucia::transformer(comunidad_autonoma_id),
            Self::Aragon => aragon::transformer(comunidad_autonoma_id),
            Self::Asturias => asturias::transformer(comunidad_autonoma_id),
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.nombre())
    }
}
