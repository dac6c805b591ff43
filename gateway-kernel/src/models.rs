use crate::command::CommandError;
use crate::config::LightConf;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use time::OffsetDateTime;

/// Vue complète de l'état courant des capteurs (réponse de `GET /api/data`)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorSnapshot {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub light_intensity: Option<f64>,
    pub wind_speed: Option<f64>,
    pub lights: BTreeMap<String, bool>,
}

/// Lampe pilotable : identifiant interne + libellé côté broker ("den 1")
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightDef {
    pub id: String,
    pub label: String,
}

/// Ensemble fermé des lampes connues, fixé au démarrage
#[derive(Debug, Clone, Default)]
pub struct LightCatalog {
    lights: Vec<LightDef>,
}

impl LightCatalog {
    pub fn new(lights: Vec<LightDef>) -> Self {
        let mut out: Vec<LightDef> = Vec::with_capacity(lights.len());
        for light in lights {
            if out.iter().any(|l| l.id == light.id) {
                tracing::warn!(light = %light.id, "duplicate light identifier ignored");
                continue;
            }
            out.push(light);
        }
        Self { lights: out }
    }

    pub fn from_config(confs: &[LightConf]) -> Self {
        Self::new(
            confs
                .iter()
                .map(|c| LightDef { id: c.id.clone(), label: c.label.clone() })
                .collect(),
        )
    }

    pub fn resolve(&self, id: &str) -> Option<&LightDef> {
        self.lights.iter().find(|l| l.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.resolve(id).is_some()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.lights.iter().map(|l| l.id.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightState {
    On,
    Off,
}

impl LightState {
    pub fn is_on(self) -> bool {
        matches!(self, LightState::On)
    }

    /// Vocabulaire de commande attendu par le firmware ("bat" = allumer, "tat" = éteindre)
    pub fn command_verb(self) -> &'static str {
        match self {
            LightState::On => "bat",
            LightState::Off => "tat",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LightState::On => "ON",
            LightState::Off => "OFF",
        }
    }
}

impl FromStr for LightState {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ON" => Ok(LightState::On),
            "OFF" => Ok(LightState::Off),
            _ => Err(CommandError::InvalidState(s.to_string())),
        }
    }
}

/// Trace d'une commande lampe envoyée (état demandé, pas confirmé par le device)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionHistoryRecord {
    pub id: u64,
    pub device: String,
    pub action: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub date_action: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindSpeedSample {
    pub id: u64,
    pub wind_speed: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub date_wind: OffsetDateTime,
}

/// Relevé périodique des capteurs d'ambiance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub id: u64,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub light: Option<f64>,
    #[serde(with = "time::serde::rfc3339")]
    pub date_iot: OffsetDateTime,
}

/// Valeurs d'un relevé avant attribution d'un id par le store
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SensorValues {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub light: Option<f64>,
}

impl SensorValues {
    pub fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.humidity.is_none() && self.light.is_none()
    }
}
