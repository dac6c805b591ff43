/**
 * SNAPSHOT STORE - État courant des capteurs et lampes
 *
 * RÔLE :
 * Cache mémoire de la dernière valeur connue par canal (température, humidité,
 * luminosité, vent, lampes). C'est le modèle de lecture de `GET /api/data`.
 *
 * FONCTIONNEMENT :
 * - Un verrou par canal : deux écritures sur des canaux différents ne se bloquent jamais
 * - Dernière écriture gagnante sur un même canal, pas de fusion
 * - Jamais persisté : repart à vide (null) à chaque démarrage
 */

use crate::models::{LightCatalog, SensorSnapshot};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Canaux numériques alimentés par un topic broker du même nom
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericChannel {
    Temperature,
    Humidity,
    LightIntensity,
    WindSpeed,
}

impl NumericChannel {
    pub const ALL: [NumericChannel; 4] = [
        NumericChannel::Temperature,
        NumericChannel::Humidity,
        NumericChannel::LightIntensity,
        NumericChannel::WindSpeed,
    ];

    pub fn topic(self) -> &'static str {
        match self {
            NumericChannel::Temperature => "temperature",
            NumericChannel::Humidity => "humidity",
            NumericChannel::LightIntensity => "light_intensity",
            NumericChannel::WindSpeed => "wind_speed",
        }
    }

    pub fn from_topic(topic: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.topic() == topic)
    }
}

#[derive(Debug, Default)]
pub struct SnapshotStore {
    temperature: RwLock<Option<f64>>,
    humidity: RwLock<Option<f64>>,
    light_intensity: RwLock<Option<f64>>,
    wind_speed: RwLock<Option<f64>>,
    lights: RwLock<BTreeMap<String, bool>>,
}

impl SnapshotStore {
    /// Toutes les lampes connues démarrent éteintes, les mesures à null
    pub fn new(lights: &LightCatalog) -> Self {
        Self {
            lights: RwLock::new(lights.ids().map(|id| (id.to_string(), false)).collect()),
            ..Default::default()
        }
    }

    fn slot(&self, channel: NumericChannel) -> &RwLock<Option<f64>> {
        match channel {
            NumericChannel::Temperature => &self.temperature,
            NumericChannel::Humidity => &self.humidity,
            NumericChannel::LightIntensity => &self.light_intensity,
            NumericChannel::WindSpeed => &self.wind_speed,
        }
    }

    fn set_numeric(&self, channel: NumericChannel, value: f64) {
        *self.slot(channel).write() = Some(value);
    }

    pub fn set_temperature(&self, value: f64) {
        self.set_numeric(NumericChannel::Temperature, value);
    }

    pub fn set_humidity(&self, value: f64) {
        self.set_numeric(NumericChannel::Humidity, value);
    }

    pub fn set_light_intensity(&self, value: f64) {
        self.set_numeric(NumericChannel::LightIntensity, value);
    }

    pub fn set_wind_speed(&self, value: f64) {
        self.set_numeric(NumericChannel::WindSpeed, value);
    }

    /// Met à jour une lampe connue ; retourne `false` (sans rien modifier) sinon
    pub fn set_light(&self, id: &str, on: bool) -> bool {
        let mut lights = self.lights.write();
        match lights.get_mut(id) {
            Some(state) => {
                *state = on;
                true
            }
            None => false,
        }
    }

    pub fn numeric(&self, channel: NumericChannel) -> Option<f64> {
        *self.slot(channel).read()
    }

    pub fn snapshot(&self) -> SensorSnapshot {
        SensorSnapshot {
            temperature: self.numeric(NumericChannel::Temperature),
            humidity: self.numeric(NumericChannel::Humidity),
            light_intensity: self.numeric(NumericChannel::LightIntensity),
            wind_speed: self.numeric(NumericChannel::WindSpeed),
            lights: self.lights.read().clone(),
        }
    }
}
