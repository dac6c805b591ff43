/**
 * HISTORY PORTS - Interface de persistence de l'historique de la passerelle
 *
 * RÔLE :
 * Ce module définit le contrat de stockage durable utilisé par l'ingestion
 * (échantillons de vent, relevés capteurs) et par le dispatcher de commandes
 * (historique des actions lampes).
 *
 * FONCTIONNEMENT :
 * - HistoryStore trait = append-only + lecture via la query surface
 * - Les ids sont attribués par le store (séquence croissante par collection)
 * - Aucun retry automatique : un échec d'écriture est remonté une seule fois
 *
 * UTILITÉ :
 * ✅ Le hot path d'ingestion ne dépend que du trait (tests sans disque)
 * ✅ Implémentation fichier JSON par défaut, SQL possible derrière le même trait
 */

pub mod json_file;

use crate::models::{ActionHistoryRecord, SensorReading, SensorValues, WindSpeedSample};
use crate::query::{HistoryQuery, Page};
use async_trait::async_trait;

pub use json_file::JsonFileStore;

/// Erreurs possibles lors des opérations de persistence
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Ajoute une action lampe (état demandé) horodatée maintenant
    async fn append_action(&self, device: &str, action: bool) -> Result<ActionHistoryRecord, PersistenceError>;

    async fn append_wind_speed(&self, wind_speed: f64) -> Result<WindSpeedSample, PersistenceError>;

    async fn append_sensor_reading(&self, values: SensorValues) -> Result<SensorReading, PersistenceError>;

    async fn actions(&self, query: &HistoryQuery) -> Result<Page<ActionHistoryRecord>, PersistenceError>;

    async fn wind_speeds(&self, query: &HistoryQuery) -> Result<Page<WindSpeedSample>, PersistenceError>;

    async fn sensor_readings(&self, query: &HistoryQuery) -> Result<Page<SensorReading>, PersistenceError>;
}
