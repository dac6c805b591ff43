use crate::models::{SensorReading, SensorValues};
use crate::ports::{HistoryStore, PersistenceError};
use crate::snapshot::{NumericChannel, SnapshotStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{self, JoinHandle};

/// Enregistre un relevé depuis le snapshot ; rien tant qu'aucun capteur n'a parlé
pub async fn record_once(
    snapshot: &SnapshotStore,
    store: &dyn HistoryStore,
) -> Result<Option<SensorReading>, PersistenceError> {
    let values = SensorValues {
        temperature: snapshot.numeric(NumericChannel::Temperature),
        humidity: snapshot.numeric(NumericChannel::Humidity),
        light: snapshot.numeric(NumericChannel::LightIntensity),
    };
    if values.is_empty() {
        return Ok(None);
    }
    store.append_sensor_reading(values).await.map(Some)
}

/// Démarre l'enregistrement périodique des relevés capteurs
pub fn spawn_sensor_recorder(
    snapshot: Arc<SnapshotStore>,
    store: Arc<dyn HistoryStore>,
    period: Duration,
) -> JoinHandle<()> {
    tracing::info!(period_secs = period.as_secs(), "sensor reading recorder started");
    task::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // le premier tick est immédiat : on le consomme pour attendre une période pleine
        interval.tick().await;
        loop {
            interval.tick().await;
            match record_once(&snapshot, store.as_ref()).await {
                Ok(Some(reading)) => tracing::debug!(id = reading.id, "sensor reading stored"),
                Ok(None) => tracing::debug!("no sensor value yet, reading skipped"),
                Err(e) => tracing::error!(error = %e, "failed to store sensor reading"),
            }
        }
    })
}
