/**
 * INGESTION - Décodage et application des messages capteurs
 *
 * RÔLE :
 * Transforme chaque (topic, payload) broker en mise à jour du snapshot, puis
 * déclenche les effets de bord éventuels (persistance + push live).
 *
 * FONCTIONNEMENT :
 * - Étape 1 `apply` : synchrone, rapide, ne remonte jamais d'erreur au dispatch
 * - Étape 2 : push live immédiat (try_send, jamais bloquant) puis écriture mise en
 *   file vers une tâche d'écriture unique qui produit le `SideEffectReport`
 * - L'ordre broker est conservé pour le push comme pour les ids persistés
 * - Vent : un échec d'écriture n'empêche pas le push
 * - Payload invalide / topic inconnu : journalisé puis ignoré
 */

use crate::decode::{decode, DecodeError, TelemetryUpdate};
use crate::fanout::{FanoutReport, LiveRegistry, WindSpeedNotification};
use crate::health::HealthTracker;
use crate::models::{LightCatalog, WindSpeedSample};
use crate::ports::{HistoryStore, PersistenceError};
use crate::snapshot::{NumericChannel, SnapshotStore};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task;

/// Résultat de l'étape synchrone
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Applied {
    Updated,
    /// Message valide mais sans effet (lampe inconnue)
    Ignored,
    WithSideEffect(SideEffect),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SideEffect {
    WindSpeed(f64),
}

#[derive(Debug)]
pub struct SideEffectReport {
    pub persisted: Result<WindSpeedSample, PersistenceError>,
    pub fanout: FanoutReport,
}

impl SideEffectReport {
    fn log(&self) {
        match &self.persisted {
            Ok(sample) => tracing::debug!(
                id = sample.id,
                wind_speed = sample.wind_speed,
                sent = self.fanout.sent,
                skipped = self.fanout.skipped,
                "wind speed stored and pushed"
            ),
            Err(e) => tracing::error!(
                error = %e,
                sent = self.fanout.sent,
                "wind speed pushed but sample not stored"
            ),
        }
    }
}

/// Écriture en attente : l'effet, le résultat du push déjà fait, et qui attend le rapport
struct PendingWrite {
    effect: SideEffect,
    fanout: FanoutReport,
    reply: Option<oneshot::Sender<SideEffectReport>>,
}

#[derive(Clone)]
pub struct Ingestor {
    snapshot: Arc<SnapshotStore>,
    lights: LightCatalog,
    fanout: LiveRegistry,
    health: HealthTracker,
    writes: mpsc::UnboundedSender<PendingWrite>,
}

async fn persist(store: &dyn HistoryStore, effect: SideEffect) -> Result<WindSpeedSample, PersistenceError> {
    match effect {
        SideEffect::WindSpeed(wind_speed) => store.append_wind_speed(wind_speed).await,
    }
}

/// Tâche unique d'écriture : les échantillons sont persistés dans l'ordre de réception
fn spawn_history_writer(store: Arc<dyn HistoryStore>) -> mpsc::UnboundedSender<PendingWrite> {
    let (tx, mut rx) = mpsc::unbounded_channel::<PendingWrite>();
    task::spawn(async move {
        while let Some(PendingWrite { effect, fanout, reply }) = rx.recv().await {
            let report = SideEffectReport { persisted: persist(store.as_ref(), effect).await, fanout };
            report.log();
            if let Some(reply) = reply {
                let _ = reply.send(report);
            }
        }
    });
    tx
}

impl Ingestor {
    /// Démarre aussi la tâche d'écriture de l'historique : à appeler dans un runtime tokio
    pub fn new(
        snapshot: Arc<SnapshotStore>,
        lights: LightCatalog,
        store: Arc<dyn HistoryStore>,
        fanout: LiveRegistry,
        health: HealthTracker,
    ) -> Self {
        let writes = spawn_history_writer(store);
        Self { snapshot, lights, fanout, health, writes }
    }

    pub fn apply(&self, topic: &str, payload: &[u8]) -> Result<Applied, DecodeError> {
        match decode(topic, payload)? {
            TelemetryUpdate::Numeric { channel, value } => Ok(match channel {
                NumericChannel::Temperature => {
                    self.snapshot.set_temperature(value);
                    Applied::Updated
                }
                NumericChannel::Humidity => {
                    self.snapshot.set_humidity(value);
                    Applied::Updated
                }
                NumericChannel::LightIntensity => {
                    self.snapshot.set_light_intensity(value);
                    Applied::Updated
                }
                NumericChannel::WindSpeed => {
                    self.snapshot.set_wind_speed(value);
                    Applied::WithSideEffect(SideEffect::WindSpeed(value))
                }
            }),
            TelemetryUpdate::LightStatus { light, on } => {
                if !self.lights.contains(&light) {
                    tracing::debug!(%light, "status for unknown light ignored");
                    return Ok(Applied::Ignored);
                }
                self.snapshot.set_light(&light, on);
                Ok(Applied::Updated)
            }
        }
    }

    fn push_live(&self, effect: SideEffect) -> FanoutReport {
        match effect {
            SideEffect::WindSpeed(wind_speed) => self.fanout.broadcast(&WindSpeedNotification { wind_speed }),
        }
    }

    /// Étape 2 en attendant le rapport ; passe par la même file que `dispatch`
    #[cfg(test)]
    pub async fn run_side_effects(&self, effect: SideEffect) -> SideEffectReport {
        let fanout = self.push_live(effect);
        let (tx, rx) = oneshot::channel();
        let stopped = || SideEffectReport {
            persisted: Err(PersistenceError::Unavailable("history writer stopped".into())),
            fanout,
        };
        if self.writes.send(PendingWrite { effect, fanout, reply: Some(tx) }).is_err() {
            return stopped();
        }
        rx.await.unwrap_or_else(|_| stopped())
    }

    /// Point d'entrée du dispatch broker : applique et pousse tout de suite, écriture en file
    pub fn dispatch(&self, topic: &str, payload: &[u8]) {
        match self.apply(topic, payload) {
            Ok(Applied::WithSideEffect(effect)) => {
                self.health.record_ingested();
                let fanout = self.push_live(effect);
                if self.writes.send(PendingWrite { effect, fanout, reply: None }).is_err() {
                    tracing::error!(?effect, "history writer stopped, sample lost");
                }
            }
            Ok(_) => self.health.record_ingested(),
            Err(e) => {
                self.health.record_dropped();
                log_decode_error(&e);
            }
        }
    }

    /// Variante séquentielle : attend la fin des effets de bord
    #[cfg(test)]
    pub async fn handle(&self, topic: &str, payload: &[u8]) -> Result<Option<SideEffectReport>, DecodeError> {
        match self.apply(topic, payload)? {
            Applied::WithSideEffect(effect) => Ok(Some(self.run_side_effects(effect).await)),
            Applied::Updated | Applied::Ignored => Ok(None),
        }
    }
}

fn log_decode_error(e: &DecodeError) {
    match e {
        DecodeError::UnknownTopic(topic) => tracing::warn!(%topic, "unknown topic"),
        other => tracing::warn!(error = %other, "dropping malformed telemetry message"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fanout::SkipWhenBusy;
    use crate::query::HistoryQuery;
    use crate::testing::{gateway, lights};
    use std::time::Duration;

    #[tokio::test]
    async fn test_non_numeric_payload_has_no_effect() {
        let gw = gateway();
        let (_id, mut rx) = gw.fanout.register();
        for topic in ["temperature", "humidity", "light_intensity", "wind_speed"] {
            let before = gw.snapshot.snapshot();
            assert!(gw.ingestor.handle(topic, b"not-a-number").await.is_err());
            assert_eq!(gw.snapshot.snapshot(), before);
        }
        assert_eq!(gw.store.wind_count(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_light_leaves_lights_unchanged() {
        let gw = gateway();
        let before = gw.snapshot.snapshot().lights;
        let applied = gw.ingestor.apply("light_status", b"light42:ON").unwrap();
        assert_eq!(applied, Applied::Ignored);
        assert_eq!(gw.snapshot.snapshot().lights, before);
    }

    #[tokio::test]
    async fn test_light_status_updates_snapshot() {
        let gw = gateway();
        gw.ingestor.apply("light_status", b"light1:ON").unwrap();
        assert_eq!(gw.snapshot.snapshot().lights.get("light1"), Some(&true));
        gw.ingestor.apply("light_status", b"light1:OFF").unwrap();
        assert_eq!(gw.snapshot.snapshot().lights.get("light1"), Some(&false));
    }

    #[tokio::test]
    async fn test_wind_speed_updates_persists_and_pushes_once() {
        let gw = gateway();
        let (_a, mut rx_a) = gw.fanout.register();
        let (_b, mut rx_b) = gw.fanout.register();

        let report = gw.ingestor.handle("wind_speed", b"12.5").await.unwrap().unwrap();
        assert_eq!(report.persisted.unwrap().wind_speed, 12.5);
        assert_eq!(report.fanout.sent, 2);

        assert_eq!(gw.snapshot.snapshot().wind_speed, Some(12.5));
        let page = gw.store.wind_speeds(&HistoryQuery::default()).await.unwrap();
        assert_eq!(page.total_count, 1);
        assert_eq!(page.data[0].wind_speed, 12.5);

        for rx in [&mut rx_a, &mut rx_b] {
            assert_eq!(&*rx.recv().await.unwrap(), r#"{"windSpeed":12.5}"#);
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn test_persistence_failure_does_not_block_fanout() {
        let gw = gateway();
        gw.store.fail_writes(true);
        let (_id, mut rx) = gw.fanout.register();

        let report = gw.ingestor.handle("wind_speed", b"7").await.unwrap().unwrap();
        assert!(report.persisted.is_err());
        assert_eq!(report.fanout.sent, 1);
        assert_eq!(gw.snapshot.snapshot().wind_speed, Some(7.0));
        assert_eq!(&*rx.recv().await.unwrap(), r#"{"windSpeed":7.0}"#);
    }

    #[tokio::test]
    async fn test_other_channels_have_no_side_effects() {
        let gw = gateway();
        let (_id, mut rx) = gw.fanout.register();
        assert_eq!(gw.ingestor.apply("humidity", b"55.5").unwrap(), Applied::Updated);
        assert!(gw.ingestor.handle("temperature", b"20").await.unwrap().is_none());
        assert_eq!(gw.snapshot.snapshot().humidity, Some(55.5));
        assert_eq!(gw.store.wind_count(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_light_status_is_dropped() {
        let gw = gateway();
        gw.ingestor.dispatch("light_status", b"light1:ON");
        gw.ingestor.dispatch("light_status", b"light1:GARBAGE");
        gw.ingestor.dispatch("light_status", b"light1:ON:extra");
        assert!(matches!(
            gw.ingestor.apply("light_status", b"light1:off"),
            Err(DecodeError::MalformedLightStatus(_))
        ));

        assert_eq!(gw.snapshot.snapshot().lights.get("light1"), Some(&true));
        let health = gw.health.get_health(&gw.fanout);
        assert_eq!((health.messages_ingested, health.messages_dropped), (1, 2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_dispatch_keeps_broker_order() {
        let gw = gateway();
        let fanout = LiveRegistry::with_policy(Arc::new(SkipWhenBusy), 4096);
        let ingestor = Ingestor::new(gw.snapshot.clone(), lights(), gw.store.clone(), fanout.clone(), gw.health.clone());
        let (_id, mut rx) = fanout.register();

        for i in 0..2000 {
            ingestor.dispatch("wind_speed", i.to_string().as_bytes());
        }
        let expected: Vec<f64> = (0..2000).map(f64::from).collect();

        let mut pushed = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
            pushed.push(value["windSpeed"].as_f64().unwrap());
        }
        assert_eq!(pushed, expected);

        tokio::time::timeout(Duration::from_secs(5), async {
            while gw.store.wind_count() < 2000 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(gw.store.wind_values(), expected);
    }

    #[tokio::test]
    async fn test_dispatch_pushes_then_queues_write() {
        let gw = gateway();
        let (_id, mut rx) = gw.fanout.register();
        gw.ingestor.dispatch("wind_speed", b"3.5");
        assert_eq!(gw.snapshot.snapshot().wind_speed, Some(3.5));
        assert_eq!(&*rx.recv().await.unwrap(), r#"{"windSpeed":3.5}"#);

        tokio::time::timeout(Duration::from_secs(1), async {
            while gw.store.wind_count() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(gw.store.wind_values(), vec![3.5]);

        gw.ingestor.dispatch("pressure", b"1013");
        let health = gw.health.get_health(&gw.fanout);
        assert_eq!((health.messages_ingested, health.messages_dropped), (1, 1));
    }
}
