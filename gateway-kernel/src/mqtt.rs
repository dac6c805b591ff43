/**
 * BROKER CLIENT - Session MQTT de la passerelle
 *
 * RÔLE :
 * Une session longue durée vers le broker terrain : abonnement aux topics
 * capteurs, publication des commandes lampes.
 *
 * FONCTIONNEMENT :
 * - Publisher / Subscriber = capacités abstraites (doublures de test sans broker)
 * - Ré-abonnement à chaque ConnAck : la session broker n'est pas persistante
 * - Reconnexion laissée à l'event loop rumqttc, on temporise simplement entre deux échecs
 * - Aucun buffer pendant une coupure : les messages publiés entre-temps sont perdus
 * - Publication refusée hors connexion ou file rumqttc pleine (jamais d'attente)
 */

use crate::config::MqttConf;
use crate::decode::LIGHT_STATUS_TOPIC;
use crate::health::HealthTracker;
use crate::ingest::Ingestor;
use crate::snapshot::NumericChannel;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{self, JoinHandle};

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("MQTT connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),
    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    Connected,
    Message { topic: String, payload: Vec<u8> },
    Disconnected(String),
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait Subscriber: Send {
    /// Prochain événement de session ; `None` quand la source est épuisée
    async fn next_event(&mut self) -> Option<BrokerEvent>;
}

/// Topics capteurs écoutés par la passerelle
pub fn telemetry_topics() -> Vec<String> {
    NumericChannel::ALL
        .iter()
        .map(|c| c.topic())
        .chain(std::iter::once(LIGHT_STATUS_TOPIC))
        .map(String::from)
        .collect()
}

/// Taille de la file de requêtes entre le client et l'event loop
const REQUEST_CAPACITY: usize = 10;

#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BrokerError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("not connected to broker".into()));
        }
        self.client.try_publish(topic, QoS::AtMostOnce, false, payload)?;
        Ok(())
    }
}

pub struct MqttSubscriber {
    client: AsyncClient,
    eventloop: EventLoop,
    topics: Vec<String>,
    reconnect_delay: Duration,
    backoff_pending: bool,
    connected: Arc<AtomicBool>,
}

#[async_trait]
impl Subscriber for MqttSubscriber {
    async fn next_event(&mut self) -> Option<BrokerEvent> {
        if self.backoff_pending {
            self.backoff_pending = false;
            tokio::time::sleep(self.reconnect_delay).await;
        }
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    self.connected.store(true, Ordering::SeqCst);
                    for topic in &self.topics {
                        if let Err(e) = self.client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                            tracing::warn!(topic = %topic, error = %e, "subscribe request failed");
                        }
                    }
                    return Some(BrokerEvent::Connected);
                }
                Ok(Event::Incoming(Incoming::Publish(p))) => {
                    return Some(BrokerEvent::Message {
                        topic: p.topic,
                        payload: p.payload.to_vec(),
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    self.connected.store(false, Ordering::SeqCst);
                    self.backoff_pending = true;
                    return Some(BrokerEvent::Disconnected(BrokerError::from(e).to_string()));
                }
            }
        }
    }
}

/// Prépare le client et l'event loop ; la connexion réelle démarre au premier poll
pub fn connect(cfg: &MqttConf) -> (MqttPublisher, MqttSubscriber) {
    let mut opts = MqttOptions::new(cfg.client_id.as_str(), cfg.host.as_str(), cfg.port);
    opts.set_keep_alive(Duration::from_secs(cfg.keep_alive_secs.max(5)));
    if let Some(user) = &cfg.username {
        opts.set_credentials(user.as_str(), cfg.password.as_deref().unwrap_or_default());
    }

    let (client, eventloop) = AsyncClient::new(opts, REQUEST_CAPACITY);
    tracing::info!(host = %cfg.host, port = cfg.port, client_id = %cfg.client_id, "MQTT client configured");

    let connected = Arc::new(AtomicBool::new(false));
    let publisher = MqttPublisher { client: client.clone(), connected: connected.clone() };
    let subscriber = MqttSubscriber {
        client,
        eventloop,
        topics: telemetry_topics(),
        reconnect_delay: Duration::from_secs(cfg.reconnect_delay_secs),
        backoff_pending: false,
        connected,
    };
    (publisher, subscriber)
}

/// Boucle d'ingestion : consomme la session jusqu'à épuisement de la source
pub async fn run_ingestion_loop<S: Subscriber>(mut subscriber: S, ingestor: Ingestor, health: HealthTracker) {
    while let Some(event) = subscriber.next_event().await {
        match event {
            BrokerEvent::Connected => {
                health.mark_broker_connected();
                tracing::info!("connected to MQTT broker, telemetry topics subscribed");
            }
            BrokerEvent::Message { topic, payload } => ingestor.dispatch(&topic, &payload),
            BrokerEvent::Disconnected(reason) => {
                health.increment_reconnects();
                tracing::error!(%reason, "MQTT connection lost, retrying");
            }
        }
    }
    tracing::warn!("broker event source closed, ingestion loop stopped");
}

pub fn spawn_ingestion_loop<S>(subscriber: S, ingestor: Ingestor, health: HealthTracker) -> JoinHandle<()>
where
    S: Subscriber + 'static,
{
    task::spawn(run_ingestion_loop(subscriber, ingestor, health))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{gateway, ScriptedSubscriber};

    #[test]
    fn test_topic_set() {
        assert_eq!(
            telemetry_topics(),
            vec!["temperature", "humidity", "light_intensity", "wind_speed", "light_status"]
        );
    }

    #[tokio::test]
    async fn test_publish_refused_before_connack() {
        let (publisher, _subscriber) = connect(&MqttConf::default());
        let res = publisher.publish("inTopic", "den 1 bat".into()).await;
        assert!(matches!(res, Err(BrokerError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_publish_fails_fast_when_queue_is_full() {
        let (publisher, _subscriber) = connect(&MqttConf::default());
        publisher.connected.store(true, Ordering::SeqCst);
        for _ in 0..REQUEST_CAPACITY {
            publisher.publish("inTopic", "den 1 bat".into()).await.unwrap();
        }
        // event loop jamais pollé : la file ne se vide pas
        let res = tokio::time::timeout(Duration::from_secs(1), publisher.publish("inTopic", "den 1 tat".into()))
            .await
            .unwrap();
        assert!(matches!(res, Err(BrokerError::Client(_))));
    }

    #[tokio::test]
    async fn test_loop_survives_disconnect_and_bad_payloads() {
        let gw = gateway();
        let subscriber = ScriptedSubscriber::new(vec![
            BrokerEvent::Connected,
            BrokerEvent::Message { topic: "temperature".into(), payload: b"21.5".to_vec() },
            BrokerEvent::Disconnected("connection reset".into()),
            BrokerEvent::Message { topic: "humidity".into(), payload: b"wet".to_vec() },
            BrokerEvent::Connected,
            // redélivrance après reconnexion
            BrokerEvent::Message { topic: "temperature".into(), payload: b"22".to_vec() },
            BrokerEvent::Message { topic: "light_status".into(), payload: b"light3:ON".to_vec() },
        ]);

        run_ingestion_loop(subscriber, gw.ingestor.clone(), gw.health.clone()).await;

        let snap = gw.snapshot.snapshot();
        assert_eq!(snap.temperature, Some(22.0));
        assert_eq!(snap.humidity, None);
        assert_eq!(snap.lights.get("light3"), Some(&true));

        let health = gw.health.get_health(&gw.fanout);
        assert_eq!(health.broker_status, "connected");
        assert_eq!(health.broker_reconnects, 1);
        assert_eq!(health.messages_ingested, 3);
        assert_eq!(health.messages_dropped, 1);
    }
}
