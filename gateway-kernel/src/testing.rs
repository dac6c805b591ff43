//! Doublures de test : broker enregistreur, session scriptée, store mémoire.

use crate::command::CommandDispatcher;
use crate::fanout::LiveRegistry;
use crate::health::HealthTracker;
use crate::ingest::Ingestor;
use crate::models::{ActionHistoryRecord, LightCatalog, LightDef, SensorReading, SensorValues, WindSpeedSample};
use crate::mqtt::{BrokerError, BrokerEvent, Publisher, Subscriber};
use crate::ports::{HistoryStore, PersistenceError};
use crate::query::{HistoryQuery, Page};
use crate::snapshot::SnapshotStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: String,
}

/// Publisher qui enregistre tout (ou échoue sur demande)
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<PublishedMessage>>,
    fail: AtomicBool,
}

impl RecordingPublisher {
    pub fn fail_publishes(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BrokerError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("simulated outage".into()));
        }
        self.published.lock().push(PublishedMessage { topic: topic.to_string(), payload });
        Ok(())
    }
}

/// Session broker rejouant une liste d'événements (connexions, coupures, messages)
pub struct ScriptedSubscriber {
    events: VecDeque<BrokerEvent>,
}

impl ScriptedSubscriber {
    pub fn new(events: Vec<BrokerEvent>) -> Self {
        Self { events: events.into() }
    }
}

#[async_trait]
impl Subscriber for ScriptedSubscriber {
    async fn next_event(&mut self) -> Option<BrokerEvent> {
        self.events.pop_front()
    }
}

#[derive(Default)]
pub struct MemoryStore {
    actions: Mutex<Vec<ActionHistoryRecord>>,
    wind: Mutex<Vec<WindSpeedSample>>,
    sensors: Mutex<Vec<SensorReading>>,
    fail: AtomicBool,
}

impl MemoryStore {
    pub fn fail_writes(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn wind_count(&self) -> usize {
        self.wind.lock().len()
    }

    pub fn wind_values(&self) -> Vec<f64> {
        self.wind.lock().iter().map(|s| s.wind_speed).collect()
    }

    pub fn action_records(&self) -> Vec<ActionHistoryRecord> {
        self.actions.lock().clone()
    }

    fn check(&self) -> Result<(), PersistenceError> {
        if self.fail.load(Ordering::SeqCst) {
            Err(PersistenceError::Unavailable("simulated storage failure".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn append_action(&self, device: &str, action: bool) -> Result<ActionHistoryRecord, PersistenceError> {
        self.check()?;
        let mut rows = self.actions.lock();
        let rec = ActionHistoryRecord {
            id: rows.len() as u64 + 1,
            device: device.to_string(),
            action,
            date_action: OffsetDateTime::now_utc(),
        };
        rows.push(rec.clone());
        Ok(rec)
    }

    async fn append_wind_speed(&self, wind_speed: f64) -> Result<WindSpeedSample, PersistenceError> {
        self.check()?;
        let mut rows = self.wind.lock();
        let sample = WindSpeedSample { id: rows.len() as u64 + 1, wind_speed, date_wind: OffsetDateTime::now_utc() };
        rows.push(sample.clone());
        Ok(sample)
    }

    async fn append_sensor_reading(&self, values: SensorValues) -> Result<SensorReading, PersistenceError> {
        self.check()?;
        let mut rows = self.sensors.lock();
        let reading = SensorReading {
            id: rows.len() as u64 + 1,
            temperature: values.temperature,
            humidity: values.humidity,
            light: values.light,
            date_iot: OffsetDateTime::now_utc(),
        };
        rows.push(reading.clone());
        Ok(reading)
    }

    async fn actions(&self, query: &HistoryQuery) -> Result<Page<ActionHistoryRecord>, PersistenceError> {
        Ok(query.run(&self.actions.lock()))
    }

    async fn wind_speeds(&self, query: &HistoryQuery) -> Result<Page<WindSpeedSample>, PersistenceError> {
        Ok(query.run(&self.wind.lock()))
    }

    async fn sensor_readings(&self, query: &HistoryQuery) -> Result<Page<SensorReading>, PersistenceError> {
        Ok(query.run(&self.sensors.lock()))
    }
}

pub fn lights() -> LightCatalog {
    LightCatalog::new(
        (1..=3)
            .map(|n| LightDef { id: format!("light{n}"), label: format!("den {n}") })
            .collect(),
    )
}

/// Passerelle complète câblée sur les doublures
pub struct TestGateway {
    pub snapshot: Arc<SnapshotStore>,
    pub store: Arc<MemoryStore>,
    pub publisher: Arc<RecordingPublisher>,
    pub fanout: LiveRegistry,
    pub health: HealthTracker,
    pub ingestor: Ingestor,
    pub commands: CommandDispatcher,
}

pub fn gateway() -> TestGateway {
    let lights = lights();
    let snapshot = Arc::new(SnapshotStore::new(&lights));
    let store = Arc::new(MemoryStore::default());
    let publisher = Arc::new(RecordingPublisher::default());
    let fanout = LiveRegistry::new();
    let health = HealthTracker::new();
    let ingestor = Ingestor::new(snapshot.clone(), lights.clone(), store.clone(), fanout.clone(), health.clone());
    let commands = CommandDispatcher::new(publisher.clone(), store.clone(), lights, "inTopic");
    TestGateway { snapshot, store, publisher, fanout, health, ingestor, commands }
}
