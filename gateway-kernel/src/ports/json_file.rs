/**
 * PORT JSON - Stockage fichier de l'historique
 *
 * FONCTIONNEMENT :
 * - Un fichier JSON lines par collection dans `data_dir`, un enregistrement par ligne
 * - Ajout = une ligne en fin de fichier, le reste n'est jamais réécrit
 * - Cache mémoire (parking_lot) pour les lectures, compteur d'id par collection
 * - Les ajouts d'une collection sont sérialisés : l'ordre du fichier suit l'ordre des ids
 * - Dernière ligne tronquée (arrêt brutal) écartée à l'ouverture, fichier réécrit
 *   via fichier temporaire + rename
 * - Écriture en échec -> id non consommé, cache intact, erreur remontée
 */

use super::{HistoryStore, PersistenceError};
use crate::models::{ActionHistoryRecord, SensorReading, SensorValues, WindSpeedSample};
use crate::query::{HistoryQuery, Page, Queryable};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;

const ACTIONS_FILE: &str = "action_history.jsonl";
const WIND_FILE: &str = "wind_speeds.jsonl";
const SENSORS_FILE: &str = "sensor_readings.jsonl";

struct Collection<T> {
    storage_path: PathBuf,
    cache: parking_lot::Mutex<Vec<T>>,
    next_id: AtomicU64,
    write_lock: tokio::sync::Mutex<()>,
}

fn to_lines<T: Serialize>(rows: &[T]) -> Result<String, serde_json::Error> {
    let mut out = String::new();
    for row in rows {
        out.push_str(&serde_json::to_string(row)?);
        out.push('\n');
    }
    Ok(out)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Remplace le fichier d'un coup : jamais de fichier à moitié écrit
fn replace_file(path: &Path, content: &str) -> io::Result<()> {
    let tmp = tmp_path(path);
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path).inspect_err(|_| {
        let _ = fs::remove_file(&tmp);
    })
}

async fn append_line(path: &Path, line: &str) -> io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await
}

impl<T> Collection<T>
where
    T: Queryable + Serialize + DeserializeOwned,
{
    fn open(storage_path: PathBuf) -> Result<Self, PersistenceError> {
        let content = match fs::read_to_string(&storage_path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
        let mut rows: Vec<T> = Vec::with_capacity(lines.len());
        let mut dropped_tail = false;
        for (i, line) in lines.iter().enumerate() {
            match serde_json::from_str(line) {
                Ok(row) => rows.push(row),
                Err(e) if i + 1 == lines.len() => {
                    tracing::warn!(path = ?storage_path, error = %e, "truncated last history line dropped");
                    dropped_tail = true;
                }
                Err(e) => return Err(e.into()),
            }
        }
        if dropped_tail || (!content.is_empty() && !content.ends_with('\n')) {
            replace_file(&storage_path, &to_lines(&rows)?)?;
        }

        let next_id = rows.iter().map(|r| r.id()).max().unwrap_or(0) + 1;
        tracing::debug!(path = ?storage_path, rows = rows.len(), "history collection loaded");
        Ok(Self {
            storage_path,
            cache: parking_lot::Mutex::new(rows),
            next_id: AtomicU64::new(next_id),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    async fn append(&self, build: impl FnOnce(u64) -> T) -> Result<T, PersistenceError> {
        let _guard = self.write_lock.lock().await;

        let id = self.next_id.load(Ordering::SeqCst);
        let row = build(id);
        let mut line = serde_json::to_string(&row)?;
        line.push('\n');

        if let Err(e) = append_line(&self.storage_path, &line).await {
            self.repair();
            return Err(e.into());
        }
        self.next_id.store(id + 1, Ordering::SeqCst);
        self.cache.lock().push(row.clone());
        Ok(row)
    }

    // une écriture partielle a pu laisser une ligne incomplète : on repart du cache
    fn repair(&self) {
        let content = match to_lines(&self.cache.lock()) {
            Ok(content) => content,
            Err(e) => {
                tracing::error!(error = %e, "cannot serialize history cache for repair");
                return;
            }
        };
        if let Err(e) = replace_file(&self.storage_path, &content) {
            tracing::error!(path = ?self.storage_path, error = %e, "history file repair failed");
        }
    }

    fn query(&self, query: &HistoryQuery) -> Page<T> {
        query.run(&self.cache.lock())
    }
}

/// Implémentation par défaut du HistoryStore, fichiers JSON sur disque local
pub struct JsonFileStore {
    actions: Collection<ActionHistoryRecord>,
    wind: Collection<WindSpeedSample>,
    sensors: Collection<SensorReading>,
}

impl JsonFileStore {
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, PersistenceError> {
        let dir = data_dir.as_ref();
        fs::create_dir_all(dir)?;
        let store = Self {
            actions: Collection::open(dir.join(ACTIONS_FILE))?,
            wind: Collection::open(dir.join(WIND_FILE))?,
            sensors: Collection::open(dir.join(SENSORS_FILE))?,
        };
        tracing::info!(data_dir = ?dir, "history store initialized");
        Ok(store)
    }
}

#[async_trait]
impl HistoryStore for JsonFileStore {
    async fn append_action(&self, device: &str, action: bool) -> Result<ActionHistoryRecord, PersistenceError> {
        self.actions
            .append(|id| ActionHistoryRecord {
                id,
                device: device.to_string(),
                action,
                date_action: OffsetDateTime::now_utc(),
            })
            .await
    }

    async fn append_wind_speed(&self, wind_speed: f64) -> Result<WindSpeedSample, PersistenceError> {
        self.wind
            .append(|id| WindSpeedSample { id, wind_speed, date_wind: OffsetDateTime::now_utc() })
            .await
    }

    async fn append_sensor_reading(&self, values: SensorValues) -> Result<SensorReading, PersistenceError> {
        self.sensors
            .append(|id| SensorReading {
                id,
                temperature: values.temperature,
                humidity: values.humidity,
                light: values.light,
                date_iot: OffsetDateTime::now_utc(),
            })
            .await
    }

    async fn actions(&self, query: &HistoryQuery) -> Result<Page<ActionHistoryRecord>, PersistenceError> {
        Ok(self.actions.query(query))
    }

    async fn wind_speeds(&self, query: &HistoryQuery) -> Result<Page<WindSpeedSample>, PersistenceError> {
        Ok(self.wind.query(query))
    }

    async fn sensor_readings(&self, query: &HistoryQuery) -> Result<Page<SensorReading>, PersistenceError> {
        Ok(self.sensors.query(query))
    }
}
