use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GatewayConfig {
    pub mqtt: MqttConf,
    pub http: HttpConf,
    pub realtime: RealtimeConf,
    pub storage: StorageConf,
    pub lights: Vec<LightConf>,
    /// Période d'enregistrement des relevés capteurs (désactivé si absent)
    pub sensor_sample_secs: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    pub command_topic: String,
    pub reconnect_delay_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConf {
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RealtimeConf {
    /// Port WebSocket dédié ; `None` = uniquement `/ws` sur le port HTTP
    pub port: Option<u16>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConf {
    pub data_dir: PathBuf,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LightConf {
    pub id: String,
    pub label: String, // ex: "den 1", nom utilisé dans les commandes broker
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConf::default(),
            http: HttpConf::default(),
            realtime: RealtimeConf::default(),
            storage: StorageConf::default(),
            lights: (1..=3)
                .map(|n| LightConf { id: format!("light{n}"), label: format!("den {n}") })
                .collect(),
            sensor_sample_secs: None,
        }
    }
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "iot-gateway-kernel".into(),
            username: None,
            password: None,
            keep_alive_secs: 15,
            command_topic: "inTopic".into(),
            reconnect_delay_secs: 2,
        }
    }
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { port: 3001 }
    }
}

impl Default for RealtimeConf {
    fn default() -> Self {
        Self { port: Some(8080) }
    }
}

impl Default for StorageConf {
    fn default() -> Self {
        Self { data_dir: PathBuf::from("./data") }
    }
}

impl GatewayConfig {
    /// Les secrets broker peuvent venir de l'environnement (.env) plutôt que du YAML
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("GATEWAY_MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Ok(user) = std::env::var("GATEWAY_MQTT_USERNAME") {
            self.mqtt.username = Some(user);
        }
        if let Ok(pass) = std::env::var("GATEWAY_MQTT_PASSWORD") {
            self.mqtt.password = Some(pass);
        }
    }
}

pub fn parse_config(txt: &str) -> Result<GatewayConfig, serde_yaml::Error> {
    if txt.trim().is_empty() {
        return Ok(GatewayConfig::default());
    }
    serde_yaml::from_str(txt)
}

pub async fn load_config() -> GatewayConfig {
    let path = std::env::var("GATEWAY_CONFIG").unwrap_or_else(|_| "gateway.yaml".into());
    let mut cfg = load_config_from(&path).await;
    cfg.apply_env_overrides();
    cfg
}

async fn load_config_from(path: &str) -> GatewayConfig {
    if !Path::new(path).exists() {
        tracing::warn!(path, "no gateway config file, using defaults");
        return GatewayConfig::default();
    }
    let txt = fs::read_to_string(path).await.unwrap_or_default();
    parse_config(&txt).unwrap_or_else(|e| {
        tracing::error!(path, error = %e, "invalid gateway config, using defaults");
        GatewayConfig::default()
    })
}
