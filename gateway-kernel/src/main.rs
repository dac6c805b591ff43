/**
 * GATEWAY KERNEL - Point d'entrée de la passerelle télémétrie
 *
 * RÔLE : Orchestration de tous les modules : config, broker MQTT, snapshot,
 * historique, canal live, API HTTP.
 *
 * ARCHITECTURE : Event-driven via MQTT (capteurs -> snapshot -> historique + push WebSocket)
 * et API REST (lecture d'état, commande des lampes, historique paginé).
 */

mod command;
mod config;
mod decode;
mod fanout;
mod health;
mod http;
mod ingest;
mod models;
mod mqtt;
mod ports;
mod query;
mod recorder;
mod snapshot;
#[cfg(test)]
mod testing;

use crate::command::CommandDispatcher;
use crate::config::load_config;
use crate::fanout::LiveRegistry;
use crate::health::HealthTracker;
use crate::http::AppState;
use crate::ingest::Ingestor;
use crate::models::LightCatalog;
use crate::ports::{HistoryStore, JsonFileStore};
use crate::snapshot::SnapshotStore;

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env optionnel (identifiants broker)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gateway_kernel=info")))
        .init();

    let cfg = load_config().await;
    let lights = LightCatalog::from_config(&cfg.lights);
    tracing::info!(lights = lights.ids().count(), "light catalog loaded");

    // état courant + historique
    let snapshot = Arc::new(SnapshotStore::new(&lights));
    let store: Arc<dyn HistoryStore> = Arc::new(
        JsonFileStore::open(&cfg.storage.data_dir)
            .with_context(|| format!("failed to open history store in {}", cfg.storage.data_dir.display()))?,
    );

    let health = HealthTracker::new();
    let fanout = LiveRegistry::new();

    // broker : ingestion capteurs + publication des commandes
    let (publisher, subscriber) = mqtt::connect(&cfg.mqtt);
    let ingestor = Ingestor::new(snapshot.clone(), lights.clone(), store.clone(), fanout.clone(), health.clone());
    mqtt::spawn_ingestion_loop(subscriber, ingestor, health.clone());

    if let Some(secs) = cfg.sensor_sample_secs.filter(|s| *s > 0) {
        recorder::spawn_sensor_recorder(snapshot.clone(), store.clone(), Duration::from_secs(secs));
    }

    let commands = CommandDispatcher::new(Arc::new(publisher), store.clone(), lights, cfg.mqtt.command_topic.clone());

    // canal live sur son propre port si configuré
    if let Some(port) = cfg.realtime.port.filter(|p| *p != cfg.http.port) {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind realtime listener on {addr}"))?;
        tracing::info!(%addr, "realtime WebSocket listening");
        let realtime = http::build_realtime_router(fanout.clone());
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, realtime).await {
                tracing::error!(error = %e, "realtime server stopped");
            }
        });
    }

    let app_state = AppState { snapshot, store, commands, fanout, health };
    let app = http::build_router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.http.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {addr}"))?;
    tracing::info!(%addr, "gateway API listening");
    axum::serve(listener, app).await.context("HTTP server stopped")?;
    Ok(())
}
