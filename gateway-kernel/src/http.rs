/**
 * API REST PASSERELLE - Serveur HTTP + canal live
 *
 * RÔLE :
 * Expose l'état courant des capteurs, la commande des lampes, la lecture
 * paginée de l'historique et le WebSocket temps réel pour le dashboard.
 *
 * ROUTES :
 * - GET  /health, /system/health
 * - GET  /api/data                    (snapshot courant)
 * - POST /api/lights/{light_id}       (body {"state": "ON"|"OFF"})
 * - GET  /api/lights/history, /api/sensors, /api/wind_speed  (query surface)
 * - GET  /ws                          (push {"windSpeed": n})
 *
 * ERREURS :
 * Réponses JSON `{"error": "..."}` : 400 requête invalide, 500 stockage,
 * 503 broker indisponible.
 */

use crate::command::{CommandDispatcher, CommandError};
use crate::fanout::LiveRegistry;
use crate::health::{GatewayHealth, HealthTracker};
use crate::models::{ActionHistoryRecord, LightState, SensorReading, SensorSnapshot, WindSpeedSample};
use crate::ports::{HistoryStore, PersistenceError};
use crate::query::{HistoryQuery, Page};
use crate::snapshot::SnapshotStore;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{FromRef, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

#[derive(Clone)]
pub struct AppState {
    pub snapshot: Arc<SnapshotStore>,
    pub store: Arc<dyn HistoryStore>,
    pub commands: CommandDispatcher,
    pub fanout: LiveRegistry,
    pub health: HealthTracker,
}

impl FromRef<AppState> for LiveRegistry {
    fn from_ref(app: &AppState) -> Self {
        app.fanout.clone()
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<CommandError> for ApiError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::InvalidIdentifier(_) => ApiError::new(StatusCode::BAD_REQUEST, "Invalid light ID"),
            CommandError::InvalidState(_) => ApiError::new(StatusCode::BAD_REQUEST, err.to_string()),
            CommandError::Broker(_) => ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "Broker unavailable"),
            CommandError::Persistence(_) => {
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Error inserting data into database")
            }
        }
    }
}

impl From<PersistenceError> for ApiError {
    fn from(err: PersistenceError) -> Self {
        tracing::error!(error = %err, "history query failed");
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Error fetching data")
    }
}

#[derive(Debug, Deserialize)]
struct LightRequest {
    state: String,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/api/data", get(get_data))
        .route("/api/lights/history", get(get_light_history))
        .route("/api/lights/{light_id}", post(set_light))
        .route("/api/sensors", get(get_sensors))
        .route("/api/wind_speed", get(get_wind_speed))
        .route("/ws", get(ws_handler))
        .with_state(app_state)
        .layer(CorsLayer::permissive())
}

/// Serveur WebSocket seul, pour le port temps réel dédié
pub fn build_realtime_router(fanout: LiveRegistry) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .with_state(fanout)
}

// GET /api/data (état courant)
async fn get_data(State(app): State<AppState>) -> Json<SensorSnapshot> {
    Json(app.snapshot.snapshot())
}

// POST /api/lights/{light_id}
async fn set_light(
    State(app): State<AppState>,
    Path(light_id): Path<String>,
    Json(req): Json<LightRequest>,
) -> Result<Json<Value>, ApiError> {
    if !app.commands.lights().contains(&light_id) {
        return Err(CommandError::InvalidIdentifier(light_id).into());
    }
    let state: LightState = req.state.parse()?;
    let record = app.commands.set_light(&light_id, state).await?;
    Ok(Json(json!({
        "message": format!("Request to turn {} {} has been sent to the hardware.", light_id, state.as_str()),
        "record": record,
    })))
}

// GET /api/lights/history
async fn get_light_history(
    State(app): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Page<ActionHistoryRecord>>, ApiError> {
    let query = HistoryQuery::from_params(params);
    Ok(Json(app.store.actions(&query).await?))
}

// GET /api/sensors
async fn get_sensors(
    State(app): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Page<SensorReading>>, ApiError> {
    let query = HistoryQuery::from_params(params);
    Ok(Json(app.store.sensor_readings(&query).await?))
}

// GET /api/wind_speed
async fn get_wind_speed(
    State(app): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Page<WindSpeedSample>>, ApiError> {
    let query = HistoryQuery::from_params(params);
    Ok(Json(app.store.wind_speeds(&query).await?))
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<GatewayHealth> {
    Json(app.health.get_health(&app.fanout))
}

async fn ws_handler(ws: WebSocketUpgrade, State(fanout): State<LiveRegistry>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_live_socket(socket, fanout))
}

/// Relaie les trames du registre vers la socket jusqu'à fermeture côté client
async fn serve_live_socket(socket: WebSocket, fanout: LiveRegistry) {
    let (id, mut frames) = fanout.register();
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                if sender.send(Message::Text(frame.to_string().into())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {} // le canal live est en push seul
                }
            }
        }
    }

    fanout.remove(&id);
}
