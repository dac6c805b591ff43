/**
 * REALTIME FAN-OUT - Diffusion des mises à jour aux clients WebSocket
 *
 * RÔLE :
 * Registre des connexions live ouvertes. Chaque notification est sérialisée
 * une seule fois puis proposée à toutes les connexions.
 *
 * FONCTIONNEMENT :
 * - register() à l'accept, remove() à la fermeture / erreur
 * - Chaque connexion = canal borné vers sa tâche d'écriture socket
 * - DeliveryPolicy décide quoi faire d'une connexion occupée (par défaut : on saute)
 * - Pas de file d'attente par client : un client lent rate les valeurs intermédiaires
 */

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

pub type ConnectionId = Uuid;
pub type Frame = Arc<str>;

/// Notification poussée à chaque nouvelle vitesse de vent : `{"windSpeed": 12.5}`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindSpeedNotification {
    pub wind_speed: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Skipped,
    Closed,
}

/// Politique appliquée à chaque connexion au moment du push
pub trait DeliveryPolicy: Send + Sync {
    fn offer(&self, tx: &mpsc::Sender<Frame>, frame: &Frame) -> Delivery;
}

/// Connexion non prête (canal plein) -> valeur perdue pour ce client
#[derive(Debug, Default, Clone, Copy)]
pub struct SkipWhenBusy;

impl DeliveryPolicy for SkipWhenBusy {
    fn offer(&self, tx: &mpsc::Sender<Frame>, frame: &Frame) -> Delivery {
        match tx.try_send(frame.clone()) {
            Ok(()) => Delivery::Sent,
            Err(TrySendError::Full(_)) => Delivery::Skipped,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanoutReport {
    pub sent: usize,
    pub skipped: usize,
    pub closed: usize,
}

#[derive(Clone)]
pub struct LiveRegistry {
    connections: Arc<Mutex<HashMap<ConnectionId, mpsc::Sender<Frame>>>>,
    policy: Arc<dyn DeliveryPolicy>,
    capacity: usize,
}

impl Default for LiveRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveRegistry {
    /// Capacité 1 : au plus une trame en vol par client, le reste est sauté
    pub fn new() -> Self {
        Self::with_policy(Arc::new(SkipWhenBusy), 1)
    }

    pub fn with_policy(policy: Arc<dyn DeliveryPolicy>, capacity: usize) -> Self {
        Self {
            connections: Arc::new(Mutex::new(HashMap::new())),
            policy,
            capacity: capacity.max(1),
        }
    }

    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<Frame>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.capacity);
        self.connections.lock().insert(id, tx);
        tracing::info!(connection = %id, "live client connected");
        (id, rx)
    }

    pub fn remove(&self, id: &ConnectionId) -> bool {
        let removed = self.connections.lock().remove(id).is_some();
        if removed {
            tracing::info!(connection = %id, "live client disconnected");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn broadcast<T: Serialize>(&self, notification: &T) -> FanoutReport {
        if self.is_empty() {
            return FanoutReport::default();
        }
        let frame: Frame = match serde_json::to_string(notification) {
            Ok(json) => json.into(),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize live notification");
                return FanoutReport::default();
            }
        };

        let mut report = FanoutReport::default();
        let mut connections = self.connections.lock();
        connections.retain(|id, tx| match self.policy.offer(tx, &frame) {
            Delivery::Sent => {
                report.sent += 1;
                true
            }
            Delivery::Skipped => {
                tracing::debug!(connection = %id, "live client busy, update skipped");
                report.skipped += 1;
                true
            }
            Delivery::Closed => {
                report.closed += 1;
                false
            }
        });
        report
    }
}
