/**
 * COMMAND DISPATCHER - Pilotage des lampes via le broker
 *
 * RÔLE :
 * Valide une demande d'actionnement, publie la commande broker puis
 * enregistre l'état demandé dans l'historique des actions.
 *
 * FONCTIONNEMENT :
 * - Identifiant hors catalogue -> InvalidIdentifier, aucun effet de bord
 * - Publication AVANT persistance, sans atomicité entre les deux
 * - Historique en échec -> PersistenceError alors que la commande est partie :
 *   fenêtre d'incohérence assumée, pas de compensation
 * - Pas d'attente d'acquittement du device : on trace l'état demandé
 */

use crate::models::{ActionHistoryRecord, LightCatalog, LightDef, LightState};
use crate::mqtt::{BrokerError, Publisher};
use crate::ports::{HistoryStore, PersistenceError};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Invalid light ID: {0}")]
    InvalidIdentifier(String),
    #[error("Invalid light state: {0}")]
    InvalidState(String),
    #[error("Broker publish failed: {0}")]
    Broker(#[from] BrokerError),
    #[error("Error inserting action history: {0}")]
    Persistence(#[from] PersistenceError),
}

#[derive(Clone)]
pub struct CommandDispatcher {
    publisher: Arc<dyn Publisher>,
    store: Arc<dyn HistoryStore>,
    lights: LightCatalog,
    command_topic: String,
}

/// Payload broker : "<libellé device> <bat|tat>", ex: "den 1 bat"
pub fn command_payload(light: &LightDef, state: LightState) -> String {
    format!("{} {}", light.label, state.command_verb())
}

impl CommandDispatcher {
    pub fn new(
        publisher: Arc<dyn Publisher>,
        store: Arc<dyn HistoryStore>,
        lights: LightCatalog,
        command_topic: impl Into<String>,
    ) -> Self {
        Self { publisher, store, lights, command_topic: command_topic.into() }
    }

    pub fn lights(&self) -> &LightCatalog {
        &self.lights
    }

    pub async fn set_light(&self, identifier: &str, desired: LightState) -> Result<ActionHistoryRecord, CommandError> {
        let light = self
            .lights
            .resolve(identifier)
            .ok_or_else(|| CommandError::InvalidIdentifier(identifier.to_string()))?;

        let payload = command_payload(light, desired);
        self.publisher.publish(&self.command_topic, payload.clone()).await?;
        tracing::info!(light = %light.id, command = %payload, "light command published");

        match self.store.append_action(&light.id, desired.is_on()).await {
            Ok(record) => Ok(record),
            Err(e) => {
                tracing::error!(light = %light.id, error = %e, "light command sent but history not recorded");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MqttConf;
    use crate::testing::{gateway, lights, PublishedMessage};

    #[tokio::test]
    async fn test_unknown_identifier_never_publishes() {
        let gw = gateway();
        for id in ["light4", "", "LIGHT1", "den 1"] {
            let err = gw.commands.set_light(id, LightState::On).await.unwrap_err();
            assert!(matches!(err, CommandError::InvalidIdentifier(_)));
        }
        assert!(gw.publisher.published().is_empty());
        assert!(gw.store.action_records().is_empty());
    }

    #[tokio::test]
    async fn test_on_then_off_records_in_call_order() {
        let gw = gateway();
        gw.commands.set_light("light1", LightState::On).await.unwrap();
        gw.commands.set_light("light1", LightState::Off).await.unwrap();

        let records = gw.store.action_records();
        assert_eq!(records.len(), 2);
        assert_eq!((records[0].device.as_str(), records[0].action), ("light1", true));
        assert_eq!((records[1].device.as_str(), records[1].action), ("light1", false));

        assert_eq!(
            gw.publisher.published(),
            vec![
                PublishedMessage { topic: "inTopic".into(), payload: "den 1 bat".into() },
                PublishedMessage { topic: "inTopic".into(), payload: "den 1 tat".into() },
            ]
        );
    }

    #[tokio::test]
    async fn test_persistence_failure_after_publish() {
        let gw = gateway();
        gw.store.fail_writes(true);
        let err = gw.commands.set_light("light3", LightState::On).await.unwrap_err();
        assert!(matches!(err, CommandError::Persistence(_)));
        // la commande est bien partie vers le matériel
        assert_eq!(gw.publisher.published().len(), 1);
        assert_eq!(gw.publisher.published()[0].payload, "den 3 bat");
    }

    #[tokio::test]
    async fn test_publish_failure_skips_history() {
        let gw = gateway();
        gw.publisher.fail_publishes(true);
        let err = gw.commands.set_light("light2", LightState::Off).await.unwrap_err();
        assert!(matches!(err, CommandError::Broker(_)));
        assert!(gw.store.action_records().is_empty());
    }

    #[tokio::test]
    async fn test_broker_down_is_reported_without_history() {
        let gw = gateway();
        let (publisher, _subscriber) = crate::mqtt::connect(&MqttConf::default());
        let commands = CommandDispatcher::new(Arc::new(publisher), gw.store.clone(), lights(), "inTopic");

        let err = commands.set_light("light1", LightState::On).await.unwrap_err();
        assert!(matches!(err, CommandError::Broker(BrokerError::Unavailable(_))));
        assert!(gw.store.action_records().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_commands_each_recorded() {
        let gw = gateway();
        let (a, b, c) = tokio::join!(
            gw.commands.set_light("light1", LightState::On),
            gw.commands.set_light("light2", LightState::On),
            gw.commands.set_light("light3", LightState::Off),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(gw.store.action_records().len(), 3);
        assert_eq!(gw.publisher.published().len(), 3);
    }
}
