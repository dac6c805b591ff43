use crate::snapshot::NumericChannel;

pub const LIGHT_STATUS_TOPIC: &str = "light_status";

/// Mise à jour typée issue d'un message broker
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryUpdate {
    Numeric { channel: NumericChannel, value: f64 },
    LightStatus { light: String, on: bool },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown topic: {0}")]
    UnknownTopic(String),
    #[error("payload on {0} is not valid UTF-8")]
    NotUtf8(String),
    #[error("payload {payload:?} on {topic} is not a number")]
    NotNumeric { topic: String, payload: String },
    #[error("light status {0:?} is not in <id>:<ON|OFF> form")]
    MalformedLightStatus(String),
}

/// Décode un couple (topic, payload). Ne panique jamais : toute entrée invalide
/// devient une `DecodeError` que l'appelant journalise puis ignore.
pub fn decode(topic: &str, payload: &[u8]) -> Result<TelemetryUpdate, DecodeError> {
    let channel = NumericChannel::from_topic(topic);
    if channel.is_none() && topic != LIGHT_STATUS_TOPIC {
        return Err(DecodeError::UnknownTopic(topic.to_string()));
    }

    let text = std::str::from_utf8(payload)
        .map_err(|_| DecodeError::NotUtf8(topic.to_string()))?
        .trim();

    match channel {
        Some(channel) => parse_number(text)
            .map(|value| TelemetryUpdate::Numeric { channel, value })
            .ok_or_else(|| DecodeError::NotNumeric {
                topic: topic.to_string(),
                payload: text.to_string(),
            }),
        None => parse_light_status(text),
    }
}

fn parse_number(text: &str) -> Option<f64> {
    text.parse::<f64>().ok().filter(|v| v.is_finite())
}

// "light1:ON" -> découpe sur le premier ':' seulement
fn parse_light_status(text: &str) -> Result<TelemetryUpdate, DecodeError> {
    let (light, status) = text
        .split_once(':')
        .ok_or_else(|| DecodeError::MalformedLightStatus(text.to_string()))?;
    let light = light.trim();
    if light.is_empty() {
        return Err(DecodeError::MalformedLightStatus(text.to_string()));
    }
    let on = match status.trim() {
        "ON" => true,
        "OFF" => false,
        _ => return Err(DecodeError::MalformedLightStatus(text.to_string())),
    };
    Ok(TelemetryUpdate::LightStatus { light: light.to_string(), on })
}
