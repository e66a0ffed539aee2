use serde::{Serialize, Deserialize, Serializer, Deserializer};
use std::time::Duration;

use super::types::NetworkId;

/// Serializes Duration as seconds
pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    duration.as_secs_f64().serialize(serializer)
}

/// Deserializes Duration from seconds
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs)
        .map_err(|err| serde::de::Error::custom(format!("invalid duration {}: {}", secs, err)))
}

/// Serializes a NetworkId as "AA:BB:CC:DD"
pub fn serialize_network_id<S>(id: &NetworkId, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    id.to_string().serialize(serializer)
}

/// Deserializes a NetworkId from "AA:BB:CC:DD"
pub fn deserialize_network_id<'de, D>(deserializer: D) -> Result<NetworkId, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    text.parse().map_err(serde::de::Error::custom)
}
