use crate::parsers::parse_duration;
use serde::{Deserialize, Deserializer};
use std::time::Duration;

pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    let secs = duration.as_secs();
    if duration.subsec_nanos() % 1_000_000 != 0 {
        serializer.serialize_str(&format!("{}ns", duration.as_nanos()))
    } else if duration.subsec_nanos() != 0 {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    } else if secs != 0 && secs % 3600 == 0 {
        serializer.serialize_str(&format!("{}h", secs / 3600))
    } else if secs != 0 && secs % 60 == 0 {
        serializer.serialize_str(&format!("{}min", secs / 60))
    } else {
        serializer.serialize_str(&format!("{}s", secs))
    }
}
