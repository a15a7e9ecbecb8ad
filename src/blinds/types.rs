use crate::error::BlindControlError;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer, Serialize};
use std::{fmt, str::FromStr};

/// One sample reported by the blind service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub status: String,
    /// Relative humidity in percent
    pub humidity: f64,
    pub light_level: f64,
}

// The service emits ISO-8601 timestamps, sometimes without an offset.
// Those are read as UTC.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(date_time) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(date_time.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Open,
    Close,
    Auto,
    Manual,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Open => "open",
            CommandKind::Close => "close",
            CommandKind::Auto => "auto",
            CommandKind::Manual => "manual",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = BlindControlError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "open" => Ok(CommandKind::Open),
            "close" => Ok(CommandKind::Close),
            "auto" => Ok(CommandKind::Auto),
            "manual" => Ok(CommandKind::Manual),
            other => Err(BlindControlError::UnknownCommand(other.to_owned())),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ControlRequest {
    pub command: CommandKind,
}

/// Acknowledgement of an accepted command. The body is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub status: StatusCode,
    pub body: String,
}
