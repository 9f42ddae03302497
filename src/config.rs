use serde::{Deserialize, Serialize};
use std::fs;

use crate::errors::Result;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum EventPolicy {
    /// Emit arrival and departure clips, skip merged visit clips.
    #[serde(rename = "arrival-departure")]
    ArrivalDeparture,
    /// Emit only merged visit clips.
    #[serde(rename = "visits")]
    Visits,
    /// Reconcile the per-date JSON event log against on-disk clips.
    #[serde(rename = "reconciled")]
    Reconciled,
}

impl Default for EventPolicy {
    fn default() -> Self {
        Self::ArrivalDeparture
    }
}

impl std::fmt::Display for EventPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventPolicy::ArrivalDeparture => write!(f, "arrival-departure"),
            EventPolicy::Visits => write!(f, "visits"),
            EventPolicy::Reconciled => write!(f, "reconciled"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum VisitDuration {
    /// Probe the visit clip with ffprobe (size estimate on failure).
    #[serde(rename = "probe")]
    Probe,
    /// Derive from the surrounding arrival/departure clip times, probing
    /// when no pair exists.
    #[serde(rename = "paired")]
    Paired,
}

impl Default for VisitDuration {
    fn default() -> Self {
        Self::Probe
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub streams: StreamsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub tls: Option<TlsConfig>,
    pub cors_allow_origin: Option<String>,
    /// Directory with the built frontend; served with an index.html
    /// fallback when set.
    pub static_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    pub enabled: bool,
    pub cert_path: String,
    pub key_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamsConfig {
    /// Registry file mapping stream ids to storage roots and metadata.
    #[serde(default = "default_registry_path")]
    pub registry: String,
    /// Cache resolved stream configs for the process lifetime. A watcher
    /// on the registry path invalidates the cache on change.
    #[serde(default)]
    pub cache: bool,
    #[serde(default)]
    pub event_policy: EventPolicy,
    #[serde(default)]
    pub visit_duration: VisitDuration,
}

fn default_registry_path() -> String {
    "streams.yaml".to_string()
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            registry: default_registry_path(),
            cache: false,
            event_policy: EventPolicy::default(),
            visit_duration: VisitDuration::default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                tls: None,
                cors_allow_origin: Some("*".to_string()),
                static_dir: None,
            },
            streams: StreamsConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = if path.ends_with(".json") {
            serde_json::from_str(&content)?
        } else {
            toml::from_str(&content)
                .map_err(|e| crate::errors::ViewerError::config_invalid(format!(
                    "Failed to parse {}: {}", path, e
                )))?
        };
        Ok(config)
    }
}
