use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::errors::{Result, ViewerError};

/// Resolved per-stream configuration.
#[derive(Debug, Clone, Serialize)]
pub struct StreamConfig {
    pub id: String,
    pub name: String,
    #[serde(skip)]
    pub data_path: PathBuf,
    pub timezone: Tz,
    pub external_channel_id: Option<String>,
    pub display: serde_json::Value,
}

impl StreamConfig {
    pub fn clips_dir(&self) -> PathBuf {
        self.data_path.join("clips")
    }

    pub fn date_dir(&self, date: chrono::NaiveDate) -> PathBuf {
        self.clips_dir().join(date.format("%Y-%m-%d").to_string())
    }
}

/// One registry entry. Display metadata may live inline or in a separate
/// file referenced by `config`; the file wins where both are present.
#[derive(Debug, Clone, Deserialize)]
struct RegistryEntry {
    data_path: PathBuf,
    #[serde(default)]
    config: Option<PathBuf>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    timezone: Option<Tz>,
    #[serde(default)]
    external_channel_id: Option<String>,
    #[serde(default)]
    display: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    streams: BTreeMap<String, RegistryEntry>,
}

/// Secondary per-stream configuration file.
#[derive(Debug, Clone, Deserialize)]
struct StreamFile {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    timezone: Option<Tz>,
    #[serde(default)]
    external_channel_id: Option<String>,
    #[serde(default)]
    display: Option<serde_json::Value>,
}

const DEFAULT_STREAM_NAME: &str = "Unknown Stream";

/// Maps stream identifiers to their configuration.
///
/// Reads the registry fresh on every resolution unless caching is enabled,
/// in which case resolved configs live until `invalidate` is called (the
/// registry watcher calls it on file changes).
pub struct StreamRegistry {
    registry_path: PathBuf,
    cached: Option<RwLock<HashMap<String, StreamConfig>>>,
}

impl StreamRegistry {
    pub fn new(registry_path: impl Into<PathBuf>, cache: bool) -> Self {
        Self {
            registry_path: registry_path.into(),
            cached: cache.then(|| RwLock::new(HashMap::new())),
        }
    }

    pub fn registry_path(&self) -> &Path {
        &self.registry_path
    }

    pub async fn resolve(&self, stream_id: &str) -> Result<StreamConfig> {
        if let Some(cache) = &self.cached {
            if let Some(found) = cache.read().await.get(stream_id) {
                debug!("Registry cache hit for stream '{}'", stream_id);
                return Ok(found.clone());
            }
        }

        let entries = self.load_entries()?;
        let entry = entries.get(stream_id).ok_or_else(|| {
            ViewerError::not_found(format!("Stream {} not found", stream_id))
        })?;
        let stream = self.resolve_entry(stream_id, entry)?;

        if let Some(cache) = &self.cached {
            cache.write().await.insert(stream_id.to_string(), stream.clone());
        }
        Ok(stream)
    }

    /// All registered streams in id order. A stream whose secondary config
    /// is broken is skipped with a warning so the rest keep serving.
    pub async fn all(&self) -> Result<Vec<StreamConfig>> {
        let entries = self.load_entries()?;
        let mut streams = Vec::with_capacity(entries.len());
        for (id, entry) in &entries {
            match self.resolve_entry(id, entry) {
                Ok(stream) => streams.push(stream),
                Err(e) => warn!("Skipping stream '{}': {}", id, e),
            }
        }
        Ok(streams)
    }

    pub async fn invalidate(&self) {
        if let Some(cache) = &self.cached {
            cache.write().await.clear();
            debug!("Registry cache invalidated");
        }
    }

    fn load_entries(&self) -> Result<BTreeMap<String, RegistryEntry>> {
        let content = fs::read_to_string(&self.registry_path).map_err(|e| {
            ViewerError::config_invalid(format!(
                "Failed to read stream registry {}: {}",
                self.registry_path.display(),
                e
            ))
        })?;
        let registry: RegistryFile = serde_yaml::from_str(&content).map_err(|e| {
            ViewerError::config_invalid(format!(
                "Failed to parse stream registry {}: {}",
                self.registry_path.display(),
                e
            ))
        })?;
        Ok(registry.streams)
    }

    fn resolve_entry(&self, id: &str, entry: &RegistryEntry) -> Result<StreamConfig> {
        let secondary = match &entry.config {
            Some(path) => Some(self.load_stream_file(id, path)?),
            None => None,
        };
        let secondary = secondary.unwrap_or(StreamFile {
            name: None,
            timezone: None,
            external_channel_id: None,
            display: None,
        });

        Ok(StreamConfig {
            id: id.to_string(),
            name: secondary
                .name
                .or_else(|| entry.name.clone())
                .unwrap_or_else(|| DEFAULT_STREAM_NAME.to_string()),
            data_path: entry.data_path.clone(),
            timezone: secondary.timezone.or(entry.timezone).unwrap_or(Tz::UTC),
            external_channel_id: secondary
                .external_channel_id
                .or_else(|| entry.external_channel_id.clone()),
            display: secondary
                .display
                .or_else(|| entry.display.clone())
                .unwrap_or_else(|| serde_json::json!({})),
        })
    }

    fn load_stream_file(&self, id: &str, path: &Path) -> Result<StreamFile> {
        // Relative references resolve against the registry's directory
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.registry_path
                .parent()
                .unwrap_or(Path::new("."))
                .join(path)
        };

        let content = fs::read_to_string(&path).map_err(|e| {
            ViewerError::config_invalid(format!(
                "Failed to read config for stream '{}' at {}: {}",
                id,
                path.display(),
                e
            ))
        })?;

        let parsed = match path.extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::from_str::<StreamFile>(&content).map_err(|e| e.to_string()),
            Some("toml") => toml::from_str::<StreamFile>(&content).map_err(|e| e.to_string()),
            _ => serde_yaml::from_str::<StreamFile>(&content).map_err(|e| e.to_string()),
        };
        parsed.map_err(|e| {
            ViewerError::config_invalid(format!(
                "Failed to parse config for stream '{}' at {}: {}",
                id,
                path.display(),
                e
            ))
        })
    }
}
