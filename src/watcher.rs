use std::path::Path;
use std::sync::Arc;

use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info};

use crate::errors::{Result, ViewerError};
use crate::registry::StreamRegistry;

/// Watch the registry file's directory and clear the resolved-stream cache
/// whenever anything under it changes. Only started when caching is
/// enabled; fresh-per-request mode needs no invalidation.
pub async fn start_registry_watcher(registry: Arc<StreamRegistry>) -> Result<()> {
    let (tx, mut rx) = mpsc::channel(100);

    let mut watcher = RecommendedWatcher::new(
        move |res| match res {
            Ok(event) => {
                if let Err(e) = tx.blocking_send(event) {
                    error!("Failed to send file watcher event: {}", e);
                }
            }
            Err(e) => error!("File watcher error: {}", e),
        },
        NotifyConfig::default(),
    )
    .map_err(|e| ViewerError::config_invalid(format!("File watcher error: {}", e)))?;

    // The directory, not just the file: secondary per-stream configs live
    // next to the registry and must invalidate too
    let watch_dir = registry
        .registry_path()
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf();
    watcher
        .watch(&watch_dir, RecursiveMode::Recursive)
        .map_err(|e| {
            ViewerError::config_invalid(format!(
                "Failed to watch registry directory {}: {}",
                watch_dir.display(),
                e
            ))
        })?;
    info!(
        "Watching '{}' for stream registry changes",
        watch_dir.display()
    );

    tokio::spawn(async move {
        let _watcher = watcher; // Keep watcher alive
        let mut last_invalidation: Option<Instant> = None;

        while let Some(_event) = rx.recv().await {
            // Editors fire bursts of events for one save; 500ms debounce
            let now = Instant::now();
            let within_debounce = last_invalidation
                .map(|last| now.duration_since(last) < Duration::from_millis(500))
                .unwrap_or(false);
            if within_debounce {
                continue;
            }
            last_invalidation = Some(now);

            registry.invalidate().await;
            debug!("Stream registry changed, cache cleared");
        }
    });

    Ok(())
}
