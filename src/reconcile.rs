use std::collections::HashSet;
use std::fs;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use serde::Deserialize;
use tracing::warn;

use crate::errors::Result;
use crate::events::{localize_on_date, parse_clip_filename, Event, EventKind};
use crate::registry::StreamConfig;
use crate::scanner::{list_date_dir, thumbnail_for, EventSource};

/// One detection record from `events_<date>.json`.
#[derive(Debug, Clone, Deserialize)]
struct LogEntry {
    id: String,
    #[serde(default)]
    start_time: Option<String>,
    #[serde(default)]
    end_time: Option<String>,
    #[serde(default)]
    peak_confidence: Option<f64>,
    #[serde(default)]
    thumbnail_path: Option<String>,
    #[serde(default)]
    arrival_clip_path: Option<String>,
    #[serde(default)]
    departure_clip_path: Option<String>,
}

/// Sidecar-log policy: the log supplies metadata, but an event is only
/// reported when its clip actually exists on disk. The log may reference
/// clips that were pruned or never finished writing.
pub struct ReconciledSource;

#[async_trait]
impl EventSource for ReconciledSource {
    async fn events_for_date(&self, stream: &StreamConfig, date: NaiveDate) -> Result<Vec<Event>> {
        let entries = load_log(stream, date);
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        let listing = list_date_dir(stream, date);

        let mut events = Vec::new();
        for entry in &entries {
            if let Some(clip) = on_disk(&entry.arrival_clip_path, &listing.filenames) {
                events.push(Event {
                    kind: EventKind::Arrival,
                    timestamp: entry_timestamp(entry, entry.start_time.as_deref(), clip, date, stream),
                    thumbnail: entry
                        .thumbnail_path
                        .as_deref()
                        .filter(|t| listing.filenames.contains(*t))
                        .map(str::to_string)
                        .unwrap_or_else(|| thumbnail_for(clip, &listing.filenames)),
                    clip: clip.to_string(),
                    confidence: Some(entry.peak_confidence.unwrap_or(0.0)),
                    duration_seconds: None,
                    event_id: entry.id.clone(),
                });
            }
            if let Some(clip) = on_disk(&entry.departure_clip_path, &listing.filenames) {
                events.push(Event {
                    kind: EventKind::Departure,
                    timestamp: entry_timestamp(entry, entry.end_time.as_deref(), clip, date, stream),
                    thumbnail: thumbnail_for(clip, &listing.filenames),
                    clip: clip.to_string(),
                    confidence: Some(entry.peak_confidence.unwrap_or(0.0)),
                    duration_seconds: None,
                    event_id: entry.id.clone(),
                });
            }
        }
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }
}

fn load_log(stream: &StreamConfig, date: NaiveDate) -> Vec<LogEntry> {
    let log_path = stream
        .date_dir(date)
        .join(format!("events_{}.json", date.format("%Y-%m-%d")));
    if !log_path.exists() {
        return Vec::new();
    }
    let content = match fs::read_to_string(&log_path) {
        Ok(content) => content,
        Err(e) => {
            warn!("Failed to read {}: {}", log_path.display(), e);
            return Vec::new();
        }
    };
    match serde_json::from_str(&content) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to parse {}: {}", log_path.display(), e);
            Vec::new()
        }
    }
}

fn on_disk<'a>(clip: &'a Option<String>, filenames: &HashSet<String>) -> Option<&'a str> {
    clip.as_deref().filter(|name| filenames.contains(*name))
}

/// Best timestamp for an emitted event: the log's precise instant, else the
/// clip filename's wall-clock time, else the HHMMSS segment of the log id.
fn entry_timestamp(
    entry: &LogEntry,
    precise: Option<&str>,
    clip: &str,
    date: NaiveDate,
    stream: &StreamConfig,
) -> DateTime<FixedOffset> {
    if let Some(parsed) = precise.and_then(|s| DateTime::parse_from_rfc3339(s).ok()) {
        return parsed;
    }
    if let Some(parsed) = parse_clip_filename(clip) {
        return localize_on_date(date, parsed.time, stream.timezone);
    }
    let time = id_time(&entry.id).unwrap_or_else(|| NaiveTime::from_hms_opt(0, 0, 0).unwrap());
    localize_on_date(date, time, stream.timezone)
}

/// Extract HHMMSS from an id of the form YYYYMMDD_HHMMSS.
fn id_time(id: &str) -> Option<NaiveTime> {
    let (_, digits) = id.split_once('_')?;
    if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveTime::from_hms_opt(
        digits[0..2].parse().ok()?,
        digits[2..4].parse().ok()?,
        digits[4..6].parse().ok()?,
    )
}
