use std::collections::HashSet;
use std::fs;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::warn;

use crate::config::{EventPolicy, VisitDuration};
use crate::errors::Result;
use crate::events::{derive_event_id, localize_on_date, parse_clip_filename, Event, EventKind, ParsedClip};
use crate::probe::MediaProbe;
use crate::reconcile::ReconciledSource;
use crate::registry::StreamConfig;

/// Event-shaping strategy: how a date directory becomes a timeline.
///
/// Exactly one implementation is active per process, selected by
/// `streams.event_policy`.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn events_for_date(&self, stream: &StreamConfig, date: NaiveDate) -> Result<Vec<Event>>;

    async fn has_events(&self, stream: &StreamConfig, date: NaiveDate) -> Result<bool> {
        Ok(!self.events_for_date(stream, date).await?.is_empty())
    }
}

pub fn make_event_source(policy: &EventPolicy, visit_duration: VisitDuration) -> Arc<dyn EventSource> {
    match policy {
        EventPolicy::ArrivalDeparture => Arc::new(ArrivalDepartureSource),
        EventPolicy::Visits => Arc::new(VisitSource::new(visit_duration)),
        EventPolicy::Reconciled => Arc::new(ReconciledSource),
    }
}

/// Matched video clips in lexical filename order, plus every filename in
/// the directory for thumbnail association.
pub(crate) struct DateListing {
    pub clips: Vec<(String, ParsedClip)>,
    pub filenames: HashSet<String>,
}

/// Enumerate one date directory. A missing directory is an empty listing,
/// and a scan failure degrades to the same so one corrupt date cannot
/// break aggregate statistics.
pub(crate) fn list_date_dir(stream: &StreamConfig, date: NaiveDate) -> DateListing {
    let date_dir = stream.date_dir(date);
    if !date_dir.exists() {
        return DateListing { clips: Vec::new(), filenames: HashSet::new() };
    }

    let entries = match fs::read_dir(&date_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to read {}: {}", date_dir.display(), e);
            return DateListing { clips: Vec::new(), filenames: HashSet::new() };
        }
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    names.sort();

    let mut clips = Vec::new();
    for name in &names {
        // Sidecar JSON, temp files and unknown names fall out here; image
        // matches only feed thumbnail lookup
        if let Some(parsed) = parse_clip_filename(name) {
            if parsed.is_video {
                clips.push((name.clone(), parsed));
            }
        }
    }

    DateListing { clips, filenames: names.into_iter().collect() }
}

pub(crate) fn thumbnail_for(clip_name: &str, filenames: &HashSet<String>) -> String {
    let stem = clip_name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(clip_name);
    let candidate = format!("{}.jpg", stem);
    if filenames.contains(&candidate) {
        candidate
    } else {
        String::new()
    }
}

/// Default policy: arrivals and departures from clip filenames, merged
/// visit clips skipped.
pub struct ArrivalDepartureSource;

#[async_trait]
impl EventSource for ArrivalDepartureSource {
    async fn events_for_date(&self, stream: &StreamConfig, date: NaiveDate) -> Result<Vec<Event>> {
        let listing = list_date_dir(stream, date);
        let events = listing
            .clips
            .iter()
            .filter(|(_, parsed)| parsed.kind != EventKind::Visit)
            .map(|(name, parsed)| Event {
                kind: parsed.kind,
                timestamp: localize_on_date(date, parsed.time, stream.timezone),
                thumbnail: thumbnail_for(name, &listing.filenames),
                clip: name.clone(),
                // Not available from a filesystem scan
                confidence: Some(0.0),
                duration_seconds: None,
                event_id: derive_event_id(date, parsed.time),
            })
            .collect();
        Ok(events)
    }
}

/// Merged-timeline policy: only visit clips, each carrying a duration.
pub struct VisitSource {
    probe: MediaProbe,
    duration_strategy: VisitDuration,
}

impl VisitSource {
    pub fn new(duration_strategy: VisitDuration) -> Self {
        Self { probe: MediaProbe::default(), duration_strategy }
    }
}

#[async_trait]
impl EventSource for VisitSource {
    async fn events_for_date(&self, stream: &StreamConfig, date: NaiveDate) -> Result<Vec<Event>> {
        let listing = list_date_dir(stream, date);
        let date_dir = stream.date_dir(date);

        let mut events = Vec::new();
        for (name, parsed) in &listing.clips {
            if parsed.kind != EventKind::Visit {
                continue;
            }

            let paired = match self.duration_strategy {
                VisitDuration::Paired => paired_duration(&listing.clips, parsed),
                VisitDuration::Probe => None,
            };
            let duration = match paired {
                Some(seconds) => seconds,
                None => self.probe.clip_duration(&date_dir.join(name)).await,
            };

            events.push(Event {
                kind: EventKind::Visit,
                timestamp: localize_on_date(date, parsed.time, stream.timezone),
                thumbnail: thumbnail_for(name, &listing.filenames),
                clip: name.clone(),
                confidence: None,
                duration_seconds: Some(duration),
                event_id: derive_event_id(date, parsed.time),
            });
        }
        Ok(events)
    }
}

/// Visit length from the bracketing arrival/departure clips: the latest
/// arrival at or before the visit time and the earliest departure at or
/// after it. None when either side is missing.
fn paired_duration(clips: &[(String, ParsedClip)], visit: &ParsedClip) -> Option<f64> {
    let arrival = clips
        .iter()
        .filter(|(_, c)| c.kind == EventKind::Arrival && c.time <= visit.time)
        .map(|(_, c)| c.time)
        .max()?;
    let departure = clips
        .iter()
        .filter(|(_, c)| c.kind == EventKind::Departure && c.time >= visit.time)
        .map(|(_, c)| c.time)
        .min()?;
    Some((departure - arrival).num_seconds() as f64)
}
