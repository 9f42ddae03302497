use std::collections::HashSet;

use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::Serialize;

use crate::errors::{Result, ViewerError};
use crate::events::{Event, EventKind};
use crate::recency;
use crate::registry::StreamConfig;
use crate::scanner::EventSource;

const MAX_RECENT_EVENTS: usize = 10;

/// Parse a trailing-window string like "24h" or "3d" into a duration.
/// Day counts convert to hours at 24x.
pub fn parse_range(s: &str) -> Result<Duration> {
    if s.is_empty() || !s.is_ascii() {
        return Err(ViewerError::bad_request("Invalid range string"));
    }

    let (number_part, unit_part) = s.split_at(s.len() - 1);

    let value: i64 = number_part.parse().map_err(|_| {
        ViewerError::bad_request(format!("Invalid number in range: {}", number_part))
    })?;

    if value <= 0 {
        return Err(ViewerError::bad_request("Range must be positive"));
    }

    let hours = match unit_part {
        "h" => value,
        "d" => value * 24,
        _ => {
            return Err(ViewerError::bad_request(format!(
                "Invalid range unit '{}'. Use 'h' for hours or 'd' for days",
                unit_part
            )))
        }
    };

    Ok(Duration::hours(hours))
}

#[derive(Debug, Serialize)]
pub struct StatsSummary {
    pub range: String,
    pub cutoff: DateTime<FixedOffset>,
    pub arrivals: u32,
    pub departures: u32,
    pub visits: u32,
    pub recent_events: Vec<Event>,
}

/// Stats for the resolved "today or most recent date with activity" shown
/// on the stream listing.
#[derive(Debug, Serialize)]
pub struct DayStats {
    pub date: Option<chrono::NaiveDate>,
    pub arrivals: u32,
    pub departures: u32,
    pub visits: u32,
    pub last_event: Option<Event>,
}

/// Aggregate events over a trailing window ending now, with the cutoff
/// computed in the stream's timezone.
pub async fn stats_for_range(
    source: &dyn EventSource,
    stream: &StreamConfig,
    range: &str,
) -> Result<StatsSummary> {
    let window = parse_range(range)?;
    let now = Utc::now().with_timezone(&stream.timezone);
    let cutoff = (now - window).fixed_offset();

    // Every calendar date whose local range intersects [cutoff, now]
    let mut events = Vec::new();
    let mut date = (now - window).date_naive();
    let today = now.date_naive();
    while date <= today {
        let day_events = source.events_for_date(stream, date).await?;
        events.extend(day_events.into_iter().filter(|e| e.timestamp >= cutoff));
        date = match date.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }

    let mut events = dedupe_events(events);
    let (arrivals, departures, visits) = tally(&events);

    events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    events.truncate(MAX_RECENT_EVENTS);

    Ok(StatsSummary {
        range: range.to_string(),
        cutoff,
        arrivals,
        departures,
        visits,
        recent_events: events,
    })
}

/// Stats for today, falling back to the most recent date with activity.
pub async fn day_stats(source: &dyn EventSource, stream: &StreamConfig) -> Result<DayStats> {
    let today = Utc::now().with_timezone(&stream.timezone).date_naive();
    let mut date = Some(today);
    let mut events = source.events_for_date(stream, today).await?;

    if events.is_empty() {
        match recency::find_most_recent_date(source, stream, today, recency::DEFAULT_LOOKBACK_DAYS)
            .await?
        {
            Some(recent) => {
                events = source.events_for_date(stream, recent).await?;
                date = Some(recent);
            }
            None => date = None,
        }
    }

    let events = dedupe_events(events);
    let (arrivals, departures, visits) = tally(&events);
    let last_event = events.iter().max_by_key(|e| e.timestamp).cloned();

    Ok(DayStats { date, arrivals, departures, visits, last_event })
}

/// A merged visit clip and an arrival/departure pair can describe the same
/// moment; the pair wins on a shared instant.
fn dedupe_events(events: Vec<Event>) -> Vec<Event> {
    let covered: HashSet<DateTime<FixedOffset>> = events
        .iter()
        .filter(|e| e.kind != EventKind::Visit)
        .map(|e| e.timestamp)
        .collect();
    events
        .into_iter()
        .filter(|e| e.kind != EventKind::Visit || !covered.contains(&e.timestamp))
        .collect()
}

/// Visits are matched enter/exit pairs unless explicit visit clips were
/// tallied: min(arrivals, departures), not a sum.
fn tally(events: &[Event]) -> (u32, u32, u32) {
    let mut arrivals = 0u32;
    let mut departures = 0u32;
    let mut visit_clips = 0u32;
    for event in events {
        match event.kind {
            EventKind::Arrival => arrivals += 1,
            EventKind::Departure => departures += 1,
            EventKind::Visit => visit_clips += 1,
        }
    }
    let visits = if visit_clips > 0 {
        visit_clips
    } else {
        arrivals.min(departures)
    };
    (arrivals, departures, visits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{derive_event_id, localize_on_date};
    use crate::scanner::tests::{test_stream, write_clip};
    use crate::scanner::ArrivalDepartureSource;
    use chrono::NaiveDate;
    use chrono_tz::Tz;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range("24h").unwrap(), Duration::hours(24));
        assert_eq!(parse_range("1d").unwrap(), Duration::hours(24));
        assert_eq!(parse_range("3d").unwrap(), Duration::hours(72));
        assert_eq!(parse_range("6h").unwrap(), Duration::hours(6));

        assert!(parse_range("").is_err());
        assert!(parse_range("24").is_err());
        assert!(parse_range("h").is_err());
        assert!(parse_range("-2d").is_err());
        assert!(parse_range("2w").is_err());
        assert!(parse_range("24µ").is_err());
    }

    /// Write an arrival clip whose filename encodes the local wall-clock
    /// time of `instant` in the stream's timezone.
    fn write_clip_at(stream: &StreamConfig, instant: DateTime<chrono_tz::Tz>, kind: &str) {
        let date_dir = stream.date_dir(instant.date_naive());
        fs::create_dir_all(&date_dir).unwrap();
        write_clip(
            &date_dir,
            &format!("falcon_{}_{}.mp4", instant.format("%H%M%S"), kind),
        );
    }

    #[tokio::test]
    async fn test_window_excludes_events_older_than_cutoff() {
        let dir = TempDir::new().unwrap();
        let stream = test_stream(dir.path(), Tz::UTC);
        let now = Utc::now().with_timezone(&Tz::UTC);
        write_clip_at(&stream, now - Duration::hours(30), "arrival");

        for range in ["24h", "1d"] {
            let summary = stats_for_range(&ArrivalDepartureSource, &stream, range)
                .await
                .unwrap();
            assert_eq!(summary.arrivals, 0, "range {}", range);
            assert_eq!(summary.departures, 0);
            assert_eq!(summary.visits, 0);
            assert!(summary.recent_events.is_empty());
        }
    }

    #[tokio::test]
    async fn test_window_includes_recent_events() {
        let dir = TempDir::new().unwrap();
        let stream = test_stream(dir.path(), Tz::UTC);
        let now = Utc::now().with_timezone(&Tz::UTC);
        write_clip_at(&stream, now - Duration::hours(30), "arrival");
        write_clip_at(&stream, now - Duration::hours(2), "arrival");
        write_clip_at(&stream, now - Duration::hours(1), "departure");

        let summary = stats_for_range(&ArrivalDepartureSource, &stream, "24h")
            .await
            .unwrap();
        assert_eq!(summary.arrivals, 1);
        assert_eq!(summary.departures, 1);
        assert_eq!(summary.visits, 1);
        assert_eq!(summary.recent_events.len(), 2);
        // Most recent first
        assert_eq!(summary.recent_events[0].kind, EventKind::Departure);
    }

    #[tokio::test]
    async fn test_visits_are_min_of_arrivals_and_departures() {
        let dir = TempDir::new().unwrap();
        let stream = test_stream(dir.path(), Tz::UTC);
        let now = Utc::now().with_timezone(&Tz::UTC);
        for hours in [2, 4, 6] {
            write_clip_at(&stream, now - Duration::hours(hours), "arrival");
        }
        for hours in [1, 3] {
            write_clip_at(&stream, now - Duration::hours(hours), "departure");
        }

        let summary = stats_for_range(&ArrivalDepartureSource, &stream, "24h")
            .await
            .unwrap();
        assert_eq!(summary.arrivals, 3);
        assert_eq!(summary.departures, 2);
        assert_eq!(summary.visits, 2);
    }

    #[tokio::test]
    async fn test_recent_events_capped_at_ten() {
        let dir = TempDir::new().unwrap();
        let stream = test_stream(dir.path(), Tz::UTC);
        let now = Utc::now().with_timezone(&Tz::UTC);
        for minutes in 1..=12 {
            write_clip_at(&stream, now - Duration::minutes(minutes * 5), "arrival");
        }

        let summary = stats_for_range(&ArrivalDepartureSource, &stream, "24h")
            .await
            .unwrap();
        assert_eq!(summary.arrivals, 12);
        assert_eq!(summary.recent_events.len(), 10);
        let timestamps: Vec<_> = summary.recent_events.iter().map(|e| e.timestamp).collect();
        let mut sorted = timestamps.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(timestamps, sorted);
    }

    fn synthetic_event(kind: EventKind, date: NaiveDate, time: chrono::NaiveTime) -> Event {
        Event {
            kind,
            timestamp: localize_on_date(date, time, Tz::UTC),
            thumbnail: String::new(),
            clip: format!("falcon_{}_{}.mp4", time.format("%H%M%S"), kind),
            confidence: None,
            duration_seconds: None,
            event_id: derive_event_id(date, time),
        }
    }

    #[test]
    fn test_dedupe_prefers_arrival_over_visit_on_same_instant() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 14).unwrap();
        let time = chrono::NaiveTime::from_hms_opt(7, 23, 15).unwrap();
        let other = chrono::NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let events = vec![
            synthetic_event(EventKind::Visit, date, time),
            synthetic_event(EventKind::Arrival, date, time),
            synthetic_event(EventKind::Visit, date, other),
        ];

        let deduped = dedupe_events(events);
        let kinds: Vec<EventKind> = deduped.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::Arrival, EventKind::Visit]);
    }

    #[test]
    fn test_tally_explicit_visit_clips_win_over_pairing() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 14).unwrap();
        let events = vec![
            synthetic_event(EventKind::Visit, date, chrono::NaiveTime::from_hms_opt(7, 0, 0).unwrap()),
            synthetic_event(EventKind::Visit, date, chrono::NaiveTime::from_hms_opt(9, 0, 0).unwrap()),
        ];
        assert_eq!(tally(&events), (0, 0, 2));
    }

    #[tokio::test]
    async fn test_day_stats_falls_back_to_most_recent_active_date() {
        let dir = TempDir::new().unwrap();
        let stream = test_stream(dir.path(), Tz::UTC);
        let today = Utc::now().with_timezone(&Tz::UTC).date_naive();
        let active = today - Duration::days(5);
        let date_dir = stream.date_dir(active);
        fs::create_dir_all(&date_dir).unwrap();
        write_clip(&date_dir, "falcon_072315_arrival.mp4");
        write_clip(&date_dir, "falcon_074530_departure.mp4");

        let stats = day_stats(&ArrivalDepartureSource, &stream).await.unwrap();
        assert_eq!(stats.date, Some(active));
        assert_eq!(stats.arrivals, 1);
        assert_eq!(stats.departures, 1);
        assert_eq!(stats.visits, 1);
        assert_eq!(stats.last_event.as_ref().unwrap().clip, "falcon_074530_departure.mp4");
    }

    #[tokio::test]
    async fn test_day_stats_with_no_activity_anywhere() {
        let dir = TempDir::new().unwrap();
        let stream = test_stream(dir.path(), Tz::UTC);
        fs::create_dir_all(stream.clips_dir()).unwrap();

        let stats = day_stats(&ArrivalDepartureSource, &stream).await.unwrap();
        assert_eq!(stats.date, None);
        assert_eq!(stats.arrivals, 0);
        assert!(stats.last_event.is_none());
    }
}
