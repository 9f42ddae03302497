use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Pre-compiled clip filename grammar: falcon_HHMMSS_kind.ext
static CLIP_FILENAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^falcon_(\d{6})_(arrival|departure|visit)\.(mp4|avi|mov|mkv|jpg|jpeg|png)$")
        .unwrap()
});

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Arrival,
    Departure,
    Visit,
}

impl EventKind {
    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "arrival" => Some(Self::Arrival),
            "departure" => Some(Self::Departure),
            "visit" => Some(Self::Visit),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Arrival => write!(f, "arrival"),
            EventKind::Departure => write!(f, "departure"),
            EventKind::Visit => write!(f, "visit"),
        }
    }
}

/// One canonical timeline entry derived from a clip file or a log record.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub timestamp: DateTime<FixedOffset>,
    pub thumbnail: String,
    pub clip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    pub event_id: String,
}

/// A filename that matched the clip grammar.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedClip {
    pub time: NaiveTime,
    pub kind: EventKind,
    pub is_video: bool,
}

pub fn parse_clip_filename(name: &str) -> Option<ParsedClip> {
    let caps = CLIP_FILENAME_RE.captures(name)?;
    let digits = &caps[1];
    let hour: u32 = digits[0..2].parse().ok()?;
    let minute: u32 = digits[2..4].parse().ok()?;
    let second: u32 = digits[4..6].parse().ok()?;
    // Nonsense digits like 996060 fail here and the file is skipped
    let time = NaiveTime::from_hms_opt(hour, minute, second)?;
    let kind = EventKind::from_tag(&caps[2])?;
    let is_video = VIDEO_EXTENSIONS.contains(&&caps[3]);
    Some(ParsedClip { time, kind, is_video })
}

/// Interpret a wall-clock time on `date` in the stream's timezone.
///
/// The earliest instant wins on a DST fold; a time inside a DST gap falls
/// back to plain UTC attachment. Both agree for zones without a transition
/// on that date.
pub fn localize_on_date(date: NaiveDate, time: NaiveTime, tz: Tz) -> DateTime<FixedOffset> {
    let naive = date.and_time(time);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt.fixed_offset(),
        LocalResult::Ambiguous(earliest, _) => earliest.fixed_offset(),
        LocalResult::None => Utc.from_utc_datetime(&naive).fixed_offset(),
    }
}

/// Deterministic identifier for filename-derived events: YYYYMMDD_HHMMSS.
pub fn derive_event_id(date: NaiveDate, time: NaiveTime) -> String {
    format!("{}_{}", date.format("%Y%m%d"), time.format("%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_parse_clip_filename() {
        let parsed = parse_clip_filename("falcon_072315_arrival.mp4").unwrap();
        assert_eq!(parsed.time, NaiveTime::from_hms_opt(7, 23, 15).unwrap());
        assert_eq!(parsed.kind, EventKind::Arrival);
        assert!(parsed.is_video);

        let thumb = parse_clip_filename("falcon_072315_arrival.jpg").unwrap();
        assert!(!thumb.is_video);

        let visit = parse_clip_filename("falcon_123456_visit.mkv").unwrap();
        assert_eq!(visit.kind, EventKind::Visit);
    }

    #[test]
    fn test_parse_rejects_non_matching_names() {
        assert!(parse_clip_filename("falcon_072315_arrival.mp4.tmp").is_none());
        assert!(parse_clip_filename("events_2026-01-14.json").is_none());
        assert!(parse_clip_filename("falcon_07231_arrival.mp4").is_none());
        assert!(parse_clip_filename("falcon_072315_landing.mp4").is_none());
        assert!(parse_clip_filename("malicious.exe").is_none());
        assert!(parse_clip_filename("../../../etc/passwd").is_none());
        // Valid grammar, impossible wall-clock time
        assert!(parse_clip_filename("falcon_996060_arrival.mp4").is_none());
    }

    #[test]
    fn test_localize_differs_by_zone_offset() {
        // 07:23:15 local on 2026-01-14: New York is UTC-5, Sydney UTC+11,
        // so the instants are exactly 16 hours apart.
        let date = NaiveDate::from_ymd_opt(2026, 1, 14).unwrap();
        let time = NaiveTime::from_hms_opt(7, 23, 15).unwrap();

        let ny = localize_on_date(date, time, chrono_tz::America::New_York);
        let syd = localize_on_date(date, time, chrono_tz::Australia::Sydney);

        assert_eq!(ny.signed_duration_since(syd), Duration::hours(16));
    }

    #[test]
    fn test_localize_utc_is_plain_attachment() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 14).unwrap();
        let time = NaiveTime::from_hms_opt(12, 0, 0).unwrap();
        let dt = localize_on_date(date, time, chrono_tz::UTC);
        assert_eq!(dt.to_rfc3339(), "2026-01-14T12:00:00+00:00");
    }

    #[test]
    fn test_derive_event_id() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 14).unwrap();
        let time = NaiveTime::from_hms_opt(7, 23, 15).unwrap();
        assert_eq!(derive_event_id(date, time), "20260114_072315");
    }
}
