use axum::extract::{Path as AxumPath, Query, State};
use axum::Json;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::errors::{Result, ViewerError};
use crate::recency;
use crate::stats;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    #[serde(default = "default_range")]
    pub range: String,
}

fn default_range() -> String {
    "24h".to_string()
}

#[derive(Debug, Deserialize)]
pub struct DateRangeQuery {
    pub start_date: String,
    pub end_date: String,
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| ViewerError::bad_request(format!("Invalid date: {}", s)))
}

/// GET /api/streams - every registered stream with stats for today or the
/// most recent date with activity.
pub async fn list_streams(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    let mut streams_list = Vec::new();
    for stream in state.registry.all().await? {
        match stats::day_stats(state.events.as_ref(), &stream).await {
            Ok(day) => streams_list.push(json!({
                "id": stream.id,
                "name": stream.name,
                "display": stream.display,
                "external_channel_id": stream.external_channel_id,
                "timezone": stream.timezone,
                "stats": day,
            })),
            Err(e) => warn!("Skipping stream '{}' in listing: {}", stream.id, e),
        }
    }
    Ok(Json(json!({ "streams": streams_list })))
}

/// GET /api/streams/:stream_id - stream detail with trailing-24h stats.
pub async fn stream_detail(
    State(state): State<AppState>,
    AxumPath(stream_id): AxumPath<String>,
) -> Result<Json<serde_json::Value>> {
    let stream = state.registry.resolve(&stream_id).await?;
    let summary = stats::stats_for_range(state.events.as_ref(), &stream, "24h").await?;
    Ok(Json(json!({
        "id": stream.id,
        "name": stream.name,
        "display": stream.display,
        "external_channel_id": stream.external_channel_id,
        "timezone": stream.timezone,
        "stats": summary,
    })))
}

/// GET /api/streams/:stream_id/events - events for a date; an omitted date
/// or one without events falls back to the most recent active date.
pub async fn stream_events(
    State(state): State<AppState>,
    AxumPath(stream_id): AxumPath<String>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<serde_json::Value>> {
    let stream = state.registry.resolve(&stream_id).await?;

    if let Some(date_str) = &query.date {
        let date = parse_date(date_str)?;
        let events = state.events.events_for_date(&stream, date).await?;
        if !events.is_empty() {
            return Ok(Json(json!({
                "stream_id": stream.id,
                "date": date,
                "events": events,
            })));
        }
    }

    let today = Utc::now().with_timezone(&stream.timezone).date_naive();
    match recency::find_most_recent_date(
        state.events.as_ref(),
        &stream,
        today,
        recency::DEFAULT_LOOKBACK_DAYS,
    )
    .await?
    {
        Some(recent) => {
            let events = state.events.events_for_date(&stream, recent).await?;
            Ok(Json(json!({
                "stream_id": stream.id,
                "date": recent,
                "events": events,
            })))
        }
        None => Ok(Json(json!({
            "stream_id": stream.id,
            "date": null,
            "events": [],
        }))),
    }
}

/// GET /api/streams/:stream_id/stats?range=24h|Nd
pub async fn stream_stats(
    State(state): State<AppState>,
    AxumPath(stream_id): AxumPath<String>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<serde_json::Value>> {
    let stream = state.registry.resolve(&stream_id).await?;
    let summary = stats::stats_for_range(state.events.as_ref(), &stream, &query.range).await?;
    let mut value = serde_json::to_value(&summary)?;
    value["stream_id"] = json!(stream.id);
    Ok(Json(value))
}

/// GET /api/streams/:stream_id/dates-with-events?start_date=&end_date=
pub async fn dates_with_events(
    State(state): State<AppState>,
    AxumPath(stream_id): AxumPath<String>,
    Query(query): Query<DateRangeQuery>,
) -> Result<Json<serde_json::Value>> {
    let stream = state.registry.resolve(&stream_id).await?;
    let start = parse_date(&query.start_date)?;
    let end = parse_date(&query.end_date)?;
    let dates = recency::dates_with_events(state.events.as_ref(), &stream, start, end).await?;
    Ok(Json(json!({
        "stream_id": stream.id,
        "dates": dates,
    })))
}
