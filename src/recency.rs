use chrono::NaiveDate;

use crate::errors::Result;
use crate::registry::StreamConfig;
use crate::scanner::EventSource;

/// Bounded cost control: a stream dormant for longer than this reports no
/// data rather than triggering an unbounded scan.
pub const DEFAULT_LOOKBACK_DAYS: u32 = 30;

/// Walk backward one day at a time from `start_date` inclusive, returning
/// the first date with qualifying events under the active policy.
pub async fn find_most_recent_date(
    source: &dyn EventSource,
    stream: &StreamConfig,
    start_date: NaiveDate,
    max_lookback_days: u32,
) -> Result<Option<NaiveDate>> {
    let mut current = start_date;
    for _ in 0..max_lookback_days {
        if source.has_events(stream, current).await? {
            return Ok(Some(current));
        }
        current = match current.pred_opt() {
            Some(previous) => previous,
            None => break,
        };
    }
    Ok(None)
}

/// Dates in `[start, end]` inclusive with at least one qualifying event
/// under the active policy.
pub async fn dates_with_events(
    source: &dyn EventSource,
    stream: &StreamConfig,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<NaiveDate>> {
    let mut dates = Vec::new();
    let mut current = start;
    while current <= end {
        if source.has_events(stream, current).await? {
            dates.push(current);
        }
        current = match current.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }
    Ok(dates)
}
