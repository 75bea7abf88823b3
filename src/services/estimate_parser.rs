//! Estimate payload parser
//!
//! The provider answers `Accept: text/csv` with one sample per line:
//!
//! ```text
//! watts.2019-06-29 14:00:00;5292
//! watt_hours.2019-06-29 14:00:00;25120
//! watt_hours_day.2019-06-29;41524
//! ```
//!
//! Samples are grouped by series, scaled down by 1000 and folded into the
//! four figures of a [`ForecastAggregate`].

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use tracing::{debug, warn};

use crate::models::forecast::{ForecastAggregate, Metric, Quantity};

pub const SERIES_WATTS: &str = "watts";
pub const SERIES_WATT_HOURS_DAY: &str = "watt_hours_day";

/// Lines of this length or shorter are padding, not samples.
const MIN_LINE_LEN: usize = 5;
const RAW_UNIT_DIVISOR: f64 = 1000.0;

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// series name -> (timestamp or date -> scaled value)
pub type SeriesMap = BTreeMap<String, BTreeMap<String, f64>>;

/// Groups the payload lines by series. Malformed lines are skipped.
pub fn parse_series(payload: &str) -> SeriesMap {
    let mut series: SeriesMap = BTreeMap::new();

    for line in payload.lines() {
        if line.len() <= MIN_LINE_LEN {
            continue;
        }

        let mut fields = line.split(';');
        let (Some(key), Some(value)) = (fields.next(), fields.next()) else {
            debug!(line, "skipping line without value separator");
            continue;
        };

        let mut key_parts = key.trim().split('.');
        let (Some(name), Some(stamp)) = (key_parts.next(), key_parts.next()) else {
            debug!(line, "skipping line without series prefix");
            continue;
        };

        let raw = match value.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => v,
            _ => {
                debug!(line, "skipping non-numeric sample");
                continue;
            }
        };

        series
            .entry(name.to_string())
            .or_default()
            .insert(stamp.to_string(), raw / RAW_UNIT_DIVISOR);
    }

    series
}

/// Calendar date of a sample key such as `2019-06-29 14:00:00` or `2019-06-29`.
pub fn sample_date(stamp: &str) -> Option<NaiveDate> {
    let stamp = stamp.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(stamp) {
        return Some(dt.date_naive());
    }
    for format in TIMESTAMP_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(stamp, format) {
            return Some(dt.date());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(stamp, "%Y-%m-%d") {
        return Some(date);
    }

    stamp.get(..10).and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
}

/// Folds the grouped samples into today/tomorrow figures.
///
/// Without a `watts` series the payload is considered unreliable and every
/// figure stays at zero. Samples not dated `today` count towards tomorrow.
/// Samples whose key carries no readable date are skipped rather than
/// counted towards tomorrow.
/// Both quantities keep the largest sample seen, so the daily energy figure
/// is the provider's day total rather than a sum.
pub fn aggregate(series: &SeriesMap, today: NaiveDate) -> ForecastAggregate {
    let mut result = ForecastAggregate::default();

    if !series.contains_key(SERIES_WATTS) {
        warn!("payload has no `{}` series, publishing zeros", SERIES_WATTS);
        return result;
    }

    for (name, samples) in series {
        let quantity = match name.as_str() {
            SERIES_WATTS => Quantity::PeakPower,
            SERIES_WATT_HOURS_DAY => Quantity::DailyEnergy,
            _ => continue,
        };

        for (stamp, value) in samples {
            let Some(date) = sample_date(stamp) else {
                warn!(series = %name, stamp = %stamp, "skipping sample with unreadable date");
                continue;
            };
            result.raise(Metric::select(quantity, date == today), *value);
        }
    }

    result
}

pub fn parse_and_aggregate(payload: &str, today: NaiveDate) -> ForecastAggregate {
    aggregate(&parse_series(payload), today)
}
