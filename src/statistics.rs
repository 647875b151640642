//! Hourly statistics from half-hourly meter readings.
//!
//! Readings arrive every 30 minutes, so a complete hour holds two of them.
//! Each call folds the complete hours it sees into a running total that the
//! caller carries from one call to the next.

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use thiserror::Error;
use tracing::debug;

/// An hour needs this many readings before it is turned into a statistic.
pub const MIN_SAMPLES_PER_HOUR: usize = 2;

/// One point-in-time meter measurement (kWh, or currency for cost series).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawReading {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl RawReading {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }

    /// Moves the reading forward in time, keeping its value.
    pub fn shifted(self, offset: TimeDelta) -> Self {
        Self {
            timestamp: self.timestamp + offset,
            value: self.value,
        }
    }
}

/// Statistic for one completed hour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HourStatistic {
    pub start: DateTime<Utc>,
    pub bucket_sum: f64,
    pub mean: Option<f64>,
    pub running_total: f64,
}

impl HourStatistic {
    /// Drops the mean, for series whose metadata doesn't carry one.
    pub fn without_mean(self) -> Self {
        Self { mean: None, ..self }
    }
}

/// State carried between aggregation calls for one series.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AggregationState {
    pub running_total: f64,
    /// Start of the last hour folded into `running_total`.
    pub last_bucket: Option<DateTime<Utc>>,
}

impl AggregationState {
    pub fn with_running_total(running_total: f64) -> Self {
        Self {
            running_total,
            last_bucket: None,
        }
    }
}

/// Result of one aggregation call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregation {
    pub statistics: Vec<HourStatistic>,
    pub state: AggregationState,
}

#[derive(Error, Debug, PartialEq)]
pub enum AggregationError {
    #[error("reading at {current} does not follow the reading at {previous}")]
    Unordered {
        previous: DateTime<Utc>,
        current: DateTime<Utc>,
    },

    #[error("invalid reading value {value} at {timestamp}")]
    InvalidValue {
        timestamp: DateTime<Utc>,
        value: f64,
    },

    #[error("cannot truncate {0} to the hour")]
    Truncation(DateTime<Utc>),
}

/// Truncates a timestamp to the top of its hour.
pub fn hour_bucket(timestamp: DateTime<Utc>) -> Result<DateTime<Utc>, AggregationError> {
    timestamp
        .duration_trunc(TimeDelta::hours(1))
        .map_err(|_| AggregationError::Truncation(timestamp))
}

/// Aggregates consumption `readings` on top of a previous running total (0
/// when absent).
///
/// `readings` must be strictly ascending and non-negative. Buckets with fewer than
/// [`MIN_SAMPLES_PER_HOUR`] readings are left out of the result and out of the
/// running total. Passing a bucket that an earlier call already aggregated
/// counts it twice; use [`aggregate_with_state`] to guard against that.
pub fn aggregate(
    readings: &[RawReading],
    prior_running_total: Option<f64>,
) -> Result<Vec<HourStatistic>, AggregationError> {
    ensure_non_negative(readings)?;
    let state = AggregationState::with_running_total(prior_running_total.unwrap_or_default());
    Ok(aggregate_with_state(readings, &state)?.statistics)
}

/// Aggregates `readings` on top of `state` and returns the updated state.
///
/// Hours at or before `state.last_bucket` have already been counted and are
/// skipped. Values only need to be finite; cost series can go negative.
pub fn aggregate_with_state(
    readings: &[RawReading],
    state: &AggregationState,
) -> Result<Aggregation, AggregationError> {
    validate(readings)?;

    let mut next = *state;
    let mut statistics = Vec::new();

    let mut start = 0;
    while start < readings.len() {
        let bucket = hour_bucket(readings[start].timestamp)?;
        let mut end = start + 1;
        while end < readings.len() && hour_bucket(readings[end].timestamp)? == bucket {
            end += 1;
        }
        let run = &readings[start..end];
        start = end;

        if run.len() < MIN_SAMPLES_PER_HOUR {
            debug!(%bucket, samples = run.len(), "Incomplete hour, leaving it for later");
            continue;
        }
        if state.last_bucket.is_some_and(|last| bucket <= last) {
            debug!(%bucket, "Hour already aggregated, skipping");
            continue;
        }

        let bucket_sum: f64 = run.iter().map(|reading| reading.value).sum();
        let mean = bucket_sum / run.len() as f64;
        next.running_total += bucket_sum;
        next.last_bucket = Some(bucket);

        statistics.push(HourStatistic {
            start: bucket,
            bucket_sum,
            mean: Some(mean),
            running_total: next.running_total,
        });
    }

    Ok(Aggregation {
        statistics,
        state: next,
    })
}

/// Rejects negative values, which a consumption meter never reports.
pub fn ensure_non_negative(readings: &[RawReading]) -> Result<(), AggregationError> {
    match readings.iter().find(|reading| reading.value < 0.0) {
        Some(reading) => Err(AggregationError::InvalidValue {
            timestamp: reading.timestamp,
            value: reading.value,
        }),
        None => Ok(()),
    }
}

fn validate(readings: &[RawReading]) -> Result<(), AggregationError> {
    for reading in readings {
        if !reading.value.is_finite() {
            return Err(AggregationError::InvalidValue {
                timestamp: reading.timestamp,
                value: reading.value,
            });
        }
    }
    for pair in readings.windows(2) {
        if pair[1].timestamp <= pair[0].timestamp {
            return Err(AggregationError::Unordered {
                previous: pair[0].timestamp,
                current: pair[1].timestamp,
            });
        }
    }
    Ok(())
}
