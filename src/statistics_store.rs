use crate::sensor::SensorDescription;
use crate::statistics::{Aggregation, AggregationState, HourStatistic};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Store shared by the per-series tasks.
pub type SharedStatisticsStore = Arc<Mutex<dyn StatisticsStore>>;

/// What a statistics series records, per historical sensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatisticMetadata {
    pub statistic_id: String,
    pub unit: &'static str,
    pub has_sum: bool,
    pub has_mean: bool,
}

impl StatisticMetadata {
    pub fn for_sensor(sensor: &SensorDescription) -> Self {
        Self {
            statistic_id: sensor.series_id(),
            unit: sensor.unit(),
            has_sum: true,
            has_mean: sensor.kind.has_mean(),
        }
    }
}

/// Durable home of the aggregation state and the emitted hourly statistics.
pub trait StatisticsStore: Send {
    /// Declares a series before anything is recorded into it.
    fn register(&mut self, metadata: StatisticMetadata);

    fn metadata(&self, series: &str) -> Option<StatisticMetadata>;

    /// Last recorded state of the series, or a fresh one.
    fn state(&self, series: &str) -> AggregationState;

    /// Saves the statistics of one aggregation call and its resulting state.
    fn record(&mut self, series: &str, aggregation: &Aggregation);

    /// All statistics of the series, ascending by hour.
    fn statistics(&self, series: &str) -> Vec<HourStatistic>;
}

#[derive(Debug, Default)]
struct Series {
    metadata: Option<StatisticMetadata>,
    state: AggregationState,
    statistics: BTreeMap<DateTime<Utc>, HourStatistic>,
}

/// Keeps everything in memory; state is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStatisticsStore {
    series: HashMap<String, Series>,
}

impl MemoryStatisticsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedStatisticsStore {
        Arc::new(Mutex::new(Self::new()))
    }
}

impl StatisticsStore for MemoryStatisticsStore {
    fn register(&mut self, metadata: StatisticMetadata) {
        let entry = self.series.entry(metadata.statistic_id.clone()).or_default();
        entry.metadata = Some(metadata);
    }

    fn metadata(&self, series: &str) -> Option<StatisticMetadata> {
        self.series
            .get(series)
            .and_then(|series| series.metadata.clone())
    }

    fn state(&self, series: &str) -> AggregationState {
        self.series
            .get(series)
            .map(|series| series.state)
            .unwrap_or_default()
    }

    fn record(&mut self, series: &str, aggregation: &Aggregation) {
        let entry = self.series.entry(series.to_string()).or_default();
        entry.state = aggregation.state;
        for statistic in &aggregation.statistics {
            entry.statistics.insert(statistic.start, *statistic);
        }
    }

    fn statistics(&self, series: &str) -> Vec<HourStatistic> {
        self.series
            .get(series)
            .map(|series| series.statistics.values().copied().collect())
            .unwrap_or_default()
    }
}
