use crate::glowmarkt::{log_api_error, GlowmarktApi};
use crate::sensor::{DeviceClass, SensorDescription};
use crate::statistics::{aggregate_with_state, ensure_non_negative, RawReading};
use crate::statistics_store::SharedStatisticsStore;
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// How far back every fetch looks.
pub const FETCH_WINDOW: TimeDelta = TimeDelta::hours(12);
/// Glowmarkt stamps a half hour with its start; shifting by a minute keeps
/// a reading on the hour inside the hour it opens.
pub const READING_OFFSET: TimeDelta = TimeDelta::minutes(1);

/// New value for one sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorUpdate {
    pub unique_id: String,
    pub name: &'static str,
    pub value: f64,
    pub unit: &'static str,
    pub device_class: Option<DeviceClass>,
    pub icon: Option<&'static str>,
}

impl SensorUpdate {
    pub fn new(sensor: &SensorDescription, value: f64) -> Self {
        Self {
            unique_id: sensor.unique_id.clone(),
            name: sensor.name(),
            value,
            unit: sensor.unit(),
            device_class: sensor.kind.device_class(),
            icon: sensor.icon(),
        }
    }
}

/// Periodic fetch-then-aggregate task for one usage or cost series
pub struct ReadingFetcher {
    sensor: SensorDescription,
    api: Arc<GlowmarktApi>,
    store: SharedStatisticsStore,
    update_sender: Sender<SensorUpdate>,
    poll_interval: Duration,
}

impl ReadingFetcher {
    pub fn new(
        sensor: SensorDescription,
        api: Arc<GlowmarktApi>,
        store: SharedStatisticsStore,
        update_sender: Sender<SensorUpdate>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            sensor,
            api,
            store,
            update_sender,
            poll_interval,
        }
    }

    /// Spawns the fetcher in its own task
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Main loop; the first tick fires straight away to seed the sensor.
    async fn run(&self) {
        info!(
            "Starting reading fetcher for {} ({})",
            self.sensor.unique_id,
            self.sensor.name()
        );

        let mut poll_interval = interval(self.poll_interval);
        loop {
            poll_interval.tick().await;

            let Some(running_total) = self.fetch_once(Utc::now()).await else {
                continue;
            };
            let update = SensorUpdate::new(&self.sensor, running_total);
            if let Err(e) = self.update_sender.send(update).await {
                warn!(
                    "Failed to send update for {}: {}. Shutting down fetcher.",
                    self.sensor.unique_id, e
                );
                break;
            }
        }

        info!("Reading fetcher for {} exiting", self.sensor.unique_id);
    }

    /// Runs one cycle and returns the series' running total.
    ///
    /// A failed fetch or a malformed answer skips the cycle and leaves the
    /// stored state as it was.
    pub async fn fetch_once(&self, now: DateTime<Utc>) -> Option<f64> {
        let readings = match self.fetch_readings(now).await {
            Ok(readings) => readings,
            Err(e) => {
                log_api_error(&format!("Fetching readings for {}", self.sensor.resource_id), &e);
                return None;
            }
        };
        let readings: Vec<RawReading> = readings
            .into_iter()
            .map(|reading| {
                RawReading::new(reading.timestamp, self.sensor.kind.convert(reading.value))
                    .shifted(READING_OFFSET)
            })
            .collect();

        let series = self.sensor.series_id();
        let mut store = self.store.lock().await;
        let state = store.state(&series);
        let aggregation = if self.sensor.kind.is_non_negative() {
            ensure_non_negative(&readings).and_then(|()| aggregate_with_state(&readings, &state))
        } else {
            aggregate_with_state(&readings, &state)
        };
        let mut aggregation = match aggregation {
            Ok(aggregation) => aggregation,
            Err(e) => {
                error!("Discarding readings for {}: {}", self.sensor.resource_id, e);
                return None;
            }
        };
        if !self.sensor.kind.has_mean() {
            for statistic in &mut aggregation.statistics {
                *statistic = statistic.without_mean();
            }
        }
        store.record(&series, &aggregation);

        debug!(
            "{}: {} new hourly statistics, running total {}",
            series,
            aggregation.statistics.len(),
            aggregation.state.running_total
        );
        Some(aggregation.state.running_total)
    }

    async fn fetch_readings(&self, now: DateTime<Utc>) -> Result<Vec<RawReading>, anyhow::Error> {
        let resource_id = &self.sensor.resource_id;
        let to = now.duration_trunc(TimeDelta::minutes(1))?;
        let from = to - FETCH_WINDOW;

        // Ask Glowmarkt to pull fresh DCC data; stale data is still worth aggregating.
        match self.api.catchup(resource_id).await {
            Ok(()) => debug!("Successful GET to {}/resource/{}/catchup", self.api.url(), resource_id),
            Err(e) => log_api_error(&format!("Catchup for {resource_id}"), &e),
        }

        let readings = self.api.readings(resource_id, from, to).await?;
        debug!("Successfully got readings for resource id {}", resource_id);
        Ok(readings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::glowmarkt::{Resource, VirtualEntity};
    use crate::sensor::{SensorKind, ELECTRICITY_CONSUMPTION, ELECTRICITY_COST};
    use crate::statistics::AggregationState;
    use crate::statistics_store::MemoryStatisticsStore;
    use chrono::TimeZone;
    use tokio::sync::mpsc;

    // 2024-03-01 10:00, 10:30, 11:00, 11:30 UTC
    const READINGS: &str = r#"
        {"data": [[1709287200, 120.0], [1709289000, 80.0], [1709290800, 50.0], [1709292600, null]]}
    "#;

    // Same hours in pence, with a negative-price slot at 11:00
    const NEGATIVE_SLOT: &str = r#"
        {"data": [[1709287200, 40.0], [1709289000, 30.0], [1709290800, -2.0], [1709292600, 10.0]]}
    "#;

    async fn api(server: &mut mockito::Server) -> Arc<GlowmarktApi> {
        let _mock = server
            .mock("POST", "/auth")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"valid": true, "token": "t"}"#)
            .create_async()
            .await;
        let config = Config {
            glow_url: server.url(),
            ..Config::default()
        };
        Arc::new(GlowmarktApi::authenticate(&config).await.unwrap())
    }

    fn sensor(kind: SensorKind, classifier: &str) -> SensorDescription {
        let resource = Resource {
            id: "r-1".to_string(),
            classifier: classifier.to_string(),
            ..Resource::default()
        };
        SensorDescription::new(kind, &resource, &VirtualEntity::default(), None)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 5, 30).unwrap()
    }

    #[tokio::test]
    async fn test_cost_cycle_aggregates_complete_hours() {
        let mut server = mockito::Server::new_async().await;
        let api = api(&mut server).await;
        let _mock = server
            .mock("GET", "/resource/r-1/catchup")
            .with_status(200)
            .create_async()
            .await;
        let readings = server
            .mock("GET", "/resource/r-1/readings")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("from".into(), "2024-03-01T00:05:00".into()),
                mockito::Matcher::UrlEncoded("to".into(), "2024-03-01T12:05:00".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(READINGS)
            .expect(2)
            .create_async()
            .await;

        let store = MemoryStatisticsStore::shared();
        let (tx, _rx) = mpsc::channel(4);
        let cost = sensor(SensorKind::Cost, ELECTRICITY_COST);
        let fetcher = ReadingFetcher::new(cost.clone(), api, store.clone(), tx, Duration::from_secs(60));

        // Pence become pounds; the lone 11:00 reading waits for its pair.
        assert_eq!(fetcher.fetch_once(now()).await, Some(2.0));
        let statistics = store.lock().await.statistics(&cost.series_id());
        assert_eq!(statistics.len(), 1);
        assert_eq!(statistics[0].start, Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());
        assert_eq!(statistics[0].mean, Some(1.0));

        // Fetching the same window again does not count 10:00 twice.
        assert_eq!(fetcher.fetch_once(now()).await, Some(2.0));
        readings.assert_async().await;
    }

    #[tokio::test]
    async fn test_negative_cost_slot_still_aggregates() {
        let mut server = mockito::Server::new_async().await;
        let api = api(&mut server).await;
        let _mock = server
            .mock("GET", "/resource/r-1/catchup")
            .with_status(200)
            .create_async()
            .await;
        let _mock = server
            .mock("GET", "/resource/r-1/readings")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(NEGATIVE_SLOT)
            .expect(2)
            .create_async()
            .await;

        let store = MemoryStatisticsStore::shared();
        let (tx, _rx) = mpsc::channel(4);
        let cost = sensor(SensorKind::Cost, ELECTRICITY_COST);
        let fetcher = ReadingFetcher::new(cost.clone(), api.clone(), store.clone(), tx.clone(), Duration::from_secs(60));

        let total = fetcher.fetch_once(now()).await.expect("Cost batch should aggregate");
        assert!((total - 0.78).abs() < 1e-9);
        let statistics = store.lock().await.statistics(&cost.series_id());
        assert_eq!(statistics.len(), 2);
        assert!((statistics[1].bucket_sum - 0.08).abs() < 1e-9);

        // The same slot on a usage series is malformed and the batch is skipped
        let usage = sensor(SensorKind::Usage, ELECTRICITY_CONSUMPTION);
        let fetcher = ReadingFetcher::new(usage.clone(), api, store.clone(), tx, Duration::from_secs(60));
        assert_eq!(fetcher.fetch_once(now()).await, None);
        assert!(store.lock().await.statistics(&usage.series_id()).is_empty());
    }

    #[tokio::test]
    async fn test_usage_cycle_drops_mean_and_survives_catchup_failure() {
        let mut server = mockito::Server::new_async().await;
        let api = api(&mut server).await;
        let _mock = server
            .mock("GET", "/resource/r-1/catchup")
            .with_status(500)
            .create_async()
            .await;
        let _mock = server
            .mock("GET", "/resource/r-1/readings")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(READINGS)
            .create_async()
            .await;

        let store = MemoryStatisticsStore::shared();
        let (tx, _rx) = mpsc::channel(4);
        let usage = sensor(SensorKind::Usage, ELECTRICITY_CONSUMPTION);
        let fetcher = ReadingFetcher::new(usage.clone(), api, store.clone(), tx, Duration::from_secs(60));

        assert_eq!(fetcher.fetch_once(now()).await, Some(200.0));
        let statistics = store.lock().await.statistics(&usage.series_id());
        assert_eq!(statistics[0].mean, None);
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_state() {
        let mut server = mockito::Server::new_async().await;
        let api = api(&mut server).await;
        let _mock = server
            .mock("GET", "/resource/r-1/catchup")
            .with_status(200)
            .create_async()
            .await;
        let _mock = server
            .mock("GET", "/resource/r-1/readings")
            .match_query(mockito::Matcher::Any)
            .with_status(502)
            .create_async()
            .await;

        let store = MemoryStatisticsStore::shared();
        let (tx, _rx) = mpsc::channel(4);
        let usage = sensor(SensorKind::Usage, ELECTRICITY_CONSUMPTION);
        let fetcher = ReadingFetcher::new(usage.clone(), api, store.clone(), tx, Duration::from_secs(60));

        assert_eq!(fetcher.fetch_once(now()).await, None);
        let store = store.lock().await;
        assert_eq!(store.state(&usage.series_id()), AggregationState::default());
        assert!(store.statistics(&usage.series_id()).is_empty());
    }

    #[tokio::test]
    async fn test_unordered_readings_are_discarded() {
        let mut server = mockito::Server::new_async().await;
        let api = api(&mut server).await;
        let _mock = server
            .mock("GET", "/resource/r-1/catchup")
            .with_status(200)
            .create_async()
            .await;
        let _mock = server
            .mock("GET", "/resource/r-1/readings")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data": [[1709289000, 1.0], [1709287200, 1.0]]}"#)
            .create_async()
            .await;

        let store = MemoryStatisticsStore::shared();
        let (tx, _rx) = mpsc::channel(4);
        let usage = sensor(SensorKind::Usage, ELECTRICITY_CONSUMPTION);
        let fetcher = ReadingFetcher::new(usage.clone(), api, store.clone(), tx, Duration::from_secs(60));

        assert_eq!(fetcher.fetch_once(now()).await, None);
        assert!(store.lock().await.statistics(&usage.series_id()).is_empty());
    }

    #[tokio::test]
    async fn test_spawned_fetcher_publishes_running_total() {
        let mut server = mockito::Server::new_async().await;
        let api = api(&mut server).await;
        let _mock = server
            .mock("GET", "/resource/r-1/catchup")
            .with_status(200)
            .create_async()
            .await;
        let _mock = server
            .mock("GET", "/resource/r-1/readings")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(READINGS)
            .create_async()
            .await;

        let (tx, mut rx) = mpsc::channel(4);
        let usage = sensor(SensorKind::Usage, ELECTRICITY_CONSUMPTION);
        let handle = ReadingFetcher::new(
            usage,
            api,
            MemoryStatisticsStore::shared(),
            tx,
            Duration::from_secs(3600),
        )
        .spawn();

        let update = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("Should receive the seed update")
            .unwrap();
        assert_eq!(update.unique_id, "r-1");
        assert_eq!(update.name, "Usage (today)");
        assert_eq!(update.unit, "kWh");
        assert_eq!(update.value, 200.0);
        assert_eq!(update.device_class, Some(DeviceClass::Energy));
        assert_eq!(update.icon, None);

        handle.abort();
    }
}
