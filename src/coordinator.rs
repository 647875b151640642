use crate::config::Config;
use crate::discovery::{discover, Discovered};
use crate::glowmarkt::GlowmarktApi;
use crate::reading_fetcher::{ReadingFetcher, SensorUpdate};
use crate::statistics_store::{SharedStatisticsStore, StatisticMetadata, StatisticsStore};
use crate::tariff_coordinator::TariffCoordinator;
use std::sync::Arc;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Coordinates the polling tasks for every sensor on the account
/// Each series gets its own task, so at most one aggregation per series is in flight
pub struct SensorCoordinator {
    discovered: Discovered,
    tasks: Vec<JoinHandle<()>>,
}

impl SensorCoordinator {
    /// Discovers the account's sensors and starts a task for each of them
    pub async fn start(
        api: GlowmarktApi,
        config: &Config,
        store: SharedStatisticsStore,
        update_sender: Sender<SensorUpdate>,
    ) -> Self {
        info!("Initializing sensor coordinator");

        let api = Arc::new(api);
        let discovered = discover(&api).await;
        if discovered.historical.is_empty() {
            warn!("No consumption or cost resources found on the Glowmarkt account");
        }

        let mut tasks = Vec::new();
        for sensor in &discovered.historical {
            if sensor.kind.is_historical() {
                store.lock().await.register(StatisticMetadata::for_sensor(sensor));
            }
            info!(
                "Adding {} sensor {} for {}",
                sensor.name(),
                sensor.unique_id,
                sensor.device.name
            );
            let fetcher = ReadingFetcher::new(
                sensor.clone(),
                api.clone(),
                store.clone(),
                update_sender.clone(),
                config.poll_interval,
            );
            tasks.push(fetcher.spawn());
        }
        for sensors in &discovered.tariffs {
            if !(config.tariff_sensors || sensors.rate.kind.enabled_by_default()) {
                info!(
                    "Tariff sensors for {} are disabled; set GLOW_TARIFF_SENSORS=true to poll them",
                    sensors.resource_id
                );
                continue;
            }
            let coordinator = TariffCoordinator::new(
                sensors.clone(),
                api.clone(),
                update_sender.clone(),
                config.poll_interval,
            );
            tasks.push(coordinator.spawn());
        }

        info!("All {} sensor tasks started", tasks.len());

        Self { discovered, tasks }
    }

    pub fn discovered(&self) -> &Discovered {
        &self.discovered
    }

    /// Stops every polling task.
    pub fn shutdown(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}
