use crate::discovery::TariffSensors;
use crate::glowmarkt::{log_api_error, GlowmarktApi};
use crate::reading_fetcher::SensorUpdate;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Polls the tariff of one meter and feeds its standing charge and rate sensors
pub struct TariffCoordinator {
    sensors: TariffSensors,
    api: Arc<GlowmarktApi>,
    update_sender: Sender<SensorUpdate>,
    poll_interval: Duration,
}

impl TariffCoordinator {
    pub fn new(
        sensors: TariffSensors,
        api: Arc<GlowmarktApi>,
        update_sender: Sender<SensorUpdate>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            sensors,
            api,
            update_sender,
            poll_interval,
        }
    }

    /// Spawns the coordinator in its own task
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        info!("Starting tariff coordinator for {}", self.sensors.resource_id);

        let mut poll_interval = interval(self.poll_interval);
        loop {
            poll_interval.tick().await;

            // Sensors keep their previous values when a poll fails
            for update in self.poll().await {
                if let Err(e) = self.update_sender.send(update).await {
                    warn!(
                        "Failed to send tariff update for {}: {}. Shutting down tariff coordinator.",
                        self.sensors.resource_id, e
                    );
                    return;
                }
            }
        }
    }

    /// Fetches the tariff once; empty when there is nothing to publish.
    pub async fn poll(&self) -> Vec<SensorUpdate> {
        let resource_id = &self.sensors.resource_id;
        let tariff = match self.api.tariff(resource_id).await {
            Ok(Some(tariff)) => tariff,
            Ok(None) => {
                warn!(
                    "No tariff data found for {} meter (id: {}). If you don't see tariff data for this meter in the Bright app, please disable the associated rate and standing charge sensors",
                    self.sensors.rate.supply, resource_id
                );
                return Vec::new();
            }
            Err(e) => {
                log_api_error(&format!("Fetching tariff for {resource_id}"), &e);
                return Vec::new();
            }
        };
        debug!("Successful GET to {}/resource/{}/tariff", self.api.url(), resource_id);

        let rates = tariff.current_rates;
        let standing_charge = &self.sensors.standing_charge;
        let rate = &self.sensors.rate;
        vec![
            SensorUpdate::new(standing_charge, standing_charge.kind.convert(rates.standing_charge)),
            SensorUpdate::new(rate, rate.kind.convert(rates.rate)),
        ]
    }
}
