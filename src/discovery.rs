use crate::glowmarkt::{log_api_error, GlowmarktApi, Resource};
use crate::sensor::{is_consumption, meter_classifier_for_cost, SensorDescription, SensorKind};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Standing charge and rate sensors of one meter, fed by the same tariff poll.
#[derive(Debug, Clone, PartialEq)]
pub struct TariffSensors {
    pub resource_id: String,
    pub standing_charge: SensorDescription,
    pub rate: SensorDescription,
}

/// Every sensor found on the account.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Discovered {
    /// Usage and cost sensors, backed by hourly statistics.
    pub historical: Vec<SensorDescription>,
    pub tariffs: Vec<TariffSensors>,
}

/// Walks the account's virtual entities and their resources.
///
/// Listing failures are logged and skipped so one broken entity doesn't hide
/// the others.
pub async fn discover(api: &GlowmarktApi) -> Discovered {
    let mut discovered = Discovered::default();

    let virtual_entities = match api.virtual_entities().await {
        Ok(entities) => {
            debug!("Successful GET to {}/virtualentity", api.url());
            entities
        }
        Err(e) => {
            log_api_error("Listing virtual entities", &e);
            Vec::new()
        }
    };

    for virtual_entity in &virtual_entities {
        let resources = match api.resources(&virtual_entity.id).await {
            Ok(resources) => {
                debug!(
                    "Successful GET to {}/virtualentity/{}/resources",
                    api.url(),
                    virtual_entity.id
                );
                resources
            }
            Err(e) => {
                log_api_error("Listing resources", &e);
                continue;
            }
        };

        // Cost sensors reference their meter, so meters go first.
        let mut meters: HashMap<&str, &Resource> = HashMap::new();
        for resource in resources.iter().filter(|r| is_consumption(&r.classifier)) {
            meters.insert(&resource.classifier, resource);
            discovered.historical.push(SensorDescription::new(
                SensorKind::Usage,
                resource,
                virtual_entity,
                None,
            ));
            discovered.tariffs.push(TariffSensors {
                resource_id: resource.id.clone(),
                standing_charge: SensorDescription::new(
                    SensorKind::StandingCharge,
                    resource,
                    virtual_entity,
                    None,
                ),
                rate: SensorDescription::new(SensorKind::Rate, resource, virtual_entity, None),
            });
        }

        for resource in &resources {
            let Some(meter_classifier) = meter_classifier_for_cost(&resource.classifier) else {
                continue;
            };
            match meters.get(meter_classifier) {
                Some(meter) => discovered.historical.push(SensorDescription::new(
                    SensorKind::Cost,
                    resource,
                    virtual_entity,
                    Some(*meter),
                )),
                None => warn!(
                    "Cost resource {} has no {meter_classifier} meter, skipping it",
                    resource.id
                ),
            }
        }
    }

    discovered
}
