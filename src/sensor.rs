//! Sensor metadata for the meters found on a Glowmarkt account.

use crate::glowmarkt::{Resource, VirtualEntity};
use std::fmt;
use tracing::error;

pub const DOMAIN: &str = "hildebrandglow_dcc";
pub const MANUFACTURER: &str = "Hildebrand";
pub const MODEL: &str = "Glow (DCC)";

pub const ELECTRICITY_CONSUMPTION: &str = "electricity.consumption";
pub const GAS_CONSUMPTION: &str = "gas.consumption";
pub const ELECTRICITY_COST: &str = "electricity.consumption.cost";
pub const GAS_COST: &str = "gas.consumption.cost";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SupplyType {
    Electricity,
    Gas,
    Unknown,
}

impl SupplyType {
    pub fn from_classifier(classifier: &str) -> Self {
        if classifier.contains(ELECTRICITY_CONSUMPTION) {
            Self::Electricity
        } else if classifier.contains(GAS_CONSUMPTION) {
            Self::Gas
        } else {
            error!("Unknown classifier: {classifier}. Please open an issue");
            Self::Unknown
        }
    }
}

impl fmt::Display for SupplyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Electricity => "electricity",
            Self::Gas => "gas",
            Self::Unknown => "unknown",
        })
    }
}

/// Whether the classifier names a consumption meter (not its cost).
pub fn is_consumption(classifier: &str) -> bool {
    matches!(classifier, ELECTRICITY_CONSUMPTION | GAS_CONSUMPTION)
}

/// The consumption classifier a cost classifier is priced against.
pub fn meter_classifier_for_cost(classifier: &str) -> Option<&'static str> {
    match classifier {
        ELECTRICITY_COST => Some(ELECTRICITY_CONSUMPTION),
        GAS_COST => Some(GAS_CONSUMPTION),
        _ => None,
    }
}

/// Device name, prefixed with the virtual entity name when it has one.
pub fn device_name(supply: SupplyType, virtual_entity_name: Option<&str>) -> String {
    match virtual_entity_name {
        Some(name) => format!("{name} smart {supply} meter"),
        None => format!("Smart {supply} meter"),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub identifier: (&'static str, String),
    pub manufacturer: &'static str,
    pub model: &'static str,
    pub name: String,
}

impl DeviceInfo {
    pub fn new(meter_resource_id: &str, name: String) -> Self {
        Self {
            identifier: (DOMAIN, meter_resource_id.to_string()),
            manufacturer: MANUFACTURER,
            model: MODEL,
            name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    Usage,
    Cost,
    StandingCharge,
    Rate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Energy,
    Monetary,
}

impl SensorKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Usage => "Usage (today)",
            Self::Cost => "Cost (today)",
            Self::StandingCharge => "Standing charge",
            Self::Rate => "Rate",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Self::Usage => "kWh",
            Self::Cost | Self::StandingCharge => "GBP",
            Self::Rate => "GBP/kWh",
        }
    }

    pub fn device_class(self) -> Option<DeviceClass> {
        match self {
            Self::Usage => Some(DeviceClass::Energy),
            Self::Cost | Self::StandingCharge => Some(DeviceClass::Monetary),
            Self::Rate => None,
        }
    }

    pub fn unique_id(self, resource_id: &str) -> String {
        match self {
            Self::Usage | Self::Cost => resource_id.to_string(),
            Self::StandingCharge => format!("{resource_id}-tariff"),
            Self::Rate => format!("{resource_id}-rate"),
        }
    }

    /// Tariff sensors are less commonly used and start disabled.
    pub fn enabled_by_default(self) -> bool {
        matches!(self, Self::Usage | Self::Cost)
    }

    /// Usage and cost are backed by hourly statistics.
    pub fn is_historical(self) -> bool {
        matches!(self, Self::Usage | Self::Cost)
    }

    /// Metered usage never goes below zero; cost does on negative-price tariffs.
    pub fn is_non_negative(self) -> bool {
        matches!(self, Self::Usage)
    }

    pub fn has_mean(self) -> bool {
        matches!(self, Self::Cost)
    }

    /// Converts a raw API value into the sensor's unit.
    pub fn convert(self, raw: f64) -> f64 {
        match self {
            Self::Usage => raw,
            Self::Cost => raw / 100.0,
            Self::StandingCharge | Self::Rate => round4(raw / 100.0),
        }
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// A sensor exposed for one Glowmarkt resource.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorDescription {
    pub kind: SensorKind,
    pub resource_id: String,
    pub classifier: String,
    pub unique_id: String,
    pub supply: SupplyType,
    pub device: DeviceInfo,
}

impl SensorDescription {
    /// `meter` is the consumption resource a cost sensor is priced against;
    /// its id identifies the device so both sensors land on the same meter.
    pub fn new(
        kind: SensorKind,
        resource: &Resource,
        virtual_entity: &VirtualEntity,
        meter: Option<&Resource>,
    ) -> Self {
        let supply = SupplyType::from_classifier(&resource.classifier);
        let device_id = meter.map_or(resource.id.as_str(), |meter| meter.id.as_str());
        Self {
            kind,
            resource_id: resource.id.clone(),
            classifier: resource.classifier.clone(),
            unique_id: kind.unique_id(&resource.id),
            supply,
            device: DeviceInfo::new(device_id, device_name(supply, virtual_entity.name.as_deref())),
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn unit(&self) -> &'static str {
        self.kind.unit()
    }

    pub fn icon(&self) -> Option<&'static str> {
        match self.kind {
            SensorKind::Usage if self.classifier == GAS_CONSUMPTION => Some("mdi:fire"),
            SensorKind::Rate => Some("mdi:cash-multiple"),
            _ => None,
        }
    }

    /// Key of the statistics series behind a historical sensor.
    pub fn series_id(&self) -> String {
        format!("{DOMAIN}:{}", self.unique_id)
    }
}
