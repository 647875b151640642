//! Hildebrand Glow (DCC) bridge library
//!
//! This library polls the Glowmarkt smart meter API and exposes usage, cost, tariff rate
//! and standing charge sensors, turning half-hourly readings into hourly statistics.

pub mod config;
pub mod coordinator;
pub mod discovery;
pub mod glowmarkt;
pub mod reading_fetcher;
pub mod sensor;
pub mod statistics;
pub mod statistics_store;
pub mod tariff_coordinator;

// Re-export commonly used types for easier access
pub use config::Config;
pub use coordinator::SensorCoordinator;
pub use glowmarkt::GlowmarktApi;
pub use reading_fetcher::SensorUpdate;
pub use statistics::{aggregate, aggregate_with_state, AggregationState, HourStatistic, RawReading};
pub use statistics_store::{MemoryStatisticsStore, StatisticsStore};
