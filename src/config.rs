use anyhow::Context;
use std::env;
use std::time::Duration;

pub const DEFAULT_GLOW_URL: &str = "https://api.glowmarkt.com/api/v0-1";
/// Application id of the Bright app, which Glowmarkt accepts for third party clients.
pub const DEFAULT_APP_ID: &str = "b0f1b774-a586-4f72-9edd-27ead8aa7a8d";
pub const DEFAULT_POLL_MINUTES: u64 = 15;
/// Limit on a single Glowmarkt request, so a hung call can't stall its series.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Longest accepted poll interval, a day.
pub const MAX_POLL_MINUTES: u64 = 24 * 60;

/// Runtime configuration, read from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub username: String,
    pub password: String,
    pub glow_url: String,
    pub app_id: String,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    /// Polls the standing charge and rate sensors, which start disabled.
    pub tariff_sensors: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            glow_url: DEFAULT_GLOW_URL.to_string(),
            app_id: DEFAULT_APP_ID.to_string(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_MINUTES * 60),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            tariff_sensors: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        let username = env::var("GLOW_USERNAME").context("GLOW_USERNAME must be set")?;
        let password = env::var("GLOW_PASSWORD").context("GLOW_PASSWORD must be set")?;
        let glow_url = env::var("GLOW_URL").unwrap_or_else(|_| DEFAULT_GLOW_URL.to_string());
        let app_id = env::var("GLOW_APP_ID").unwrap_or_else(|_| DEFAULT_APP_ID.to_string());
        let poll_minutes = parse_minutes_safe(env::var("GLOW_POLL_MINUTES").ok());
        let tariff_sensors = parse_bool_safe(env::var("GLOW_TARIFF_SENSORS").ok());

        Ok(Self {
            username,
            password,
            glow_url,
            app_id,
            poll_interval: Duration::from_secs(poll_minutes * 60),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            tariff_sensors,
        })
    }
}

/// Parses a number of minutes between 1 and [`MAX_POLL_MINUTES`], falling back to the default
fn parse_minutes_safe(val: Option<String>) -> u64 {
    val.and_then(|minutes| minutes.trim().parse().ok())
        .filter(|minutes| (1..=MAX_POLL_MINUTES).contains(minutes))
        .unwrap_or(DEFAULT_POLL_MINUTES)
}

fn parse_bool_safe(val: Option<String>) -> bool {
    val.unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
        .parse()
        .unwrap_or_default()
}
