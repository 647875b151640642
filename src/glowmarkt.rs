use crate::config::Config;
use crate::statistics::RawReading;
use chrono::{DateTime, Utc};
use serde_derive::{Deserialize, Serialize};
use tracing::{error, warn};

/// Glowmarkt expects naive timestamps in the query string.
const QUERY_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Authenticated session against the Glowmarkt REST API.
pub struct GlowmarktApi {
    endpoint_url: String,
    app_id: String,
    token: String,
    client: reqwest::Client,
}

impl GlowmarktApi {
    /// Logs in with the configured credentials and keeps the session token.
    pub async fn authenticate(config: &Config) -> Result<Self, anyhow::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        let endpoint_url = config.glow_url.trim_end_matches('/').to_string();
        let response: AuthResponse = client
            .post(format!("{endpoint_url}/auth"))
            .header("applicationId", &config.app_id)
            .json(&AuthRequest {
                username: &config.username,
                password: &config.password,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if !response.valid {
            anyhow::bail!("Glowmarkt rejected the credentials");
        }
        let Some(token) = response.token else {
            anyhow::bail!("Glowmarkt returned no session token");
        };
        Ok(Self {
            endpoint_url,
            app_id: config.app_id.clone(),
            token,
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.endpoint_url
    }

    pub async fn virtual_entities(&self) -> Result<Vec<VirtualEntity>, anyhow::Error> {
        self.get_json("virtualentity", &[]).await
    }

    pub async fn resources(&self, virtual_entity_id: &str) -> Result<Vec<Resource>, anyhow::Error> {
        let listing: ResourceListing = self
            .get_json(&format!("virtualentity/{virtual_entity_id}/resources"), &[])
            .await?;
        Ok(listing.resources)
    }

    /// Asks Glowmarkt to pull the latest data for the resource from the DCC.
    pub async fn catchup(&self, resource_id: &str) -> Result<(), anyhow::Error> {
        self.request(&format!("resource/{resource_id}/catchup"), &[])
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Half-hourly summed readings between `from` and `to`, ascending.
    ///
    /// Slots the meter hasn't reported yet come back as nulls and are dropped.
    pub async fn readings(
        &self,
        resource_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RawReading>, anyhow::Error> {
        let from = from.format(QUERY_TIME_FORMAT).to_string();
        let to = to.format(QUERY_TIME_FORMAT).to_string();
        let response: ReadingsResponse = self
            .get_json(
                &format!("resource/{resource_id}/readings"),
                &[
                    ("from", from.as_str()),
                    ("to", to.as_str()),
                    ("period", "PT30M"),
                    ("function", "sum"),
                    ("nulls", "1"),
                ],
            )
            .await?;
        response.into_readings()
    }

    /// Current tariff, or `None` when the meter has no tariff published.
    pub async fn tariff(&self, resource_id: &str) -> Result<Option<Tariff>, anyhow::Error> {
        let response: TariffResponse = self
            .get_json(&format!("resource/{resource_id}/tariff"), &[])
            .await?;
        Ok(response.data.into_iter().next())
    }

    fn request(&self, path: &str, query: &[(&str, &str)]) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}/{}", self.endpoint_url, path))
            .header("applicationId", &self.app_id)
            .header("token", &self.token)
            .query(query)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, anyhow::Error> {
        let result = self
            .request(path, query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(result)
    }
}

/// Logs a failed API call at a level matching its cause.
pub fn log_api_error(action: &str, err: &anyhow::Error) {
    match err.downcast_ref::<reqwest::Error>() {
        Some(e) if e.is_timeout() => error!("{action}: timeout: {e}"),
        Some(e) if e.is_connect() => error!("{action}: cannot connect: {e}"),
        Some(e) if e.is_status() => {
            warn!("{action}: non-200 status code. The Glow API may be experiencing issues: {e}")
        }
        _ => error!("{action}: unexpected error: {err:#}. Please open an issue"),
    }
}

#[derive(Debug, Serialize)]
struct AuthRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    valid: bool,
    token: Option<String>,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualEntity {
    #[serde(rename = "veId")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResourceListing {
    #[serde(default)]
    resources: Vec<Resource>,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    #[serde(rename = "resourceId")]
    pub id: String,
    pub classifier: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub base_unit: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReadingsResponse {
    #[serde(default)]
    data: Vec<(i64, Option<f64>)>,
}

impl ReadingsResponse {
    fn into_readings(self) -> Result<Vec<RawReading>, anyhow::Error> {
        let mut readings = Vec::with_capacity(self.data.len());
        for (seconds, value) in self.data {
            let Some(value) = value else {
                continue;
            };
            let Some(timestamp) = DateTime::from_timestamp(seconds, 0) else {
                anyhow::bail!("Reading timestamp {seconds} is out of range");
            };
            readings.push(RawReading::new(timestamp, value));
        }
        Ok(readings)
    }
}

#[derive(Debug, Deserialize)]
struct TariffResponse {
    #[serde(default)]
    data: Vec<Tariff>,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tariff {
    pub current_rates: CurrentRates,
}

/// Rates in pence.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentRates {
    pub rate: f64,
    pub standing_charge: f64,
}
