use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::{
    CallContext, OverviewRecord, UpstreamConfig, WeatherError, WeatherRecord,
    classify::{Subject, classify},
    provider::{validate_city, validate_coordinates},
    resilience::{CircuitBreaker, RetryingFetcher},
    transport::Transport,
};

use super::WeatherProvider;

pub const BREAKER_NAME: &str = "openweather-api";

const CURRENT_WEATHER_PATH: &str = "/data/2.5/weather";
const OVERVIEW_PATH: &str = "/data/3.0/onecall/overview";

/// OpenWeather adapter: circuit breaker → retrying fetch → classification.
#[derive(Debug)]
pub struct OpenWeatherClient<T = Client> {
    api_key: String,
    base_url: String,
    breaker: Arc<CircuitBreaker>,
    fetcher: RetryingFetcher<T>,
}

impl OpenWeatherClient<Client> {
    /// Build a client with its own HTTP connection pool and breaker.
    pub fn from_config(config: &UpstreamConfig) -> Result<Self> {
        config.validate()?;

        let http = Client::builder()
            .timeout(config.http_timeout())
            .build()
            .context("Failed to build HTTP client")?;

        let breaker = CircuitBreaker::new(BREAKER_NAME, config.breaker.settings()?)
            .context("Invalid circuit breaker configuration")?;

        Self::new(config, http, Arc::new(breaker))
    }
}

impl<T: Transport> OpenWeatherClient<T> {
    /// Wire a client around an existing transport and a shared breaker.
    ///
    /// Only the API key, base URL and retry settings are read from `config`.
    pub fn new(config: &UpstreamConfig, transport: T, breaker: Arc<CircuitBreaker>) -> Result<Self> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        Url::parse(&base_url)
            .with_context(|| format!("Invalid upstream base URL: {}", config.base_url))?;

        Ok(Self {
            api_key: config.api_key.clone(),
            base_url,
            breaker,
            fetcher: RetryingFetcher::new(transport, config.retry.policy()),
        })
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn fetcher(&self) -> &RetryingFetcher<T> {
        &self.fetcher
    }

    fn endpoint(&self, path: &str, params: &[(&str, &str)]) -> Result<Url, WeatherError> {
        let raw = format!("{}{}", self.base_url, path);
        Url::parse_with_params(&raw, params)
            .map_err(|e| WeatherError::Internal(format!("failed to build upstream URL: {e}")))
    }

    async fn fetch_classified<R: DeserializeOwned>(
        &self,
        url: &Url,
        subject: &Subject,
        ctx: &CallContext,
    ) -> Result<R, WeatherError> {
        let response = self.fetcher.fetch(url, ctx).await?;
        classify(&response, subject)
    }

    async fn fetch_current(&self, city: &str, ctx: &CallContext) -> Result<WeatherRecord, WeatherError> {
        let url = self.endpoint(
            CURRENT_WEATHER_PATH,
            &[("q", city), ("appid", self.api_key.as_str()), ("units", "metric")],
        )?;
        let subject = Subject::City(city.to_string());

        let parsed: OwCurrentResponse = self
            .breaker
            .execute(|| self.fetch_classified(&url, &subject, ctx))
            .await?;

        Ok(parsed.into_record(Utc::now()))
    }

    async fn fetch_overview(&self, lon: f64, lat: f64, ctx: &CallContext) -> Result<OverviewRecord, WeatherError> {
        let lat_param = lat.to_string();
        let lon_param = lon.to_string();
        let url = self.endpoint(
            OVERVIEW_PATH,
            &[
                ("appid", self.api_key.as_str()),
                ("lat", lat_param.as_str()),
                ("lon", lon_param.as_str()),
            ],
        )?;
        let subject = Subject::Coordinates { lon, lat };

        let parsed: OwOverviewResponse = self
            .breaker
            .execute(|| self.fetch_classified(&url, &subject, ctx))
            .await?;

        Ok(parsed.into())
    }
}

#[derive(Debug, Deserialize)]
struct OwMain {
    temp: f64,
    humidity: u8,
}

#[derive(Debug, Deserialize)]
struct OwWeather {
    description: String,
}

#[derive(Debug, Default, Deserialize)]
struct OwWind {
    #[serde(default)]
    speed: f64,
}

#[derive(Debug, Deserialize)]
struct OwCurrentResponse {
    name: String,
    main: OwMain,
    #[serde(default)]
    weather: Vec<OwWeather>,
    #[serde(default)]
    wind: OwWind,
}

impl OwCurrentResponse {
    fn into_record(self, fetched_at: DateTime<Utc>) -> WeatherRecord {
        let description = self
            .weather
            .into_iter()
            .next()
            .map(|w| w.description)
            .unwrap_or_default();

        WeatherRecord {
            city: self.name,
            temperature: self.main.temp,
            description,
            humidity: self.main.humidity,
            wind_speed: self.wind.speed,
            timestamp: fetched_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OwOverviewResponse {
    lat: f64,
    lon: f64,
    #[serde(default)]
    tz: String,
    #[serde(default)]
    date: String,
    #[serde(default)]
    units: String,
    weather_overview: String,
}

impl From<OwOverviewResponse> for OverviewRecord {
    fn from(r: OwOverviewResponse) -> Self {
        OverviewRecord {
            lat: r.lat,
            lon: r.lon,
            tz: r.tz,
            date: r.date,
            units: r.units,
            weather_overview: r.weather_overview,
        }
    }
}

#[async_trait]
impl<T: Transport> WeatherProvider for OpenWeatherClient<T> {
    async fn get_weather_by_city(
        &self,
        city: &str,
        ctx: &CallContext,
    ) -> Result<WeatherRecord, WeatherError> {
        let city = validate_city(city)?;
        self.fetch_current(city, ctx).await
    }

    async fn get_weather_overview(
        &self,
        lon: f64,
        lat: f64,
        ctx: &CallContext,
    ) -> Result<OverviewRecord, WeatherError> {
        validate_coordinates(lon, lat)?;
        self.fetch_overview(lon, lat, ctx).await
    }
}
