use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use inquire::{Password, PasswordDisplayMode, Text};
use tokio_util::sync::CancellationToken;
use weather_client::{
    CallContext, Config, OpenWeatherClient, OverviewRecord, WeatherError, WeatherProvider,
    WeatherRecord,
};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weather", version, about = "Resilient OpenWeather CLI")]
pub struct Cli {
    /// Enable debug logging (RUST_LOG takes precedence).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print records as JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Store the OpenWeather API key in the config file.
    Configure,

    /// Show current weather for a city.
    City {
        /// City name, e.g. "London" or "São Paulo".
        name: String,
    },

    /// Show the daily weather overview for a coordinate pair.
    Overview {
        /// Latitude in degrees, -90..=90.
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Longitude in degrees, -180..=180.
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
    },

    /// Print the location of the config file.
    ConfigPath,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::Configure => configure(),
            Command::ConfigPath => {
                println!("{}", Config::config_file_path()?.display());
                Ok(())
            }
            Command::City { name } => {
                let client = client_from_config()?;
                let ctx = cancellable_context();
                let weather = client
                    .get_weather_by_city(&name, &ctx)
                    .await
                    .map_err(request_failed)?;
                print_weather(&weather, self.json)
            }
            Command::Overview { lat, lon } => {
                let client = client_from_config()?;
                let ctx = cancellable_context();
                let overview = client
                    .get_weather_overview(lon, lat, &ctx)
                    .await
                    .map_err(request_failed)?;
                print_overview(&overview, self.json)
            }
        }
    }
}

fn configure() -> Result<()> {
    let path = Config::config_file_path()?;
    // Environment overrides are not persisted.
    let mut config = Config::load_from(&path)?;

    let api_key = Password::new("OpenWeather API key:")
        .with_display_mode(PasswordDisplayMode::Masked)
        .without_confirmation()
        .prompt()
        .context("Failed to read API key")?;
    config.set_api_key(api_key.trim().to_string());

    let base_url = Text::new("Base URL:")
        .with_default(&config.upstream.base_url)
        .prompt()
        .context("Failed to read base URL")?;
    config.upstream.base_url = base_url.trim().to_string();

    config.upstream.validate()?;
    config.save_to(&path)?;

    println!("Saved configuration to {}", path.display());
    Ok(())
}

fn client_from_config() -> Result<OpenWeatherClient> {
    let config = Config::load()?;
    OpenWeatherClient::from_config(&config.upstream)
}

/// Context cancelled on Ctrl-C so an in-flight request or backoff stops promptly.
fn cancellable_context() -> CallContext {
    let token = CancellationToken::new();
    let on_signal = token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, cancelling request");
            on_signal.cancel();
        }
    });

    CallContext::new().with_cancellation(token)
}

fn request_failed(err: WeatherError) -> anyhow::Error {
    let status = err.http_status();
    tracing::debug!(?err, status, "request failed");
    anyhow::Error::new(err).context(format!("Weather request failed (HTTP {status})"))
}

fn print_weather(weather: &WeatherRecord, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(weather)?);
        return Ok(());
    }

    let description = if weather.description.is_empty() {
        "n/a"
    } else {
        weather.description.as_str()
    };

    println!("{}", weather.city);
    println!("  Temperature: {:.1} °C", weather.temperature);
    println!("  Conditions:  {description}");
    println!("  Humidity:    {}%", weather.humidity);
    println!("  Wind:        {:.1} m/s", weather.wind_speed);
    println!(
        "  Fetched at:  {}",
        weather.timestamp.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S")
    );
    Ok(())
}

fn print_overview(overview: &OverviewRecord, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(overview)?);
        return Ok(());
    }

    println!("lat {}, lon {} ({}, {})", overview.lat, overview.lon, overview.date, overview.tz);
    println!();
    println!("{}", overview.weather_overview);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_city_command() {
        let cli = Cli::try_parse_from(["weather", "city", "London"]).unwrap();
        assert!(matches!(cli.command, Command::City { ref name } if name == "London"));
        assert!(!cli.json);
    }

    #[test]
    fn parses_negative_coordinates() {
        let cli = Cli::try_parse_from(["weather", "--json", "overview", "--lat", "-33.9", "--lon", "-70.6"]).unwrap();
        match cli.command {
            Command::Overview { lat, lon } => {
                assert_eq!(lat, -33.9);
                assert_eq!(lon, -70.6);
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(cli.json);
    }

    #[test]
    fn request_failure_mentions_status() {
        let err = request_failed(WeatherError::NotFound("city not found".into()));
        let msg = format!("{err:#}");
        assert!(msg.contains("HTTP 404"));
        assert!(msg.contains("city not found"));
    }
}
