use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub location: LocationConfig,
    pub api: ApiConfig,
    pub search: SearchConfig,
    pub camera: CameraConfig,
    pub checkin: CheckInConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LocationConfig {
    pub auto_locate: bool,        // Use IP geolocation if true
    pub manual_lat: f64,          // Latitude used if auto_locate is false
    pub manual_lon: f64,          // Longitude used if auto_locate is false
    pub watch: bool,              // Keep refreshing the fix instead of a one-shot lookup
    pub watch_interval_secs: u64, // Delay between fixes while watching
    pub lookup_ip: String,        // Empty means the caller's own public address
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub auth_token: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    pub radius_km: f64,
    pub limit: usize,
    pub suggestion_limit: usize,
    pub query_debounce_ms: u64,
    pub map_debounce_ms: u64,
    pub drift_threshold_km: f64, // Map drift that surfaces "search this area"
    pub min_query_len: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CameraConfig {
    pub default_zoom: f64,
    pub fly_duration_ms: u64,
    pub cooldown_ms: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CheckInConfig {
    pub max_distance_km: f64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            auto_locate: true,
            manual_lat: -6.2088,
            manual_lon: 106.8456,
            watch: false,
            watch_interval_secs: 15,
            lookup_ip: String::new(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeout_secs: 10,
            auth_token: None,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            radius_km: 5.0,
            limit: 50,
            suggestion_limit: 10,
            query_debounce_ms: 500,
            map_debounce_ms: 200,
            drift_threshold_km: 0.5,
            min_query_len: 2,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            default_zoom: 15.0,
            fly_duration_ms: 1500,
            cooldown_ms: 2000,
        }
    }
}

impl Default for CheckInConfig {
    fn default() -> Self {
        Self {
            max_distance_km: 1.0,
        }
    }
}

impl SearchConfig {
    pub fn query_debounce(&self) -> Duration {
        Duration::from_millis(self.query_debounce_ms)
    }

    pub fn map_debounce(&self) -> Duration {
        Duration::from_millis(self.map_debounce_ms)
    }
}

impl CameraConfig {
    pub fn fly_duration(&self) -> Duration {
        Duration::from_millis(self.fly_duration_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

impl Config {
    /// Loads config.toml from the working directory.
    /// If it doesn't exist, creates a default one.
    pub fn load() -> Self {
        Self::load_from("config.toml")
    }

    pub fn load_from(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();

        if let Ok(content) = fs::read_to_string(path) {
            match toml::from_str(&content) {
                Ok(config) => return config,
                Err(e) => {
                    // Leave a broken file alone so the user can fix it.
                    warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    return Config::default();
                }
            }
        }

        let default_config = Config::default();

        // Save default config to disk for the user to edit later
        match toml::to_string_pretty(&default_config) {
            Ok(toml_string) => {
                if fs::write(path, toml_string).is_err() {
                    warn!("Could not write default {} to disk.", path.display());
                }
            }
            Err(e) => warn!("Could not serialize default config: {}", e),
        }

        info!("Loaded default configuration.");
        default_config
    }
}
