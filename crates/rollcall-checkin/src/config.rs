use std::path::{Path, PathBuf};
use std::time::Duration;

use rollcall_core::{GeoPoint, Geofence};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Check-in pipeline configuration.
///
/// Loaded from built-in defaults, then the TOML file named by
/// `ROLLCALL_CONFIG` (if set), then `ROLLCALL_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Latitude of the campus reference point (decimal degrees).
    pub campus_latitude: f64,
    /// Longitude of the campus reference point (decimal degrees).
    pub campus_longitude: f64,
    /// Maximum admitted distance from the campus point, in metres.
    pub geofence_radius_m: f64,
    /// Requested camera resolution.
    pub capture_width: u32,
    pub capture_height: u32,
    /// Period of the liveness sampling loop.
    pub sample_interval_ms: u64,
    /// Averaged eye aspect ratio below which a blink is registered.
    pub ear_threshold: f32,
    /// Give up waiting for a blink after this many seconds. 0 waits forever.
    pub liveness_timeout_secs: u64,
    /// Upper bound on the one-shot location fix.
    pub location_timeout_secs: u64,
    /// Maximum embedding distance for an identity match (exclusive).
    pub match_threshold: f32,
    /// How long the success status stays up before navigating away.
    pub success_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_data_dir().join("rollcall.db"),
            campus_latitude: 23.218421,
            campus_longitude: 77.390896,
            geofence_radius_m: 500.0,
            capture_width: 640,
            capture_height: 480,
            sample_interval_ms: 200,
            ear_threshold: rollcall_core::DEFAULT_EAR_THRESHOLD,
            liveness_timeout_secs: 0,
            location_timeout_secs: 10,
            match_threshold: rollcall_core::DEFAULT_MATCH_THRESHOLD,
            success_delay_ms: 2000,
        }
    }
}

impl Config {
    /// Load configuration from the optional config file and `ROLLCALL_*`
    /// environment variables, then validate it.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("ROLLCALL_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&contents)?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("ROLLCALL_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        self.campus_latitude = env_f64("ROLLCALL_CAMPUS_LAT", self.campus_latitude);
        self.campus_longitude = env_f64("ROLLCALL_CAMPUS_LON", self.campus_longitude);
        self.geofence_radius_m = env_f64("ROLLCALL_GEOFENCE_RADIUS_M", self.geofence_radius_m);
        self.capture_width = env_u32("ROLLCALL_CAPTURE_WIDTH", self.capture_width);
        self.capture_height = env_u32("ROLLCALL_CAPTURE_HEIGHT", self.capture_height);
        self.sample_interval_ms = env_u64("ROLLCALL_SAMPLE_INTERVAL_MS", self.sample_interval_ms);
        self.ear_threshold = env_f32("ROLLCALL_EAR_THRESHOLD", self.ear_threshold);
        self.liveness_timeout_secs =
            env_u64("ROLLCALL_LIVENESS_TIMEOUT_SECS", self.liveness_timeout_secs);
        self.location_timeout_secs =
            env_u64("ROLLCALL_LOCATION_TIMEOUT_SECS", self.location_timeout_secs);
        self.match_threshold = env_f32("ROLLCALL_MATCH_THRESHOLD", self.match_threshold);
        self.success_delay_ms = env_u64("ROLLCALL_SUCCESS_DELAY_MS", self.success_delay_ms);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.campus().is_valid() {
            return Err(ConfigError::Invalid(format!(
                "campus coordinate ({}, {}) is out of range",
                self.campus_latitude, self.campus_longitude
            )));
        }
        if !(self.geofence_radius_m.is_finite() && self.geofence_radius_m > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "geofence radius must be positive, got {}",
                self.geofence_radius_m
            )));
        }
        if !(self.ear_threshold.is_finite() && self.ear_threshold > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "EAR threshold must be positive, got {}",
                self.ear_threshold
            )));
        }
        if !(self.match_threshold.is_finite() && self.match_threshold > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "match threshold must be positive, got {}",
                self.match_threshold
            )));
        }
        if self.sample_interval_ms == 0 {
            return Err(ConfigError::Invalid("sample interval must be non-zero".into()));
        }
        if self.location_timeout_secs == 0 {
            return Err(ConfigError::Invalid("location timeout must be non-zero".into()));
        }
        if self.capture_width == 0 || self.capture_height == 0 {
            return Err(ConfigError::Invalid(format!(
                "capture resolution {}x{} is invalid",
                self.capture_width, self.capture_height
            )));
        }
        Ok(())
    }

    pub fn campus(&self) -> GeoPoint {
        GeoPoint::new(self.campus_latitude, self.campus_longitude)
    }

    pub fn geofence(&self) -> Geofence {
        Geofence::new(self.campus(), self.geofence_radius_m)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn location_timeout(&self) -> Duration {
        Duration::from_secs(self.location_timeout_secs)
    }

    pub fn success_delay(&self) -> Duration {
        Duration::from_millis(self.success_delay_ms)
    }

    pub fn liveness_timeout(&self) -> Option<Duration> {
        (self.liveness_timeout_secs > 0).then(|| Duration::from_secs(self.liveness_timeout_secs))
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
