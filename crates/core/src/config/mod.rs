use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::mapping::{coarse_bands, fine_bands, ThresholdBand};
use crate::{DiscoLightsError, Result};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bridge: BridgeConfig,
    pub audio: AudioConfig,
    pub profile: Profile,
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing fields fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bridge.address.trim().is_empty() {
            return Err(DiscoLightsError::InvalidConfig(
                "bridge address must not be empty".into(),
            ));
        }
        self.profile.validate()
    }
}

/// Where the bridge lives and how pairing with it behaves.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub address: String,
    /// Application name announced to the bridge when pairing.
    pub device_type: String,
    /// Time the operator gets to press the link button before pairing.
    pub pairing_wait_ms: u64,
    /// Location of the persisted session. Platform config dir when unset.
    pub session_path: Option<PathBuf>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            address: "192.168.0.176".to_string(),
            device_type: "disco-lights".to_string(),
            pairing_wait_ms: 5_000,
            session_path: None,
        }
    }
}

impl BridgeConfig {
    pub fn pairing_wait(&self) -> Duration {
        Duration::from_millis(self.pairing_wait_ms)
    }

    /// Resolves the session file location.
    pub fn resolved_session_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.session_path {
            return Ok(path.clone());
        }

        dirs::config_dir()
            .map(|dir| dir.join("disco-lights").join("session.json"))
            .ok_or_else(|| DiscoLightsError::msg("no platform config directory available"))
    }
}

/// Configuration specific to the audio subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Substring of the input device name. Default input device when unset.
    pub device: Option<String>,
    pub sample_rate: Option<u32>,
}

/// Calibration bundle selected at startup: band table, channel count,
/// smoothing depth and tick cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub name: String,
    pub channels: u16,
    pub smoothing_capacity: usize,
    pub tick_interval_ms: u64,
    pub bands: Vec<ThresholdBand>,
}

impl Default for Profile {
    fn default() -> Self {
        Self::fine()
    }
}

impl Profile {
    /// Stereo capture, 100-sample moving average, colorized four-band table.
    pub fn fine() -> Self {
        Self {
            name: "fine".to_string(),
            channels: 2,
            smoothing_capacity: 100,
            tick_interval_ms: 100,
            bands: fine_bands(),
        }
    }

    /// Mono capture on the raw latest sample with a brightness-only two-band
    /// table, ticking as fast as the lights reasonably accept.
    pub fn coarse() -> Self {
        Self {
            name: "coarse".to_string(),
            channels: 1,
            smoothing_capacity: 1,
            tick_interval_ms: 20,
            bands: coarse_bands(),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 {
            return Err(DiscoLightsError::InvalidConfig(
                "profile needs at least one audio channel".into(),
            ));
        }
        if self.smoothing_capacity == 0 {
            return Err(DiscoLightsError::InvalidConfig(
                "smoothing capacity must be at least one".into(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(DiscoLightsError::InvalidConfig(
                "tick interval must be positive".into(),
            ));
        }
        if let Some(band) = self
            .bands
            .iter()
            .find(|band| !band.lower_bound.is_finite() || band.lower_bound < 0.0)
        {
            return Err(DiscoLightsError::InvalidConfig(format!(
                "band lower bound {} is not a non-negative number",
                band.lower_bound
            )));
        }
        Ok(())
    }
}
