use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::classifier::ClassifierConfig;
use crate::error::{MonitorError, Result};
use crate::filters::KalmanConfig;
use crate::neighbor::ExpiryRule;
use crate::transport::TransportConfig;
use crate::vehicle::LocationFix;

/// Where inertial samples come from
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SensorKind {
    #[default]
    Simulated,
    Replay { path: PathBuf },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VehicleConfig {
    pub plate: String,
    /// Fixed position for nodes without a GPS feed
    #[serde(default)]
    pub static_location: Option<LocationFix>,
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self {
            plate: "V2X0001".to_string(),
            static_location: None,
        }
    }
}

/// Node configuration. Every field has a default, so a JSON file only
/// needs the keys it changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub sampling_period_ms: u64,
    pub broadcast_period_ms: u64,
    pub neighbor_period_ms: u64,
    /// Neighbours not heard from for this long are dropped
    pub neighbor_expiry_secs: f64,
    pub expiry_rule: ExpiryRule,
    pub kalman: KalmanConfig,
    pub classifier: ClassifierConfig,
    pub vehicle: VehicleConfig,
    pub transport: TransportConfig,
    pub sensor: SensorKind,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sampling_period_ms: 100,
            broadcast_period_ms: 100,
            neighbor_period_ms: 5000,
            neighbor_expiry_secs: 5.0,
            expiry_rule: ExpiryRule::Age,
            kalman: KalmanConfig::default(),
            classifier: ClassifierConfig::default(),
            vehicle: VehicleConfig::default(),
            transport: TransportConfig::default(),
            sensor: SensorKind::Simulated,
        }
    }
}

impl MonitorConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let config: MonitorConfig = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, period) in [
            ("sampling", self.sampling_period_ms),
            ("broadcast", self.broadcast_period_ms),
            ("neighbor", self.neighbor_period_ms),
        ] {
            if period == 0 {
                return Err(MonitorError::Config(format!("{} period must be non-zero", name)));
            }
        }
        if !(self.neighbor_expiry_secs > 0.0) {
            return Err(MonitorError::Config(format!(
                "neighbor expiry must be positive, got {}",
                self.neighbor_expiry_secs
            )));
        }
        if self.vehicle.plate.is_empty() {
            return Err(MonitorError::Config("vehicle plate is empty".to_string()));
        }
        Ok(())
    }

    pub fn sampling_period(&self) -> Duration {
        Duration::from_millis(self.sampling_period_ms)
    }

    pub fn broadcast_period(&self) -> Duration {
        Duration::from_millis(self.broadcast_period_ms)
    }

    pub fn neighbor_period(&self) -> Duration {
        Duration::from_millis(self.neighbor_period_ms)
    }
}
