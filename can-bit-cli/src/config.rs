//! Configuration loading and parsing
//!
//! Bus settings are given the way a user thinks about them (baud rates,
//! sample rate, sample points in percent) and turned into a
//! [`DecoderConfig`] here.

use anyhow::{bail, Context, Result};
use can_bit_decoder::DecoderConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct InputConfig {
    #[serde(default)]
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BusConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate_hz: u64,
    #[serde(default = "default_nominal_baud")]
    pub nominal_baud: u32,
    #[serde(default = "default_data_baud")]
    pub data_baud: u32,
    /// Percent of the nominal bit
    #[serde(default = "default_sample_point")]
    pub nominal_sample_point: f64,
    /// Percent of the data phase bit
    #[serde(default = "default_sample_point")]
    pub data_sample_point: f64,
    #[serde(default)]
    pub idle_level: IdleLevel,
}

fn default_sample_rate() -> u64 {
    20_000_000
}

fn default_nominal_baud() -> u32 {
    500_000
}

fn default_data_baud() -> u32 {
    2_000_000
}

fn default_sample_point() -> f64 {
    75.0
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: default_sample_rate(),
            nominal_baud: default_nominal_baud(),
            data_baud: default_data_baud(),
            nominal_sample_point: default_sample_point(),
            data_sample_point: default_sample_point(),
            idle_level: IdleLevel::default(),
        }
    }
}

/// Raw level of the idle (recessive) bus
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IdleLevel {
    #[default]
    High,
    Low,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
    /// Write the report here instead of stdout
    pub output_file: Option<PathBuf>,
    /// Include the per-bit annotation row in text reports
    #[serde(default)]
    pub show_bits: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Txt,
    Json,
}

impl BusConfig {
    /// Build the decoder settings for this bus
    pub fn to_decoder_config(&self) -> Result<DecoderConfig> {
        if self.sample_rate_hz == 0 {
            bail!("Sample rate must not be zero");
        }
        if self.nominal_baud == 0 || self.data_baud == 0 {
            bail!("Baud rates must not be zero");
        }

        let sample_period_ps = (1e12 / self.sample_rate_hz as f64).round() as u64;
        let config =
            DecoderConfig::from_baud_rates(sample_period_ps, self.nominal_baud, self.data_baud)
                .with_sample_points(
                    self.nominal_sample_point / 100.0,
                    self.data_sample_point / 100.0,
                )
                .with_idle_level(self.idle_level == IdleLevel::High);

        config
            .validate()
            .context("Bus settings do not give a usable decoder configuration")?;
        Ok(config)
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    Ok(config)
}
