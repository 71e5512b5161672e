//! Decoder configuration types
//!
//! The decoder only needs plain bit timing parameters. Capturing them from a
//! user (baud rates, percentages, file formats) is the application's job.

use crate::timing::BitRate;
use crate::types::{DecoderError, Result};
use serde::{Deserialize, Serialize};

/// Lowest accepted sample point fraction
pub const MIN_SAMPLE_POINT: f64 = 0.5;
/// Highest accepted sample point fraction
pub const MAX_SAMPLE_POINT: f64 = 0.9;
/// A bit must span at least this many samples to be decodable
pub const MIN_SAMPLES_PER_BIT: f64 = 3.0;
/// Whole samples required between the sample point and the end of a bit
pub const MIN_SAMPLES_AFTER_SAMPLE_POINT: f64 = 1.0;

/// Configuration for the decoder library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Duration of one sample in picoseconds
    #[serde(default = "default_sample_period")]
    pub sample_period_ps: u64,

    /// Raw level of a recessive (idle) bus: true = high
    #[serde(default = "default_true")]
    pub idle_level: bool,

    /// Samples per bit at the nominal (arbitration) rate
    #[serde(default = "default_nominal_samples")]
    pub nominal_samples_per_bit: f64,

    /// Samples per bit at the CAN-FD data rate
    #[serde(default = "default_data_samples")]
    pub data_samples_per_bit: f64,

    /// Nominal sample point as a fraction of the bit (0.5 - 0.9)
    #[serde(default = "default_sample_point")]
    pub nominal_sample_point: f64,

    /// Data phase sample point as a fraction of the bit (0.5 - 0.9)
    #[serde(default = "default_sample_point")]
    pub data_sample_point: f64,
}

fn default_true() -> bool {
    true
}

fn default_sample_period() -> u64 {
    // 20 MHz capture
    50_000
}

fn default_nominal_samples() -> f64 {
    // 500 kbit/s at 20 MHz
    40.0
}

fn default_data_samples() -> f64 {
    // 2 Mbit/s at 20 MHz
    10.0
}

fn default_sample_point() -> f64 {
    0.75
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            sample_period_ps: default_sample_period(),
            idle_level: default_true(),
            nominal_samples_per_bit: default_nominal_samples(),
            data_samples_per_bit: default_data_samples(),
            nominal_sample_point: default_sample_point(),
            data_sample_point: default_sample_point(),
        }
    }
}

impl DecoderConfig {
    /// Create a new decoder configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive samples-per-bit from the capture sample period and baud rates
    pub fn from_baud_rates(sample_period_ps: u64, nominal_baud: u32, data_baud: u32) -> Self {
        let samples_per_bit = |baud: u32| {
            if sample_period_ps == 0 || baud == 0 {
                0.0
            } else {
                1e12 / (sample_period_ps as f64 * baud as f64)
            }
        };
        Self {
            sample_period_ps,
            nominal_samples_per_bit: samples_per_bit(nominal_baud),
            data_samples_per_bit: samples_per_bit(data_baud),
            ..Self::default()
        }
    }

    /// Builder method: set the raw level of the idle bus
    pub fn with_idle_level(mut self, high: bool) -> Self {
        self.idle_level = high;
        self
    }

    /// Builder method: set samples per bit at the nominal rate
    pub fn with_nominal_rate(mut self, samples_per_bit: f64) -> Self {
        self.nominal_samples_per_bit = samples_per_bit;
        self
    }

    /// Builder method: set samples per bit at the FD data rate
    pub fn with_data_rate(mut self, samples_per_bit: f64) -> Self {
        self.data_samples_per_bit = samples_per_bit;
        self
    }

    /// Builder method: set both sample point fractions
    pub fn with_sample_points(mut self, nominal: f64, data: f64) -> Self {
        self.nominal_sample_point = nominal;
        self.data_sample_point = data;
        self
    }

    pub fn nominal_rate(&self) -> BitRate {
        BitRate::new(self.nominal_samples_per_bit, self.nominal_sample_point)
    }

    pub fn data_rate(&self) -> BitRate {
        BitRate::new(self.data_samples_per_bit, self.data_sample_point)
    }

    /// Check that every parameter is usable by the bit timing engine
    pub fn validate(&self) -> Result<()> {
        if self.sample_period_ps == 0 {
            return Err(DecoderError::InvalidConfig(
                "sample period must be non-zero".to_string(),
            ));
        }

        for (name, value) in [
            ("nominal", self.nominal_samples_per_bit),
            ("data", self.data_samples_per_bit),
        ] {
            if !value.is_finite() || value < MIN_SAMPLES_PER_BIT {
                return Err(DecoderError::InvalidConfig(format!(
                    "{} bit rate needs at least {} samples per bit, got {}",
                    name, MIN_SAMPLES_PER_BIT, value
                )));
            }
        }

        for (name, rate) in [("nominal", self.nominal_rate()), ("data", self.data_rate())] {
            if !(MIN_SAMPLE_POINT..=MAX_SAMPLE_POINT).contains(&rate.sample_point) {
                return Err(DecoderError::InvalidConfig(format!(
                    "{} sample point {} outside {}..={}",
                    name, rate.sample_point, MIN_SAMPLE_POINT, MAX_SAMPLE_POINT
                )));
            }
            // Rounding may otherwise put the sample into the next bit
            let after = rate.samples_per_bit * (1.0 - rate.sample_point);
            if after < MIN_SAMPLES_AFTER_SAMPLE_POINT - 1e-9 {
                return Err(DecoderError::InvalidConfig(format!(
                    "{} sample point {} leaves {:.2} samples before the bit end, need {}",
                    name, rate.sample_point, after, MIN_SAMPLES_AFTER_SAMPLE_POINT
                )));
            }
        }

        Ok(())
    }
}
