//! Bit timing engine
//!
//! Computes the sample positions of each bit from a floating bit start, so
//! rounding never accumulates across a frame. Holds both the nominal and the
//! CAN-FD data rate and switches between them in the middle of a bit.

/// Start of the steady window as a fraction of the bit
pub const STEADY_START: f64 = 0.2;
/// End of the steady window as a fraction of the bit
pub const STEADY_END: f64 = 0.8;
/// Steady window start for the bit following a switch back to nominal rate.
/// The CRC delimiter may legally last one or two bit times in CAN-FD.
pub const EXTENDED_STEADY_START: f64 = 0.5;
/// How far past the computed bit end a dominant edge may still resynchronise
pub const RESYNC_WINDOW: f64 = 0.2;

/// One bit rate: samples per bit and sample point fraction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BitRate {
    pub samples_per_bit: f64,
    pub sample_point: f64,
}

impl BitRate {
    pub fn new(samples_per_bit: f64, sample_point: f64) -> Self {
        Self {
            samples_per_bit,
            sample_point,
        }
    }
}

/// Timing of the bit currently being decoded
#[derive(Debug, Clone)]
pub struct BitTiming {
    nominal: BitRate,
    data: BitRate,
    high_speed: bool,
    extend_next: bool,

    pub bit_start: f64,
    pub steady_start: f64,
    pub sample_point: f64,
    pub steady_end: f64,
    pub bit_end: f64,
}

impl BitTiming {
    pub fn new(nominal: BitRate, data: BitRate) -> Self {
        Self {
            nominal,
            data,
            high_speed: false,
            extend_next: false,
            bit_start: 0.0,
            steady_start: 0.0,
            sample_point: 0.0,
            steady_end: 0.0,
            bit_end: 0.0,
        }
    }

    /// Back to the nominal rate; called at the start of every frame
    pub fn reset(&mut self) {
        self.high_speed = false;
        self.extend_next = false;
    }

    pub fn is_high_speed(&self) -> bool {
        self.high_speed
    }

    fn active(&self) -> BitRate {
        if self.high_speed {
            self.data
        } else {
            self.nominal
        }
    }

    /// Samples per bit of the active rate
    pub fn samples_per_bit(&self) -> f64 {
        self.active().samples_per_bit
    }

    /// Compute all positions of a bit starting at `bit_start`
    pub fn begin(&mut self, bit_start: f64) {
        let rate = self.active();
        let spb = rate.samples_per_bit;

        let steady = if std::mem::take(&mut self.extend_next) {
            EXTENDED_STEADY_START.min(rate.sample_point)
        } else {
            STEADY_START
        };

        self.bit_start = bit_start;
        self.steady_start = bit_start + spb * steady;
        self.sample_point = bit_start + spb * rate.sample_point;
        self.steady_end = bit_start + spb * STEADY_END;
        self.bit_end = bit_start + spb;
    }

    /// Sample the bit value is read from, never past the last sample of the bit
    pub fn sample_index(&self) -> usize {
        let first = self.bit_start.round() as usize;
        let last = (self.bit_end.round() as usize).saturating_sub(1).max(first);
        (self.sample_point.round() as usize).min(last)
    }

    /// Switch rate at the sample point of the current bit.
    ///
    /// The part of the bit before the sample point elapsed at the old rate,
    /// the remainder runs at the new one.
    pub fn switch_rate(&mut self, to_high: bool) {
        if self.high_speed == to_high {
            return;
        }
        self.high_speed = to_high;

        let rate = self.active();
        self.steady_end = self.steady_end.min(self.sample_point);
        self.bit_end = self.sample_point + rate.samples_per_bit * (1.0 - rate.sample_point);

        if !to_high {
            self.extend_next = true;
        }
    }

    /// Move the end of the current bit onto an observed dominant edge
    pub fn resync(&mut self, edge: usize) {
        self.bit_end = edge as f64;
    }

    /// True if a signal change at `position` violates the steady window
    pub fn in_steady_window(&self, position: f64) -> bool {
        position > self.steady_start && position < self.steady_end
    }

    /// Last sample (inclusive) a resynchronising edge may occur at
    pub fn resync_limit(&self) -> f64 {
        self.bit_end + RESYNC_WINDOW * self.samples_per_bit()
    }
}
