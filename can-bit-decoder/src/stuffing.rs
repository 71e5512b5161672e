//! Bit de-stuffing and stuff bit validation
//!
//! Two schemes share one tracker but are never active at the same time:
//! - Dynamic stuffing: after 5 identical bits the transmitter inserts one bit
//!   of opposite value. Used from SOF to the end of the data field (CAN-FD)
//!   or the end of the CRC sequence (classic CAN).
//! - Fixed stuffing (CAN-FD CRC field only): a stuff bit precedes every group
//!   of 4 bits and must be the inverse of the bit before it.

/// Number of identical bits after which a dynamic stuff bit follows
pub const STUFF_RUN: u8 = 5;
/// Field bits between two CAN-FD fixed stuff bits
pub const FIXED_STUFF_INTERVAL: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StuffMode {
    Off,
    Dynamic,
    /// Dynamic stuffing has ended but one pending stuff bit is still due
    Draining,
    Fixed,
}

/// What a received bit turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StuffBit {
    /// A regular field bit
    Data,
    /// A dynamic stuff bit; `valid` is false if it repeated the run
    Dynamic { valid: bool },
    /// A fixed stuff bit; `valid` is false if it did not invert its predecessor
    Fixed { valid: bool },
}

impl StuffBit {
    pub fn is_stuff(self) -> bool {
        !matches!(self, StuffBit::Data)
    }
}

/// Tracks runs of identical bits to classify stuff bits
#[derive(Debug, Clone)]
pub struct Destuffer {
    mode: StuffMode,
    last: bool,
    run: u8,
    fixed_remaining: u8,
    dynamic_count: u32,
}

impl Default for Destuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Destuffer {
    pub fn new() -> Self {
        Self {
            mode: StuffMode::Off,
            last: true,
            run: 0,
            fixed_remaining: 0,
            dynamic_count: 0,
        }
    }

    /// Start dynamic stuffing at SOF; clears the stuff bit counter
    pub fn start_dynamic(&mut self) {
        self.mode = StuffMode::Dynamic;
        self.run = 0;
        self.dynamic_count = 0;
    }

    /// End dynamic stuffing. A stuff bit already due after the last field bit
    /// is still consumed.
    pub fn stop_dynamic(&mut self) {
        if self.mode == StuffMode::Dynamic && self.run == STUFF_RUN {
            self.mode = StuffMode::Draining;
        } else if self.mode == StuffMode::Dynamic {
            self.mode = StuffMode::Off;
        }
    }

    /// Switch to fixed stuffing; the next bit is a fixed stuff bit
    pub fn start_fixed(&mut self) {
        self.mode = StuffMode::Fixed;
        self.fixed_remaining = 0;
    }

    pub fn stop(&mut self) {
        self.mode = StuffMode::Off;
    }

    /// Dynamic stuff bits seen since the last `start_dynamic`
    pub fn dynamic_count(&self) -> u32 {
        self.dynamic_count
    }

    /// Classify the next received bit
    pub fn push(&mut self, bit: bool) -> StuffBit {
        match self.mode {
            StuffMode::Off => {
                self.last = bit;
                StuffBit::Data
            }
            StuffMode::Dynamic | StuffMode::Draining => {
                if self.run == STUFF_RUN {
                    let valid = bit != self.last;
                    self.dynamic_count += 1;
                    // The stuff bit starts the next run
                    self.last = bit;
                    self.run = 1;
                    if self.mode == StuffMode::Draining {
                        self.mode = StuffMode::Off;
                    }
                    return StuffBit::Dynamic { valid };
                }
                if self.run > 0 && bit == self.last {
                    self.run += 1;
                } else {
                    self.last = bit;
                    self.run = 1;
                }
                StuffBit::Data
            }
            StuffMode::Fixed => {
                if self.fixed_remaining == 0 {
                    let valid = bit != self.last;
                    self.last = bit;
                    self.fixed_remaining = FIXED_STUFF_INTERVAL;
                    return StuffBit::Fixed { valid };
                }
                self.fixed_remaining -= 1;
                self.last = bit;
                StuffBit::Data
            }
        }
    }
}

/// Insert dynamic stuff bits into `bits`.
///
/// With `trailing` set, a stuff bit due right after the last bit is emitted
/// too (classic CAN CRC sequence); CAN-FD leaves it to the first fixed stuff
/// bit. Returns the stuffed bits paired with a stuff-bit marker.
pub fn stuff_dynamic(bits: &[bool], trailing: bool) -> Vec<(bool, bool)> {
    let mut out = Vec::with_capacity(bits.len() + bits.len() / 4 + 1);
    let mut last = true;
    let mut run = 0u8;

    for &bit in bits {
        if run == STUFF_RUN {
            out.push((!last, true));
            last = !last;
            run = 1;
        }
        if run > 0 && bit == last {
            run += 1;
        } else {
            last = bit;
            run = 1;
        }
        out.push((bit, false));
    }

    if trailing && run == STUFF_RUN {
        out.push((!last, true));
    }
    out
}
