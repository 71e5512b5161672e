//! Core types for the CAN bit decoder library
//!
//! This module defines everything the decoder emits: decoded packets, the two
//! rows of bit-level annotations and the per-frame error bitset. The decoder
//! itself never renders anything; these types are handed to whatever
//! presentation layer the caller has.

use crate::layout::FrameLayout;
use bitflags::bitflags;
use chrono::TimeDelta;
use serde::{Serialize, Serializer};
use std::fmt;
use std::ops::Range;

/// Result type for decoder operations
pub type Result<T> = std::result::Result<T, DecoderError>;

/// Errors that can occur while setting up a decode
///
/// Bus-level anomalies are not errors in this sense: they are recorded as
/// [`ErrorFlags`] on the affected [`Packet`].
#[derive(Debug, thiserror::Error)]
pub enum DecoderError {
    #[error("Invalid decoder configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid capture data: {0}")]
    InvalidCapture(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

bitflags! {
    /// Frame-scoped error bitset
    ///
    /// Flags are independent and only ever added while a frame is decoded.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ErrorFlags: u8 {
        /// Signal changed inside the steady window of a bit
        const TIMING = 1 << 0;
        /// Computed CRC differs from the transmitted one
        const CRC = 1 << 1;
        /// A fixed-value bit (SRR, DL1, ACK, DL2, EOF) had the wrong value
        const BIT_STATUS = 1 << 2;
        /// Dynamic 5-bit stuffing rule violated
        const DYNAMIC_STUFFING = 1 << 3;
        /// CAN-FD fixed stuff bit violated
        const FIXED_STUFFING = 1 << 4;
        /// CAN-FD stuff count or its parity did not match
        const STUFF_COUNT = 1 << 5;
    }
}

impl ErrorFlags {
    /// Number of distinct flags set
    pub fn count(self) -> u32 {
        self.bits().count_ones()
    }
}

impl Default for ErrorFlags {
    fn default() -> Self {
        Self::empty()
    }
}

// Serialized as the raw bit value
impl Serialize for ErrorFlags {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.bits())
    }
}

impl fmt::Display for ErrorFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "None");
        }
        let names: Vec<&str> = self.iter_names().map(|(name, _)| name).collect();
        write!(f, "{}", names.join(" | "))
    }
}

/// A single annotation aligned to sample positions
///
/// Row 1 holds one mark per bit (with `value` set), row 2 holds one mark per
/// multi-bit field such as the ID, DLC, a data byte or the CRC (`value` is
/// `None` there).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BitMark {
    /// First sample of the bit or field
    pub start: usize,
    /// Sample just past the bit or field
    pub end: usize,
    /// Bit name ("SOF", "ID10", "Stuff") or field text ("ID 0x123")
    pub name: String,
    /// Logical bit value at the sample point (1 = recessive)
    pub value: Option<bool>,
    /// True if this bit or field carries an error
    pub error: bool,
}

impl BitMark {
    pub fn bit(start: usize, end: usize, name: impl Into<String>, value: bool, error: bool) -> Self {
        Self {
            start,
            end,
            name: name.into(),
            value: Some(value),
            error,
        }
    }

    pub fn field(start: usize, end: usize, name: impl Into<String>) -> Self {
        Self {
            start,
            end,
            name: name.into(),
            value: None,
            error: false,
        }
    }
}

/// A decoded CAN or CAN-FD frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Packet {
    /// CAN identifier (11-bit or 29-bit)
    pub id: u32,
    /// Header layout the frame was decoded with
    pub layout: FrameLayout,
    /// True if this frame uses 29-bit addressing
    pub is_29bit: bool,
    /// True if this is a CAN-FD frame
    pub is_fd: bool,
    /// True if the data phase ran at the FD data bit rate
    pub brs: bool,
    /// Error state indicator (CAN-FD only)
    pub esi: bool,
    /// True if this is a remote request
    pub rtr: bool,
    /// True if some node acknowledged the frame
    pub ack: bool,
    /// Raw data length code (0-15)
    pub dlc: u8,
    /// Data bytes (0-8 for classic CAN, up to 64 for CAN-FD)
    pub data: Vec<u8>,
    /// CRC value as transmitted on the bus
    pub crc_received: u32,
    /// CRC value recomputed from the received bits
    pub crc_computed: u32,
    /// Sample index of the SOF edge
    pub start_sample: usize,
    /// Sample index just past the last decoded bit
    pub end_sample: usize,
    /// Everything that went wrong while decoding this frame
    pub errors: ErrorFlags,
    /// Range of this frame's marks in [`DecodeOutput::bit_marks`]
    pub bit_marks: Range<usize>,
}

impl Packet {
    /// Capture time of the SOF edge
    pub fn start_time(&self, sample_period_ps: u64) -> TimeDelta {
        sample_time(self.start_sample, sample_period_ps)
    }

    /// Capture time of the end of the frame
    pub fn end_time(&self, sample_period_ps: u64) -> TimeDelta {
        sample_time(self.end_sample, sample_period_ps)
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

fn sample_time(sample: usize, sample_period_ps: u64) -> TimeDelta {
    let ps = sample as u128 * sample_period_ps as u128;
    TimeDelta::nanoseconds((ps / 1000).min(i64::MAX as u128) as i64)
}

/// Everything produced by one decode pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DecodeOutput {
    /// Decoded frames in bus order
    pub packets: Vec<Packet>,
    /// One mark per bit (row 1)
    pub bit_marks: Vec<BitMark>,
    /// One mark per multi-bit field (row 2)
    pub field_marks: Vec<BitMark>,
    /// True if the caller's abort flag stopped the decode early
    pub aborted: bool,
}

impl DecodeOutput {
    /// Number of packets with at least one error flag
    pub fn error_packet_count(&self) -> usize {
        self.packets.iter().filter(|p| p.has_errors()).count()
    }

    /// Number of error flags set over all packets
    pub fn total_errors(&self) -> u32 {
        self.packets.iter().map(|p| p.errors.count()).sum()
    }

    /// Bit marks belonging to one packet
    pub fn marks_of(&self, packet: &Packet) -> &[BitMark] {
        self.bit_marks.get(packet.bit_marks.clone()).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_flags_accumulate() {
        let mut flags = ErrorFlags::empty();
        assert!(flags.is_empty());

        flags.insert(ErrorFlags::CRC);
        flags |= ErrorFlags::TIMING;
        assert!(flags.contains(ErrorFlags::CRC));
        assert!(flags.contains(ErrorFlags::TIMING));
        assert!(!flags.contains(ErrorFlags::BIT_STATUS));
        assert_eq!(flags.count(), 2);

        // Inserting again never clears anything
        flags.insert(ErrorFlags::CRC);
        assert_eq!(flags.bits(), 0b11);
    }

    #[test]
    fn test_error_flags_display() {
        assert_eq!(format!("{}", ErrorFlags::empty()), "None");
        let flags = ErrorFlags::CRC | ErrorFlags::STUFF_COUNT;
        assert_eq!(format!("{}", flags), "CRC | STUFF_COUNT");
    }

    #[test]
    fn test_error_flags_serialize_as_bits() {
        let flags = ErrorFlags::TIMING | ErrorFlags::CRC;
        assert_eq!(serde_json::to_value(flags).unwrap(), 3);
        assert_eq!(serde_json::to_value(ErrorFlags::default()).unwrap(), 0);
    }

    #[test]
    fn test_sample_time_conversion() {
        // 20 MHz capture: 50 000 ps per sample
        assert_eq!(sample_time(2000, 50_000), TimeDelta::microseconds(100));
        assert_eq!(sample_time(0, 50_000), TimeDelta::zero());
    }
}
