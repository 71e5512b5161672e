//! Header bit layouts of the four CAN frame formats
//!
//! The header is decoded before its format is fully known: IDE (bit 13)
//! tells 11-bit from 29-bit addressing, and FDF (bit 14 or bit 33) tells
//! classic CAN from CAN-FD. All four layouts share the prefix up to the bit
//! that decides between them, so decoding can start with [`FrameLayout::Classic11`]
//! and switch once the deciding bit has been seen.

use serde::Serialize;
use std::fmt;

/// One named bit of a frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderBit {
    Sof,
    /// Identifier bit, numbered from the LSB
    Id(u8),
    Srr,
    Rtr,
    Rrs,
    Ide,
    Fdf,
    R0,
    R1,
    Res,
    Brs,
    Esi,
    /// Data length code bit, numbered from the LSB
    Dlc(u8),
}

impl HeaderBit {
    /// True if `other` belongs to the same multi-bit field
    pub fn same_field(self, other: HeaderBit) -> bool {
        matches!(
            (self, other),
            (HeaderBit::Id(_), HeaderBit::Id(_)) | (HeaderBit::Dlc(_), HeaderBit::Dlc(_))
        )
    }
}

impl fmt::Display for HeaderBit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderBit::Sof => write!(f, "SOF"),
            HeaderBit::Id(n) => write!(f, "ID{}", n),
            HeaderBit::Srr => write!(f, "SRR"),
            HeaderBit::Rtr => write!(f, "RTR"),
            HeaderBit::Rrs => write!(f, "RRS"),
            HeaderBit::Ide => write!(f, "IDE"),
            HeaderBit::Fdf => write!(f, "FDF"),
            HeaderBit::R0 => write!(f, "r0"),
            HeaderBit::R1 => write!(f, "r1"),
            HeaderBit::Res => write!(f, "res"),
            HeaderBit::Brs => write!(f, "BRS"),
            HeaderBit::Esi => write!(f, "ESI"),
            HeaderBit::Dlc(n) => write!(f, "DLC{}", n),
        }
    }
}

use HeaderBit::{Brs, Dlc, Esi, Fdf, Id, Ide, Res, Rrs, Rtr, Sof, Srr, R0, R1};

#[rustfmt::skip]
static CLASSIC_11: [HeaderBit; 19] = [
    Sof,
    Id(10), Id(9), Id(8), Id(7), Id(6), Id(5), Id(4), Id(3), Id(2), Id(1), Id(0),
    Rtr, Ide, R0,
    Dlc(3), Dlc(2), Dlc(1), Dlc(0),
];

#[rustfmt::skip]
static CLASSIC_29: [HeaderBit; 39] = [
    Sof,
    Id(28), Id(27), Id(26), Id(25), Id(24), Id(23), Id(22), Id(21), Id(20), Id(19), Id(18),
    Srr, Ide,
    Id(17), Id(16), Id(15), Id(14), Id(13), Id(12), Id(11), Id(10), Id(9),
    Id(8), Id(7), Id(6), Id(5), Id(4), Id(3), Id(2), Id(1), Id(0),
    Rtr, R1, R0,
    Dlc(3), Dlc(2), Dlc(1), Dlc(0),
];

#[rustfmt::skip]
static FD_11: [HeaderBit; 22] = [
    Sof,
    Id(10), Id(9), Id(8), Id(7), Id(6), Id(5), Id(4), Id(3), Id(2), Id(1), Id(0),
    Rrs, Ide, Fdf, Res, Brs, Esi,
    Dlc(3), Dlc(2), Dlc(1), Dlc(0),
];

#[rustfmt::skip]
static FD_29: [HeaderBit; 41] = [
    Sof,
    Id(28), Id(27), Id(26), Id(25), Id(24), Id(23), Id(22), Id(21), Id(20), Id(19), Id(18),
    Srr, Ide,
    Id(17), Id(16), Id(15), Id(14), Id(13), Id(12), Id(11), Id(10), Id(9),
    Id(8), Id(7), Id(6), Id(5), Id(4), Id(3), Id(2), Id(1), Id(0),
    Rrs, Fdf, Res, Brs, Esi,
    Dlc(3), Dlc(2), Dlc(1), Dlc(0),
];

/// Header index of the SRR / RTR / RRS bit in the 11-bit prefix
pub const SRR_INDEX: usize = 12;
/// Header index of the IDE bit
pub const IDE_INDEX: usize = 13;
/// Header index of FDF in 11-bit frames
pub const FDF_INDEX_11: usize = 14;
/// Header index of FDF in 29-bit frames
pub const FDF_INDEX_29: usize = 33;
/// Header index of RTR in classic 29-bit frames
pub const RTR_INDEX_29: usize = 32;

/// The four header formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FrameLayout {
    Classic11,
    Classic29,
    Fd11,
    Fd29,
}

impl FrameLayout {
    pub fn bits(self) -> &'static [HeaderBit] {
        match self {
            FrameLayout::Classic11 => &CLASSIC_11,
            FrameLayout::Classic29 => &CLASSIC_29,
            FrameLayout::Fd11 => &FD_11,
            FrameLayout::Fd29 => &FD_29,
        }
    }

    pub fn len(self) -> usize {
        self.bits().len()
    }

    pub fn bit(self, index: usize) -> Option<HeaderBit> {
        self.bits().get(index).copied()
    }

    pub fn is_fd(self) -> bool {
        matches!(self, FrameLayout::Fd11 | FrameLayout::Fd29)
    }

    pub fn is_29bit(self) -> bool {
        matches!(self, FrameLayout::Classic29 | FrameLayout::Fd29)
    }

    /// Layout to continue with after header bit `index` read `value`, if the
    /// bit decides between formats
    pub fn refine(self, index: usize, value: bool) -> Option<FrameLayout> {
        match (self, index, value) {
            (FrameLayout::Classic11, IDE_INDEX, true) => Some(FrameLayout::Classic29),
            (FrameLayout::Classic11, FDF_INDEX_11, true) => Some(FrameLayout::Fd11),
            (FrameLayout::Classic29, FDF_INDEX_29, true) => Some(FrameLayout::Fd29),
            _ => None,
        }
    }

    /// Header index of the RTR bit, if the format has one
    pub fn rtr_index(self) -> Option<usize> {
        match self {
            FrameLayout::Classic11 => Some(SRR_INDEX),
            FrameLayout::Classic29 => Some(RTR_INDEX_29),
            FrameLayout::Fd11 | FrameLayout::Fd29 => None,
        }
    }
}

impl fmt::Display for FrameLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameLayout::Classic11 => write!(f, "CAN 11-bit"),
            FrameLayout::Classic29 => write!(f, "CAN 29-bit"),
            FrameLayout::Fd11 => write!(f, "CAN-FD 11-bit"),
            FrameLayout::Fd29 => write!(f, "CAN-FD 29-bit"),
        }
    }
}

/// CAN-FD byte counts of DLC codes 9 to 15
const FD_LENGTHS: [usize; 7] = [12, 16, 20, 24, 32, 48, 64];

/// Expand a data length code into a byte count
pub fn dlc_to_len(dlc: u8, is_fd: bool) -> usize {
    match dlc {
        0..=8 => dlc as usize,
        9..=15 if is_fd => FD_LENGTHS[(dlc - 9) as usize],
        _ => 8,
    }
}

/// Smallest data length code able to carry `len` bytes
pub fn len_to_dlc(len: usize) -> u8 {
    if len <= 8 {
        return len as u8;
    }
    FD_LENGTHS
        .iter()
        .position(|&l| l >= len)
        .map(|i| i as u8 + 9)
        .unwrap_or(15)
}
