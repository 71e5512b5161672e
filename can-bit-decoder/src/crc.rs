//! CAN CRC engine
//!
//! Bit-serial shift register as described in ISO 11898-1. The width and
//! polynomial depend on the frame variant: CRC-15 for classic CAN, CRC-17 for
//! CAN-FD frames with up to 16 data bytes and CRC-21 above that.

use serde::Serialize;

/// The three CRC variants used on a CAN bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CrcKind {
    Crc15,
    Crc17,
    Crc21,
}

impl CrcKind {
    /// Pick the CRC for a frame variant and its data byte count
    pub fn select(is_fd: bool, byte_count: usize) -> Self {
        match (is_fd, byte_count) {
            (false, _) => CrcKind::Crc15,
            (true, 0..=16) => CrcKind::Crc17,
            (true, _) => CrcKind::Crc21,
        }
    }

    pub fn width(self) -> u32 {
        match self {
            CrcKind::Crc15 => 15,
            CrcKind::Crc17 => 17,
            CrcKind::Crc21 => 21,
        }
    }

    pub fn polynomial(self) -> u32 {
        match self {
            CrcKind::Crc15 => 0x4599,
            CrcKind::Crc17 => 0x1685B,
            CrcKind::Crc21 => 0x102899,
        }
    }

    fn high_bit(self) -> u32 {
        1 << (self.width() - 1)
    }

    fn seed(self) -> u32 {
        match self {
            CrcKind::Crc15 => 0,
            // CAN-FD registers start with the top bit set
            CrcKind::Crc17 | CrcKind::Crc21 => self.high_bit(),
        }
    }
}

/// Shift-register CRC fed one bit at a time
#[derive(Debug, Clone)]
pub struct CanCrc {
    register: u32,
    polynomial: u32,
    width_mask: u32,
    high_bit: u32,
}

impl CanCrc {
    pub fn new(kind: CrcKind) -> Self {
        Self {
            register: kind.seed(),
            polynomial: kind.polynomial(),
            width_mask: (1 << kind.width()) - 1,
            high_bit: kind.high_bit(),
        }
    }

    pub fn push(&mut self, bit: bool) {
        let highest = self.register & self.high_bit != 0;
        self.register = (self.register << 1) & self.width_mask;
        if highest ^ bit {
            self.register ^= self.polynomial;
        }
    }

    pub fn value(&self) -> u32 {
        self.register & self.width_mask
    }

    /// CRC over a whole bit sequence
    pub fn compute(kind: CrcKind, bits: impl IntoIterator<Item = bool>) -> u32 {
        let mut crc = Self::new(kind);
        for bit in bits {
            crc.push(bit);
        }
        crc.value()
    }
}
