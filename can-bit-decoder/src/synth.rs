//! Synthetic CAN waveform generator
//!
//! A transmitter model producing bit-exact frames (stuffing, stuff count,
//! fixed stuff bits, CRC, bit-rate switching) and rendering them into a
//! sample buffer. Used to self-test the decoder against captures with a
//! known content.
//!
//! ```
//! use can_bit_decoder::synth::{FrameSpec, SignalBuilder};
//! use can_bit_decoder::{CanDecoder, DecoderConfig};
//!
//! let config = DecoderConfig::new();
//! let samples = SignalBuilder::new(&config)
//!     .idle(12)
//!     .frame(&FrameSpec::classic(0x123, &[0xAA, 0xBB]))
//!     .idle(12)
//!     .finish();
//!
//! let output = CanDecoder::new(config).unwrap().decode(&samples);
//! assert_eq!(output.packets[0].id, 0x123);
//! ```

use crate::config::DecoderConfig;
use crate::crc::{CanCrc, CrcKind};
use crate::layout::{dlc_to_len, len_to_dlc, FrameLayout, HeaderBit};
use crate::stuffing::{stuff_dynamic, FIXED_STUFF_INTERVAL};
use crate::timing::BitRate;

/// Role of a transmitted bit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxBitKind {
    Field,
    DynamicStuff,
    FixedStuff,
}

/// Bit rate a transmitted bit runs at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxSpeed {
    Nominal,
    /// BRS: nominal up to the sample point, data rate afterwards
    SwitchUp,
    Data,
    /// CRC delimiter: data rate up to the sample point, nominal afterwards
    SwitchDown,
}

/// One bit on the wire (logical value, 1 = recessive)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxBit {
    pub value: bool,
    pub kind: TxBitKind,
    pub speed: TxSpeed,
}

/// Content of a frame to transmit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSpec {
    pub id: u32,
    pub extended: bool,
    pub fd: bool,
    pub brs: bool,
    pub esi: bool,
    pub remote: bool,
    pub data: Vec<u8>,
    /// Transmit this DLC instead of the one matching `data`
    pub dlc: Option<u8>,
    /// Transmit this CRC instead of the correct one
    pub crc: Option<u32>,
    /// Whether a receiver drives the ACK slot dominant
    pub ack: bool,
}

impl FrameSpec {
    /// Classic CAN data frame with an 11-bit ID
    pub fn classic(id: u32, data: &[u8]) -> Self {
        Self {
            id,
            extended: false,
            fd: false,
            brs: false,
            esi: false,
            remote: false,
            data: data.to_vec(),
            dlc: None,
            crc: None,
            ack: true,
        }
    }

    /// CAN-FD data frame; the payload is zero-padded to the next valid length
    pub fn fd(id: u32, data: &[u8]) -> Self {
        let mut data = data.to_vec();
        data.resize(dlc_to_len(len_to_dlc(data.len()), true), 0);
        Self {
            fd: true,
            data,
            ..Self::classic(id, &[])
        }
    }

    /// Classic CAN remote request
    pub fn remote(id: u32, dlc: u8) -> Self {
        Self {
            remote: true,
            dlc: Some(dlc),
            ..Self::classic(id, &[])
        }
    }

    pub fn extended(mut self) -> Self {
        self.extended = true;
        self
    }

    pub fn with_brs(mut self) -> Self {
        self.brs = true;
        self
    }

    pub fn with_esi(mut self) -> Self {
        self.esi = true;
        self
    }

    pub fn with_dlc(mut self, dlc: u8) -> Self {
        self.dlc = Some(dlc);
        self
    }

    pub fn with_crc(mut self, crc: u32) -> Self {
        self.crc = Some(crc);
        self
    }

    pub fn without_ack(mut self) -> Self {
        self.ack = false;
        self
    }

    pub fn layout(&self) -> FrameLayout {
        match (self.extended, self.fd) {
            (false, false) => FrameLayout::Classic11,
            (true, false) => FrameLayout::Classic29,
            (false, true) => FrameLayout::Fd11,
            (true, true) => FrameLayout::Fd29,
        }
    }

    pub fn dlc_code(&self) -> u8 {
        self.dlc.unwrap_or_else(|| len_to_dlc(self.data.len()))
    }

    /// Data bytes actually transmitted
    pub fn payload(&self) -> Vec<u8> {
        if self.remote && !self.fd {
            return Vec::new();
        }
        let mut payload = self.data.clone();
        payload.resize(dlc_to_len(self.dlc_code(), self.fd), 0);
        payload
    }

    fn header_bits(&self) -> Vec<bool> {
        let dlc = self.dlc_code();
        self.layout()
            .bits()
            .iter()
            .map(|bit| match *bit {
                HeaderBit::Sof => false,
                HeaderBit::Id(n) => self.id >> n & 1 == 1,
                HeaderBit::Srr => true,
                HeaderBit::Rtr => self.remote,
                HeaderBit::Ide => self.extended,
                HeaderBit::Fdf => true,
                HeaderBit::Rrs | HeaderBit::R0 | HeaderBit::R1 | HeaderBit::Res => false,
                HeaderBit::Brs => self.brs,
                HeaderBit::Esi => self.esi,
                HeaderBit::Dlc(n) => dlc >> n & 1 == 1,
            })
            .collect()
    }

    /// Header and data bits before stuffing
    fn unstuffed_bits(&self) -> Vec<bool> {
        let mut bits = self.header_bits();
        for byte in self.payload() {
            bits.extend(msb_first(byte as u32, 8));
        }
        bits
    }

    fn crc_kind(&self) -> CrcKind {
        CrcKind::select(self.fd, self.payload().len())
    }

    /// The correct CRC for this frame, ignoring any override
    pub fn crc_value(&self) -> u32 {
        let unstuffed = self.unstuffed_bits();
        if self.fd {
            let stuffed = stuff_dynamic(&unstuffed, false);
            let stuff_count = stuff_count_bits(&stuffed);
            CanCrc::compute(
                self.crc_kind(),
                stuffed.iter().map(|(v, _)| *v).chain(stuff_count),
            )
        } else {
            CanCrc::compute(CrcKind::Crc15, unstuffed)
        }
    }

    /// All bits from SOF to the last EOF bit
    pub fn encode(&self) -> Vec<TxBit> {
        let crc = self.crc.unwrap_or_else(|| self.crc_value());
        let kind = self.crc_kind();
        let unstuffed = self.unstuffed_bits();

        let mut stream: Vec<(bool, TxBitKind)> = Vec::new();
        if self.fd {
            let stuffed = stuff_dynamic(&unstuffed, false);
            let mut field: Vec<bool> = stuff_count_bits(&stuffed).collect();
            field.extend(msb_first(crc, kind.width()));

            stream.extend(stuffed.iter().map(|&(v, s)| (v, stuff_kind(s))));
            let mut last = stuffed.last().map(|(v, _)| *v).unwrap_or(true);
            for (i, &bit) in field.iter().enumerate() {
                if i % FIXED_STUFF_INTERVAL as usize == 0 {
                    stream.push((!last, TxBitKind::FixedStuff));
                }
                stream.push((bit, TxBitKind::Field));
                last = bit;
            }
        } else {
            let mut bits = unstuffed;
            bits.extend(msb_first(crc, kind.width()));
            let stuffed = stuff_dynamic(&bits, true);
            stream.extend(stuffed.iter().map(|&(v, s)| (v, stuff_kind(s))));
        }

        // BRS is the n-th field bit of the header
        let brs_field_index = self
            .layout()
            .bits()
            .iter()
            .position(|b| *b == HeaderBit::Brs)
            .filter(|_| self.fd && self.brs);

        let mut bits = Vec::with_capacity(stream.len() + 10);
        let mut field_index = 0;
        let mut switched = false;
        for (value, kind) in stream {
            let speed = if switched {
                TxSpeed::Data
            } else if kind == TxBitKind::Field && Some(field_index) == brs_field_index {
                switched = true;
                TxSpeed::SwitchUp
            } else {
                TxSpeed::Nominal
            };
            if kind == TxBitKind::Field {
                field_index += 1;
            }
            bits.push(TxBit { value, kind, speed });
        }

        let dl1_speed = if switched {
            TxSpeed::SwitchDown
        } else {
            TxSpeed::Nominal
        };
        bits.push(TxBit::field(true, dl1_speed));
        bits.push(TxBit::field(!self.ack, TxSpeed::Nominal));
        for _ in 0..8 {
            bits.push(TxBit::field(true, TxSpeed::Nominal));
        }
        bits
    }
}

impl TxBit {
    fn field(value: bool, speed: TxSpeed) -> Self {
        Self {
            value,
            kind: TxBitKind::Field,
            speed,
        }
    }
}

fn stuff_kind(is_stuff: bool) -> TxBitKind {
    if is_stuff {
        TxBitKind::DynamicStuff
    } else {
        TxBitKind::Field
    }
}

/// Gray-coded stuff count (mod 8) followed by its even parity bit
fn stuff_count_bits(stuffed: &[(bool, bool)]) -> impl Iterator<Item = bool> {
    let count = (stuffed.iter().filter(|(_, s)| *s).count() % 8) as u32;
    let gray = count ^ (count >> 1);
    let parity = gray.count_ones() % 2 == 1;
    msb_first(gray, 3).chain(std::iter::once(parity))
}

/// Bits of `value`, most significant of `width` first
pub fn msb_first(value: u32, width: u32) -> impl Iterator<Item = bool> {
    (0..width).rev().map(move |i| value >> i & 1 == 1)
}

/// Renders transmitted bits into raw samples
#[derive(Debug, Clone)]
pub struct SignalBuilder {
    nominal: BitRate,
    data: BitRate,
    idle_level: bool,
    samples: Vec<bool>,
    cursor: f64,
}

impl SignalBuilder {
    pub fn new(config: &DecoderConfig) -> Self {
        Self {
            nominal: config.nominal_rate(),
            data: config.data_rate(),
            idle_level: config.idle_level,
            samples: Vec::new(),
            cursor: 0.0,
        }
    }

    /// Recessive bus for `bits` nominal bit times
    pub fn idle(mut self, bits: usize) -> Self {
        for _ in 0..bits {
            self.level(true, self.nominal.samples_per_bit);
        }
        self
    }

    pub fn frame(self, spec: &FrameSpec) -> Self {
        self.bits(&spec.encode())
    }

    pub fn bits(mut self, bits: &[TxBit]) -> Self {
        for bit in bits {
            let duration = self.duration(bit.speed);
            self.level(bit.value, duration);
        }
        self
    }

    /// Number of samples rendered so far
    pub fn position(&self) -> usize {
        self.samples.len()
    }

    pub fn finish(self) -> Vec<bool> {
        self.samples
    }

    fn duration(&self, speed: TxSpeed) -> f64 {
        let (n, d) = (self.nominal, self.data);
        match speed {
            TxSpeed::Nominal => n.samples_per_bit,
            TxSpeed::Data => d.samples_per_bit,
            TxSpeed::SwitchUp => {
                n.samples_per_bit * n.sample_point + d.samples_per_bit * (1.0 - d.sample_point)
            }
            TxSpeed::SwitchDown => {
                d.samples_per_bit * d.sample_point + n.samples_per_bit * (1.0 - n.sample_point)
            }
        }
    }

    fn level(&mut self, logical: bool, duration: f64) {
        let raw = if logical {
            self.idle_level
        } else {
            !self.idle_level
        };
        self.cursor += duration;
        let end = self.cursor.round() as usize;
        while self.samples.len() < end {
            self.samples.push(raw);
        }
    }
}
