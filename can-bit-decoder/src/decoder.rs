//! Main decoder API
//!
//! [`CanDecoder`] walks a digital capture bit by bit. For every bit the
//! timing engine supplies the sample positions, the raw samples are checked
//! for edges inside the steady window, the value at the sample point goes
//! through the de-stuffer and, unless it was a stuff bit, into the handler of
//! the current frame phase:
//!
//! ```text
//! Header -> Data -> Crc -> Trailer -> Finished
//! ```
//!
//! Data is skipped for remote requests and frames with no data bytes.
//!
//! Errors never stop a frame. They are collected in the packet's
//! [`ErrorFlags`] and marked on the affected bits.

use crate::config::DecoderConfig;
use crate::crc::{CanCrc, CrcKind};
use crate::layout::{dlc_to_len, FrameLayout, HeaderBit, IDE_INDEX, SRR_INDEX};
use crate::stuffing::{Destuffer, StuffBit};
use crate::timing::BitTiming;
use crate::types::{BitMark, DecodeOutput, ErrorFlags, Packet, Result};
use std::sync::atomic::{AtomicBool, Ordering};

/// Recessive bits after which a frame that carries an error is closed early
pub const IDLE_BITS_AFTER_ERROR: u32 = 7;
/// DL1, ACK, DL2 and 7 EOF bits
const TRAILER_BITS: usize = 10;
/// Stuff count and parity bits at the start of the CAN-FD CRC field
const STUFF_COUNT_BITS: usize = 4;

/// Phase of the frame state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Header,
    Data,
    Crc,
    Trailer,
    Finished,
}

/// The decoder - entry point for all decoding operations
#[derive(Debug, Clone)]
pub struct CanDecoder {
    config: DecoderConfig,
}

impl CanDecoder {
    /// Create a decoder; fails if the configuration is unusable
    pub fn new(config: DecoderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Decode a whole capture
    ///
    /// # Example
    /// ```
    /// use can_bit_decoder::{CanDecoder, DecoderConfig};
    ///
    /// let decoder = CanDecoder::new(DecoderConfig::new()).unwrap();
    /// let output = decoder.decode(&[true; 1000]);
    /// assert!(output.packets.is_empty());
    /// ```
    pub fn decode(&self, samples: &[bool]) -> DecodeOutput {
        self.decode_with_abort(samples, &AtomicBool::new(false))
    }

    /// Decode a whole capture, giving up as soon as `abort` is set.
    ///
    /// The flag is polled at every frame start and every completed field.
    /// Frames not finished when it is seen are dropped.
    pub fn decode_with_abort(&self, samples: &[bool], abort: &AtomicBool) -> DecodeOutput {
        let mut run = DecodeRun::new(&self.config, samples, abort);
        run.run();

        log::info!(
            "Decoded {} CAN packets ({} with errors) from {} samples",
            run.output.packets.len(),
            run.output.error_packet_count(),
            samples.len()
        );
        run.output
    }
}

/// How decoding of one frame ended
enum FrameEnd {
    Complete(Packet),
    Exhausted,
    Aborted,
}

/// Field-level outcome of a bit, applied once the bit's end is known
struct FieldUpdate {
    text: String,
    error: bool,
    closes: bool,
}

impl FieldUpdate {
    fn new(text: String, closes: bool) -> Self {
        Self {
            text,
            error: false,
            closes,
        }
    }
}

/// Name and status of one decoded bit
struct BitLabel {
    name: String,
    error: bool,
    field: Option<FieldUpdate>,
    header: bool,
}

impl BitLabel {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: false,
            field: None,
            header: false,
        }
    }

    fn with_error(mut self, error: bool) -> Self {
        self.error = error;
        self
    }
}

/// State of the frame currently being decoded
struct Frame {
    phase: Phase,
    layout: FrameLayout,
    start_sample: usize,
    first_bit_mark: usize,
    first_field_mark: usize,

    header_bits: Vec<bool>,
    /// Index in the bit mark row of every header bit, for relabelling
    header_marks: Vec<usize>,
    /// Bits covered by the CRC, with a dynamic stuff bit marker
    history: Vec<(bool, bool)>,

    id: u32,
    dlc: u8,
    byte_count: usize,
    rtr: bool,
    brs: bool,
    esi: bool,
    ack: bool,

    data: Vec<u8>,
    current_byte: u8,
    byte_bits: u8,

    crc_kind: CrcKind,
    crc_index: usize,
    stuff_count: u8,
    parity: bool,
    crc_received: u32,
    crc_computed: u32,

    trailer_index: usize,
    errors: ErrorFlags,
    idle_run: u32,
    open_field: Option<usize>,
}

impl Frame {
    fn new(start_sample: usize, first_bit_mark: usize, first_field_mark: usize) -> Self {
        Self {
            phase: Phase::Header,
            layout: FrameLayout::Classic11,
            start_sample,
            first_bit_mark,
            first_field_mark,
            header_bits: Vec::with_capacity(FrameLayout::Fd29.len()),
            header_marks: Vec::with_capacity(FrameLayout::Fd29.len()),
            history: Vec::new(),
            id: 0,
            dlc: 0,
            byte_count: 0,
            rtr: false,
            brs: false,
            esi: false,
            ack: false,
            data: Vec::new(),
            current_byte: 0,
            byte_bits: 0,
            crc_kind: CrcKind::Crc15,
            crc_index: 0,
            stuff_count: 0,
            parity: false,
            crc_received: 0,
            crc_computed: 0,
            trailer_index: 0,
            errors: ErrorFlags::empty(),
            idle_run: 0,
            open_field: None,
        }
    }
}

/// One pass over a capture
struct DecodeRun<'a> {
    samples: &'a [bool],
    idle_level: bool,
    sof_sample_offset: f64,
    abort: &'a AtomicBool,
    timing: BitTiming,
    stuffing: Destuffer,
    output: DecodeOutput,
}

impl<'a> DecodeRun<'a> {
    fn new(config: &DecoderConfig, samples: &'a [bool], abort: &'a AtomicBool) -> Self {
        let nominal = config.nominal_rate();
        Self {
            samples,
            idle_level: config.idle_level,
            sof_sample_offset: nominal.samples_per_bit * nominal.sample_point,
            abort,
            timing: BitTiming::new(nominal, config.data_rate()),
            stuffing: Destuffer::new(),
            output: DecodeOutput::default(),
        }
    }

    /// Logical bit value of a sample (1 = recessive)
    fn logical(&self, index: usize) -> bool {
        self.samples[index] == self.idle_level
    }

    fn aborted(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
    }

    fn run(&mut self) {
        let mut position = 0;

        while let Some(sof) = self.find_sof(position) {
            if self.aborted() {
                self.output.aborted = true;
                break;
            }
            if !self.confirm_sof(sof) {
                log::trace!("Ignoring glitch at sample {}", sof);
                position = sof + 1;
                continue;
            }

            match self.decode_frame(sof) {
                FrameEnd::Complete(packet) => {
                    log::debug!(
                        "{} frame ID 0x{:X} DLC {} at samples {}..{}, errors: {}",
                        packet.layout,
                        packet.id,
                        packet.dlc,
                        packet.start_sample,
                        packet.end_sample,
                        packet.errors
                    );
                    position = packet.end_sample.max(sof + 1);
                    self.output.packets.push(packet);
                }
                FrameEnd::Exhausted => {
                    log::warn!("Capture ends inside the frame starting at sample {}", sof);
                    break;
                }
                FrameEnd::Aborted => {
                    log::debug!("Decoding aborted inside the frame starting at sample {}", sof);
                    self.output.aborted = true;
                    break;
                }
            }
        }
    }

    /// Next recessive-to-dominant transition at or after `from`
    fn find_sof(&self, from: usize) -> Option<usize> {
        (from.max(1)..self.samples.len()).find(|&i| self.logical(i - 1) && !self.logical(i))
    }

    /// An SOF must still be dominant at its sample point
    fn confirm_sof(&self, sof: usize) -> bool {
        let sample = (sof as f64 + self.sof_sample_offset).round() as usize;
        self.samples
            .get(sample)
            .map_or(true, |&level| level != self.idle_level)
    }

    fn decode_frame(&mut self, sof: usize) -> FrameEnd {
        let mut frame = Frame::new(
            sof,
            self.output.bit_marks.len(),
            self.output.field_marks.len(),
        );
        self.timing.reset();
        self.stuffing.start_dynamic();
        let mut bit_start = sof as f64;

        loop {
            self.timing.begin(bit_start);
            let sample = self.timing.sample_index();
            if sample >= self.samples.len()
                || self.timing.bit_end.round() as usize > self.samples.len()
            {
                self.discard(&frame);
                return FrameEnd::Exhausted;
            }

            let value = self.logical(sample);
            let in_crc_scope = matches!(frame.phase, Phase::Header | Phase::Data);

            let mut label = match self.stuffing.push(value) {
                StuffBit::Data => self.dispatch(&mut frame, value),
                StuffBit::Dynamic { valid } => {
                    if in_crc_scope {
                        frame.history.push((value, true));
                    }
                    if !valid {
                        log::trace!("Dynamic stuff bit violation at sample {}", sample);
                        frame.errors.insert(ErrorFlags::DYNAMIC_STUFFING);
                    }
                    BitLabel::new("Stuff").with_error(!valid)
                }
                StuffBit::Fixed { valid } => {
                    if !valid {
                        log::trace!("Fixed stuff bit violation at sample {}", sample);
                        frame.errors.insert(ErrorFlags::FIXED_STUFFING);
                    }
                    BitLabel::new("FSB").with_error(!valid)
                }
            };

            if self.scan_edges() {
                frame.errors.insert(ErrorFlags::TIMING);
                label.error = true;
            }

            let start = self.timing.bit_start.round() as usize;
            let end = self.timing.bit_end.round() as usize;
            if label.header {
                frame.header_marks.push(self.output.bit_marks.len());
            }
            self.output
                .bit_marks
                .push(BitMark::bit(start, end, label.name, value, label.error));

            if let Some(update) = label.field {
                let closes = update.closes;
                self.apply_field(&mut frame, update, start, end);
                if closes && self.aborted() {
                    self.discard(&frame);
                    return FrameEnd::Aborted;
                }
            }

            frame.idle_run = if value { frame.idle_run + 1 } else { 0 };
            bit_start = self.timing.bit_end;

            if frame.phase == Phase::Finished {
                return FrameEnd::Complete(self.finish(frame, end));
            }
            if frame.phase != Phase::Trailer
                && !frame.errors.is_empty()
                && frame.idle_run >= IDLE_BITS_AFTER_ERROR
            {
                log::debug!(
                    "Closing corrupted frame after {} idle bits at sample {}",
                    frame.idle_run,
                    end
                );
                return FrameEnd::Complete(self.finish(frame, end));
            }
        }
    }

    /// Look for edges over the current bit.
    ///
    /// Returns true if the signal changed inside the steady window. The first
    /// dominant edge after the sample point becomes the new bit end.
    fn scan_edges(&mut self) -> bool {
        let timing = &self.timing;
        let first = timing.bit_start.round() as usize + 1;
        let last = (timing.resync_limit().round() as usize).min(self.samples.len() - 1);

        let mut violation = false;
        let mut resync = None;
        for index in first..=last {
            let previous = self.logical(index - 1);
            let current = self.logical(index);
            if previous == current {
                continue;
            }
            let at = index as f64;
            if timing.in_steady_window(at) {
                violation = true;
            }
            if resync.is_none() && previous && !current && at > timing.sample_point {
                resync = Some(index);
            }
        }

        if let Some(edge) = resync {
            self.timing.resync(edge);
        }
        violation
    }

    fn dispatch(&mut self, frame: &mut Frame, value: bool) -> BitLabel {
        match frame.phase {
            Phase::Header => self.on_header(frame, value),
            Phase::Data => self.on_data(frame, value),
            Phase::Crc => self.on_crc(frame, value),
            Phase::Trailer => self.on_trailer(frame, value),
            Phase::Finished => BitLabel::new("?"),
        }
    }

    fn on_header(&mut self, frame: &mut Frame, value: bool) -> BitLabel {
        let index = frame.header_bits.len();
        frame.header_bits.push(value);
        frame.history.push((value, false));

        if let Some(layout) = frame.layout.refine(index, value) {
            log::trace!("Header bit {} selects {}", index, layout);
            frame.layout = layout;
            self.relabel_header(frame);
        }

        // SRR is only known to be SRR once IDE is seen
        if index == IDE_INDEX && value && !frame.header_bits[SRR_INDEX] {
            frame.errors.insert(ErrorFlags::BIT_STATUS);
            if let Some(&mark) = frame.header_marks.get(SRR_INDEX) {
                self.output.bit_marks[mark].error = true;
            }
        }

        let Some(kind) = frame.layout.bit(index) else {
            return BitLabel::new("?");
        };
        let closes = frame
            .layout
            .bit(index + 1)
            .map_or(true, |next| !kind.same_field(next));

        let mut label = BitLabel::new(kind.to_string());
        label.header = true;

        match kind {
            HeaderBit::Id(_) => {
                frame.id = frame.id << 1 | value as u32;
                let text = if index < SRR_INDEX {
                    format!("ID 0x{:03X}", frame.id)
                } else {
                    format!("ID 0x{:08X}", frame.id)
                };
                label.field = Some(FieldUpdate::new(text, closes));
            }
            HeaderBit::Dlc(_) => {
                frame.dlc = frame.dlc << 1 | value as u8;
                let text = if closes && frame.dlc > 8 && frame.layout.is_fd() {
                    format!("DLC {} ({} bytes)", frame.dlc, dlc_to_len(frame.dlc, true))
                } else {
                    format!("DLC {}", frame.dlc)
                };
                label.field = Some(FieldUpdate::new(text, closes));
            }
            HeaderBit::Brs if value => {
                frame.brs = true;
                self.timing.switch_rate(true);
                log::trace!(
                    "Switching to data bit rate at sample {:.1}",
                    self.timing.sample_point
                );
            }
            HeaderBit::Esi => frame.esi = value,
            _ => {}
        }

        if index + 1 == frame.layout.len() {
            self.finish_header(frame);
        }
        label
    }

    /// Rename the header bits decoded so far after the layout changed
    fn relabel_header(&mut self, frame: &Frame) {
        for (index, &mark) in frame.header_marks.iter().enumerate() {
            if let Some(kind) = frame.layout.bit(index) {
                self.output.bit_marks[mark].name = kind.to_string();
            }
        }
    }

    fn finish_header(&mut self, frame: &mut Frame) {
        frame.byte_count = dlc_to_len(frame.dlc, frame.layout.is_fd());
        frame.rtr = frame
            .layout
            .rtr_index()
            .map_or(false, |index| frame.header_bits[index]);

        if frame.byte_count == 0 || frame.rtr {
            self.enter_crc(frame);
        } else {
            frame.phase = Phase::Data;
        }
    }

    fn on_data(&mut self, frame: &mut Frame, value: bool) -> BitLabel {
        frame.history.push((value, false));
        frame.current_byte = frame.current_byte << 1 | value as u8;
        frame.byte_bits += 1;

        let mut label = BitLabel::new(format!("D{}.{}", frame.data.len(), 8 - frame.byte_bits));
        let closes = frame.byte_bits == 8;
        label.field = Some(FieldUpdate::new(
            format!("0x{:02X}", frame.current_byte),
            closes,
        ));

        if closes {
            frame.data.push(frame.current_byte);
            frame.current_byte = 0;
            frame.byte_bits = 0;
            if frame.data.len() >= frame.byte_count {
                self.enter_crc(frame);
            }
        }
        label
    }

    fn enter_crc(&mut self, frame: &mut Frame) {
        frame.phase = Phase::Crc;
        frame.crc_kind = CrcKind::select(frame.layout.is_fd(), frame.byte_count);
        // CAN-FD: dynamic stuffing ends with the data field
        if frame.layout.is_fd() {
            self.stuffing.start_fixed();
        }
    }

    fn on_crc(&mut self, frame: &mut Frame, value: bool) -> BitLabel {
        let index = frame.crc_index;
        frame.crc_index += 1;

        let fd = frame.layout.is_fd();
        if fd && index < STUFF_COUNT_BITS {
            return self.on_stuff_count(frame, index, value);
        }

        let offset = if fd { STUFF_COUNT_BITS } else { 0 };
        let bit = frame.crc_kind.width() as usize - 1 - (index - offset);
        frame.crc_received = frame.crc_received << 1 | value as u32;

        let closes = bit == 0;
        let mut update = FieldUpdate::new(format!("CRC 0x{:X}", frame.crc_received), closes);
        if closes {
            update.error = !self.finish_crc(frame);
        }

        let mut label = BitLabel::new(format!("CRC{}", bit));
        label.field = Some(update);
        label
    }

    fn on_stuff_count(&mut self, frame: &mut Frame, index: usize, value: bool) -> BitLabel {
        if index < STUFF_COUNT_BITS - 1 {
            frame.stuff_count = frame.stuff_count << 1 | value as u8;
            let mut label = BitLabel::new(format!("SC{}", STUFF_COUNT_BITS - 2 - index));
            label.field = Some(FieldUpdate::new(
                format!("STC {}", gray_decode(frame.stuff_count)),
                false,
            ));
            return label;
        }

        frame.parity = value;
        let count = gray_decode(frame.stuff_count);
        let expected = (self.stuffing.dynamic_count() % 8) as u8;
        let parity_ok = value == (frame.stuff_count.count_ones() % 2 == 1);
        let ok = count == expected && parity_ok;
        if !ok {
            log::trace!(
                "Stuff count {} (parity {}) but {} stuff bits seen",
                count,
                if parity_ok { "ok" } else { "wrong" },
                self.stuffing.dynamic_count()
            );
            frame.errors.insert(ErrorFlags::STUFF_COUNT);
        }

        let mut update = FieldUpdate::new(format!("STC {}", count), true);
        update.error = !ok;
        let mut label = BitLabel::new("PAR").with_error(!parity_ok);
        label.field = Some(update);
        label
    }

    /// Recompute the CRC over the frame and compare; returns true on a match
    fn finish_crc(&mut self, frame: &mut Frame) -> bool {
        let computed = if frame.layout.is_fd() {
            // CAN-FD covers the dynamic stuff bits and the stuff count field
            let stuff_count = (0..3)
                .rev()
                .map(|i| frame.stuff_count >> i & 1 == 1)
                .chain(std::iter::once(frame.parity));
            CanCrc::compute(
                frame.crc_kind,
                frame.history.iter().map(|(v, _)| *v).chain(stuff_count),
            )
        } else {
            CanCrc::compute(
                frame.crc_kind,
                frame
                    .history
                    .iter()
                    .filter(|(_, stuff)| !stuff)
                    .map(|(v, _)| *v),
            )
        };
        frame.crc_computed = computed;

        let ok = computed == frame.crc_received;
        if !ok {
            log::debug!(
                "CRC mismatch: received 0x{:X}, computed 0x{:X}",
                frame.crc_received,
                computed
            );
            frame.errors.insert(ErrorFlags::CRC);
        }

        if frame.layout.is_fd() {
            self.stuffing.stop();
        } else {
            // Classic CAN stuffs up to the end of the CRC sequence
            self.stuffing.stop_dynamic();
        }
        frame.phase = Phase::Trailer;
        ok
    }

    fn on_trailer(&mut self, frame: &mut Frame, value: bool) -> BitLabel {
        let index = frame.trailer_index;
        frame.trailer_index += 1;

        let name = match index {
            0 => "DL1".to_string(),
            1 => "ACK".to_string(),
            2 => "DL2".to_string(),
            n => format!("EOF{}", n - 2),
        };

        if index == 0 && frame.brs {
            self.timing.switch_rate(false);
            log::trace!(
                "Switching to nominal bit rate at sample {:.1}",
                self.timing.sample_point
            );
        }

        // Only ACK is expected dominant
        let expected = index != 1;
        if index == 1 {
            frame.ack = !value;
        }
        let error = value != expected;
        if error {
            frame.errors.insert(ErrorFlags::BIT_STATUS);
        }

        if index + 1 == TRAILER_BITS {
            frame.phase = Phase::Finished;
        }
        BitLabel::new(name).with_error(error)
    }

    fn apply_field(&mut self, frame: &mut Frame, update: FieldUpdate, start: usize, end: usize) {
        match frame.open_field {
            Some(index) => {
                let mark = &mut self.output.field_marks[index];
                mark.end = end;
                mark.name = update.text;
                mark.error |= update.error;
            }
            None => {
                let mut mark = BitMark::field(start, end, update.text);
                mark.error = update.error;
                frame.open_field = Some(self.output.field_marks.len());
                self.output.field_marks.push(mark);
            }
        }
        if update.closes {
            frame.open_field = None;
        }
    }

    /// Drop the annotations of a frame that will not be emitted
    fn discard(&mut self, frame: &Frame) {
        self.output.bit_marks.truncate(frame.first_bit_mark);
        self.output.field_marks.truncate(frame.first_field_mark);
    }

    fn finish(&self, frame: Frame, end_sample: usize) -> Packet {
        Packet {
            id: frame.id,
            layout: frame.layout,
            is_29bit: frame.layout.is_29bit(),
            is_fd: frame.layout.is_fd(),
            brs: frame.brs,
            esi: frame.esi,
            rtr: frame.rtr,
            ack: frame.ack,
            dlc: frame.dlc,
            data: frame.data,
            crc_received: frame.crc_received,
            crc_computed: frame.crc_computed,
            start_sample: frame.start_sample,
            end_sample,
            errors: frame.errors,
            bit_marks: frame.first_bit_mark..self.output.bit_marks.len(),
        }
    }
}

/// Decode a 3-bit Gray code
fn gray_decode(gray: u8) -> u8 {
    gray ^ (gray >> 1) ^ (gray >> 2)
}
