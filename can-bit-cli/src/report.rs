//! Report generation
//!
//! Text reports list every decoded packet followed by a summary line and a
//! verdict on the bus settings. JSON reports carry the packets as decoded.

use anyhow::Result;
use can_bit_decoder::{DecodeOutput, Packet};
use chrono::TimeDelta;
use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::path::Path;

/// What the error count says about the decode settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    NoErrors,
    /// A single corrupted frame is a bus event, not a settings problem
    SingleError,
    /// Errors on several frames usually mean wrong bit rates or sample points
    LikelyMisconfigured,
}

impl Verdict {
    pub fn from_output(output: &DecodeOutput) -> Self {
        match output.error_packet_count() {
            0 => Verdict::NoErrors,
            1 => Verdict::SingleError,
            _ => Verdict::LikelyMisconfigured,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::NoErrors => write!(f, "No errors detected"),
            Verdict::SingleError => write!(f, "One frame with errors"),
            Verdict::LikelyMisconfigured => write!(
                f,
                "Errors in several frames, check bit rate and sample point settings"
            ),
        }
    }
}

/// Decode result of one capture file
#[derive(Debug, Clone)]
pub struct CaptureReport {
    pub file: String,
    pub samples: usize,
    pub sample_period_ps: u64,
    pub verdict: Verdict,
    pub output: DecodeOutput,
}

impl CaptureReport {
    pub fn new(path: &Path, samples: usize, sample_period_ps: u64, output: DecodeOutput) -> Self {
        Self {
            file: path.display().to_string(),
            samples,
            sample_period_ps,
            verdict: Verdict::from_output(&output),
            output,
        }
    }

    pub fn summary(&self) -> String {
        format!("{} CAN bus packets detected", self.output.packets.len())
    }
}

/// JSON view of a capture: packets without the annotation rows
#[derive(Serialize)]
struct JsonCapture<'a> {
    file: &'a str,
    samples: usize,
    packet_count: usize,
    error_packets: usize,
    aborted: bool,
    verdict: Verdict,
    packets: &'a [Packet],
}

fn format_time(time: TimeDelta) -> String {
    let ns = time.num_nanoseconds().unwrap_or(i64::MAX);
    format!("{:.3} us", ns as f64 / 1000.0)
}

fn packet_kind(packet: &Packet) -> String {
    let mut kind = packet.layout.to_string();
    if packet.brs {
        kind.push_str(" BRS");
    }
    if packet.esi {
        kind.push_str(" ESI");
    }
    if packet.rtr {
        kind.push_str(" RTR");
    }
    kind
}

fn format_data(data: &[u8]) -> String {
    if data.is_empty() {
        return "-".to_string();
    }
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

fn write_packet(out: &mut impl Write, index: usize, packet: &Packet, period: u64) -> Result<()> {
    let id = if packet.is_29bit {
        format!("0x{:08X}", packet.id)
    } else {
        format!("0x{:03X}", packet.id)
    };
    writeln!(
        out,
        "{:>4}  {:>14}  {:<10}  {:<19}  DLC {:>2}  {}",
        index + 1,
        format_time(packet.start_time(period)),
        id,
        packet_kind(packet),
        packet.dlc,
        format_data(&packet.data)
    )?;

    let crc = if packet.crc_received == packet.crc_computed {
        format!("CRC 0x{:X}", packet.crc_received)
    } else {
        format!(
            "CRC 0x{:X} (computed 0x{:X})",
            packet.crc_received, packet.crc_computed
        )
    };
    let ack = if packet.ack { "ACK" } else { "no ACK" };
    writeln!(out, "{:>6}{}, {}, errors: {}", "", crc, ack, packet.errors)?;
    Ok(())
}

fn write_bits(out: &mut impl Write, output: &DecodeOutput, packet: &Packet) -> Result<()> {
    let marks: Vec<String> = output
        .marks_of(packet)
        .iter()
        .map(|mark| {
            let value = match mark.value {
                Some(true) => "1",
                Some(false) => "0",
                None => "",
            };
            let flag = if mark.error { "!" } else { "" };
            format!("{}={}{}", mark.name, value, flag)
        })
        .collect();

    for line in marks.chunks(12) {
        writeln!(out, "{:>6}{}", "", line.join(" "))?;
    }
    Ok(())
}

/// Write a plain text report for all captures
pub fn write_text(out: &mut impl Write, reports: &[CaptureReport], show_bits: bool) -> Result<()> {
    for report in reports {
        let period = report.sample_period_ps;
        let duration = TimeDelta::nanoseconds((report.samples as u64 * period / 1000) as i64);

        writeln!(out, "═══════════════════════════════════════════════")?;
        writeln!(out, "  {}", report.file)?;
        writeln!(
            out,
            "  {} samples, {}",
            report.samples,
            format_time(duration)
        )?;
        writeln!(out, "═══════════════════════════════════════════════")?;

        for (index, packet) in report.output.packets.iter().enumerate() {
            write_packet(out, index, packet, period)?;
            if show_bits {
                write_bits(out, &report.output, packet)?;
            }
        }

        writeln!(out)?;
        if report.output.aborted {
            writeln!(out, "Decoding was aborted")?;
        }
        writeln!(out, "{}", report.summary())?;
        writeln!(
            out,
            "{} with errors ({} error flags)",
            report.output.error_packet_count(),
            report.output.total_errors()
        )?;
        writeln!(out, "Verdict: {}", report.verdict)?;
        writeln!(out)?;
    }
    Ok(())
}

/// Write a JSON report for all captures
pub fn write_json(out: &mut impl Write, reports: &[CaptureReport]) -> Result<()> {
    let captures: Vec<JsonCapture> = reports
        .iter()
        .map(|r| JsonCapture {
            file: &r.file,
            samples: r.samples,
            packet_count: r.output.packets.len(),
            error_packets: r.output.error_packet_count(),
            aborted: r.output.aborted,
            verdict: r.verdict,
            packets: &r.output.packets,
        })
        .collect();

    serde_json::to_writer_pretty(&mut *out, &captures)?;
    writeln!(out)?;
    Ok(())
}
