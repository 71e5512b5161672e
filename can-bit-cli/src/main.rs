//! CAN Bit Decoder CLI Application
//!
//! Command-line front end for the can-bit-decoder library. It adds:
//! - Capture file loading (text and packed binary)
//! - Bus settings from a TOML file and/or command line flags
//! - Parallel decoding of several captures
//! - Text and JSON reports with a verdict on the settings

use anyhow::{bail, Context, Result};
use can_bit_decoder::CanDecoder;
use clap::Parser;
use rayon::prelude::*;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

mod capture;
mod config;
mod report;

use config::{AppConfig, IdleLevel, OutputFormat};
use report::CaptureReport;

/// CAN Bit Decoder - Decode CAN / CAN-FD frames from sampled bus signals
#[derive(Parser, Debug)]
#[command(name = "can-bit-cli")]
#[command(about = "Decode CAN and CAN-FD frames from digital captures", long_about = None)]
#[command(version)]
struct Args {
    /// Capture files (text 0/1 or packed .bin)
    #[arg(value_name = "CAPTURE")]
    captures: Vec<PathBuf>,

    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Capture sample rate in Hz
    #[arg(long, value_name = "HZ")]
    sample_rate: Option<u64>,

    /// Nominal (arbitration) bit rate
    #[arg(long, value_name = "BAUD")]
    nominal_baud: Option<u32>,

    /// CAN-FD data phase bit rate
    #[arg(long, value_name = "BAUD")]
    data_baud: Option<u32>,

    /// Nominal sample point in percent
    #[arg(long, value_name = "PERCENT")]
    sample_point: Option<f64>,

    /// Data phase sample point in percent
    #[arg(long, value_name = "PERCENT")]
    data_sample_point: Option<f64>,

    /// The idle (recessive) bus reads as a low level
    #[arg(long)]
    idle_low: bool,

    /// Write a JSON report
    #[arg(long)]
    json: bool,

    /// Show every decoded bit in the text report
    #[arg(long)]
    bits: bool,

    /// Output file for the report (default: stdout)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Verbosity level (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    log::info!("CAN Bit Decoder CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using decoder library v{}", can_bit_decoder::VERSION);

    let mut config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            config::load_config(path)?
        }
        None => AppConfig::default(),
    };
    apply_overrides(&mut config, &args);

    if config.input.files.is_empty() {
        bail!("No capture files given (pass them as arguments or in [input] files)");
    }

    let decoder_config = config.bus.to_decoder_config()?;
    log::debug!("Decoder configuration: {:?}", decoder_config);
    let decoder = CanDecoder::new(decoder_config)?;

    let reports = decode_all(&decoder, &config.input.files)?;

    let mut out: Box<dyn Write> = match &config.output.output_file {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {:?}", path))?,
        )),
        None => Box::new(io::stdout().lock()),
    };
    match config.output.format {
        OutputFormat::Txt => report::write_text(&mut out, &reports, config.output.show_bits)?,
        OutputFormat::Json => report::write_json(&mut out, &reports)?,
    }
    out.flush()?;

    Ok(())
}

/// Command line flags win over the configuration file
fn apply_overrides(config: &mut AppConfig, args: &Args) {
    if !args.captures.is_empty() {
        config.input.files = args.captures.clone();
    }
    if let Some(rate) = args.sample_rate {
        config.bus.sample_rate_hz = rate;
    }
    if let Some(baud) = args.nominal_baud {
        config.bus.nominal_baud = baud;
    }
    if let Some(baud) = args.data_baud {
        config.bus.data_baud = baud;
    }
    if let Some(sp) = args.sample_point {
        config.bus.nominal_sample_point = sp;
    }
    if let Some(sp) = args.data_sample_point {
        config.bus.data_sample_point = sp;
    }
    if args.idle_low {
        config.bus.idle_level = IdleLevel::Low;
    }
    if args.json {
        config.output.format = OutputFormat::Json;
    }
    if args.bits {
        config.output.show_bits = true;
    }
    if args.output.is_some() {
        config.output.output_file = args.output.clone();
    }
}

/// Decode every capture; files are independent so they run in parallel
fn decode_all(decoder: &CanDecoder, files: &[PathBuf]) -> Result<Vec<CaptureReport>> {
    let period = decoder.config().sample_period_ps;

    files
        .par_iter()
        .map(|path| -> Result<CaptureReport> {
            let samples = capture::load_capture(path)
                .with_context(|| format!("Failed to load capture: {:?}", path))?;
            let output = decoder.decode(&samples);
            log::info!(
                "{:?}: {} packets, {} with errors",
                path,
                output.packets.len(),
                output.error_packet_count()
            );
            Ok(CaptureReport::new(path, samples.len(), period, output))
        })
        .collect()
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
