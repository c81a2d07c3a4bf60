//! Argument parsing for running from the command line

use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use clap_verbosity_flag::InfoLevel;

use crate::{
    process::{Instrument, Layout},
    unwrap::AngleUnit,
    DEFAULT_BATCH_SIZE,
};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Instrument variant, sets the register layout and record format
    #[clap(short, long, value_enum, default_value_t = Instrument::Metrology)]
    pub instrument: Instrument,
    /// Workstation address to stream records to
    #[clap(short, long, default_value = "192.168.88.243:12345")]
    pub remote: SocketAddr,
    /// Local address to send from (port 0 picks an ephemeral port)
    #[clap(short, long, default_value = "0.0.0.0:0")]
    pub local: SocketAddr,
    /// Records per UDP datagram
    #[clap(short, long, default_value_t = DEFAULT_BATCH_SIZE)]
    #[clap(value_parser = clap::value_parser!(u16).range(1..))]
    pub batch_size: u16,
    /// Hexadecimal (optional leading 0x) physical address of the counter GPIO bank
    #[clap(long, default_value = "41200000", value_parser = hex_address)]
    pub gpio_base: u64,
    /// Hexadecimal (optional leading 0x) distance between consecutive GPIO banks
    #[clap(long, default_value = "10000", value_parser = hex_address)]
    pub gpio_stride: u64,
    /// Memory device the GPIO banks are mapped through
    #[clap(long, default_value = "/dev/mem")]
    pub mem_device: PathBuf,
    /// Override the instrument's laser wavelength (nm)
    #[clap(long)]
    pub wavelength_nm: Option<f64>,
    /// Override the instrument's unwrapping domain
    #[clap(long, value_enum)]
    pub angle_unit: Option<AngleUnit>,
    /// Seconds between statistics reports, 0 disables them
    #[clap(long, default_value_t = 10)]
    pub stats_interval: u64,
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<InfoLevel>,
}

impl Args {
    /// The instrument layout with command line overrides applied
    pub fn layout(&self) -> Layout {
        let mut layout = self.instrument.layout();
        if let Some(nm) = self.wavelength_nm {
            // Whole picometres
            layout.wavelength_pm = (nm * 1e3).round();
        }
        if let Some(unit) = self.angle_unit {
            layout.unit = unit;
        }
        layout
    }
}

/// Match verbosity filter with tracing subscriber log levels
pub fn convert_filter(filter: log::LevelFilter) -> tracing_subscriber::filter::LevelFilter {
    match filter {
        log::LevelFilter::Off => tracing_subscriber::filter::LevelFilter::OFF,
        log::LevelFilter::Error => tracing_subscriber::filter::LevelFilter::ERROR,
        log::LevelFilter::Warn => tracing_subscriber::filter::LevelFilter::WARN,
        log::LevelFilter::Info => tracing_subscriber::filter::LevelFilter::INFO,
        log::LevelFilter::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
        log::LevelFilter::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
    }
}

fn hex_address(s: &str) -> Result<u64, String> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|_| "Invalid hex literal".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["metro_slurper"]).unwrap();
        assert_eq!(Instrument::Metrology, args.instrument);
        assert_eq!(10, args.batch_size);
        assert_eq!(0x4120_0000, args.gpio_base);
        assert_eq!(0x1_0000, args.gpio_stride);
        assert_eq!(12345, args.remote.port());
        assert_eq!(0, args.local.port());
        assert_eq!(Layout::metrology(), args.layout());
    }

    #[test]
    fn test_overrides() {
        let args = Args::try_parse_from([
            "metro_slurper",
            "-i",
            "phase-only",
            "--wavelength-nm",
            "1064.5",
            "--angle-unit",
            "radians",
            "--gpio-base",
            "0x43c00000",
            "-b",
            "4",
        ])
        .unwrap();
        let layout = args.layout();
        assert_eq!(2, layout.width());
        assert_eq!(1_064_500.0, layout.wavelength_pm);
        assert_eq!(AngleUnit::Radians, layout.unit);
        assert_eq!(0x43c0_0000, args.gpio_base);
        assert_eq!(4, args.batch_size);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(Args::try_parse_from(["metro_slurper", "-b", "0"]).is_err());
        assert!(Args::try_parse_from(["metro_slurper", "--gpio-base", "zz"]).is_err());
        assert!(Args::try_parse_from(["metro_slurper", "-i", "spectrometer"]).is_err());
    }

    #[test]
    fn test_hex_address_prefix_optional() {
        assert_eq!(Ok(0x4120_0000), hex_address("41200000"));
        assert_eq!(Ok(0x4120_0000), hex_address("0x41200000"));
        assert_eq!(Err("Invalid hex literal".to_string()), hex_address("0xq"));
    }
}
