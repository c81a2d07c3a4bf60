//! This module contains all the capture logic

// The FPGA exposes its sample counter and every data channel as AXI GPIO
// banks. The poll loop reads the counter as fast as it can and only pulls the
// data banks when the counter ticked over by exactly one. Channel reads are
// sequential, not atomic; the FPGA holds its outputs steady between counter
// ticks, which is long enough for one read burst.

use std::{fs::OpenOptions, path::Path, ptr};

use memmap2::{MmapOptions, MmapRaw};
use thiserror::Error;
use tracing::debug;

// AXI GPIO register map, relative to the bank base
const DATA_OFFSET: usize = 0x0;
const TRI_OFFSET: usize = 0x4;
const CHANNEL_TWO_OFFSET: usize = 0x8;
// One page covers the whole register file
const BANK_SPAN: usize = 0x1000;

/// Tristate mask marking every line of a channel as an input
pub const ALL_INPUTS: u32 = u32::MAX;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Failed to open memory device '{path}': {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to map register bank at {base:#010x}: {source}")]
    Map { base: u64, source: std::io::Error },
    #[error("Register bank base {base:#010x} is not page aligned")]
    Unaligned { base: u64 },
    #[error("Invalid bank width {0}, banks carry one or two channels")]
    BankWidth(usize),
    #[error("{banks} banks of width {width} cannot hold {channels} channels")]
    TooFewBanks {
        banks: usize,
        width: usize,
        channels: usize,
    },
}

/// One of the two channels of a dual-channel GPIO bank
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioChannel {
    One,
    Two,
}

impl GpioChannel {
    fn offset(self) -> usize {
        match self {
            GpioChannel::One => 0,
            GpioChannel::Two => CHANNEL_TWO_OFFSET,
        }
    }

    fn for_sub_channel(sub: usize) -> Self {
        if sub == 0 {
            GpioChannel::One
        } else {
            GpioChannel::Two
        }
    }
}

/// Register-level access to one GPIO bank
pub trait RegisterBank {
    /// Write the tristate mask of `channel` (a set bit is an input)
    fn set_direction(&mut self, channel: GpioChannel, mask: u32);
    /// Read the data register of `channel`
    fn read(&self, channel: GpioChannel) -> i32;
}

/// An AXI GPIO bank mapped out of physical memory
pub struct AxiGpio {
    regs: MmapRaw,
}

impl AxiGpio {
    /// Map the bank at physical address `base` through `device` (`/dev/mem` or a UIO node)
    pub fn map(device: &std::fs::File, base: u64) -> Result<Self, CaptureError> {
        if base % BANK_SPAN as u64 != 0 {
            return Err(CaptureError::Unaligned { base });
        }
        // Device memory outside of RAM is mapped uncached by the kernel
        let regs = MmapOptions::new()
            .offset(base)
            .len(BANK_SPAN)
            .map_raw(device)
            .map_err(|source| CaptureError::Map { base, source })?;
        debug!(base = format_args!("{base:#010x}"), "Mapped GPIO bank");
        Ok(Self { regs })
    }

    fn reg(&self, offset: usize) -> *mut u32 {
        debug_assert!(offset + 4 <= BANK_SPAN);
        // SAFETY: offset stays within the mapped page
        unsafe { self.regs.as_mut_ptr().add(offset).cast::<u32>() }
    }
}

impl RegisterBank for AxiGpio {
    fn set_direction(&mut self, channel: GpioChannel, mask: u32) {
        // SAFETY: aligned register inside the mapping, which lives as long as self
        unsafe { ptr::write_volatile(self.reg(channel.offset() + TRI_OFFSET), mask) }
    }

    fn read(&self, channel: GpioChannel) -> i32 {
        // SAFETY: aligned register inside the mapping, which lives as long as self
        unsafe { ptr::read_volatile(self.reg(channel.offset() + DATA_OFFSET)) as i32 }
    }
}

/// One sampling instant's worth of unconverted register values
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawSample {
    pub counter: i32,
    pub channels: Vec<i32>,
}

impl RawSample {
    pub fn new(channels: usize) -> Self {
        Self {
            counter: 0,
            channels: vec![0; channels],
        }
    }
}

/// The counter bank plus the data banks of the metrology FPGA
pub struct Acquisition<B> {
    counter: B,
    banks: Vec<B>,
    bank_width: usize,
    channels: usize,
}

impl<B: RegisterBank> Acquisition<B> {
    /// Take ownership of already-bound banks and switch every used channel to input
    pub fn new(
        mut counter: B,
        mut banks: Vec<B>,
        channels: usize,
        bank_width: usize,
    ) -> Result<Self, CaptureError> {
        if !(1..=2).contains(&bank_width) {
            return Err(CaptureError::BankWidth(bank_width));
        }
        if banks.len() * bank_width < channels {
            return Err(CaptureError::TooFewBanks {
                banks: banks.len(),
                width: bank_width,
                channels,
            });
        }
        counter.set_direction(GpioChannel::One, ALL_INPUTS);
        for bank in banks.iter_mut() {
            bank.set_direction(GpioChannel::One, ALL_INPUTS);
            if bank_width == 2 {
                bank.set_direction(GpioChannel::Two, ALL_INPUTS);
            }
        }
        Ok(Self {
            counter,
            banks,
            bank_width,
            channels,
        })
    }

    /// Current value of the FPGA sample counter
    pub fn read_counter(&self) -> i32 {
        self.counter.read(GpioChannel::One)
    }

    /// Read every data channel, in order, into `sample.channels`
    pub fn read_all_channels(&self, sample: &mut RawSample) {
        sample.channels.resize(self.channels, 0);
        for (i, value) in sample.channels.iter_mut().enumerate() {
            let bank = &self.banks[i / self.bank_width];
            *value = bank.read(GpioChannel::for_sub_channel(i % self.bank_width));
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}

impl Acquisition<AxiGpio> {
    /// Map the counter bank at `base` and data bank `i` at `base + (i + 1) * stride`.
    /// Any bank failing to map aborts the whole setup.
    pub fn open(
        device: &Path,
        base: u64,
        stride: u64,
        channels: usize,
        bank_width: usize,
    ) -> Result<Self, CaptureError> {
        if !(1..=2).contains(&bank_width) {
            return Err(CaptureError::BankWidth(bank_width));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(device)
            .map_err(|source| CaptureError::Open {
                path: device.display().to_string(),
                source,
            })?;
        let counter = AxiGpio::map(&file, base)?;
        let num_banks = channels.div_ceil(bank_width);
        let banks = (0..num_banks)
            .map(|i| AxiGpio::map(&file, base + (i as u64 + 1) * stride))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(counter, banks, channels, bank_width)
    }
}

/// What happened to the counter since the previous poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Exactly one new sample
    Advanced,
    /// No new sample yet
    Stalled,
    /// Jumped forward, the given number of samples were never seen
    Skipped(u32),
    /// Went backwards (FPGA reset or garbage read)
    Discontinuity,
}

/// Tracks the last observed counter value.
///
/// Starts at -1 so that a counter coming out of reset at 0 has its first
/// sample consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterGate {
    previous: i32,
}

impl Default for CounterGate {
    fn default() -> Self {
        Self { previous: -1 }
    }
}

impl CounterGate {
    /// Classify `counter` against the previous observation and remember it
    pub fn observe(&mut self, counter: i32) -> Tick {
        let delta = counter.wrapping_sub(self.previous);
        self.previous = counter;
        match delta {
            1 => Tick::Advanced,
            0 => Tick::Stalled,
            d if d > 1 => Tick::Skipped((d - 1) as u32),
            _ => Tick::Discontinuity,
        }
    }

    pub fn previous(&self) -> i32 {
        self.previous
    }
}
