//! Counter-gated acquisition, conversion and UDP forwarding for the metrology FPGA

pub mod args;
pub mod capture;
pub mod complex;
pub mod exfil;
pub mod monitoring;
pub mod pipeline;
pub mod process;
pub mod unwrap;

/// Records per datagram unless told otherwise
pub const DEFAULT_BATCH_SIZE: u16 = 10;
