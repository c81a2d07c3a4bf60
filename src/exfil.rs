//! This module is responsible for exfilling processed records to the workstation
//!
//! # Wire format
//! One UDP datagram per full batch. The payload is `batch_size * width`
//! consecutive `i32` in the native byte order of the acquisition platform
//! (little-endian on the Zynq), i.e. `batch_size` records back to back, each
//! starting with its counter. There is no header, length prefix or checksum
//! beyond UDP's own; the receiver knows the layout out of band.

use std::{
    io,
    net::{SocketAddr, UdpSocket},
};

use byte_slice_cast::AsByteSlice;
use thiserror::Error;
use tracing::{info, warn};

use crate::process::Record;

/// Largest UDP payload over IPv4
pub const MAX_DATAGRAM: usize = 65_507;
/// Largest payload that avoids IP fragmentation on a 1500 byte MTU
pub const MTU_PAYLOAD: usize = 1500 - 20 - 8;

const WORD_SIZE: usize = std::mem::size_of::<i32>();

#[derive(Error, Debug)]
pub enum ExfilError {
    #[error("Failed to bind UDP socket to {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },
    #[error("Failed to connect UDP socket to {addr}: {source}")]
    Connect { addr: SocketAddr, source: io::Error },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Batch size must be at least one record")]
    EmptyBatch,
    #[error("Batch of {bytes} bytes does not fit in one datagram")]
    Oversize { bytes: usize },
    #[error("Record has {got} fields, stream expects {expected}")]
    Width { expected: usize, got: usize },
    #[error("Failed to send batch: {0}")]
    SendFailed(#[source] io::Error),
    #[error("Payload of {len} bytes is not a whole number of {width} field records")]
    Malformed { len: usize, width: usize },
}

/// The datagram link to the workstation
pub trait Transport {
    /// Send one datagram
    fn send(&mut self, payload: &[u8]) -> io::Result<()>;
    /// Service the receive side, once per loop cycle, never blocking
    fn service_inbound(&mut self);
}

/// A connected, non-blocking UDP socket bound to an ephemeral port
pub struct UdpTransport {
    socket: UdpSocket,
    scratch: [u8; 2048],
}

impl UdpTransport {
    pub fn bind(local: SocketAddr, remote: SocketAddr) -> Result<Self, ExfilError> {
        let socket =
            UdpSocket::bind(local).map_err(|source| ExfilError::Bind { addr: local, source })?;
        socket.connect(remote).map_err(|source| ExfilError::Connect {
            addr: remote,
            source,
        })?;
        socket.set_nonblocking(true)?;
        info!(local = %socket.local_addr()?, %remote, "UDP stream ready");
        Ok(Self {
            socket,
            scratch: [0; 2048],
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, payload: &[u8]) -> io::Result<()> {
        let n = self.socket.send(payload)?;
        if n != payload.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short datagram, {n} of {} bytes", payload.len()),
            ));
        }
        Ok(())
    }

    fn service_inbound(&mut self) {
        // Drain whatever arrived. This also collects ICMP errors queued on the
        // connected socket, which would otherwise fail the next send.
        while self.socket.recv(&mut self.scratch).is_ok() {}
    }
}

/// Outcome of pushing one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flush {
    /// The batch filled up and went out
    Sent,
    /// The record is waiting in the batch
    Buffered,
}

/// Accumulates records into one reusable batch buffer and sends it when full
pub struct BatchStream<T> {
    transport: T,
    buffer: Vec<i32>,
    width: usize,
    batch_size: usize,
    index: usize,
}

impl<T: Transport> BatchStream<T> {
    pub fn new(transport: T, width: usize, batch_size: usize) -> Result<Self, ExfilError> {
        if batch_size == 0 || width == 0 {
            return Err(ExfilError::EmptyBatch);
        }
        let bytes = width * batch_size * WORD_SIZE;
        if bytes > MAX_DATAGRAM {
            return Err(ExfilError::Oversize { bytes });
        }
        if bytes > MTU_PAYLOAD {
            warn!(bytes, "Batch exceeds {MTU_PAYLOAD} bytes and will be fragmented");
        }
        Ok(Self {
            transport,
            buffer: vec![0; width * batch_size],
            width,
            batch_size,
            index: 0,
        })
    }

    /// Copy `record` into the batch, sending the batch if this filled it.
    ///
    /// A failed send drops the batch; the next one starts from empty either way.
    pub fn push(&mut self, record: &Record) -> Result<Flush, ExfilError> {
        let fields = record.as_slice();
        if fields.len() != self.width {
            return Err(ExfilError::Width {
                expected: self.width,
                got: fields.len(),
            });
        }
        let start = self.index * self.width;
        self.buffer[start..start + self.width].copy_from_slice(fields);
        self.index += 1;
        if self.index < self.batch_size {
            return Ok(Flush::Buffered);
        }
        self.index = 0;
        self.transport
            .send(self.buffer.as_byte_slice())
            .map_err(ExfilError::SendFailed)?;
        Ok(Flush::Sent)
    }

    pub fn service_inbound(&mut self) {
        self.transport.service_inbound();
    }

    /// Records currently waiting in the batch
    pub fn index(&self) -> usize {
        self.index
    }

    /// Fields per record
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn payload_bytes(&self) -> usize {
        self.buffer.len() * WORD_SIZE
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

/// Split a received payload back into records of `width` fields
pub fn decode_batch(payload: &[u8], width: usize) -> Result<Vec<Record>, ExfilError> {
    let record_bytes = width * WORD_SIZE;
    if width == 0 || payload.len() % record_bytes != 0 {
        return Err(ExfilError::Malformed {
            len: payload.len(),
            width,
        });
    }
    let words: Vec<i32> = payload
        .chunks_exact(WORD_SIZE)
        .map(|w| i32::from_ne_bytes([w[0], w[1], w[2], w[3]]))
        .collect();
    Ok(words.chunks_exact(width).map(Record::from_slice).collect())
}
