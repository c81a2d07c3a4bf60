//! The sense, process, transmit loop
//!
//! Single threaded and never sleeps. Every pass reads the counter; only a
//! counter that moved by exactly one pulls a sample through the processor and
//! into the batch. Whatever happened, the transport gets serviced before the
//! next pass.

use crossbeam_channel::Receiver;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::{
    capture::{Acquisition, CounterGate, RawSample, RegisterBank, Tick},
    exfil::{BatchStream, Flush, Transport},
    monitoring::{Reporter, Stats},
    process::{Processor, Record},
};

// Polls between checks of the report clock
const REPORT_CADENCE: u64 = 1 << 10;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Acquisition captures {captured} channels, the layout reads {expected}")]
    Channels { captured: usize, expected: usize },
    #[error("Batch stream carries {stream} field records, the layout produces {expected}")]
    Width { stream: usize, expected: usize },
}

pub struct Pipeline<B, T> {
    source: Acquisition<B>,
    gate: CounterGate,
    processor: Processor,
    stream: BatchStream<T>,
    sample: RawSample,
    record: Record,
    stats: Stats,
}

impl<B: RegisterBank, T: Transport> Pipeline<B, T> {
    /// Wire the parts together, checking they agree on the layout
    pub fn new(
        source: Acquisition<B>,
        processor: Processor,
        stream: BatchStream<T>,
    ) -> Result<Self, PipelineError> {
        let layout = processor.layout();
        if source.channels() != layout.raw_channels {
            return Err(PipelineError::Channels {
                captured: source.channels(),
                expected: layout.raw_channels,
            });
        }
        if stream.width() != layout.width() {
            return Err(PipelineError::Width {
                stream: stream.width(),
                expected: layout.width(),
            });
        }
        let sample = RawSample::new(source.channels());
        let record = Record::with_width(layout.width());
        Ok(Self {
            source,
            gate: CounterGate::default(),
            processor,
            stream,
            sample,
            record,
            stats: Stats::default(),
        })
    }

    /// One pass of the loop. Returns what happened to the batch, if a sample was consumed
    /// and pushed successfully.
    pub fn poll(&mut self) -> Option<Flush> {
        self.stats.cycles += 1;
        let counter = self.source.read_counter();
        let tick = self.gate.observe(counter);
        self.stats.record_tick(tick);
        let flush = match tick {
            Tick::Advanced => self.consume(counter),
            Tick::Stalled => None,
            Tick::Skipped(lost) => {
                trace!(counter, lost, "Counter jumped, samples lost");
                None
            }
            Tick::Discontinuity => {
                debug!(counter, "Counter went backwards");
                None
            }
        };
        // Every cycle, not just after a send
        self.stream.service_inbound();
        flush
    }

    fn consume(&mut self, counter: i32) -> Option<Flush> {
        self.sample.counter = counter;
        self.source.read_all_channels(&mut self.sample);
        let invalid = self.processor.process(&self.sample, &mut self.record);
        self.stats.invalid_values += invalid as u64;
        match self.stream.push(&self.record) {
            Ok(flush) => {
                if flush == Flush::Sent {
                    self.stats.batches_sent += 1;
                }
                Some(flush)
            }
            Err(e) => {
                self.stats.send_failures += 1;
                warn!(counter, "{e}");
                None
            }
        }
    }

    /// Poll until `shutdown` fires. A partially filled batch is dropped.
    pub fn run(&mut self, shutdown: &Receiver<()>, reporter: &mut Reporter) {
        loop {
            self.poll();
            // Reports keep coming when nothing flows
            if self.stats.cycles % REPORT_CADENCE == 0 {
                reporter.maybe_report(&self.stats);
            }
            if shutdown.try_recv().is_ok() {
                break;
            }
        }
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn stream(&self) -> &BatchStream<T> {
        &self.stream
    }

    pub fn processor(&self) -> &Processor {
        &self.processor
    }
}
