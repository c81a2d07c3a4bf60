use anyhow::Context;
use clap::Parser;
use crossbeam_channel::bounded;
use metro_slurper::{
    args::{convert_filter, Args},
    capture::Acquisition,
    exfil::{BatchStream, UdpTransport},
    monitoring::Reporter,
    pipeline::Pipeline,
    process::Processor,
};
use std::time::Duration;
use tracing::info;

fn main() -> anyhow::Result<()> {
    // Get CLI args
    let args = Args::parse();

    // Setup logging
    let filter = convert_filter(args.verbose.log_level_filter());
    tracing_subscriber::fmt().with_max_level(filter).init();

    // Resolve the record layout for this instrument
    let layout = args.layout();
    let width = layout.width();
    info!(
        instrument = ?args.instrument,
        unit = ?layout.unit,
        wavelength_pm = layout.wavelength_pm,
        "Record layout: {}",
        layout.names().collect::<Vec<_>>().join(", ")
    );
    let processor = Processor::new(layout).context("Invalid instrument layout")?;

    // Network first, then the FPGA registers. Either failing stops us here.
    let transport = UdpTransport::bind(args.local, args.remote).context("Network setup failed")?;
    let stream = BatchStream::new(transport, width, args.batch_size as usize)
        .context("Network setup failed")?;
    info!(
        remote = %args.remote,
        records = args.batch_size,
        bytes = stream.payload_bytes(),
        "Batching"
    );
    let source = Acquisition::open(
        &args.mem_device,
        args.gpio_base,
        args.gpio_stride,
        processor.layout().raw_channels,
        processor.layout().bank_width,
    )
    .context("Metrology setup failed")?;

    // Stop cleanly on ctrl-c
    let (sd_s, sd_r) = bounded(1);
    ctrlc::set_handler(move || {
        let _ = sd_s.try_send(());
    })
    .context("Failed to install signal handler")?;

    let mut pipeline =
        Pipeline::new(source, processor, stream).context("Metrology setup failed")?;
    let mut reporter = Reporter::new(Duration::from_secs(args.stats_interval));

    info!("Starting loop");
    pipeline.run(&sd_r, &mut reporter);

    // Whatever was left in the batch is dropped
    reporter.summary(pipeline.stats());
    Ok(())
}
