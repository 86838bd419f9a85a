use anyhow::Result;
use clap::Parser;
use offcpu::{
    cli::{Cli, OutputFormat},
    replay::ReplayDriver,
    report::WaitReport,
};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
}

fn print_stats(stats: &offcpu::ingest::IngestSnapshot) {
    eprintln!("\ningest statistics:");
    eprintln!("  intervals recorded:      {}", stats.intervals_recorded);
    eprintln!("  clock anomalies:         {}", stats.clock_anomalies);
    eprintln!("  out-of-range intervals:  {}", stats.out_of_range);
    eprintln!("  counts-table drops:      {}", stats.counts_capacity_drops);
    eprintln!("  start-table drops:       {}", stats.start_capacity_drops);
    eprintln!("  degraded stack captures: {}", stats.stack_capture_failures);
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let driver = ReplayDriver::new(cli.profiler_config());
    let fed = driver.replay_file(&cli.trace)?;
    tracing::debug!(transitions = fed, "replayed trace");

    let stats = driver.stats();
    let report = WaitReport::drain_from(driver.profiler().counts());

    match cli.format {
        OutputFormat::Text => report.print_summary(),
        OutputFormat::Json => println!("{}", report.to_json(cli.stats.then_some(stats))?),
        OutputFormat::Csv => report.write_csv(&mut std::io::stdout().lock())?,
    }

    if cli.stats && !matches!(cli.format, OutputFormat::Json) {
        print_stats(&stats);
    }

    Ok(())
}
