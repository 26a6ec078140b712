use clap::Parser;

/// Runtime knobs for the clinic simulation.
///
/// Stations poll on `poll_secs` independently of one another; the
/// notification bus only shortens the wait, it is never relied on.
#[derive(Parser, Debug, Clone)]
#[command(name = "clinicops", about = "Clinic operations reconciliation engine")]
pub struct Config {
    /// JSONL feed of stock, service and visit seed records
    #[arg(default_value = "fake_clinic_feed.jsonl")]
    pub feed_path: String,

    /// Seconds between billing/triage poll cycles
    #[arg(long, default_value_t = 4)]
    pub poll_secs: u64,

    /// Seconds between reporter refreshes
    #[arg(long, default_value_t = 5)]
    pub report_secs: u64,

    /// Write a fresh fake feed with this many visits before running
    #[arg(long, value_name = "VISITS")]
    pub generate: Option<usize>,

    /// Enable detailed station logging
    #[arg(short, long)]
    pub verbose: bool,
}
