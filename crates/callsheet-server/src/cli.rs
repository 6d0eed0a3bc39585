use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "callsheet-webhooks")]
#[command(about = "Callsheet webhook delivery: redrive worker and admin commands")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (falls back to CALLSHEET_CONFIG, then callsheet.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the redrive worker until interrupted
    Run(RunArgs),
    /// Run a single redrive pass and print its report
    Redrive(RedriveArgs),
    /// Print delivery counts for an organization
    Stats(StatsArgs),
}

#[derive(clap::Args)]
pub struct RunArgs {
    /// Seconds between redrive passes (overrides webhooks.redrive_interval_secs)
    #[arg(long)]
    pub interval_secs: Option<u64>,
    /// Failed deliveries per pass (overrides webhooks.redrive_batch_size)
    #[arg(long)]
    pub batch_size: Option<usize>,
}

#[derive(clap::Args)]
pub struct RedriveArgs {
    /// Failed deliveries to examine (defaults to webhooks.redrive_batch_size)
    #[arg(short, long)]
    pub limit: Option<usize>,
}

#[derive(clap::Args)]
pub struct StatsArgs {
    /// Organization ID
    #[arg(short, long)]
    pub organization: String,
}
