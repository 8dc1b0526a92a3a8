mod checker;
mod files;
mod organizer;
mod pipeline;
mod records;
mod settings;
#[cfg(test)]
mod test_support;

use std::path::PathBuf;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use tracing::info;

use crate::settings::{OutOfRangePolicy, Settings, UnreachablePolicy};

#[derive(Parser)]
#[command(name = "pixel_checker", about = "Check impression-pixel URLs listed in a CSV")]
struct Cli {
    #[command(flatten)]
    opts: Overrides,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Recreate outputs, organize the input and check every URL (default)
    Run,
    /// Recreate outputs and flatten the input into the work list only
    Organize,
    /// Check an existing work list, appending to the results files
    Check,
}

/// Command-line overrides, applied over PIXEL_* environment settings.
#[derive(Args)]
struct Overrides {
    /// Directory holding all four files
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,
    /// Input CSV (tactic_id,impression_pixel_json)
    #[arg(long, global = true)]
    input: Option<PathBuf>,
    /// Flattened work list
    #[arg(long, global = true)]
    organized: Option<PathBuf>,
    /// Combined results
    #[arg(long, global = true)]
    results: Option<PathBuf>,
    /// Failures only
    #[arg(long, global = true)]
    failures: Option<PathBuf>,
    /// Max requests in flight
    #[arg(short, long, global = true)]
    concurrency: Option<usize>,
    /// Per-request timeout (default: none)
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,
    /// Handling of statuses outside 200-599
    #[arg(long, value_enum, global = true)]
    out_of_range: Option<OutOfRangePolicy>,
    /// How transport errors are recorded
    #[arg(long, value_enum, global = true)]
    unreachable: Option<UnreachablePolicy>,
    /// Ignore system proxy settings
    #[arg(long, global = true)]
    no_proxy: bool,
}

impl Overrides {
    fn apply(self, mut s: Settings) -> Settings {
        if let Some(dir) = self.data_dir {
            s = s.rebase(dir);
        }
        if let Some(p) = self.input {
            s.input = p;
        }
        if let Some(p) = self.organized {
            s.organized = p;
        }
        if let Some(p) = self.results {
            s.results = p;
        }
        if let Some(p) = self.failures {
            s.failures = p;
        }
        if let Some(n) = self.concurrency {
            s.concurrency = n;
        }
        if self.timeout_secs.is_some() {
            s.request_timeout_secs = self.timeout_secs;
        }
        if let Some(p) = self.out_of_range {
            s.out_of_range = p;
        }
        if let Some(p) = self.unreachable {
            s.unreachable = p;
        }
        s.no_proxy |= self.no_proxy;
        s
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = cli.opts.apply(Settings::from_env()?);
    settings.validate()?;
    info!(settings = ?settings, "Starting pixel checker");

    let summary = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => pipeline::run(&settings).await?,
        Commands::Organize => pipeline::organize_only(&settings)?,
        Commands::Check => pipeline::check_only(&settings).await?,
    };
    summary.print();

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
