//! Command-line tool for the share accounting interface.
//!
//! Posts a signed share report the same way the daemon does, or prints the
//! signature of an arbitrary body, for checking an accounting endpoint by
//! hand.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use stratum_bridge::config::DEFAULT_REPORT_URL;
use stratum_bridge::reporter::{self, HttpShareReporter, ShareReport, ShareReporter};
use stratum_bridge::tracing;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign and post one share report
    Report {
        /// Accounting endpoint
        #[arg(long, env = "REPORT_URL", default_value = DEFAULT_REPORT_URL)]
        url: String,

        /// Shared secret for the signature
        #[arg(long, env = "REPORT_SHARED_SECRET", hide_env_values = true)]
        secret: String,

        /// Miner to credit
        #[arg(long)]
        miner: String,

        /// Worker name; defaults to the miner
        #[arg(long)]
        worker: Option<String>,

        /// Number of shares
        #[arg(long, default_value_t = 1)]
        shares: u64,
    },

    /// Print the signature of a report body
    Sign {
        /// Shared secret for the signature
        #[arg(long, env = "REPORT_SHARED_SECRET", hide_env_values = true)]
        secret: String,

        /// Exact body to sign
        #[arg(long)]
        body: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing::init_cli();

    match args.command {
        Command::Report {
            url,
            secret,
            miner,
            worker,
            shares,
        } => {
            let report = ShareReport {
                worker_name: worker.unwrap_or_else(|| miner.clone()),
                miner_id: miner,
                shares,
            };
            let reporter = HttpShareReporter::new(url, secret.into_bytes())
                .context("failed to create reporter")?;

            match reporter.report(&report).await {
                Ok(()) => println!("credited: {}", serde_json::to_string(&report)?),
                Err(e) => bail!("{} ({})", e.reason(), e),
            }
        }

        Command::Sign { secret, body } => {
            println!("{}", reporter::sign(secret.as_bytes(), body.as_bytes())?);
        }
    }

    Ok(())
}
