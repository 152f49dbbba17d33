//! Demo harness for the `dc09-spt` transceiver.
//!
//! Wires an [`Spt`] from [`SptSettings`] (`Spt.toml` / `SPT__*` env vars /
//! `.env`), then either sends one test event and waits for it to dispatch,
//! or just prints the current path/queue state.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dc09_spt::{MessageParams, Spt, SptSettings};
use std::thread;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "dc09-spt-cli")]
#[command(about = "Demo harness for the dc09-spt SIA DC-09 transceiver", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one test event using the configured paths, then print state
    Send {
        /// "SIA"/"SIA-DCS" for a DC-03 payload, "CID"/"ADM-CID" for DC-05
        #[arg(long, default_value = "SIA")]
        r#type: String,
        /// 2-char SIA code or 3-digit Contact-ID code
        #[arg(long)]
        code: Option<String>,
        #[arg(long)]
        zone: Option<String>,
        #[arg(long)]
        text: Option<String>,
    },
    /// Print the current path/queue/poll state without sending anything
    State,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let settings = SptSettings::load().context("loading SPT settings")?;
    let spt = Spt::new(settings.account.clone(), settings.receiver, settings.line);
    settings.apply(&spt).context("applying configured paths")?;

    if let Some(main_interval) = settings.poll.main_interval_secs {
        spt.start_poll(
            Some(Duration::from_secs(main_interval)),
            settings.poll.backup_interval_secs.map(Duration::from_secs),
            Duration::from_secs(settings.poll.retry_delay_secs),
            None,
            None,
        );
    }

    match cli.command {
        Commands::Send { r#type, code, zone, text } => {
            let mut params = MessageParams::new();
            params.code = code;
            params.zone = zone;
            params.text = text;
            spt.send_msg(&r#type, &params).context("sending test event")?;
            info!(r#type = %r#type, "queued one test event; waiting for dispatch");
            while spt.not_sent() > 0 {
                thread::sleep(Duration::from_millis(200));
            }
        }
        Commands::State => {}
    }

    let state = spt.state();
    info!(?state, "current SPT state");
    Ok(())
}
