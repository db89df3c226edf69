use std::{path::PathBuf, process, time::Duration};

use clap::{Parser, Subcommand};
use envstation::{
    config::Config,
    core::{
        failover::TransportMode,
        station::{Station, StationOptions},
    },
    feed::{render_history, render_latest, FeedClient, FeedError, SensorKind},
    logger::LoggerManager,
    print_error,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Parser, Debug)]
#[command(name = "envstation", version, about = "Virtual environmental station for ThingSpeak")]
struct Cli {
    /// Configuration file (overrides ENVSTATION_CONFIG).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a virtual station that publishes readings.
    Station {
        /// Station identifier (default: station_<8 hex>).
        #[arg(long)]
        station_id: Option<String>,

        /// Seconds between readings (overrides [station].interval).
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        interval: Option<u64>,

        /// Stop after this many seconds.
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        duration: Option<u64>,

        /// Stop after this many readings.
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        count: Option<u64>,

        /// Transport selection.
        #[arg(long, value_enum, default_value_t = TransportMode::Auto)]
        mode: TransportMode,
    },

    /// Show the most recent channel entry.
    Latest {
        /// Refresh every N seconds until interrupted.
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        refresh: Option<u64>,
    },

    /// Show one sensor's readings over a recent window.
    History {
        #[arg(value_enum)]
        sensor: SensorKind,

        /// Hours to look back.
        #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u32).range(1..))]
        hours: u32,
    },
}

type AppResult = Result<(), Box<dyn std::error::Error>>;

fn log_station_table(rows: &[(&str, String)]) {
    let key_width = rows
        .iter()
        .map(|(k, _)| k.len())
        .max()
        .unwrap_or(10)
        .max("Setting".len());

    info!("{:<width$} | Value", "Setting", width = key_width);
    info!("{}-+-{}", "-".repeat(key_width), "-".repeat(24));
    for (key, value) in rows {
        info!("{:<width$} | {}", key, value, width = key_width);
    }
}

async fn run_station(cfg: &Config, options: StationOptions, cancel: CancellationToken) -> AppResult {
    let station = Station::from_config(cfg, options)?;
    let schedule = station.schedule();

    log_station_table(&[
        ("Station ID", station.id().to_string()),
        ("Channel", cfg.channel.channel_id.clone()),
        ("Interval", format!("{}s", schedule.interval.as_secs())),
        (
            "Duration",
            schedule
                .duration
                .map(|d| format!("{}s", d.as_secs()))
                .unwrap_or_else(|| "unbounded".into()),
        ),
        (
            "Count",
            schedule
                .count
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unbounded".into()),
        ),
        ("Mode", format!("{:?}", station.controller().mode())),
        (
            "MQTT",
            if station.controller().has_persistent() {
                cfg.transport.address()
            } else {
                "disabled".into()
            },
        ),
        ("HTTP", cfg.channel.base_url().to_string()),
    ]);

    let report = station.run(cancel).await;
    info!(
        "Delivered {}/{} readings",
        report.delivered(),
        report.iterations
    );
    Ok(())
}

async fn show_latest(cfg: &Config, refresh: Option<u64>, cancel: CancellationToken) -> AppResult {
    let client = FeedClient::from_config(&cfg.channel);
    let term = console::Term::stdout();

    loop {
        match client.latest().await {
            Ok(entry) => {
                if refresh.is_some() {
                    if let Err(e) = term.clear_screen() {
                        debug!("Failed to clear screen: {}", e);
                    }
                }
                println!("{}", render_latest(&entry));
            }
            Err(FeedError::NoData) => println!("No data available"),
            Err(e) if refresh.is_some() => error!("Error fetching data: {}", e),
            Err(e) => return Err(e.into()),
        }

        let Some(seconds) = refresh else {
            return Ok(());
        };
        println!("\nRefreshing in {seconds} seconds... (Press Ctrl+C to exit)");
        tokio::select! {
            _ = cancel.cancelled() => {
                println!("\nExiting display...");
                return Ok(());
            }
            _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
        }
    }
}

async fn show_history(cfg: &Config, sensor: SensorKind, hours: u32) -> AppResult {
    let client = FeedClient::from_config(&cfg.channel);
    let entries = client.history(hours).await?;

    match render_history(&entries, sensor, hours) {
        Some(report) => println!("{report}"),
        None => println!(
            "No valid {} data found for the last {} hours",
            sensor.title(),
            hours
        ),
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let cfg = Config::new(cli.config.as_deref()).unwrap_or_else(|e| {
        print_error!("{}", e);
        process::exit(1);
    });
    let logger_manager = LoggerManager::new(cfg.logger.clone()).unwrap_or_else(|e| {
        print_error!("Failed to setup Log Manager: {}", e);
        process::exit(1);
    });
    logger_manager.init().unwrap_or_else(|e| {
        print_error!("Failed to init Log Manager: {}", e);
        process::exit(1);
    });
    info!("Starting envstation version {}...", env!("CARGO_PKG_VERSION"));
    debug!("{:#?}", cfg.transport);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C, shutting down...");
                cancel.cancel();
            }
        });
    }

    let result = match cli.command {
        Command::Station {
            station_id,
            interval,
            duration,
            count,
            mode,
        } => {
            let options = StationOptions {
                station_id,
                interval,
                duration,
                count,
                mode,
            };
            run_station(&cfg, options, cancel).await
        }
        Command::Latest { refresh } => show_latest(&cfg, refresh, cancel).await,
        Command::History { sensor, hours } => show_history(&cfg, sensor, hours).await,
    };

    if let Err(e) = result {
        error!("{}", e);
        process::exit(1);
    }
    info!("Shutdown complete");
}
