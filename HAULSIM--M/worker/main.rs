use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use haulsim_clock::calendar::start_of_day;
use haulsim_planning::{Pickup, PickupStatus};
use haulsim_worker::{root_telemetry, Haulsim, HaulsimConfig};
use serde_json::json;

#[derive(Parser, Debug)]
#[command(name = "haulsim", version, about = "Simulated logistics fulfillment worker")]
struct Cli {
    /// TOML configuration; defaults plus HAULSIM_* overrides when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Runs the clock, both queue pollers and the midnight sweep until ctrl-c or SIGTERM.
    Run,
    /// Registers a paid pickup and prints the planned logistics detail.
    Plan {
        /// Pickup id.
        #[arg(long)]
        pickup: i64,
        /// Units to move.
        #[arg(long)]
        quantity: u32,
    },
    /// Prints simulated now and today's real-world pickup/delivery instants.
    Clock,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => HaulsimConfig::load(path)?,
        None => HaulsimConfig::from_env().context("building default configuration")?,
    };
    match cli.command {
        Commands::Run => run(config).await,
        Commands::Plan { pickup, quantity } => plan(config, pickup, quantity).await,
        Commands::Clock => clock(config),
    }
}

async fn run(config: HaulsimConfig) -> Result<()> {
    let haulsim = Haulsim::build(config).context("failed to bootstrap haulsim")?;
    let (signal, drained) = haulsim.run_until(shutdown_signal()).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "signal": signal,
            "drained": drained,
            "stats": haulsim.worker().stats().snapshot(),
        }))?
    );
    Ok(())
}

/// Resolves on ctrl-c or, on unix, SIGTERM.
async fn shutdown_signal() -> Result<&'static str> {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.context("installing ctrl-c handler")?;
        Ok::<_, anyhow::Error>("ctrl-c")
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("installing SIGTERM handler")?
            .recv()
            .await;
        Ok::<_, anyhow::Error>("SIGTERM")
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<&'static str>>();

    tokio::select! {
        received = ctrl_c => received,
        received = terminate => received,
    }
}

async fn plan(config: HaulsimConfig, pickup: i64, quantity: u32) -> Result<()> {
    let telemetry = root_telemetry(&config.logging, false)?;
    let haulsim = Haulsim::build_with_telemetry(config, telemetry)?;
    haulsim.store().upsert_pickup(Pickup {
        id: pickup,
        quantity,
        status: PickupStatus::OrderReceived,
    });
    let detail = haulsim
        .planner()
        .handle_payment_confirmed(pickup)
        .await
        .with_context(|| format!("planning pickup {pickup}"))?;
    println!("{}", serde_json::to_string_pretty(&detail)?);
    Ok(())
}

fn clock(config: HaulsimConfig) -> Result<()> {
    let telemetry = root_telemetry(&config.logging, false)?;
    let haulsim = Haulsim::build_with_telemetry(config, telemetry)?;
    let clock = haulsim.clock();
    let now = clock.current_time();
    let today = start_of_day(now);
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "simulated_now": now,
            "simulation_date": today,
            "real_pickup_timestamp": clock.real_world_pickup_timestamp(today),
            "real_delivery_timestamp": clock.real_world_delivery_timestamp(today),
            "status": clock.status(),
        }))?
    );
    Ok(())
}
