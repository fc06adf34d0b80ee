use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use fleetwatch::watch_docker;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Watch a Docker daemon's alive-container portfolio and print snapshots.
#[derive(Debug, Parser)]
#[command(name = "fleetwatch", version = VERSION)]
struct Args {
    /// Docker endpoint (empty for the platform default socket).
    #[arg(long, default_value = "")]
    endpoint: String,

    /// Seconds between snapshot prints.
    #[arg(long, default_value_t = 5)]
    interval: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let watcher = Arc::new(watch_docker(&args.endpoint, None)?);
    let cancellation = CancellationToken::new();

    let watch_handle = Arc::clone(&watcher);
    let watch_token = cancellation.clone();
    let watch_task = tokio::spawn(async move {
        if let Err(err) = watch_handle.watch(watch_token).await {
            warn!(error = %err, "watcher stopped");
        }
    });

    info!(endpoint = %args.endpoint, "connected to docker, waiting for first sync");
    watcher.ready().await;

    let ctrl_c = cancellation.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        ctrl_c.cancel();
    });

    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval.max(1)));
    loop {
        tokio::select! {
            _ = cancellation.cancelled() => break,
            _ = ticker.tick() => print_snapshot(&watcher),
        }
    }

    watch_task.await?;
    Ok(())
}

fn print_snapshot(watcher: &fleetwatch::Watcher) {
    let portfolio = watcher.portfolio();
    println!("--- {} containers across {} projects ---", portfolio.container_total(), portfolio.names().len());
    for name in portfolio.names() {
        let Ok(project) = portfolio.project(&name) else {
            continue;
        };
        for container in project.containers() {
            println!("  [{name}] {container}");
        }
    }
    if let Ok(default_project) = portfolio.project(fleetwatch::NO_PROJECT) {
        for container in default_project.containers() {
            println!("  [-] {container}");
        }
    }
}
