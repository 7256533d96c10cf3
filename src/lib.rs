pub mod commands;
pub mod config;
pub mod error;
pub mod options;
pub mod poller;
pub mod prelude;
pub mod snapshot;
pub mod voltronic;

const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::prelude::*;
use crate::commands::{ExchangePolicy, RawCommand};
use crate::options::RunMode;
use crate::poller::Poller;
use crate::voltronic::telemetry::Telemetry;
use crate::voltronic::transport::Device;

/// Commands a fresh record needs before the consumer prints it. Warnings are
/// picked up when present but do not hold the record back.
const REQUIRED: [Tracked; 3] = [Tracked::Operational, Tracked::Ratings, Tracked::Mode];

/// One raw command with no retries. The reply is returned verbatim.
pub async fn run_raw<T: Transport>(
    mut transport: T,
    config: &Config,
    name: &str,
    reply_len: Option<usize>,
) -> Result<Reply> {
    let table = CommandTable::new(config);
    let raw = RawCommand::new(&table, name, reply_len, ExchangePolicy::new(config))?;

    let reply = raw
        .run(&mut transport)
        .await
        .with_context(|| format!("raw command {} failed", raw.command()))?;

    Ok(reply)
}

/// A single polling cycle. Fails unless every tracked command came back and
/// decoded.
pub async fn run_once<T: Transport>(transport: T, config: &Config) -> Result<Telemetry> {
    let mut poller = Poller::new(config, SnapshotStore::new());
    let report = poller.run_once(transport).await;

    if let Some((tracked, e)) = report.errors().next() {
        bail!("{} failed: {}", tracked.command(), e);
    }

    poller
        .store()
        .latest()
        .telemetry(config.scale_factors())
        .ok_or_else(|| anyhow!("cycle {} left the snapshot incomplete", report.cycle))
}

/// Poll in the background and print a record every time a cycle brings fresh
/// values, until `shutdown` fires.
pub async fn run_continuous<T>(transport: T, config: &Config, shutdown: broadcast::Sender<()>) -> Result<()>
where
    T: Transport + 'static,
{
    let store = SnapshotStore::new();
    let mut reader = store.reader();
    let factors = config.scale_factors();

    // the poller task holds the only store, so the reader sees the end of
    // polling as a closed channel
    let mut poller = Poller::new(config, store);
    let poller_shutdown = shutdown.subscribe();
    let poller_handle = tokio::spawn(async move {
        poller.run(transport, poller_shutdown).await;
    });

    let mut last_mode = None;
    while let Some(snapshots) = reader.wait_for(&REQUIRED).await {
        let mode = snapshots.mode();
        if mode != last_mode {
            if let Some(mode) = mode {
                info!("inverter mode is now {}", mode);
            }
            last_mode = mode;
        }

        match snapshots.telemetry(factors) {
            Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
            None => debug!("cycle {}: no warnings read yet, record held back", snapshots.cycle()),
        }
    }

    if let Err(e) = poller_handle.await {
        error!("poller task failed: {}", e);
    }

    Ok(())
}

pub async fn app(options: Options, config: Config) -> Result<()> {
    info!("voltronic-bridge {} starting", CARGO_PKG_VERSION);

    let device = Device::open(config.device(), config.baud_rate())
        .with_context(|| format!("cannot use inverter at {}", config.device()))?;

    match options.run_mode() {
        RunMode::Raw { command, reply_length } => {
            let reply = run_raw(device, &config, &command, reply_length).await?;
            println!("Reply:  {}", reply.text());
        }
        RunMode::Once => {
            let record = run_once(device, &config).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        RunMode::Continuous { runtime } => {
            let (shutdown_tx, _) = broadcast::channel(1);

            let ctrl_c_tx = shutdown_tx.clone();
            tokio::spawn(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to listen for Ctrl+C: {}", e);
                }
                info!("Ctrl+C received, stopping");
                let _ = ctrl_c_tx.send(());
            });

            if let Some(runtime) = runtime {
                let timer_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(runtime).await;
                    info!("runtime of {}s reached, stopping", runtime.as_secs());
                    let _ = timer_tx.send(());
                });
            }

            run_continuous(device, &config, shutdown_tx).await?;
        }
    }

    info!("voltronic-bridge finished");
    Ok(())
}
