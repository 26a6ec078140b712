use clap::Parser;
use tokio::sync::mpsc;
use tokio::time::{Duration, interval};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use clinicops::bus::EventBus;
use clinicops::config::Config;
use clinicops::json_faker::write_fake_feed;
use clinicops::reader::stream_seed;
use clinicops::reporter::{billing_stats, print_stats, run_reporter};
use clinicops::schema::VisitStatus;
use clinicops::store::Stores;
use clinicops::{billing, station};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    let default_filter = if config.verbose {
        "clinicops=debug,info"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    if let Some(count) = config.generate {
        write_fake_feed(&config.feed_path, count)?;
        info!(path = %config.feed_path, visits = count, "fake feed written");
    }

    let stores = Stores::new();
    let bus = EventBus::default();

    let seeded = stream_seed(&config.feed_path, &stores, &bus).await?;
    info!(visits = seeded, feed = %config.feed_path, "seed feed loaded");

    let (billing_shutdown_tx, billing_shutdown_rx) = mpsc::channel(1);
    let (triage_shutdown_tx, triage_shutdown_rx) = mpsc::channel(1);
    let (reporter_shutdown_tx, reporter_shutdown_rx) = mpsc::channel(1);
    let (billed_tx, mut billed_rx) = mpsc::channel(64);

    let billing_task = tokio::spawn(billing::run_billing(
        config.clone(),
        stores.clone(),
        bus.clone(),
        Some(billed_tx),
        billing_shutdown_rx,
    ));
    let triage_task = tokio::spawn(station::run_triage(
        config.clone(),
        stores.clone(),
        bus.clone(),
        triage_shutdown_rx,
    ));
    let reporter_task = tokio::spawn(run_reporter(
        stores.invoices.clone(),
        config.report_secs,
        reporter_shutdown_rx,
    ));

    // tally commits so the log shows progress without verbose mode
    tokio::spawn(async move {
        let mut billed = 0usize;
        while let Some(invoice_id) = billed_rx.recv().await {
            billed += 1;
            info!(%invoice_id, billed, "invoice ready for payment");
        }
    });

    // run until every seeded visit is closed, or the operator interrupts
    let mut ticker = interval(Duration::from_secs(config.poll_secs.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let open = stores
                    .visits
                    .all()
                    .await
                    .iter()
                    .filter(|v| v.status != VisitStatus::Closed)
                    .count();
                if seeded > 0 && open == 0 {
                    info!("all visits reconciled");
                    break;
                }
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(err) = result {
                    error!(%err, "failed to listen for shutdown signal");
                }
                info!("interrupted; shutting down stations");
                break;
            }
        }
    }

    let _ = billing_shutdown_tx.send(()).await;
    let _ = triage_shutdown_tx.send(()).await;
    let _ = reporter_shutdown_tx.send(()).await;
    let _ = triage_task.await;
    if let Ok(Err(err)) = billing_task.await {
        error!(%err, "billing station exited with error");
    }
    let _ = reporter_task.await;

    let stats = billing_stats(&stores.invoices, chrono::Utc::now().date_naive()).await;
    print_stats(&stats);
    Ok(())
}
