use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use crate::bus::{EventBus, Topic};
use crate::schema::Visit;
use crate::stock::StockItem;
use crate::store::Stores;

/// One line of the JSONL seed feed.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum SeedRecord {
    Stock(StockItem),
    Service { name: String, charge: f64 },
    Visit(Box<Visit>),
}

/// Stream a seed feed into the stores, announcing each visit on the bus.
/// Invalid lines are skipped, not fatal. Returns the number of visits
/// loaded.
pub async fn stream_seed(path: &str, stores: &Stores, bus: &EventBus) -> anyhow::Result<usize> {
    let file = File::open(path).await?;
    let reader = BufReader::new(file);
    let mut lines = reader.lines();
    let mut visits = 0;

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<SeedRecord>(&line) {
            Ok(SeedRecord::Stock(item)) => {
                let id = item.id;
                stores.stock.insert(item).await;
                bus.publish(Topic::StockChanged, id);
            }
            Ok(SeedRecord::Service { name, charge }) => {
                stores.catalog.set(&name, charge).await;
            }
            Ok(SeedRecord::Visit(visit)) => {
                let id = visit.id;
                stores.visits.insert(*visit).await;
                bus.publish(Topic::VisitUpdated, id);
                visits += 1;
            }
            Err(err) => warn!(%err, "Invalid seed record skipped"),
        }
    }

    Ok(visits)
}
