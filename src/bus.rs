use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// Notification topics stations publish on. Matches the write that caused
/// them, not the data: consumers refetch, they never merge payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    VisitUpdated,
    PharmacySaleRecorded,
    BillingUpdate,
    StockChanged,
}

/// Advisory event. Carries only the subject id and never financial values,
/// which could be stale by the time the event is read.
#[derive(Debug, Clone)]
pub struct Notice {
    pub topic: Topic,
    pub subject: Uuid,
}

/// Topic-based publish/subscribe between stations. Delivery is best-effort
/// and at-most-once per subscriber: a lagging or absent subscriber misses
/// events, and the next poll cycle heals the gap.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Notice>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, topic: Topic, subject: Uuid) {
        debug!(?topic, %subject, "event published");
        // no subscribers is fine; events are cache invalidation, not data
        let _ = self.tx.send(Notice { topic, subject });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
