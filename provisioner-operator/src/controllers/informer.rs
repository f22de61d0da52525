//! Polling informer
//!
//! Lists one resource kind every resync interval and turns the difference
//! with the previous listing into watch events. Every object still present
//! is re-delivered as `Updated` on each resync so that level-triggered
//! controllers converge even when an event was missed.

use provisioner_core::domain::Resource;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{self, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::store::{ResourceStore, StoreResult};

#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<T> {
    Added(T),
    Updated { old: T, new: T },
    Deleted(T),
}

impl<T> WatchEvent<T> {
    /// The current object, or the last known one for deletions
    pub fn object(&self) -> &T {
        match self {
            WatchEvent::Added(obj) | WatchEvent::Deleted(obj) => obj,
            WatchEvent::Updated { new, .. } => new,
        }
    }
}

pub struct PollingInformer<T: Resource> {
    store: Arc<dyn ResourceStore<T>>,
    interval: Duration,
    subscribers: Vec<mpsc::Sender<WatchEvent<T>>>,
    known: HashMap<String, T>,
}

impl<T: Resource> PollingInformer<T> {
    pub fn new(store: Arc<dyn ResourceStore<T>>, interval: Duration) -> Self {
        Self {
            store,
            interval,
            subscribers: Vec::new(),
            known: HashMap::new(),
        }
    }

    pub fn subscribe(&mut self, buffer: usize) -> mpsc::Receiver<WatchEvent<T>> {
        let (tx, rx) = mpsc::channel(buffer);
        self.subscribers.push(tx);
        rx
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            "Starting {} informer (resync interval: {:?})",
            T::KIND,
            self.interval
        );
        let mut ticker = time::interval(self.interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.resync().await {
                warn!("Failed to list {} resources: {}", T::KIND, e);
            }
        }

        debug!("{} informer stopped", T::KIND);
    }

    /// Lists once and delivers the resulting events
    pub async fn resync(&mut self) -> StoreResult<usize> {
        let items = self.store.list().await?;
        let mut previous = std::mem::take(&mut self.known);
        let mut events = Vec::with_capacity(items.len());

        for item in items {
            let key = item.key();
            let event = match previous.remove(&key) {
                Some(old) => WatchEvent::Updated {
                    old,
                    new: item.clone(),
                },
                None => WatchEvent::Added(item.clone()),
            };
            self.known.insert(key, item);
            events.push(event);
        }
        events.extend(previous.into_values().map(WatchEvent::Deleted));

        let count = events.len();
        for event in events {
            self.deliver(event).await;
        }
        Ok(count)
    }

    async fn deliver(&mut self, event: WatchEvent<T>) {
        // Subscribers whose receiver was dropped are removed
        let mut open = Vec::with_capacity(self.subscribers.len());
        for tx in self.subscribers.drain(..) {
            if tx.send(event.clone()).await.is_ok() {
                open.push(tx);
            }
        }
        self.subscribers = open;
    }
}
