//! Connected subscribers and the zero-crossing lifecycle.
//!
//! The first subscriber starts the sensor utility and polling; the last one
//! to leave stops both and wipes the cache. The entries lock is held across
//! those transitions so concurrent connects and disconnects are serialized.

use crate::metrics::cache::PollingCache;
use crate::metrics::config::MonitorConfig;
use crate::metrics::data::{DeviceClass, Subscriber, SubscriberId};
use crate::metrics::process::{LaunchOutcome, ProcessManager, TerminateOutcome};
use crate::state::SubscriberCount;
use crate::web::broadcast::{BroadcastScheduler, DeliveryHandle};
use crate::web::messages::ServerMessage;
use crate::web::transport::Transport;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

struct Entry {
    subscriber: Subscriber,
    transport: Arc<dyn Transport>,
    delivery: DeliveryHandle,
    upgraded: bool,
}

pub struct SubscriberRegistry {
    config: Arc<MonitorConfig>,
    process: Arc<ProcessManager>,
    cache: Arc<PollingCache>,
    scheduler: BroadcastScheduler,
    count: SubscriberCount,
    entries: Mutex<HashMap<SubscriberId, Entry>>,
}

impl SubscriberRegistry {
    pub fn new(
        config: Arc<MonitorConfig>,
        process: Arc<ProcessManager>,
        cache: Arc<PollingCache>,
        scheduler: BroadcastScheduler,
        count: SubscriberCount,
    ) -> Self {
        Self {
            config,
            process,
            cache,
            scheduler,
            count,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn count(&self) -> &SubscriberCount {
        &self.count
    }

    /// Add a subscriber for `transport`. Registering the same transport twice
    /// returns the existing subscriber.
    pub async fn register(&self, transport: Arc<dyn Transport>, device: DeviceClass) -> Subscriber {
        let mut entries = self.entries.lock().await;
        let id = SubscriberId::new(transport.id());
        if let Some(existing) = entries.get(&id) {
            debug!("subscriber {} already registered", id);
            return existing.subscriber.clone();
        }

        let was_empty = entries.is_empty();
        let subscriber = Subscriber {
            id: id.clone(),
            device_class: device,
            cadence_ms: self.config.cadence_for(device),
            last_delivery_at: None,
        };
        let delivery = self.scheduler.attach(&subscriber, Arc::clone(&transport));
        entries.insert(
            id.clone(),
            Entry {
                subscriber: subscriber.clone(),
                transport,
                delivery,
                upgraded: false,
            },
        );
        self.count.set(entries.len());
        info!("subscriber {} connected ({} active)", id, entries.len());

        if was_empty {
            info!("first subscriber arrived, starting monitoring");
            self.bring_up().await;
        }
        subscriber
    }

    /// Remove a subscriber. Returns false if it was not registered.
    pub async fn unregister(&self, id: &SubscriberId) -> bool {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.remove(id) else {
            return false;
        };
        self.scheduler.detach(entry.delivery);
        self.count.set(entries.len());
        info!("subscriber {} disconnected ({} active)", id, entries.len());

        if entries.is_empty() {
            info!("last subscriber left, stopping monitoring");
            self.tear_down().await;
        }
        true
    }

    /// Record a device announcement. A mobile announcement moves the
    /// subscriber to the slower cadence once; returns true if that happened.
    pub async fn announce_device(&self, id: &SubscriberId, device: DeviceClass) -> bool {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(id) else {
            return false;
        };
        if device != DeviceClass::Mobile || entry.upgraded {
            debug!("subscriber {} announced as {:?}", id, device);
            return false;
        }

        entry.subscriber.device_class = DeviceClass::Mobile;
        entry.subscriber.cadence_ms = self.config.cadence_for(DeviceClass::Mobile);
        let slower = self
            .scheduler
            .attach(&entry.subscriber, Arc::clone(&entry.transport));
        self.scheduler
            .detach(std::mem::replace(&mut entry.delivery, slower));
        entry.upgraded = true;
        info!(
            "subscriber {} is a mobile device, cadence now {}ms",
            id, entry.subscriber.cadence_ms
        );
        true
    }

    /// Drop subscribers whose transport is no longer open. If nobody is left
    /// but monitoring is still up, take it down. Returns how many were pruned.
    pub async fn sweep(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let stale: Vec<SubscriberId> = entries
            .iter()
            .filter(|(_, e)| !e.transport.is_open() || !e.delivery.is_active())
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            if let Some(entry) = entries.remove(id) {
                self.scheduler.detach(entry.delivery);
            }
            debug!("swept stale subscriber {}", id);
        }
        self.count.set(entries.len());

        if !stale.is_empty() {
            info!("sweep removed {} stale subscriber(s)", stale.len());
        }
        if entries.is_empty() && (self.cache.is_polling() || self.process.is_running().await) {
            warn!("no subscribers but monitoring still active, stopping it");
            self.tear_down().await;
        }
        stale.len()
    }

    /// Send a `systemBroadcast` to every open subscriber. Returns the number
    /// of subscribers reached.
    pub async fn broadcast(&self, fields: Map<String, Value>) -> usize {
        let json = match ServerMessage::broadcast(fields).to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!("could not serialize broadcast: {}", e);
                return 0;
            }
        };
        let entries = self.entries.lock().await;
        entries
            .values()
            .filter(|e| e.transport.is_open())
            .filter(|e| e.transport.send_text(json.clone()).is_ok())
            .count()
    }

    /// Start the sensor utility on request, and polling if anyone listens.
    pub async fn start_monitoring(&self) -> LaunchOutcome {
        let _entries = self.entries.lock().await;
        let outcome = self.process.start().await;
        if self.count.has_audience() {
            self.cache.start_polling();
        }
        outcome
    }

    /// Stop polling and the sensor utility without dropping subscribers.
    pub async fn stop_monitoring(&self) -> TerminateOutcome {
        let _entries = self.entries.lock().await;
        self.cache.stop_polling();
        self.cache.clear().await;
        self.process.stop().await
    }

    /// Close every transport and release all resources.
    pub async fn close_all(&self) {
        let mut entries = self.entries.lock().await;
        for (_, entry) in entries.drain() {
            entry.transport.close();
            self.scheduler.detach(entry.delivery);
        }
        self.count.set(0);
        self.tear_down().await;
    }

    pub async fn subscribers(&self) -> Vec<Subscriber> {
        let entries = self.entries.lock().await;
        entries
            .values()
            .map(|e| Subscriber {
                cadence_ms: e.delivery.cadence_ms(),
                last_delivery_at: e.delivery.last_delivery_at(),
                ..e.subscriber.clone()
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    async fn bring_up(&self) {
        match self.process.start().await {
            LaunchOutcome::Failed { reason } => {
                warn!("sensor utility unavailable, using fallback sources: {}", reason);
            }
            outcome => debug!("sensor utility: {:?}", outcome),
        }
        self.cache.start_polling();
    }

    async fn tear_down(&self) {
        self.cache.stop_polling();
        self.cache.clear().await;
        match self.process.force_terminate().await {
            TerminateOutcome::Failed { reason } => {
                warn!("could not stop sensor utility: {}", reason);
            }
            outcome => debug!("sensor utility: {:?}", outcome),
        }
    }
}
