//! Per-subscriber delivery timers.

use crate::metrics::cache::PollingCache;
use crate::metrics::data::{SensorReading, Subscriber};
use crate::metrics::sources::OsNativeSource;
use crate::web::messages::ServerMessage;
use crate::web::transport::Transport;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error};

/// A running delivery timer. Dropping it cancels the timer.
pub struct DeliveryHandle {
    task: JoinHandle<()>,
    cadence_ms: u64,
    last_delivery: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl DeliveryHandle {
    pub fn cadence_ms(&self) -> u64 {
        self.cadence_ms
    }

    pub fn last_delivery_at(&self) -> Option<DateTime<Utc>> {
        self.last_delivery.lock().ok().and_then(|at| *at)
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for DeliveryHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Pushes cached snapshots to subscribers on their own cadence.
///
/// Delivery never triggers a sensor poll; every push reads
/// [`PollingCache::latest`].
#[derive(Clone)]
pub struct BroadcastScheduler {
    cache: Arc<PollingCache>,
}

impl BroadcastScheduler {
    pub fn new(cache: Arc<PollingCache>) -> Self {
        Self { cache }
    }

    /// Start a repeating timer for `subscriber`. The first push happens one
    /// cadence after attach.
    pub fn attach(&self, subscriber: &Subscriber, transport: Arc<dyn Transport>) -> DeliveryHandle {
        let cadence_ms = subscriber.cadence_ms;
        let period = Duration::from_millis(cadence_ms);
        let last_delivery = Arc::new(Mutex::new(None));
        let cache = Arc::clone(&self.cache);
        let stamp = Arc::clone(&last_delivery);
        let id = subscriber.id.clone();

        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !transport.is_open() {
                    debug!("transport {} is no longer open, stopping delivery", id);
                    break;
                }
                if deliver(&cache, transport.as_ref()).await {
                    if let Ok(mut at) = stamp.lock() {
                        *at = Some(Utc::now());
                    }
                }
            }
        });

        DeliveryHandle {
            task,
            cadence_ms,
            last_delivery,
        }
    }

    /// Detach a subscriber by cancelling its timer.
    pub fn detach(&self, handle: DeliveryHandle) {
        drop(handle);
    }

    /// Send the current snapshot immediately, outside the timer.
    pub async fn send_now(&self, transport: &dyn Transport) -> bool {
        deliver(&self.cache, transport).await
    }
}

async fn deliver(cache: &PollingCache, transport: &dyn Transport) -> bool {
    if !transport.is_open() {
        return false;
    }
    let mut reading = cache.latest();
    if reading.memory.is_none() {
        // Same answer the HTTP endpoint gives when no sensor source has one.
        if let Some(memory) = OsNativeSource::memory().await {
            reading = Arc::new(SensorReading {
                memory: Some(memory),
                ..SensorReading::clone(&reading)
            });
        }
    }
    let json = match ServerMessage::snapshot(&reading).to_json() {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize snapshot: {}", e);
            return false;
        }
    };
    match transport.send_text(json) {
        Ok(()) => true,
        Err(e) => {
            debug!("snapshot not delivered to {}: {}", transport.id(), e);
            false
        }
    }
}
