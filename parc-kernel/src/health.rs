use crate::graphs::GraphRegistry;
use crate::state::Shared;
use crate::store::InventoryStore;
use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, Serialize, Deserialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub hosts_tracked: u32,
    pub services_tracked: u32,
    pub graphs_loaded: u32,
    pub store_batch_fetches: u32,
    pub updates_published: u32,
    pub publish_errors: u32,
    pub mqtt_status: String,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    updates_published: std::sync::Arc<std::sync::atomic::AtomicU32>,
    publish_errors: std::sync::Arc<std::sync::atomic::AtomicU32>,
    mqtt_status: std::sync::Arc<parking_lot::Mutex<String>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            updates_published: std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0)),
            publish_errors: std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0)),
            mqtt_status: std::sync::Arc::new(parking_lot::Mutex::new("connecting".to_string())),
        }
    }

    pub fn mark_mqtt_connected(&self) {
        *self.mqtt_status.lock() = "connected".to_string();
    }

    pub fn mark_mqtt_disconnected(&self) {
        *self.mqtt_status.lock() = "disconnected".to_string();
    }

    pub fn note_published(&self) {
        self.updates_published.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn note_publish_error(&self) {
        self.publish_errors.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn get_health(
        &self,
        store: &Shared<InventoryStore>,
        graphs: &Shared<GraphRegistry>,
    ) -> KernelHealth {
        let uptime = self.start_time.elapsed().as_secs();
        let (counts, batch_fetches) = {
            let store = store.lock();
            (store.counts(), store.batch_fetches())
        };
        let graphs_count = graphs.lock().len() as u32;

        KernelHealth {
            uptime_seconds: uptime,
            hosts_tracked: counts.hosts,
            services_tracked: counts.services,
            graphs_loaded: graphs_count,
            store_batch_fetches: batch_fetches,
            updates_published: self.updates_published.load(std::sync::atomic::Ordering::Relaxed),
            publish_errors: self.publish_errors.load(std::sync::atomic::Ordering::Relaxed),
            mqtt_status: self.mqtt_status.lock().clone(),
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}
