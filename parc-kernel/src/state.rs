use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// Canal interne write-path → publisher pour les événements de mise à jour d'hôtes.
pub type UpdateSender = mpsc::UnboundedSender<crate::publisher::HostUpdateEvent>;
pub type UpdateReceiver = mpsc::UnboundedReceiver<crate::publisher::HostUpdateEvent>;

pub fn update_channel() -> (UpdateSender, UpdateReceiver) {
    mpsc::unbounded_channel()
}
