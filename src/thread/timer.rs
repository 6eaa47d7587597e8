//! Periodic events feeding the node's event loop.

use std::time::Duration;

use crate::node::Event;
use crate::shared::Shared;

/// Every `timeout`, reports the peers that stayed silent for the whole period.
pub async fn monitor(shared_tx: Shared, timeout: Duration) {
    let mut interval = tokio::time::interval(timeout);
    // First tick completes immediately, before anyone had a chance to talk
    interval.tick().await;
    loop {
        interval.tick().await;
        let faulty = shared_tx.write().take_faulty();
        shared_tx.read().send_event(Event::Faulty(faulty));
    }
}

/// Every `timeout`, asks the replica to broadcast its slot out.
pub async fn heartbeat(shared_tx: Shared, timeout: Duration) {
    let mut interval = tokio::time::interval(timeout);
    loop {
        interval.tick().await;
        shared_tx.read().send_event(Event::Tick);
    }
}
