use std::sync::Arc;
use tokio::sync::watch;

/// Connectivity state shared between the host environment and the
/// scheduler. The host flips it from whatever signal it has (OS events, a
/// failed probe); the scheduler subscribes for transitions.
#[derive(Debug, Clone)]
pub struct NetworkMonitor {
    state: Arc<watch::Sender<bool>>,
}

impl NetworkMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _) = watch::channel(initially_online);
        Self {
            state: Arc::new(tx),
        }
    }

    pub fn set_online(&self) {
        self.set(true);
    }

    pub fn set_offline(&self) {
        self.set(false);
    }

    fn set(&self, online: bool) {
        let changed = self.state.send_if_modified(|current| {
            if *current != online {
                *current = online;
                true
            } else {
                false
            }
        });
        if changed {
            tracing::info!(
                "Network status changed: {}",
                if online { "online" } else { "offline" }
            );
        }
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Listener hook for status transitions.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}
