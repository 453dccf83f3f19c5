use tokio::sync::broadcast;

/// Which component noticed the backend going away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossOrigin {
    Transport,
    HealthProbe,
}

/// One-shot signals for the UI shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    SessionExpired,
    ConnectionLost { origin: LossOrigin, detail: String },
    ConnectionRestored,
    DestinationPickerRequested,
}

/// In-process fan-out of [`ClientEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ClientEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.sender.subscribe()
    }

    /// Returns how many subscribers received the event. Zero is fine.
    pub fn publish(&self, event: ClientEvent) -> usize {
        tracing::debug!(target: "quest::events", ?event, "publishing client event");
        self.sender.send(event).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
