use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::error::StoreError;
use crate::events::EventBus;
use crate::net::retry::RetryLedger;
use crate::session::{FileSessionStore, MemorySessionStore, SessionHandle, SessionStorage};

/// Per-client shared state handed to every component: configuration, the
/// held session, the retry ledger, the event bus and the shutdown token.
#[derive(Clone, Debug)]
pub struct ClientContext {
    inner: Arc<ContextInner>,
}

#[derive(Debug)]
struct ContextInner {
    config: ClientConfig,
    session: SessionHandle,
    ledger: RetryLedger,
    events: EventBus,
    shutdown: CancellationToken,
}

impl ClientContext {
    pub fn new(config: ClientConfig, storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                config,
                session: SessionHandle::new(storage),
                ledger: RetryLedger::default(),
                events: EventBus::default(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Uses `config.state_dir`, or `~/.quest` when unset.
    pub fn with_file_storage(config: ClientConfig) -> Result<Self, StoreError> {
        let store = match &config.state_dir {
            Some(dir) => FileSessionStore::new(dir),
            None => FileSessionStore::in_home()?,
        };
        Ok(Self::new(config, Arc::new(store)))
    }

    pub fn in_memory(config: ClientConfig) -> Self {
        Self::new(config, Arc::new(MemorySessionStore::new()))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn session(&self) -> &SessionHandle {
        &self.inner.session
    }

    pub fn ledger(&self) -> &RetryLedger {
        &self.inner.ledger
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Token for a background task; cancelled when the context shuts down.
    pub fn child_token(&self) -> CancellationToken {
        self.inner.shutdown.child_token()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    pub fn shutdown(&self) {
        tracing::debug!(target: "quest::session", "client context shutting down");
        self.inner.shutdown.cancel();
    }
}
