use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, warn};

use crate::api::{paths, MarkReadRequest, Notification, NotificationListResponse};
use crate::error::{ApiError, ApiResult};
use crate::net::{ApiRequest, NetworkClient};
use crate::poll::{ticker, BackgroundTask};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationFilter {
    pub unread_only: bool,
    pub kind: Option<String>,
    pub limit: u32,
}

impl Default for NotificationFilter {
    fn default() -> Self {
        Self {
            unread_only: true,
            kind: None,
            limit: 50,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NotificationPage {
    pub notifications: Vec<Notification>,
    pub unread_total: u64,
}

/// Server-side notification inbox with a read-mostly local copy.
#[derive(Clone, Debug)]
pub struct NotificationStore {
    net: NetworkClient,
    cache: Arc<RwLock<NotificationPage>>,
}

impl NotificationStore {
    pub fn new(net: NetworkClient) -> Self {
        Self {
            net,
            cache: Arc::new(RwLock::new(NotificationPage::default())),
        }
    }

    pub async fn list(&self, filter: &NotificationFilter) -> ApiResult<NotificationPage> {
        self.require_session()?;
        let mut request = ApiRequest::get(paths::NOTIFICATIONS)
            .with_query("solo_non_lette", filter.unread_only)
            .with_query("limite", filter.limit);
        if let Some(kind) = &filter.kind {
            request = request.with_query("tipo", kind);
        }
        let response: NotificationListResponse = self.net.send_as(request).await?;
        let page = NotificationPage {
            notifications: response.notifications,
            unread_total: response.unread_total,
        };
        *self.cache.write() = page.clone();
        Ok(page)
    }

    /// Marks one notification read on the server. The cache is untouched
    /// until the next `list`.
    pub async fn mark_read(&self, id: Value) -> ApiResult<Value> {
        self.require_session()?;
        let request = ApiRequest::post(paths::MARK_NOTIFICATION).with_json(&MarkReadRequest {
            id: Some(id),
            all: false,
        })?;
        self.net.send(request).await
    }

    pub async fn mark_all_read(&self) -> ApiResult<Value> {
        self.require_session()?;
        let request = ApiRequest::post(paths::MARK_NOTIFICATION)
            .with_json(&MarkReadRequest { id: None, all: true })?;
        self.net.send(request).await
    }

    pub fn cached(&self) -> Vec<Notification> {
        self.cache.read().notifications.clone()
    }

    pub fn unread_total(&self) -> u64 {
        self.cache.read().unread_total
    }

    pub fn reset(&self) {
        *self.cache.write() = NotificationPage::default();
    }

    /// Refreshes the unread cache every `interval` while a session is held.
    pub fn spawn_poller(&self, interval: Duration) -> BackgroundTask {
        let token = self.net.context().child_token();
        let store = self.clone();
        let task = {
            let token = token.clone();
            tokio::spawn(async move {
                let mut ticker = ticker(interval);
                let filter = NotificationFilter::default();
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {}
                    }
                    if !store.net.context().session().is_active() {
                        continue;
                    }
                    match store.list(&filter).await {
                        Ok(page) => debug!(
                            target: "quest::notify",
                            unread = page.unread_total,
                            "notifications polled"
                        ),
                        Err(err) => warn!(
                            target: "quest::notify",
                            error = %err,
                            "notification poll failed"
                        ),
                    }
                }
            })
        };
        BackgroundTask::new(token, task)
    }

    /// Without a held session every call fails with [`ApiError::NoSession`],
    /// which [`ApiError::is_session_expired`] reports as an expiry.
    fn require_session(&self) -> ApiResult<()> {
        if self.net.context().session().is_active() {
            Ok(())
        } else {
            Err(ApiError::NoSession)
        }
    }
}
