use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::api::{paths, CommandResponse, StartSessionRequest, StartSessionResponse};
use crate::catalogue::ClassCatalogue;
use crate::context::ClientContext;
use crate::dispatcher::CommandDispatcher;
use crate::error::{ApiError, ApiResult};
use crate::events::ClientEvent;
use crate::health::{HealthMonitor, HealthProbe};
use crate::messages::{Message, MessageLog};
use crate::net::{ApiRequest, NetworkClient};
use crate::notifications::NotificationStore;
use crate::poll::BackgroundTask;
use crate::reconciler::StateReconciler;

/// Entry point for UI shells: one per logical client.
#[derive(Clone, Debug)]
pub struct GameClient {
    ctx: ClientContext,
    net: NetworkClient,
    messages: Arc<MessageLog>,
    reconciler: StateReconciler,
    dispatcher: CommandDispatcher,
    notifications: NotificationStore,
    catalogue: ClassCatalogue,
}

impl GameClient {
    pub fn new(ctx: ClientContext) -> ApiResult<Self> {
        let net = NetworkClient::new(ctx.clone())?;
        let messages = Arc::new(MessageLog::new(ctx.config().message_capacity));
        let reconciler = StateReconciler::new(net.clone(), messages.clone());
        let dispatcher = CommandDispatcher::new(net.clone(), reconciler.clone(), messages.clone());
        Ok(Self {
            notifications: NotificationStore::new(net.clone()),
            catalogue: ClassCatalogue::new(net.clone()),
            ctx,
            net,
            messages,
            reconciler,
            dispatcher,
        })
    }

    pub fn context(&self) -> &ClientContext {
        &self.ctx
    }

    pub fn messages(&self) -> &MessageLog {
        &self.messages
    }

    pub fn reconciler(&self) -> &StateReconciler {
        &self.reconciler
    }

    pub fn notifications(&self) -> &NotificationStore {
        &self.notifications
    }

    pub fn catalogue(&self) -> &ClassCatalogue {
        &self.catalogue
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.ctx.events().subscribe()
    }

    pub fn has_session(&self) -> bool {
        self.ctx.session().is_active()
    }

    /// Checks liveness, creates a session and seeds the log with the welcome text.
    pub async fn start_session(&self, name: &str, class: &str) -> ApiResult<StartSessionResponse> {
        let health = self.net.probe().await;
        if !health.ok {
            warn!(target: "quest::session", detail = %health.detail, "server unhealthy; not starting session");
            return Err(ApiError::Unavailable(health.detail));
        }

        let request = ApiRequest::post(paths::START_SESSION)
            .with_json(&StartSessionRequest { name, class })?
            .with_timeout(self.ctx.config().session_start_timeout);
        let response: StartSessionResponse = self.net.send_as(request).await?;
        let session_id = response
            .session_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| ApiError::Parse("session start response has no id_sessione".into()))?;

        self.ctx.session().set(&session_id)?;
        info!(target: "quest::session", name, class, "session started");

        self.reconciler.reset();
        self.notifications.reset();
        self.messages.clear();
        if let Some(welcome) = response.welcome_text() {
            self.messages.append(Message::narrative(welcome));
        }
        self.reconciler.spawn_force_refresh();
        Ok(response)
    }

    /// Picks up a persisted session. Returns false when none is stored.
    pub async fn resume(&self) -> ApiResult<bool> {
        if self.ctx.session().reload()?.is_none() {
            return Ok(false);
        }
        info!(target: "quest::session", "resuming persisted session");
        self.reconciler.refresh(true).await?;
        Ok(true)
    }

    pub async fn execute(&self, command: &str) -> ApiResult<CommandResponse> {
        self.dispatcher.execute(command).await
    }

    pub async fn travel_to(&self, destination: &str) -> ApiResult<CommandResponse> {
        self.dispatcher.execute(&format!("viaggia {destination}")).await
    }

    /// Drops the session and every piece of state derived from it.
    pub fn logout(&self) {
        let held = self.ctx.session().clear();
        self.ctx.ledger().reset();
        self.messages.clear();
        self.reconciler.reset();
        self.notifications.reset();
        info!(target: "quest::session", held, "logged out");
    }

    pub fn start_health_monitor(&self) -> BackgroundTask {
        let probe: Arc<dyn HealthProbe> = Arc::new(self.net.clone());
        HealthMonitor::for_context(&self.ctx, probe).start(self.ctx.config().health_interval)
    }

    pub fn start_auto_refresh(&self) -> BackgroundTask {
        self.reconciler
            .spawn_auto_refresh(self.ctx.config().reconcile.auto_refresh_interval)
    }

    pub fn start_notification_poller(&self) -> BackgroundTask {
        self.notifications
            .spawn_poller(self.ctx.config().notification_poll_interval)
    }

    /// Cancels every background task started from this client.
    pub fn shutdown(&self) {
        self.ctx.shutdown();
    }
}
