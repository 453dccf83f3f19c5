use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::{paths, HealthResponse};
use crate::context::ClientContext;
use crate::events::{ClientEvent, EventBus, LossOrigin};
use crate::net::{ApiRequest, NetworkClient};
use crate::poll::{ticker, BackgroundTask};

/// Outcome of one liveness probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthStatus {
    pub ok: bool,
    pub detail: String,
}

impl HealthStatus {
    pub fn healthy(detail: impl Into<String>) -> Self {
        Self {
            ok: true,
            detail: detail.into(),
        }
    }

    pub fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: detail.into(),
        }
    }
}

#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> HealthStatus;
}

#[async_trait]
impl HealthProbe for NetworkClient {
    async fn probe(&self) -> HealthStatus {
        let stamp = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        let request = ApiRequest::get(paths::HEALTH)
            .with_query("t", stamp)
            .with_timeout(self.context().config().health_probe_timeout)
            .without_retry()
            .without_session();
        match self.send_as::<HealthResponse>(request).await {
            Ok(response) if response.success => {
                let status = response
                    .data
                    .and_then(|data| data.status)
                    .unwrap_or_else(|| "ok".to_string());
                HealthStatus::healthy(status)
            }
            Ok(response) => HealthStatus::unhealthy(
                response
                    .details
                    .or(response.error)
                    .unwrap_or_else(|| "server reported unhealthy".to_string()),
            ),
            Err(err) => HealthStatus::unhealthy(err.to_string()),
        }
    }
}

/// What a probe result means for the connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthTransition {
    Unchanged,
    Lost { detail: String },
    Restored,
}

/// Consecutive failure counter with a one-shot threshold.
#[derive(Debug, Clone)]
pub struct FailureCounter {
    threshold: u32,
    consecutive: u32,
    lost: bool,
}

impl FailureCounter {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive: 0,
            lost: false,
        }
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn observe(&mut self, status: &HealthStatus) -> HealthTransition {
        if status.ok {
            self.consecutive = 0;
            if std::mem::take(&mut self.lost) {
                return HealthTransition::Restored;
            }
            return HealthTransition::Unchanged;
        }

        self.consecutive = self.consecutive.saturating_add(1);
        if self.consecutive == self.threshold {
            self.lost = true;
            return HealthTransition::Lost {
                detail: status.detail.clone(),
            };
        }
        HealthTransition::Unchanged
    }
}

/// Periodic liveness probe independent of other traffic.
pub struct HealthMonitor {
    probe: Arc<dyn HealthProbe>,
    events: EventBus,
    threshold: u32,
    token: CancellationToken,
}

impl HealthMonitor {
    pub fn new(probe: Arc<dyn HealthProbe>, events: EventBus, threshold: u32) -> Self {
        Self {
            probe,
            events,
            threshold,
            token: CancellationToken::new(),
        }
    }

    pub fn for_context(ctx: &ClientContext, probe: Arc<dyn HealthProbe>) -> Self {
        Self {
            probe,
            events: ctx.events().clone(),
            threshold: ctx.config().health_failure_threshold,
            token: ctx.child_token(),
        }
    }

    /// Probes immediately and then every `interval` until stopped.
    pub fn start(self, interval: Duration) -> BackgroundTask {
        let token = self.token.clone();
        let task = tokio::spawn(async move {
            let mut counter = FailureCounter::new(self.threshold);
            let mut ticker = ticker(interval);
            loop {
                tokio::select! {
                    _ = self.token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let status = tokio::select! {
                    _ = self.token.cancelled() => break,
                    status = self.probe.probe() => status,
                };
                match counter.observe(&status) {
                    HealthTransition::Lost { detail } => {
                        warn!(
                            target: "quest::health",
                            failures = counter.consecutive(),
                            detail = %detail,
                            "backend unreachable"
                        );
                        self.events.publish(ClientEvent::ConnectionLost {
                            origin: LossOrigin::HealthProbe,
                            detail,
                        });
                    }
                    HealthTransition::Restored => {
                        debug!(target: "quest::health", "backend reachable again");
                        self.events.publish(ClientEvent::ConnectionRestored);
                    }
                    HealthTransition::Unchanged => {
                        debug!(
                            target: "quest::health",
                            ok = status.ok,
                            failures = counter.consecutive(),
                            "health probe"
                        );
                    }
                }
            }
        });
        BackgroundTask::new(token, task)
    }
}
