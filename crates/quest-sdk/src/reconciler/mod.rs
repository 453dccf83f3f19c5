//! Keeps the local [`StateSnapshot`]/[`MapSnapshot`] in step with the server.
//!
//! Each refresh takes a generation number when dispatched and is applied only
//! if no later refresh has been applied already. Forced refreshes run as a
//! bounded [`PollSchedule`] cascade to absorb server-side propagation lag.

pub mod mode;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{paths, CommandRequest, CommandResponse, Destination};
use crate::config::ReconcileTimings;
use crate::error::{ApiError, ApiResult};
use crate::events::ClientEvent;
use crate::messages::{Message, MessageLog};
use crate::model::{MapSnapshot, StateSnapshot};
use crate::net::{ApiRequest, NetworkClient};
use crate::poll::{ticker, BackgroundTask, CascadeHandle};
pub use mode::{ModeDetector, SpecialMode};

const PICKER_PROMPT: &str = "Choose a destination on the map to continue your journey.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Applied { generation: u64, mode: SpecialMode },
    /// A later refresh was applied first; this response was dropped.
    Superseded { generation: u64 },
    /// Throttled: a refresh was dispatched less than the minimum interval ago.
    Skipped,
}

#[derive(Debug, Default)]
struct View {
    state: Option<StateSnapshot>,
    map: Option<MapSnapshot>,
    mode: SpecialMode,
    applied_state: u64,
    applied_map: u64,
    picker_visible: bool,
    last_dispatch: Option<Instant>,
}

#[derive(Clone, Debug)]
pub struct StateReconciler {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    net: NetworkClient,
    messages: Arc<MessageLog>,
    detector: ModeDetector,
    timings: ReconcileTimings,
    generations: AtomicU64,
    view: RwLock<View>,
}

impl StateReconciler {
    pub fn new(net: NetworkClient, messages: Arc<MessageLog>) -> Self {
        let config = net.context().config();
        let detector = ModeDetector::new(&config.selection_markers_extra);
        let timings = config.reconcile;
        Self {
            inner: Arc::new(Inner {
                net,
                messages,
                detector,
                timings,
                generations: AtomicU64::new(0),
                view: RwLock::new(View::default()),
            }),
        }
    }

    pub fn state(&self) -> Option<StateSnapshot> {
        self.inner.view.read().state.clone()
    }

    pub fn map(&self) -> Option<MapSnapshot> {
        self.inner.view.read().map.clone()
    }

    pub fn mode(&self) -> SpecialMode {
        self.inner.view.read().mode
    }

    pub fn picker_visible(&self) -> bool {
        self.inner.view.read().picker_visible
    }

    pub fn dismiss_picker(&self) {
        self.inner.view.write().picker_visible = false;
    }

    /// Forgets the local view. Responses still in flight are discarded.
    pub fn reset(&self) {
        let latest = self.inner.generations.load(Ordering::SeqCst);
        let mut view = self.inner.view.write();
        *view = View {
            applied_state: latest,
            applied_map: latest,
            ..View::default()
        };
    }

    /// Fetches state and, best-effort, the map. Non-forced calls are throttled.
    pub async fn refresh(&self, force: bool) -> ApiResult<RefreshOutcome> {
        self.require_session()?;
        {
            let mut view = self.inner.view.write();
            let now = Instant::now();
            if let Some(last) = view.last_dispatch {
                if !force && now.duration_since(last) < self.inner.timings.min_refresh_interval {
                    debug!(target: "quest::reconcile", "refresh throttled");
                    return Ok(RefreshOutcome::Skipped);
                }
            }
            view.last_dispatch = Some(now);
        }

        let (outcome, mode) = self.pull_state().await?;
        let RefreshOutcome::Applied { generation, .. } = outcome else {
            return Ok(outcome);
        };

        self.pull_map(generation).await;
        self.react_to_mode(mode);
        Ok(outcome)
    }

    /// Runs the whole forced cascade inline; returns the number of fetches issued.
    pub async fn force_refresh(&self) -> u32 {
        let token = self.inner.net.context().child_token();
        self.run_cascade(&token).await
    }

    /// Runs the forced cascade in the background.
    pub fn spawn_force_refresh(&self) -> CascadeHandle {
        let token = self.inner.net.context().child_token();
        let this = self.clone();
        let task = {
            let token = token.clone();
            tokio::spawn(async move { this.run_cascade(&token).await })
        };
        CascadeHandle::new(token, task)
    }

    /// Issues non-forced refreshes every `interval` while a session is held.
    pub fn spawn_auto_refresh(&self, interval: Duration) -> BackgroundTask {
        let token = self.inner.net.context().child_token();
        let this = self.clone();
        let task = {
            let token = token.clone();
            tokio::spawn(async move {
                let mut ticker = ticker(interval);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {}
                    }
                    if !this.inner.net.context().session().is_active() {
                        continue;
                    }
                    if let Err(err) = this.refresh(false).await {
                        warn!(target: "quest::reconcile", error = %err, "auto refresh failed");
                    }
                }
            })
        };
        BackgroundTask::new(token, task)
    }

    /// Destination-selection protocol: send the travel command, and if the
    /// server is still waiting on its numeric menu, answer it by list index.
    pub async fn travel_to(&self, destination: &str) -> ApiResult<CommandResponse> {
        self.require_session()?;
        let timings = self.inner.timings;

        let first = self.send_command(&format!("viaggia {destination}")).await?;
        tokio::time::sleep(timings.travel_settle).await;

        let (_, mode) = self.pull_state().await?;
        if mode != SpecialMode::DestinationSelection {
            self.dismiss_picker();
            return Ok(first);
        }

        let destinations = self.destinations().await;
        let choice = destinations
            .iter()
            .position(|candidate| candidate.matches(destination))
            .map(|index| index + 1)
            .unwrap_or(1);
        info!(
            target: "quest::reconcile",
            destination,
            choice,
            listed = destinations.len(),
            "travel did not leave destination selection; answering the menu"
        );

        let response = self.send_command(&choice.to_string()).await?;
        tokio::time::sleep(timings.travel_fallback_settle).await;

        let (_, mode) = self.pull_state().await?;
        if mode != SpecialMode::DestinationSelection {
            self.dismiss_picker();
        }
        Ok(response)
    }

    /// Lists reachable destinations; failures yield an empty list.
    pub async fn destinations(&self) -> Vec<Destination> {
        match self
            .inner
            .net
            .send_as::<Vec<Destination>>(ApiRequest::get(paths::DESTINATIONS))
            .await
        {
            Ok(list) => list,
            Err(err) => {
                warn!(target: "quest::reconcile", error = %err, "failed to list destinations");
                Vec::new()
            }
        }
    }

    async fn run_cascade(&self, token: &CancellationToken) -> u32 {
        self.inner
            .timings
            .cascade
            .run(token, |attempt| {
                let this = self.clone();
                async move {
                    match this.refresh(true).await {
                        Ok(outcome) => debug!(
                            target: "quest::reconcile",
                            attempt,
                            ?outcome,
                            "cascade refresh"
                        ),
                        Err(err) => warn!(
                            target: "quest::reconcile",
                            attempt,
                            error = %err,
                            "cascade refresh failed"
                        ),
                    }
                }
            })
            .await
    }

    async fn send_command(&self, text: &str) -> ApiResult<CommandResponse> {
        let request = ApiRequest::post(paths::COMMAND).with_json(&CommandRequest { text })?;
        self.inner.net.send_as(request).await
    }

    /// Fetches `/stato` and applies it if no later generation has landed.
    async fn pull_state(&self) -> ApiResult<(RefreshOutcome, SpecialMode)> {
        let generation = self.inner.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let payload = self.inner.net.send(ApiRequest::get(paths::STATE)).await?;
        let snapshot = StateSnapshot::from_payload(payload, generation)?;
        let mode = self.inner.detector.detect(&snapshot.state_name, &snapshot.raw);

        let mut view = self.inner.view.write();
        if generation <= view.applied_state {
            debug!(
                target: "quest::reconcile",
                generation,
                applied = view.applied_state,
                "discarding superseded state"
            );
            return Ok((RefreshOutcome::Superseded { generation }, view.mode));
        }
        debug!(
            target: "quest::reconcile",
            generation,
            state = %snapshot.state_name,
            ?mode,
            "state applied"
        );
        view.applied_state = generation;
        view.state = Some(snapshot);
        view.mode = mode;
        Ok((RefreshOutcome::Applied { generation, mode }, mode))
    }

    async fn pull_map(&self, generation: u64) {
        let payload = match self.inner.net.send(ApiRequest::get(paths::MAP)).await {
            Ok(payload) => payload,
            Err(err) => {
                warn!(target: "quest::reconcile", error = %err, "map fetch failed; keeping previous map");
                return;
            }
        };
        match MapSnapshot::from_payload(&payload, generation) {
            Ok(map) => {
                let mut view = self.inner.view.write();
                if generation > view.applied_map {
                    view.applied_map = generation;
                    view.map = Some(map);
                }
            }
            Err(err) => {
                warn!(target: "quest::reconcile", error = %err, "unusable map payload; keeping previous map");
            }
        }
    }

    fn react_to_mode(&self, mode: SpecialMode) {
        match mode {
            SpecialMode::DestinationSelection => {
                let show = {
                    let mut view = self.inner.view.write();
                    let active = self.inner.net.context().session().is_active();
                    if active && !view.picker_visible {
                        view.picker_visible = true;
                        true
                    } else {
                        false
                    }
                };
                if show {
                    info!(target: "quest::reconcile", "destination selection detected");
                    self.inner
                        .net
                        .context()
                        .events()
                        .publish(ClientEvent::DestinationPickerRequested);
                    self.inner.messages.append(Message::system(PICKER_PROMPT));
                    self.spawn_force_refresh();
                }
            }
            SpecialMode::Regular => {
                let mut view = self.inner.view.write();
                if view.picker_visible {
                    debug!(target: "quest::reconcile", "destination selection left; hiding picker");
                    view.picker_visible = false;
                }
            }
        }
    }

    fn require_session(&self) -> ApiResult<()> {
        if self.inner.net.context().session().is_active() {
            Ok(())
        } else {
            Err(ApiError::NoSession)
        }
    }
}
