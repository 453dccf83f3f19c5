//! Session synchronization and resilience layer for Quest game clients.
//!
//! The server owns the game; this crate keeps a local view of it usable over
//! an unreliable connection. [`GameClient`] wires the pieces together:
//!
//! - [`net::NetworkClient`] injects the session id and retries transient failures.
//! - [`health::HealthMonitor`] probes liveness on its own timer.
//! - [`dispatcher::CommandDispatcher`] sends commands and filters text-menu noise.
//! - [`reconciler::StateReconciler`] refreshes state with latest-wins generations.
//! - [`messages::MessageLog`] and [`notifications::NotificationStore`] hold what
//!   the player sees.
//!
//! Every component shares one [`ClientContext`]; shutting it down stops all
//! background work.

pub mod api;
pub mod catalogue;
pub mod client;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod health;
pub mod messages;
pub mod model;
pub mod net;
pub mod notifications;
pub mod poll;
pub mod reconciler;
pub mod session;

pub use client::GameClient;
pub use config::ClientConfig;
pub use context::ClientContext;
pub use error::{ApiError, ApiResult};
pub use events::{ClientEvent, LossOrigin};
pub use messages::{Message, MessageKind};
pub use reconciler::{RefreshOutcome, SpecialMode};
