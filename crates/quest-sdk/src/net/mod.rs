//! HTTP transport to the game server.
//!
//! Requests carry the held session id (query string for reads, body
//! field for writes). Connectivity failures and 5xx responses are resubmitted
//! per [`RetryLedger`](retry::RetryLedger) key; anything else surfaces at once.

pub mod retry;

use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::api::SESSION_FIELD;
use crate::context::ClientContext;
use crate::error::{ApiError, ApiResult};
use crate::events::{ClientEvent, LossOrigin};
use retry::{RetryDecision, RetryKey};

/// A single call against a path below the configured base url.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<Value>,
    timeout: Option<Duration>,
    retry: bool,
    session: bool,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into().trim_start_matches('/').to_string(),
            query: Vec::new(),
            body: None,
            timeout: None,
            retry: true,
            session: true,
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn with_json<T: Serialize>(mut self, body: &T) -> ApiResult<Self> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sends exactly once, bypassing the retry ledger.
    pub fn without_retry(mut self) -> Self {
        self.retry = false;
        self
    }

    /// Sends no session id, and a 401/404 is not read as session expiry.
    pub fn without_session(mut self) -> Self {
        self.session = false;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn key(&self) -> RetryKey {
        RetryKey::new(self.method.clone(), self.path.clone())
    }
}

#[derive(Clone, Debug)]
pub struct NetworkClient {
    http: Client,
    ctx: ClientContext,
}

impl NetworkClient {
    pub fn new(ctx: ClientContext) -> ApiResult<Self> {
        let http = Client::builder()
            .user_agent(concat!("quest-sdk/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, ctx })
    }

    pub fn context(&self) -> &ClientContext {
        &self.ctx
    }

    pub async fn send(&self, request: ApiRequest) -> ApiResult<Value> {
        let key = request.key();
        let policy = self.ctx.config().retry;

        loop {
            let err = match self.send_once(&request).await {
                Ok(value) => {
                    self.ctx.ledger().clear(&key);
                    debug!(target: "quest::net", key = %key, "request succeeded");
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !request.retry || !err.is_retryable() {
                self.ctx.ledger().clear(&key);
                return Err(err);
            }

            match self.ctx.ledger().record_failure(&key, policy.max_attempts) {
                RetryDecision::Retry { attempt } => {
                    warn!(
                        target: "quest::net",
                        key = %key,
                        attempt,
                        max_attempts = policy.max_attempts,
                        error = %err,
                        "request failed; retrying"
                    );
                    tokio::time::sleep(policy.delay).await;
                }
                RetryDecision::GiveUp { attempts } => {
                    warn!(
                        target: "quest::net",
                        key = %key,
                        attempts,
                        error = %err,
                        "request failed; giving up"
                    );
                    if let ApiError::Network { detail, .. } = &err {
                        self.ctx.events().publish(ClientEvent::ConnectionLost {
                            origin: LossOrigin::Transport,
                            detail: detail.clone(),
                        });
                    }
                    return Err(err);
                }
            }
        }
    }

    pub async fn send_as<T: DeserializeOwned>(&self, request: ApiRequest) -> ApiResult<T> {
        let value = self.send(request).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn send_once(&self, request: &ApiRequest) -> ApiResult<Value> {
        let url = self
            .ctx
            .config()
            .base_url
            .join(&request.path)
            .map_err(|err| ApiError::Parse(format!("invalid path {}: {err}", request.path)))?;
        let session = if request.session {
            self.ctx.session().id()
        } else {
            None
        };

        let mut builder = self
            .http
            .request(request.method.clone(), url)
            .timeout(request.timeout.unwrap_or(self.ctx.config().request_timeout));

        if request.method == Method::GET {
            let mut query = request.query.clone();
            if let Some(id) = &session {
                query.push((SESSION_FIELD.to_string(), id.clone()));
            }
            if !query.is_empty() {
                builder = builder.query(&query);
            }
        } else {
            if !request.query.is_empty() {
                builder = builder.query(&request.query);
            }
            builder = builder.json(&inject_session(request.body.clone(), session.as_deref()));
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if looks_like_html(&body) {
            error!(
                target: "quest::net",
                method = %request.method,
                path = %request.path,
                status = status.as_u16(),
                "received an HTML document where JSON was expected"
            );
            return Err(ApiError::Parse(format!(
                "{} {} returned an HTML document",
                request.method, request.path
            )));
        }

        if status.is_success() {
            if body.trim().is_empty() {
                return Ok(Value::Null);
            }
            return Ok(serde_json::from_str(&body)?);
        }

        Err(self.classify_failure(request, status, body))
    }

    fn classify_failure(&self, request: &ApiRequest, status: StatusCode, body: String) -> ApiError {
        let expired = request.session
            && (status == StatusCode::UNAUTHORIZED
                || (status == StatusCode::NOT_FOUND && mentions_session(&body)));
        if expired {
            let held = self.ctx.session().clear();
            warn!(
                target: "quest::session",
                status = status.as_u16(),
                held,
                "server reported the session as expired"
            );
            self.ctx.events().publish(ClientEvent::SessionExpired);
            return ApiError::SessionExpired { status };
        }
        if status.is_server_error() {
            ApiError::Server { status, body }
        } else {
            ApiError::Client { status, body }
        }
    }
}

/// Merges the session id into a JSON object body.
fn inject_session(body: Option<Value>, session: Option<&str>) -> Value {
    let mut object = match body {
        Some(Value::Object(map)) => map,
        Some(other) => return other,
        None => Map::new(),
    };
    if let Some(id) = session {
        object.insert(SESSION_FIELD.to_string(), Value::String(id.to_string()));
    }
    Value::Object(object)
}

fn looks_like_html(body: &str) -> bool {
    let head: String = body.trim_start().chars().take(64).collect();
    let head = head.to_ascii_lowercase();
    head.starts_with("<!doctype html") || head.starts_with("<html")
}

/// True when the error text of a 404 refers to the session.
fn mentions_session(body: &str) -> bool {
    let text = match serde_json::from_str::<Value>(body) {
        Ok(value) => ["errore", "error", "messaggio", "message"]
            .iter()
            .filter_map(|field| value.get(field).and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(" "),
        Err(_) => body.to_string(),
    };
    text.to_lowercase().contains("session")
}
