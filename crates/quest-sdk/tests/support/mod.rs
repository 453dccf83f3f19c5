#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::Mutex;
use quest_sdk::config::ClientConfig;
use quest_sdk::poll::PollSchedule;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Canned reply that overrides the default handler for one request.
#[derive(Debug, Clone)]
pub struct Scripted {
    pub status: StatusCode,
    pub body: String,
}

#[derive(Debug)]
pub struct GameState {
    pub hits: HashMap<String, usize>,
    pub hit_times: HashMap<String, Vec<std::time::Instant>>,
    pub scripted: HashMap<String, VecDeque<Scripted>>,
    pub queries: Vec<(String, HashMap<String, String>)>,
    pub bodies: Vec<(String, Value)>,
    pub commands: Vec<String>,
    pub command_outputs: HashMap<String, Value>,
    pub state_name: String,
    pub state_queue: VecDeque<String>,
    pub state_delays: VecDeque<Duration>,
    pub healthy: bool,
    pub notifications: Vec<Value>,
}

impl Default for GameState {
    fn default() -> Self {
        Self {
            hits: HashMap::new(),
            hit_times: HashMap::new(),
            scripted: HashMap::new(),
            queries: Vec::new(),
            bodies: Vec::new(),
            commands: Vec::new(),
            command_outputs: HashMap::new(),
            state_name: "TavernaState".into(),
            state_queue: VecDeque::new(),
            state_delays: VecDeque::new(),
            healthy: true,
            notifications: vec![
                json!({"id": 1, "tipo": "sistema", "messaggio": "Benvenuto", "data": {}, "timestamp": 1.5, "letta": false}),
                json!({"id": 2, "tipo": "quest", "messaggio": "Nuova missione", "data": {"quest": "cantina"}, "timestamp": 2.5, "letta": false}),
            ],
        }
    }
}

#[derive(Clone, Default)]
pub struct MockGame {
    pub state: Arc<Mutex<GameState>>,
}

pub struct MockServer {
    pub addr: SocketAddr,
    pub game: MockGame,
    shutdown: Option<oneshot::Sender<()>>,
}

impl MockServer {
    pub async fn start() -> Self {
        Self::start_with(MockGame::default()).await
    }

    pub async fn start_with(game: MockGame) -> Self {
        let router = Router::new()
            .route("/api/:endpoint", get(handle_get).post(handle_post))
            .with_state(game.clone());
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock game server");
        let addr = listener.local_addr().expect("local addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });
        Self {
            addr,
            game,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/api/", self.addr)
    }

    pub fn config(&self) -> ClientConfig {
        fast_config(&self.base_url())
    }

    pub fn hits(&self, endpoint: &str) -> usize {
        self.game.state.lock().hits.get(endpoint).copied().unwrap_or(0)
    }

    /// Wall-clock arrival time of every request to `endpoint`.
    pub fn hit_times(&self, endpoint: &str) -> Vec<std::time::Instant> {
        self.game
            .state
            .lock()
            .hit_times
            .get(endpoint)
            .cloned()
            .unwrap_or_default()
    }

    pub fn commands(&self) -> Vec<String> {
        self.game.state.lock().commands.clone()
    }

    pub fn queries(&self, endpoint: &str) -> Vec<HashMap<String, String>> {
        self.game
            .state
            .lock()
            .queries
            .iter()
            .filter(|(path, _)| path == endpoint)
            .map(|(_, query)| query.clone())
            .collect()
    }

    pub fn bodies(&self, endpoint: &str) -> Vec<Value> {
        self.game
            .state
            .lock()
            .bodies
            .iter()
            .filter(|(path, _)| path == endpoint)
            .map(|(_, body)| body.clone())
            .collect()
    }

    pub fn script(&self, endpoint: &str, status: StatusCode, body: impl Into<String>, times: usize) {
        let body: String = body.into();
        let mut state = self.game.state.lock();
        let queue = state.scripted.entry(endpoint.to_string()).or_default();
        for _ in 0..times {
            queue.push_back(Scripted {
                status,
                body: body.clone(),
            });
        }
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut GameState) -> R) -> R {
        f(&mut self.game.state.lock())
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Protocol constants shrunk to milliseconds so tests stay quick.
pub fn fast_config(base_url: &str) -> ClientConfig {
    let mut config = ClientConfig::default()
        .with_base_url(base_url)
        .expect("valid base url");
    config.request_timeout = Duration::from_millis(2_000);
    config.retry.delay = Duration::from_millis(10);
    config.health_probe_timeout = Duration::from_millis(500);
    config.reconcile.cascade = PollSchedule {
        attempts: 3,
        first_gap: Duration::from_millis(10),
        growth: 3,
    };
    config.reconcile.travel_settle = Duration::from_millis(5);
    config.reconcile.travel_fallback_settle = Duration::from_millis(5);
    config.reconcile.min_refresh_interval = Duration::from_millis(200);
    config
}

fn record_hit(game: &MockGame, endpoint: &str) -> Option<Scripted> {
    let mut state = game.state.lock();
    *state.hits.entry(endpoint.to_string()).or_insert(0) += 1;
    state
        .hit_times
        .entry(endpoint.to_string())
        .or_default()
        .push(std::time::Instant::now());
    state
        .scripted
        .get_mut(endpoint)
        .and_then(|queue| queue.pop_front())
}

fn json_reply(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

fn raw_reply(scripted: Scripted) -> Response {
    (
        scripted.status,
        [(header::CONTENT_TYPE, "application/json")],
        scripted.body,
    )
        .into_response()
}

async fn handle_get(
    State(game): State<MockGame>,
    Path(endpoint): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    game.state.lock().queries.push((endpoint.clone(), query.clone()));
    if let Some(scripted) = record_hit(&game, &endpoint) {
        return raw_reply(scripted);
    }

    match endpoint.as_str() {
        "stato" => {
            let (name, delay) = {
                let mut state = game.state.lock();
                let queued = state.state_queue.pop_front();
                let name = queued.unwrap_or_else(|| state.state_name.clone());
                (name, state.state_delays.pop_front())
            };
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            json_reply(
                StatusCode::OK,
                json!({
                    "nome": "Aria", "classe": "mago", "hp": 18, "max_hp": 20,
                    "mana": 30, "mana_max": 40, "stato": name,
                    "posizione": {"mappa": "taverna", "x": 1, "y": 1},
                    "inventario": ["Pozione"],
                    "equipaggiamento": {"arma": "Bastone", "armatura": null, "accessori": []},
                    "statistiche": {"forza": 6, "intelligenza": 16}
                }),
            )
        }
        "mappa" => json_reply(
            StatusCode::OK,
            json!({
                "mappa": "taverna", "x": 1, "y": 1,
                "griglia": [[1, 1, 1], [1, 0, 0], [1, 1, 1]],
                "oggetti_vicini": {"(2, 1)": {"nome": "Baule", "token": "B", "stato": "chiuso"}},
                "npg_vicini": {}
            }),
        ),
        "destinazioni" => json_reply(
            StatusCode::OK,
            json!([
                {"id": "cantina", "nome": "Cantina", "descrizione": "Buia"},
                {"id": "mercato", "nome": "Mercato", "descrizione": "Affollato"},
                {"id": "taverna", "nome": "Taverna", "descrizione": "Calda"}
            ]),
        ),
        "notifiche" => {
            let state = game.state.lock();
            let unread_only = query.get("solo_non_lette").map(String::as_str) == Some("true");
            let list: Vec<Value> = state
                .notifications
                .iter()
                .filter(|n| !unread_only || n["letta"] == json!(false))
                .cloned()
                .collect();
            let unread = state
                .notifications
                .iter()
                .filter(|n| n["letta"] == json!(false))
                .count();
            json_reply(
                StatusCode::OK,
                json!({"notifiche": list, "totale_non_lette": unread}),
            )
        }
        "health" => {
            let healthy = game.state.lock().healthy;
            if healthy {
                json_reply(
                    StatusCode::OK,
                    json!({"success": true, "data": {"status": "online", "timestamp": 1, "version": "1.0.0"}, "messaggio": "ok"}),
                )
            } else {
                json_reply(
                    StatusCode::OK,
                    json!({"success": false, "errore": "Errore del server", "dettagli": "database offline"}),
                )
            }
        }
        "classi" => json_reply(
            StatusCode::OK,
            json!({"druido": {"nome": "Druido", "descrizione": "Custode", "statistiche_base": {"saggezza": 15}}}),
        ),
        _ => json_reply(StatusCode::NOT_FOUND, json!({"errore": "Endpoint non trovato"})),
    }
}

async fn handle_post(
    State(game): State<MockGame>,
    Path(endpoint): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    game.state.lock().bodies.push((endpoint.clone(), body.clone()));
    if endpoint == "comando" {
        if let Some(command) = body.get("comando").and_then(Value::as_str) {
            game.state.lock().commands.push(command.to_string());
        }
    }
    if let Some(scripted) = record_hit(&game, &endpoint) {
        return raw_reply(scripted);
    }

    match endpoint.as_str() {
        "inizia" => {
            let name = body.get("nome").and_then(Value::as_str).unwrap_or("?");
            json_reply(
                StatusCode::OK,
                json!({
                    "success": true,
                    "id_sessione": format!("sess-{}", uuid::Uuid::new_v4()),
                    "stato": {"output": []},
                    "stato_nome": "TavernaState",
                    "messaggio": format!("Benvenuto, {name}!")
                }),
            )
        }
        "comando" => {
            let command = body
                .get("comando")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let state = game.state.lock();
            let output = state
                .command_outputs
                .get(&command)
                .cloned()
                .unwrap_or_else(|| json!([format!("Esegui: {command}")]));
            json_reply(
                StatusCode::OK,
                json!({"output": output, "stato": {}, "stato_nome": state.state_name, "fine": false}),
            )
        }
        "leggi_notifica" => {
            let mut state = game.state.lock();
            let all = body.get("tutte").and_then(Value::as_bool).unwrap_or(false);
            let id = body.get("id_notifica").cloned();
            for notification in state.notifications.iter_mut() {
                if all || Some(&notification["id"]) == id.as_ref() {
                    notification["letta"] = json!(true);
                }
            }
            json_reply(StatusCode::OK, json!({"success": true}))
        }
        _ => json_reply(StatusCode::NOT_FOUND, json!({"errore": "Endpoint non trovato"})),
    }
}
