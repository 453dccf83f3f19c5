mod support;

use std::sync::Arc;
use std::time::Duration;

use quest_sdk::context::ClientContext;
use quest_sdk::session::MemorySessionStore;
use quest_sdk::{ApiError, ClientEvent, GameClient, MessageKind, RefreshOutcome, SpecialMode};
use serde_json::json;
use support::MockServer;
use tokio::sync::broadcast::error::TryRecvError;

fn client(server: &MockServer) -> GameClient {
    GameClient::new(ClientContext::in_memory(server.config())).expect("game client")
}

fn client_with_session(server: &MockServer, session: &str) -> GameClient {
    let ctx = ClientContext::new(
        server.config(),
        Arc::new(MemorySessionStore::with_session(session)),
    );
    GameClient::new(ctx).expect("game client")
}

/// Lets background cascades (offsets 0/10/40 ms in tests) run to completion.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(150)).await;
}

#[tokio::test]
async fn start_then_attack_echoes_filters_and_refreshes() {
    let server = MockServer::start().await;
    server.with_state(|state| {
        state.command_outputs.insert(
            "attacca".into(),
            json!([
                "Attacchi il goblin con il bastone.",
                "=== SELEZIONE DESTINAZIONE ===",
                {"tipo": "sistema", "testo": "Turno 2"},
                "1. Cantina",
                "Premi Invio per continuare..."
            ]),
        );
    });
    let client = client(&server);

    let started = client.start_session("Aria", "mago").await.expect("session starts");
    let session_id = started.session_id.clone().expect("session id");
    assert!(session_id.starts_with("sess-"));
    assert_eq!(client.context().session().id(), Some(session_id));
    assert_eq!(server.hits("health"), 1);
    assert_eq!(
        server.bodies("inizia")[0]["nome"],
        json!("Aria"),
    );
    settle().await;

    client.execute("attacca").await.expect("command succeeds");

    let log: Vec<(MessageKind, String)> = client
        .messages()
        .all()
        .into_iter()
        .map(|m| (m.kind, m.text))
        .collect();
    assert_eq!(
        log,
        vec![
            (MessageKind::Narrative, "Benvenuto, Aria!".to_string()),
            (MessageKind::Command, "> attacca".to_string()),
            (MessageKind::Narrative, "Attacchi il goblin con il bastone.".to_string()),
            (MessageKind::System, "Turno 2".to_string()),
        ]
    );

    let snapshot = client.reconciler().state().expect("snapshot after command");
    assert_eq!(snapshot.player.name, "Aria");
    assert_eq!(snapshot.state_name, "TavernaState");
    assert!(client.reconciler().map().is_some());
}

#[tokio::test]
async fn unhealthy_server_blocks_session_start() {
    let server = MockServer::start().await;
    server.with_state(|state| state.healthy = false);
    let client = client(&server);

    let err = client.start_session("Aria", "mago").await.unwrap_err();
    assert!(matches!(err, ApiError::Unavailable(ref detail) if detail == "database offline"));
    assert_eq!(server.hits("inizia"), 0);
    assert!(!client.has_session());
}

#[tokio::test]
async fn forced_refresh_issues_exactly_three_state_fetches() {
    let server = MockServer::start().await;
    let client = client_with_session(&server, "s-1");

    let issued = client.reconciler().force_refresh().await;
    assert_eq!(issued, 3);
    assert_eq!(server.hits("stato"), 3);
    assert_eq!(server.hits("mappa"), 3);
}

#[tokio::test]
async fn non_forced_refreshes_are_throttled() {
    let server = MockServer::start().await;
    let client = client_with_session(&server, "s-1");

    assert!(matches!(
        client.reconciler().refresh(false).await.unwrap(),
        RefreshOutcome::Applied { .. }
    ));
    assert_eq!(
        client.reconciler().refresh(false).await.unwrap(),
        RefreshOutcome::Skipped
    );
    assert!(matches!(
        client.reconciler().refresh(true).await.unwrap(),
        RefreshOutcome::Applied { .. }
    ));
    assert_eq!(server.hits("stato"), 2);
}

#[tokio::test]
async fn slower_older_refresh_is_superseded() {
    let server = MockServer::start().await;
    server.with_state(|state| {
        state.state_delays.push_back(Duration::from_millis(200));
        state.state_queue.push_back("VecchioState".into());
        state.state_queue.push_back("NuovoState".into());
    });
    let client = client_with_session(&server, "s-1");

    let slow = {
        let reconciler = client.reconciler().clone();
        tokio::spawn(async move { reconciler.refresh(true).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let fast = client.reconciler().refresh(true).await.unwrap();
    let slow = slow.await.unwrap().unwrap();

    assert_eq!(fast, RefreshOutcome::Applied { generation: 2, mode: SpecialMode::Regular });
    assert_eq!(slow, RefreshOutcome::Superseded { generation: 1 });
    assert_eq!(client.reconciler().state().unwrap().state_name, "NuovoState");
}

#[tokio::test]
async fn map_failure_keeps_the_state_refresh() {
    let server = MockServer::start().await;
    server.script("mappa", axum::http::StatusCode::BAD_REQUEST, "{}", 1);
    let client = client_with_session(&server, "s-1");

    let outcome = client.reconciler().refresh(true).await.unwrap();
    assert!(matches!(outcome, RefreshOutcome::Applied { .. }));
    assert!(client.reconciler().state().is_some());
    assert!(client.reconciler().map().is_none());
}

#[tokio::test]
async fn selection_state_requests_picker_once() {
    let server = MockServer::start().await;
    server.with_state(|state| state.state_name = "SceltaMappaState".into());
    let client = client_with_session(&server, "s-1");
    let mut events = client.subscribe();

    client.reconciler().refresh(true).await.unwrap();
    assert_eq!(client.reconciler().mode(), SpecialMode::DestinationSelection);
    assert!(client.reconciler().picker_visible());
    assert_eq!(events.recv().await.unwrap(), ClientEvent::DestinationPickerRequested);

    settle().await;
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    // One inline refresh plus the three-step cascade it launched.
    assert_eq!(server.hits("stato"), 4);
    let system: Vec<_> = client
        .messages()
        .all()
        .into_iter()
        .filter(|m| m.kind == MessageKind::System)
        .collect();
    assert_eq!(system.len(), 1);
}

#[tokio::test]
async fn leaving_selection_rearms_the_picker() {
    let server = MockServer::start().await;
    server.with_state(|state| state.state_name = "SceltaMappaState".into());
    let client = client_with_session(&server, "s-1");
    let mut events = client.subscribe();

    client.reconciler().refresh(true).await.unwrap();
    assert_eq!(events.recv().await.unwrap(), ClientEvent::DestinationPickerRequested);
    settle().await;

    // The player answers the server's menu by hand instead of travelling.
    server.with_state(|state| state.state_name = "TavernaState".into());
    client.execute("1").await.unwrap();
    assert_eq!(client.reconciler().mode(), SpecialMode::Regular);
    assert!(!client.reconciler().picker_visible());

    server.with_state(|state| state.state_name = "SceltaMappaState".into());
    client.reconciler().refresh(true).await.unwrap();
    assert!(client.reconciler().picker_visible());
    assert_eq!(events.recv().await.unwrap(), ClientEvent::DestinationPickerRequested);
    settle().await;
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn travel_falls_back_to_numeric_menu_choice() {
    let server = MockServer::start().await;
    server.with_state(|state| {
        state.state_queue.push_back("SceltaMappaState".into());
    });
    let client = client_with_session(&server, "s-1");

    client.execute("viaggia taverna").await.expect("travel succeeds");
    settle().await;

    assert_eq!(server.commands(), vec!["viaggia taverna", "3"]);
    assert_eq!(server.hits("destinazioni"), 1);
    let texts: Vec<String> = client.messages().all().into_iter().map(|m| m.text).collect();
    assert_eq!(texts, vec!["> viaggia taverna", "You travel towards taverna"]);
    assert!(!client.reconciler().picker_visible());
}

#[tokio::test]
async fn travel_without_lingering_menu_sends_one_command() {
    let server = MockServer::start().await;
    let client = client_with_session(&server, "s-1");

    client.travel_to("mercato").await.expect("travel succeeds");
    assert_eq!(server.commands(), vec!["viaggia mercato"]);
    assert_eq!(server.hits("destinazioni"), 0);
}

#[tokio::test]
async fn unknown_destination_picks_the_first_entry() {
    let server = MockServer::start().await;
    server.with_state(|state| state.state_queue.push_back("scelta_mappa".into()));
    let client = client_with_session(&server, "s-1");

    client.reconciler().travel_to("atlantide").await.unwrap();
    assert_eq!(server.commands(), vec!["viaggia atlantide", "1"]);
}

#[tokio::test]
async fn failed_command_logs_an_inline_error() {
    let server = MockServer::start().await;
    server.script(
        "comando",
        axum::http::StatusCode::BAD_REQUEST,
        r#"{"errore":"Comando sconosciuto"}"#,
        1,
    );
    let client = client_with_session(&server, "s-1");

    assert!(client.execute("vola").await.is_err());
    let kinds: Vec<MessageKind> = client.messages().all().iter().map(|m| m.kind).collect();
    assert_eq!(kinds, vec![MessageKind::Command, MessageKind::Error]);
    assert!(client.has_session());
}

#[tokio::test]
async fn resume_uses_the_persisted_session() {
    let server = MockServer::start().await;
    let client = client_with_session(&server, "persisted");

    assert!(client.resume().await.unwrap());
    assert_eq!(
        server.queries("stato")[0].get("id_sessione").map(String::as_str),
        Some("persisted")
    );

    let empty = client_with_session(&server, "x");
    empty.logout();
    assert!(!empty.resume().await.unwrap());
}

#[tokio::test]
async fn logout_forgets_session_and_view() {
    let server = MockServer::start().await;
    let client = client(&server);
    client.start_session("Aria", "ladro").await.unwrap();
    settle().await;
    assert!(client.reconciler().state().is_some());

    client.logout();
    assert!(!client.has_session());
    assert!(client.messages().is_empty());
    assert!(client.reconciler().state().is_none());
    assert!(matches!(
        client.reconciler().refresh(true).await,
        Err(ApiError::NoSession)
    ));
}

#[tokio::test]
async fn catalogue_prefers_server_and_falls_back_to_defaults() {
    let server = MockServer::start().await;
    let client = client(&server);
    let classes = client.catalogue().load(false).await;
    assert!(classes.contains_key("druido"));

    server.script("classi", axum::http::StatusCode::OK, "<!doctype html><html></html>", 1);
    let cached = client.catalogue().load(false).await;
    assert!(cached.contains_key("druido"));
    let fallback = client.catalogue().load(true).await;
    assert!(fallback.contains_key("guerriero"));
    assert_eq!(fallback.len(), 4);
}

#[tokio::test]
async fn shutdown_stops_background_cascades() {
    let server = MockServer::start().await;
    let client = client_with_session(&server, "s-1");

    let cascade = client.reconciler().spawn_force_refresh();
    tokio::time::sleep(Duration::from_millis(5)).await;
    client.shutdown();
    let ran = cascade.join().await;
    assert!(ran < 3);
}

#[tokio::test]
async fn zero_interval_auto_refresh_keeps_running() {
    let server = MockServer::start().await;
    let client = client_with_session(&server, "s-1");

    let auto = client.reconciler().spawn_auto_refresh(Duration::ZERO);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!auto.is_finished());
    assert!(client.reconciler().state().is_some());
    auto.stopped().await;
}
