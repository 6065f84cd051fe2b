// End-to-end tests for `Controller` against a wiremock cloud.
#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pretty_assertions::assert_eq;
use secrecy::ExposeSecret;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use basis_core::{
    AuthState, CircuitKey, ControlError, ControlEvent, Controller, ControllerConfig,
    CredentialStore, MemoryCredentialStore, OAuthClientConfig, Period, Snapshot, StandbyOutcome,
    TokenSet,
};

// ── Helpers ─────────────────────────────────────────────────────────

const WAIT: Duration = Duration::from_secs(5);

fn config(server: &MockServer) -> ControllerConfig {
    let mut cfg = ControllerConfig::new(
        server.uri().parse().unwrap(),
        OAuthClientConfig {
            token_url: format!("{}/oauth/token", server.uri()).parse().unwrap(),
            client_id: "basis-test".into(),
            client_secret: None,
        },
    );
    // Loops tick once at start, then stay quiet unless a test shortens them.
    cfg.fast_interval = Duration::from_secs(3600);
    cfg.slow_interval = Duration::from_secs(3600);
    cfg.discovery_interval = Duration::ZERO;
    cfg.timeout = Duration::from_secs(2);
    cfg
}

fn valid_tokens() -> TokenSet {
    TokenSet::new("access-1", "refresh-1", Utc::now() + chrono::Duration::hours(1))
}

fn controller(cfg: ControllerConfig) -> (Controller, Arc<MemoryCredentialStore>) {
    let store = Arc::new(MemoryCredentialStore::new(Some(&valid_tokens())));
    (Controller::new(cfg, store.clone()).unwrap(), store)
}

fn circuit_json(id: &str, number: u32, state: &str, power: f64) -> serde_json::Value {
    json!({
        "id": id,
        "number": number,
        "label": "hwc",
        "liveState": {
            "state": state,
            "power": power,
            "primaryCurrent": power / 240.0,
            "phaseVoltage": 240.0
        }
    })
}

fn telemetry_json(panel_id: &str, power: f64, circuits: Vec<serde_json::Value>) -> serde_json::Value {
    json!({
        "panelId": panel_id,
        "model": "GEN2",
        "connectivity": { "connected": true, "updatedTimestamp": "2025-03-17T10:00:00Z" },
        "liveState": {
            "power": power,
            "powerUsage": { "importPower": power, "exportPower": 0.0 },
            "primaryCurrent": power / 240.0
        },
        "circuits": circuits
    })
}

async fn mount_panels(server: &MockServer, ids: &[&str]) {
    let panels: Vec<_> = ids.iter().map(|id| json!({ "id": id, "name": id })).collect();
    Mock::given(method("GET"))
        .and(path("/panels"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "panels": panels })))
        .mount(server)
        .await;
}

async fn mount_stats(server: &MockServer, panel_id: &str) {
    for (period, import) in [("day", 12.0), ("month", 340.0)] {
        Mock::given(method("GET"))
            .and(path(format!("/panels/{panel_id}/statistics")))
            .and(query_param("period", period))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "panelId": panel_id,
                "period": period,
                "importKwh": import,
                "exportKwh": 1.5
            })))
            .mount(server)
            .await;
    }
}

async fn mount_telemetry(server: &MockServer, panel_id: &str, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(format!("/panels/{panel_id}/telemetry")))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Standard single-panel account: P1 with C1 (live) and C2 (standby).
async fn mount_account(server: &MockServer) {
    mount_panels(server, &["P1"]).await;
    mount_stats(server, "P1").await;
    mount_telemetry(
        server,
        "P1",
        telemetry_json(
            "P1",
            1500.0,
            vec![
                circuit_json("C1", 1, "LIVE", 800.0),
                circuit_json("C2", 2, "STANDBY", 0.0),
            ],
        ),
    )
    .await;
}

async fn wait_for(controller: &Controller, pred: impl Fn(&Snapshot) -> bool) -> Arc<Snapshot> {
    let mut stream = controller.subscribe();
    tokio::time::timeout(WAIT, async {
        let mut snap = stream.latest();
        while !pred(&snap) {
            snap = stream.changed().await.unwrap();
        }
        snap
    })
    .await
    .expect("snapshot condition not reached in time")
}

fn c1() -> CircuitKey {
    CircuitKey::new("P1", "C1")
}

async fn started(server: &MockServer) -> Controller {
    let (controller, _) = controller(config(server));
    controller.start().await.unwrap();
    wait_for(&controller, |s| s.circuit(&c1()).is_some()).await;
    controller
}

// ── Registry and polling ────────────────────────────────────────────

#[tokio::test]
async fn start_registers_panels_then_fills_them() {
    let server = MockServer::start().await;
    mount_account(&server).await;

    let (controller, _) = controller(config(&server));
    controller.start().await.unwrap();

    let snap = wait_for(&controller, |s| {
        s.panel("P1").is_some_and(|p| p.connected) && s.stats().count() == 2
    })
    .await;

    let panel = snap.panel("P1").unwrap();
    assert_eq!(panel.model, "GEN2");
    assert_eq!(panel.current_power_w, Some(1500.0));
    assert_eq!(snap.circuits().count(), 2);

    let c2 = snap.circuit(&CircuitKey::new("P1", "C2")).unwrap();
    assert!(c2.standby);
    assert_eq!(c2.name, "[02] Hot Water Cylinder");

    let day = snap.stat(&"P1".into(), Period::Day).unwrap();
    assert_eq!(day.import_kwh, 12.0);

    controller.stop().await;
}

#[tokio::test]
async fn refresh_reads_once_without_starting() {
    let server = MockServer::start().await;
    mount_account(&server).await;

    let (controller, _) = controller(config(&server));
    let version = controller.refresh().await.unwrap();

    assert!(!controller.is_running());
    let snap = controller.snapshot();
    assert_eq!(snap.version(), version);
    assert!(snap.panel("P1").unwrap().connected);
    assert_eq!(snap.circuits().count(), 2);
    assert_eq!(snap.stats().count(), 2);

    let telemetry_calls = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/panels/P1/telemetry")
        .count();
    assert_eq!(telemetry_calls, 1);
}

#[tokio::test]
async fn omitted_circuit_keeps_last_known_values() {
    let server = MockServer::start().await;
    mount_panels(&server, &["P1"]).await;
    mount_stats(&server, "P1").await;

    // First fetch reports both circuits, later ones only C1.
    Mock::given(method("GET"))
        .and(path("/panels/P1/telemetry"))
        .respond_with(ResponseTemplate::new(200).set_body_json(telemetry_json(
            "P1",
            1500.0,
            vec![
                circuit_json("C1", 1, "LIVE", 800.0),
                circuit_json("C2", 2, "LIVE", 300.0),
            ],
        )))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_telemetry(
        &server,
        "P1",
        telemetry_json("P1", 1700.0, vec![circuit_json("C1", 1, "LIVE", 950.0)]),
    )
    .await;

    let controller = started(&server).await;
    let c2_key = CircuitKey::new("P1", "C2");
    let before = controller.snapshot().circuit(&c2_key).cloned().unwrap();

    controller.poll_once().await.unwrap();

    let snap = controller.snapshot();
    assert_eq!(snap.circuit(&c1()).unwrap().power_w, Some(950.0));
    assert_eq!(snap.circuit(&c2_key).unwrap(), &before);
    assert!(snap.panel("P1").unwrap().connected);

    controller.stop().await;
}

#[tokio::test]
async fn failing_panel_goes_stale_with_values_frozen() {
    let server = MockServer::start().await;
    mount_panels(&server, &["P1"]).await;
    mount_stats(&server, "P1").await;
    Mock::given(method("GET"))
        .and(path("/panels/P1/telemetry"))
        .respond_with(ResponseTemplate::new(200).set_body_json(telemetry_json(
            "P1",
            1500.0,
            vec![circuit_json("C1", 1, "LIVE", 800.0)],
        )))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/panels/P1/telemetry"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let mut cfg = config(&server);
    cfg.fast_interval = Duration::from_millis(100);
    let (controller, _) = controller(cfg);
    controller.start().await.unwrap();

    let live = wait_for(&controller, |s| s.panel("P1").is_some_and(|p| p.connected)).await;
    let stale = wait_for(&controller, |s| s.panel("P1").is_some_and(|p| !p.connected)).await;

    let mut expected = live.panel("P1").cloned().unwrap();
    expected.connected = false;
    assert_eq!(stale.panel("P1").unwrap(), &expected);
    assert_eq!(stale.circuit(&c1()), live.circuit(&c1()));
    assert!(stale.version() > live.version());

    controller.stop().await;
}

#[tokio::test]
async fn rate_limited_loop_backs_off() {
    let server = MockServer::start().await;
    mount_panels(&server, &["P1"]).await;
    mount_stats(&server, "P1").await;
    Mock::given(method("GET"))
        .and(path("/panels/P1/telemetry"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "3600"))
        .mount(&server)
        .await;

    let mut cfg = config(&server);
    cfg.fast_interval = Duration::from_millis(50);
    cfg.stale_after_intervals = 1_000;
    let (controller, _) = controller(cfg);
    controller.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;
    controller.stop().await;

    let requests = server.received_requests().await.unwrap();
    let telemetry_calls = requests
        .iter()
        .filter(|r| r.url.path() == "/panels/P1/telemetry")
        .count();
    assert_eq!(telemetry_calls, 1);
}

#[tokio::test]
async fn discovery_adds_new_panels() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/panels"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "panels": [{ "id": "P1" }] })),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_panels(&server, &["P1", "P2"]).await;
    for id in ["P1", "P2"] {
        mount_stats(&server, id).await;
        mount_telemetry(&server, id, telemetry_json(id, 100.0, Vec::new())).await;
    }

    let mut cfg = config(&server);
    cfg.discovery_interval = Duration::from_millis(100);
    let (controller, _) = controller(cfg);
    controller.start().await.unwrap();
    assert!(controller.snapshot().panel("P2").is_none());

    let snap = wait_for(&controller, |s| s.panel("P2").is_some_and(|p| p.connected)).await;
    assert_eq!(snap.panels().count(), 2);

    controller.stop().await;
}

// ── Control ─────────────────────────────────────────────────────────

#[tokio::test]
async fn standby_is_visible_before_the_call_resolves() {
    let server = MockServer::start().await;
    mount_account(&server).await;
    Mock::given(method("POST"))
        .and(path("/circuits/C1/standby"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(200))
                .set_body_json(json!({ "circuitId": "C1", "standby": true })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let controller = started(&server).await;

    let ticket = controller.set_standby(c1(), true).unwrap();
    let optimistic = controller.snapshot();
    let circuit = optimistic.circuit(&c1()).unwrap();
    assert!(circuit.standby);
    assert!(circuit.standby_pending);

    assert_eq!(ticket.outcome().await, Ok(StandbyOutcome::Confirmed));
    let circuit = controller.snapshot().circuit(&c1()).cloned().unwrap();
    assert!(circuit.standby);
    assert!(!circuit.standby_pending);

    controller.stop().await;
}

#[tokio::test]
async fn rejected_standby_reverts_and_notifies() {
    let server = MockServer::start().await;
    mount_account(&server).await;
    Mock::given(method("POST"))
        .and(path("/circuits/C1/standby"))
        .respond_with(
            ResponseTemplate::new(409).set_body_json(json!({ "message": "circuit is locked" })),
        )
        .mount(&server)
        .await;

    let controller = started(&server).await;
    let mut events = controller.control_events();

    let ticket = controller.set_standby(c1(), true).unwrap();
    assert!(controller.snapshot().circuit(&c1()).unwrap().standby);

    let err = ticket.outcome().await.unwrap_err();
    assert!(matches!(err, ControlError::Rejected { .. }));

    let circuit = controller.snapshot().circuit(&c1()).cloned().unwrap();
    assert!(!circuit.standby);
    assert!(!circuit.standby_pending);

    match events.recv().await.unwrap() {
        ControlEvent::Failed {
            key, reverted_to, ..
        } => {
            assert_eq!(key, c1());
            assert_eq!(reverted_to, Some(false));
        }
        other => panic!("expected Failed, got {other:?}"),
    }

    controller.stop().await;
}

#[tokio::test]
async fn unreachable_cloud_is_a_timeout() {
    let server = MockServer::start().await;
    mount_account(&server).await;
    Mock::given(method("POST"))
        .and(path("/circuits/C1/standby"))
        .respond_with(ResponseTemplate::new(504))
        .mount(&server)
        .await;

    let controller = started(&server).await;
    let ticket = controller.set_standby(c1(), true).unwrap();
    assert_eq!(ticket.outcome().await, Err(ControlError::Timeout));
    assert!(!controller.snapshot().circuit(&c1()).unwrap().standby);

    controller.stop().await;
}

#[tokio::test]
async fn last_issued_intent_wins() {
    let server = MockServer::start().await;
    mount_panels(&server, &["P1"]).await;
    mount_stats(&server, "P1").await;
    mount_telemetry(
        &server,
        "P1",
        telemetry_json("P1", 100.0, vec![circuit_json("C1", 1, "STANDBY", 0.0)]),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/circuits/C1/standby"))
        .and(body_json(json!({ "panelId": "P1", "standby": false })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(200))
                .set_body_json(json!({ "circuitId": "C1", "standby": false })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/circuits/C1/standby"))
        .and(body_json(json!({ "panelId": "P1", "standby": true })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "circuitId": "C1", "standby": true })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let controller = started(&server).await;

    let first = controller.set_standby(c1(), false).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = controller.set_standby(c1(), true).unwrap();

    // The first call's confirmation must not clobber the newer intent.
    assert_eq!(first.outcome().await, Ok(StandbyOutcome::Confirmed));
    let mid = controller.snapshot().circuit(&c1()).cloned().unwrap();
    assert!(mid.standby);

    assert_eq!(second.outcome().await, Ok(StandbyOutcome::Confirmed));
    let done = controller.snapshot().circuit(&c1()).cloned().unwrap();
    assert!(done.standby);
    assert!(!done.standby_pending);

    controller.stop().await;
}

#[tokio::test]
async fn queued_request_is_superseded() {
    let server = MockServer::start().await;
    mount_account(&server).await;
    Mock::given(method("POST"))
        .and(path("/circuits/C1/standby"))
        .and(body_json(json!({ "panelId": "P1", "standby": true })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(200))
                .set_body_json(json!({ "circuitId": "C1", "standby": true })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/circuits/C1/standby"))
        .and(body_json(json!({ "panelId": "P1", "standby": false })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "circuitId": "C1", "standby": false })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let controller = started(&server).await;

    let first = controller.set_standby(c1(), true).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = controller.set_standby(c1(), true).unwrap();
    let third = controller.set_standby(c1(), false).unwrap();

    assert_eq!(first.outcome().await, Ok(StandbyOutcome::Confirmed));
    assert_eq!(second.outcome().await, Ok(StandbyOutcome::Superseded));
    assert_eq!(third.outcome().await, Ok(StandbyOutcome::Confirmed));

    let circuit = controller.snapshot().circuit(&c1()).cloned().unwrap();
    assert!(!circuit.standby);
    assert!(!circuit.standby_pending);

    controller.stop().await;
}

#[tokio::test]
async fn stop_lets_in_flight_commands_reconcile() {
    let server = MockServer::start().await;
    mount_account(&server).await;
    Mock::given(method("POST"))
        .and(path("/circuits/C1/standby"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(300))
                .set_body_json(json!({ "circuitId": "C1", "standby": true })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let controller = started(&server).await;
    let _ticket = controller.set_standby(c1(), true).unwrap();
    controller.stop().await;

    let circuit = controller.snapshot().circuit(&c1()).cloned().unwrap();
    assert!(circuit.standby);
    assert!(!circuit.standby_pending);
}

#[tokio::test]
async fn standby_requires_a_running_controller() {
    let server = MockServer::start().await;
    let (controller, _) = controller(config(&server));
    let err = controller.set_standby(c1(), true).unwrap_err();
    assert!(matches!(err, basis_core::CoreError::NotStarted));
}

// ── Authentication ──────────────────────────────────────────────────

#[tokio::test]
async fn revoked_grant_surfaces_reauth_required() {
    let server = MockServer::start().await;
    mount_account(&server).await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({ "error": "invalid_grant" })),
        )
        .mount(&server)
        .await;

    let store = Arc::new(MemoryCredentialStore::new(Some(&TokenSet::new(
        "stale",
        "revoked",
        Utc::now() + chrono::Duration::seconds(10),
    ))));
    let controller = Controller::new(config(&server), store.clone()).unwrap();

    let err = controller.start().await.unwrap_err();
    assert!(matches!(err, basis_core::CoreError::ReauthRequired));
    assert_eq!(*controller.auth_state().borrow(), AuthState::ReauthRequired);
    assert!(store.load().unwrap().is_none());
    assert!(!controller.is_running());
}

#[tokio::test]
async fn reconfigure_restores_polling() {
    let server = MockServer::start().await;
    mount_account(&server).await;

    let store = Arc::new(MemoryCredentialStore::default());
    let controller = Controller::new(config(&server), store.clone()).unwrap();
    assert!(controller.start().await.is_err());

    controller.reconfigure(valid_tokens()).await.unwrap();
    assert!(store.load().unwrap().is_some());

    controller.start().await.unwrap();
    wait_for(&controller, |s| s.panel("P1").is_some_and(|p| p.connected)).await;
    controller.stop().await;
}

#[tokio::test]
async fn rejected_token_is_refreshed_and_polling_resumes() {
    let server = MockServer::start().await;
    mount_panels(&server, &["P1"]).await;
    mount_stats(&server, "P1").await;
    Mock::given(method("GET"))
        .and(path("/panels/P1/telemetry"))
        .and(header("authorization", "Bearer access-1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/panels/P1/telemetry"))
        .and(header("authorization", "Bearer access-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(telemetry_json(
            "P1",
            1500.0,
            vec![circuit_json("C1", 1, "LIVE", 800.0)],
        )))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-2",
            "expires_in": 3600,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut cfg = config(&server);
    cfg.fast_interval = Duration::from_millis(100);
    let (controller, store) = controller(cfg);
    controller.start().await.unwrap();

    wait_for(&controller, |s| s.panel("P1").is_some_and(|p| p.connected)).await;
    assert_eq!(*controller.auth_state().borrow(), AuthState::Authenticated);
    let persisted = store.load().unwrap().unwrap();
    assert_eq!(persisted.access_token.expose_secret(), "access-2");

    controller.stop().await;
}

#[tokio::test]
async fn dead_grant_pauses_polling_until_reconfigured() {
    let server = MockServer::start().await;
    mount_panels(&server, &["P1"]).await;
    mount_stats(&server, "P1").await;
    Mock::given(method("GET"))
        .and(path("/panels/P1/telemetry"))
        .and(header("authorization", "Bearer access-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(telemetry_json(
            "P1",
            1500.0,
            vec![circuit_json("C1", 1, "LIVE", 800.0)],
        )))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/panels/P1/telemetry"))
        .and(header("authorization", "Bearer access-1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/panels/P1/telemetry"))
        .and(header("authorization", "Bearer granted"))
        .respond_with(ResponseTemplate::new(200).set_body_json(telemetry_json(
            "P1",
            2000.0,
            vec![circuit_json("C1", 1, "LIVE", 900.0)],
        )))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({ "error": "invalid_grant" })),
        )
        .mount(&server)
        .await;

    let mut cfg = config(&server);
    cfg.fast_interval = Duration::from_millis(100);
    let (controller, store) = controller(cfg);
    controller.start().await.unwrap();

    wait_for(&controller, |s| s.panel("P1").is_some_and(|p| p.connected)).await;

    // Paused on the dead grant, the panel still goes stale.
    let stale = wait_for(&controller, |s| s.panel("P1").is_some_and(|p| !p.connected)).await;
    assert_eq!(stale.panel("P1").unwrap().current_power_w, Some(1500.0));
    assert_eq!(*controller.auth_state().borrow(), AuthState::ReauthRequired);
    assert!(store.load().unwrap().is_none());
    assert!(controller.is_running());

    controller
        .reconfigure(TokenSet::new("granted", "refresh-2", Utc::now() + chrono::Duration::hours(1)))
        .await
        .unwrap();

    wait_for(&controller, |s| {
        s.panel("P1")
            .is_some_and(|p| p.connected && p.current_power_w == Some(2000.0))
    })
    .await;
    assert!(controller.is_running());
    assert_eq!(*controller.auth_state().borrow(), AuthState::Authenticated);

    controller.stop().await;
}
