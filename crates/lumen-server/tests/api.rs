use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum_test::TestServer;
use lumen_core::{AdapterState, Capability, Config, LedController, MockBackend};
use lumen_server::api::create_router;
use lumen_server::state::AppState;
use serde_json::Value;
use tokio_test::assert_ok;

const LED_ADDR: &str = "24:6F:28:1A:2B:3C";

fn server_with(backend: &MockBackend) -> (TestServer, LedController<MockBackend>) {
    let config = Config::default();
    let controller = LedController::new(backend.clone(), &config);
    let state = AppState::new(config, Some(Arc::new(controller.clone()))).shared();
    let server = TestServer::new(create_router(state)).unwrap();
    (server, controller)
}

fn server_without_bluetooth() -> TestServer {
    let state = AppState::new(Config::default(), None).shared();
    TestServer::new(create_router(state)).unwrap()
}

async fn wait_until_resolved(controller: &LedController<MockBackend>) {
    let mut rx = controller.subscribe_link();
    tokio::time::timeout(
        Duration::from_secs(30),
        rx.wait_for(|link| link.characteristic_resolved),
    )
    .await
    .expect("characteristic never resolved")
    .unwrap();
}

#[tokio::test]
async fn health_reports_bluetooth_availability() {
    let (server, _) = server_with(&MockBackend::demo());
    let response = server.get("/health").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["bluetooth_available"], true);

    let body: Value = server_without_bluetooth().get("/health").await.json();
    assert_eq!(body["bluetooth_available"], false);
}

#[tokio::test]
async fn ble_endpoints_answer_503_without_bluetooth() {
    let server = server_without_bluetooth();

    let response = server.get("/api/status").await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json();
    assert_eq!(body["error"], "bluetooth_unavailable");

    server
        .post("/api/led/on")
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn status_starts_idle() {
    let (server, _) = server_with(&MockBackend::demo());
    let body: Value = server.get("/api/status").await.json();
    assert_eq!(body["has_permissions"], false);
    assert_eq!(body["is_scanning"], false);
    assert_eq!(body["is_connected"], false);
    assert_eq!(body["link"]["state"], "disconnected");
}

#[tokio::test]
async fn permissions_granted() {
    let (server, _) = server_with(&MockBackend::demo());
    let response = server.post("/api/permissions").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["verdict"], "granted");

    let status: Value = server.get("/api/status").await.json();
    assert_eq!(status["has_permissions"], true);
}

#[tokio::test]
async fn permissions_denied_is_forbidden_and_raises_notice() {
    let backend = MockBackend::demo();
    backend.deny_capability(Capability::BluetoothScan);
    let (server, _) = server_with(&backend);

    let response = server.post("/api/permissions").await;
    response.assert_status(StatusCode::FORBIDDEN);
    let body: Value = response.json();
    assert_eq!(body["error"], "permission_denied");
    assert_eq!(body["details"]["denied"][0], "bluetooth_scan");

    let notices: Value = server.get("/api/notices").await.json();
    assert_eq!(notices["notices"][0]["kind"], "permission_denied");
}

#[tokio::test]
async fn permissions_wait_for_powered_radio() {
    let backend = MockBackend::demo();
    backend.set_adapter_states(vec![AdapterState::Off]);
    backend.close_adapter_stream();
    let (server, _) = server_with(&backend);

    let response = server.post("/api/permissions").await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json();
    assert_eq!(body["error"], "bluetooth_adapter_unavailable");

    let status: Value = server.get("/api/status").await.json();
    assert_eq!(status["has_permissions"], false);
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn scan_requires_permissions() {
    let (server, _) = server_with(&MockBackend::demo());
    server
        .post("/api/scan")
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn led_before_connect_is_conflict() {
    let (server, _) = server_with(&MockBackend::demo());
    let response = server.post("/api/led/on").await;
    response.assert_status(StatusCode::CONFLICT);
    let body: Value = response.json();
    assert_eq!(body["error"], "not_connected");
    assert_eq!(body["message"], "Not connected to ESP32");

    let notices: Value = server.get("/api/notices").await.json();
    assert_eq!(notices["notices"][0]["message"], "Not connected to ESP32");
}

#[tokio::test]
async fn scan_connects_and_led_turns_on_and_off() {
    let backend = MockBackend::demo();
    let (server, controller) = server_with(&backend);

    server.post("/api/permissions").await.assert_status_ok();
    let response = server.post("/api/scan").await;
    response.assert_status(StatusCode::ACCEPTED);
    let body: Value = response.json();
    assert_eq!(body["started"], true);

    wait_until_resolved(&controller).await;

    let status: Value = server.get("/api/status").await.json();
    assert_eq!(status["is_connected"], true);
    assert_eq!(status["link"]["peripheral_id"], LED_ADDR);

    let response = server.post("/api/led/on").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["command"], "on");

    server.post("/api/led/off").await.assert_status_ok();

    let payloads: Vec<Vec<u8>> = backend.writes().into_iter().map(|(p, _)| p).collect();
    assert_eq!(payloads, vec![b"1".to_vec(), b"0".to_vec()]);
    assert_eq!(backend.connect_count(), 1);
}

#[tokio::test]
async fn failed_write_is_bad_gateway_and_drops_link() {
    let backend = MockBackend::new();
    let led = backend.add_led_device(LED_ADDR);
    backend.push_scan_batch(vec![led.advertisement()]);
    let (server, controller) = server_with(&backend);

    assert_ok!(controller.request_permissions().await);
    assert_ok!(controller.scan_and_connect().await);
    wait_until_resolved(&controller).await;

    led.fail_writes(Some("org.bluez.Error.Failed"));
    let response = server.post("/api/led/off").await;
    response.assert_status(StatusCode::BAD_GATEWAY);
    let body: Value = response.json();
    assert_eq!(body["error"], "write_failed");
    assert_eq!(body["message"], "Failed to turn LED OFF");

    let status: Value = server.get("/api/status").await.json();
    assert_eq!(status["is_connected"], false);
}

#[tokio::test]
async fn disconnect_clears_link() {
    let backend = MockBackend::demo();
    let (server, controller) = server_with(&backend);

    assert_ok!(controller.request_permissions().await);
    assert_ok!(controller.scan_and_connect().await);
    wait_until_resolved(&controller).await;

    let response = server.post("/api/disconnect").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["is_connected"], false);
    assert_eq!(body["link"]["characteristic_resolved"], false);

    server
        .post("/api/led/on")
        .await
        .assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn disconnect_without_link_is_ok() {
    let (server, _) = server_with(&MockBackend::demo());
    server.post("/api/disconnect").await.assert_status_ok();
}

#[tokio::test]
async fn config_exposes_device_settings() {
    let (server, _) = server_with(&MockBackend::demo());
    let body: Value = server.get("/api/config").await.json();
    assert_eq!(body["device"]["name"], "ESP32_LED");
    assert_eq!(
        body["device"]["service_uuid"],
        "12345678-1234-1234-1234-123456789012"
    );
    assert_eq!(body["scan_timeout_secs"], 10);
}

#[tokio::test]
async fn openapi_document_is_served() {
    let server = server_without_bluetooth();
    let response = server.get("/api/openapi.json").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["info"]["title"], "lumen API");
    assert!(body["paths"]["/api/led/off"].is_object());
}
