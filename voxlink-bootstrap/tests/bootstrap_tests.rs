use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use voxlink_bootstrap::{
    BootstrapEngine, BootstrapError, CancelToken, ConnectionConfig, PresentationSink,
    ProtocolVersion, Reconciliation, RetryPolicy, SettingsStore, TransportSink,
};
use voxlink_identity::IdentityStore;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

#[derive(Default)]
struct CountingTransport {
    deliveries: AtomicUsize,
    last_url: Mutex<Option<String>>,
}

impl TransportSink for CountingTransport {
    fn connection_ready(&self, config: &ConnectionConfig) {
        self.deliveries.fetch_add(1, Ordering::SeqCst);
        *self.last_url.lock().unwrap() = config.websocket.as_ref().map(|ws| ws.url.clone());
    }
}

#[derive(Default)]
struct RecordingPresentation {
    codes: Mutex<Vec<String>>,
    statuses: Mutex<Vec<String>>,
}

impl PresentationSink for RecordingPresentation {
    fn verification_code(&self, code: &str, _message: &str) {
        self.codes.lock().unwrap().push(code.to_string());
    }

    fn status(&self, line: &str) {
        self.statuses.lock().unwrap().push(line.to_string());
    }
}

/// Millisecond polling so activation scenarios finish quickly.
fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        interval: Duration::from_millis(5),
        max_attempts: 60,
        deadline: Duration::from_secs(300),
    }
}

fn engine_against(
    endpoint: &str,
    dir: &TempDir,
) -> (
    BootstrapEngine,
    Arc<CountingTransport>,
    Arc<RecordingPresentation>,
) {
    let identity = Arc::new(IdentityStore::new(dir.path()));
    let settings = Arc::new(SettingsStore::open(dir.path()).unwrap());
    settings.set_endpoint(endpoint).unwrap();

    let transport = Arc::new(CountingTransport::default());
    let presentation = Arc::new(RecordingPresentation::default());
    let engine = BootstrapEngine::new(identity, settings)
        .with_policy(fast_policy())
        .with_transport_sink(transport.clone())
        .with_presentation(presentation.clone());

    (engine, transport, presentation)
}

fn ready_body() -> serde_json::Value {
    serde_json::json!({
        "websocket": { "url": "wss://gw.voxlink.io/device", "token": "tok_1" }
    })
}

fn challenge_body() -> serde_json::Value {
    serde_json::json!({
        "activation": {
            "code": "427519",
            "challenge": "abc123",
            "message": "Enter the code at voxlink.io/activate",
            "version": 2
        }
    })
}

#[tokio::test]
async fn fresh_device_with_ready_remote_repairs_the_flag() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/provision"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ready_body()))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let endpoint = format!("{}/provision", server.uri());
    let (engine, transport, presentation) = engine_against(&endpoint, &dir);

    let outcome = engine.run(&CancelToken::new()).await.unwrap();

    assert_eq!(outcome.reconciliation, Reconciliation::RepairLocalState);
    assert!(!outcome.activated_now);
    assert_eq!(transport.deliveries.load(Ordering::SeqCst), 1);
    assert_eq!(
        transport.last_url.lock().unwrap().as_deref(),
        Some("wss://gw.voxlink.io/device")
    );

    // The repaired flag and the connection config both landed on disk
    assert!(
        IdentityStore::new(dir.path())
            .load_or_create()
            .unwrap()
            .activated
    );
    let settings = SettingsStore::open(dir.path()).unwrap().snapshot();
    assert_eq!(settings.websocket.unwrap().url, "wss://gw.voxlink.io/device");

    let statuses = presentation.statuses.lock().unwrap();
    assert!(statuses.iter().any(|s| s.contains("repairing")));
}

#[tokio::test]
async fn fresh_device_activates_through_the_challenge() {
    let server = MockServer::start().await;

    // First fetch issues a challenge; after activation, a config
    let fetches = Arc::new(AtomicU32::new(0));
    let counter = fetches.clone();
    Mock::given(method("POST"))
        .and(path("/provision"))
        .respond_with(move |_: &Request| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                ResponseTemplate::new(200).set_body_json(challenge_body())
            } else {
                ResponseTemplate::new(200).set_body_json(ready_body())
            }
        })
        .mount(&server)
        .await;

    // Three pending polls before the human finishes typing the code
    let submissions = Arc::new(AtomicU32::new(0));
    let counter = submissions.clone();
    Mock::given(method("POST"))
        .and(path("/provision/activate"))
        .respond_with(move |_: &Request| {
            if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                ResponseTemplate::new(202)
            } else {
                ResponseTemplate::new(200)
            }
        })
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let endpoint = format!("{}/provision", server.uri());
    let (engine, transport, presentation) = engine_against(&endpoint, &dir);

    let outcome = engine.run(&CancelToken::new()).await.unwrap();

    assert_eq!(outcome.reconciliation, Reconciliation::NeedsActivation);
    assert!(outcome.activated_now);
    assert!(outcome.config.has_endpoint());
    assert_eq!(submissions.load(Ordering::SeqCst), 4);
    assert_eq!(fetches.load(Ordering::SeqCst), 2);
    assert_eq!(transport.deliveries.load(Ordering::SeqCst), 1);
    assert_eq!(presentation.codes.lock().unwrap().as_slice(), ["427519"]);
    assert!(
        IdentityStore::new(dir.path())
            .load_or_create()
            .unwrap()
            .activated
    );
}

#[tokio::test]
async fn lost_server_record_with_rejection_keeps_the_local_flag() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/provision"))
        .respond_with(ResponseTemplate::new(200).set_body_json(challenge_body()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/provision/activate"))
        .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
            "error": "device unknown"
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let store = IdentityStore::new(dir.path());
    store.load_or_create().unwrap();
    store.mark_activated().unwrap();

    let endpoint = format!("{}/provision", server.uri());
    let (engine, transport, presentation) = engine_against(&endpoint, &dir);
    let err = engine.run(&CancelToken::new()).await.unwrap_err();

    assert!(matches!(err, BootstrapError::ActivationRejected(ref m) if m == "device unknown"));
    assert_eq!(transport.deliveries.load(Ordering::SeqCst), 0);

    let statuses = presentation.statuses.lock().unwrap();
    assert!(statuses.iter().any(|s| s.contains("no longer recognizes")));

    // A failed re-activation does not erase the local flag
    assert!(
        IdentityStore::new(dir.path())
            .load_or_create()
            .unwrap()
            .activated
    );
}

#[tokio::test]
async fn activated_device_with_ready_remote_proceeds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/provision"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ready_body()))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let store = IdentityStore::new(dir.path());
    store.load_or_create().unwrap();
    store.mark_activated().unwrap();

    let endpoint = format!("{}/provision", server.uri());
    let (engine, transport, _presentation) = engine_against(&endpoint, &dir);
    let outcome = engine.run(&CancelToken::new()).await.unwrap();

    assert_eq!(outcome.reconciliation, Reconciliation::AlreadyActivated);
    assert!(!outcome.activated_now);
    assert_eq!(transport.deliveries.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn second_challenge_after_confirmation_is_a_protocol_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/provision"))
        .respond_with(ResponseTemplate::new(200).set_body_json(challenge_body()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/provision/activate"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let endpoint = format!("{}/provision", server.uri());
    let (engine, transport, _presentation) = engine_against(&endpoint, &dir);
    let err = engine.run(&CancelToken::new()).await.unwrap_err();

    assert!(matches!(err, BootstrapError::Protocol(_)));
    assert_eq!(transport.deliveries.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn identifiers_are_stable_across_runs() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/provision"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ready_body()))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let endpoint = format!("{}/provision", server.uri());

    let (engine, _, _) = engine_against(&endpoint, &dir);
    engine.run(&CancelToken::new()).await.unwrap();
    let first = SettingsStore::open(dir.path()).unwrap().snapshot();

    let (engine, _, _) = engine_against(&endpoint, &dir);
    let outcome = engine.run(&CancelToken::new()).await.unwrap();
    let second = SettingsStore::open(dir.path()).unwrap().snapshot();

    assert_eq!(outcome.reconciliation, Reconciliation::AlreadyActivated);
    assert!(first.client_id.is_some());
    assert_eq!(first.client_id, second.client_id);
    assert_eq!(first.device_id, second.device_id);

    let identity = IdentityStore::new(dir.path()).load_or_create().unwrap();
    assert_eq!(second.device_id.as_deref(), Some(identity.device_handle()));
}

#[tokio::test]
async fn cancelled_token_aborts_before_any_request() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let endpoint = format!("{}/provision", server.uri());
    let (engine, transport, _presentation) = engine_against(&endpoint, &dir);

    let cancel = CancelToken::new();
    cancel.cancel();
    let err = engine.run(&cancel).await.unwrap_err();

    assert!(matches!(err, BootstrapError::Cancelled));
    assert_eq!(transport.deliveries.load(Ordering::SeqCst), 0);
    assert!(server.received_requests().await.unwrap().is_empty());

    // Stage 1 still ran: the identity record exists on disk
    assert!(dir.path().join("identity.json").exists());
}

#[tokio::test]
async fn unreachable_service_surfaces_as_transient() {
    let dir = TempDir::new().unwrap();
    let (engine, transport, _presentation) = engine_against("http://127.0.0.1:9/provision", &dir);

    let err = engine.run(&CancelToken::new()).await.unwrap_err();
    assert!(matches!(err, BootstrapError::Unreachable(_)));
    assert_eq!(transport.deliveries.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn divergence_surfacing_can_be_disabled() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/provision"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ready_body()))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let endpoint = format!("{}/provision", server.uri());
    let (engine, _, presentation) = engine_against(&endpoint, &dir);
    let engine = engine.with_divergence_surfacing(false);

    let outcome = engine.run(&CancelToken::new()).await.unwrap();

    // The repair still happens; only the operator line is suppressed
    assert_eq!(outcome.reconciliation, Reconciliation::RepairLocalState);
    assert!(
        IdentityStore::new(dir.path())
            .load_or_create()
            .unwrap()
            .activated
    );
    let statuses = presentation.statuses.lock().unwrap();
    assert!(!statuses.iter().any(|s| s.contains("repairing")));
}

#[tokio::test]
async fn v1_exchange_omits_marker_and_algorithm() {
    let server = MockServer::start().await;

    let fetches = Arc::new(AtomicU32::new(0));
    let counter = fetches.clone();
    Mock::given(method("POST"))
        .and(path("/provision"))
        .respond_with(move |_: &Request| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "activation": { "code": "427519", "challenge": "abc123" }
                }))
            } else {
                ResponseTemplate::new(200).set_body_json(ready_body())
            }
        })
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/provision/activate"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let identity = Arc::new(IdentityStore::new(dir.path()));
    let settings = Arc::new(SettingsStore::open(dir.path()).unwrap());
    settings
        .set_endpoint(format!("{}/provision", server.uri()))
        .unwrap();
    settings.set_protocol(ProtocolVersion::V1).unwrap();
    let engine = BootstrapEngine::new(identity, settings).with_policy(fast_policy());

    let outcome = engine.run(&CancelToken::new()).await.unwrap();
    assert!(outcome.activated_now);

    let requests = server.received_requests().await.unwrap();
    assert!(!requests.is_empty());
    for request in &requests {
        assert!(request.headers.get("Activation-Version").is_none());
    }
    let activate = requests
        .iter()
        .find(|r| r.url.path().ends_with("/activate"))
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&activate.body).unwrap();
    assert!(body["Payload"].get("algorithm").is_none());
    assert!(body["Payload"]["hmac"].is_string());
}
