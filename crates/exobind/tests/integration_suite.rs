//! Integration tests: two runtimes talking over an in-memory transport.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

use exobind::Api;
use exobind::ApiBuilder;
use exobind::Args;
use exobind::BindState;
use exobind::CallError;
use exobind::ExposeError;
use exobind::Fault;
use exobind::MemoryTransport;
use exobind::Runtime;
use exobind::api::MethodResult;
use exobind::bind::DISCOVERY_REQUEST;
use exobind::bind::DISCOVERY_RESPONSE;
use exobind::neowire::Callback;
use exobind::neowire::Class;
use exobind::neowire::ClassRegistry;
use exobind::neowire::ErrorValue;
use exobind::neowire::Instance;
use exobind::neowire::Value;
use exobind::transport;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
//  FIXTURES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Point {
    x: i64,
    y: i64,
}

impl Class for Point {
    const NAME: &'static str = "Point";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Label {
    text: String,
}

impl Class for Label {
    const NAME: &'static str = "Label";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct AuthError {
    message: String,
    code: u32,
}

impl Class for AuthError {
    const NAME: &'static str = "AuthError";

    fn error_message(&self) -> Option<String> {
        Some(self.message.clone())
    }
}

/// Exposed by the main process in most tests.
struct Geometry;

async fn echo(_this: Arc<Geometry>, args: Args) -> MethodResult {
    Ok(args.into_values().into_iter().next().unwrap_or_else(Value::null))
}

async fn translate(_this: Arc<Geometry>, args: Args) -> MethodResult {
    let point = args.instance::<Point>(0)?;
    let dx = args.get::<i64>(1)?;
    Ok(Value::Instance(Instance::new(Point {
        x: point.x + dx,
        y: point.y,
    })))
}

async fn label(_this: Arc<Geometry>, _args: Args) -> MethodResult {
    Ok(Value::Instance(Instance::new(Label { text: "origin".into() })))
}

impl Api for Geometry {
    fn define(builder: ApiBuilder<Self>) -> ApiBuilder<Self> {
        builder
            .method("echo", echo)
            .method("translate", translate)
            .method("label", label)
    }
}

struct Auth;

async fn login(_this: Arc<Auth>, args: Args) -> MethodResult {
    let password = args.get::<String>(1)?;
    if password != "hunter2" {
        let error = ErrorValue::new("bad creds").with_stack("Error: bad creds\n    at login (src/auth.rs:42:9)");
        return Err(Fault::relay(error));
    }
    Ok(Value::from(true))
}

async fn login_strict(_this: Arc<Auth>, _args: Args) -> MethodResult {
    Err(Fault::relay(Instance::new(AuthError {
        message: "locked".into(),
        code: 423,
    })))
}

async fn throw_number(_this: Arc<Auth>, _args: Args) -> MethodResult {
    Err(Fault::relay(42i64))
}

async fn broken(_this: Arc<Auth>, _args: Args) -> MethodResult {
    Err(Fault::internal(anyhow::anyhow!("database handle is gone")))
}

impl Api for Auth {
    fn define(builder: ApiBuilder<Self>) -> ApiBuilder<Self> {
        builder
            .method("login", login)
            .method("loginStrict", login_strict)
            .method("throwNumber", throw_number)
            .method("broken", broken)
    }
}

struct Events;

async fn subscribe(_this: Arc<Events>, args: Args) -> MethodResult {
    let listener = args.callback(0)?;
    listener.call(vec![json!("ev"), json!(7)]).await?;
    Ok(Value::null())
}

async fn countdown(_this: Arc<Events>, args: Args) -> MethodResult {
    let from = args.get::<i64>(0)?;
    let listener = args.callback(1)?;
    for n in (0..from).rev() {
        listener.call(vec![json!(n)]).await?;
    }
    Ok(Value::from(from))
}

impl Api for Events {
    fn define(builder: ApiBuilder<Self>) -> ApiBuilder<Self> {
        builder
            .method("subscribe", subscribe)
            .method("countdown", countdown)
    }
}

fn classes() -> ClassRegistry {
    ClassRegistry::new().register::<Point>().register::<AuthError>()
}

struct Connection {
    main: Runtime,
    client: Runtime,
    main_transport: Arc<MemoryTransport>,
    client_transport: Arc<MemoryTransport>,
}

fn connect() -> Connection {
    init_tracing();

    let (main_transport, client_transport) = MemoryTransport::pair_named("main", "client");
    let main_transport = Arc::new(main_transport);
    let client_transport = Arc::new(client_transport);

    let main = Runtime::builder(main_transport.clone())
        .side("main")
        .peer("client")
        .restorer(classes())
        .build();
    let client = Runtime::builder(client_transport.clone())
        .side("client")
        .peer("main")
        .restorer(classes())
        .build();

    Connection {
        main,
        client,
        main_transport,
        client_transport,
    }
}

async fn recv_within<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for callback")
        .expect("callback channel closed")
}

// --- Test 1: Plain Data Round Trip ---

#[tokio::test]
async fn test_plain_data_round_trip() {
    let conn = connect();
    conn.main.expose_api(Arc::new(Geometry)).await.unwrap();

    let geometry = conn.client.bind("Geometry").await.unwrap();
    let payload = json!({"name": "a", "tags": [1, 2, 3], "nested": {"ok": true, "none": null}});

    let result = geometry.call("echo", vec![Value::Data(payload.clone())]).await.unwrap();
    assert_eq!(result, Value::Data(payload));

    let number: i64 = geometry.call_as("echo", vec![Value::from(5i64)]).await.unwrap();
    assert_eq!(number, 5);
}

// --- Test 2: Class Restoration ---

#[tokio::test]
async fn test_class_instances_are_restored_both_ways() {
    let conn = connect();
    conn.main.expose_api(Arc::new(Geometry)).await.unwrap();

    let geometry = conn.client.bind("Geometry").await.unwrap();
    let point = Value::Instance(Instance::new(Point { x: 1, y: 2 }));

    let moved = geometry.call("translate", vec![point, Value::from(3i64)]).await.unwrap();
    assert_eq!(moved.downcast_ref::<Point>(), Some(&Point { x: 4, y: 2 }));
}

// --- Test 3: Unknown Class Degrades ---

#[tokio::test]
async fn test_unknown_class_degrades_to_plain_data() {
    let conn = connect();
    conn.main.expose_api(Arc::new(Geometry)).await.unwrap();

    let geometry = conn.client.bind("Geometry").await.unwrap();
    let result = geometry.call("label", vec![]).await.unwrap();

    assert_eq!(result, Value::Data(json!({"text": "origin"})));
    let label: Label = geometry.call_as("label", vec![]).await.unwrap();
    assert_eq!(label.text, "origin");
}

// --- Test 4: Error Relay ---

#[tokio::test]
async fn test_relayed_error_keeps_message_and_drops_stack() {
    let conn = connect();
    conn.main.expose_api(Arc::new(Auth)).await.unwrap();

    let auth = conn.client.bind("Auth").await.unwrap();
    let err = auth
        .call("login", vec![Value::from("alice"), Value::from("wrong")])
        .await
        .unwrap_err();

    let thrown = err.thrown().expect("expected a relayed error");
    assert_eq!(thrown.message().as_deref(), Some("bad creds"));
    assert!(!thrown.stack.contains("auth.rs"));
    assert_eq!(thrown.stack, "Error: bad creds\n    at Auth:login (main process)");

    let error = thrown.value.as_error().expect("expected a generic error");
    assert_eq!(error.stack.as_deref(), Some(thrown.stack.as_str()));

    let ok = auth
        .call("login", vec![Value::from("alice"), Value::from("hunter2")])
        .await
        .unwrap();
    assert_eq!(ok, Value::from(true));
}

#[tokio::test]
async fn test_relayed_error_class_is_restored() {
    let conn = connect();
    conn.main.expose_api(Arc::new(Auth)).await.unwrap();

    let auth = conn.client.bind("Auth").await.unwrap();
    let err = auth.call("loginStrict", vec![]).await.unwrap_err();

    let thrown = err.thrown().expect("expected a relayed error");
    assert_eq!(
        thrown.downcast_ref::<AuthError>(),
        Some(&AuthError {
            message: "locked".into(),
            code: 423
        })
    );
    assert_eq!(thrown.stack, "AuthError: locked\n    at Auth:loginStrict (main process)");
}

// --- Test 5: Non-Object Throw ---

#[tokio::test]
async fn test_non_object_throw_arrives_unwrapped() {
    let conn = connect();
    conn.main.expose_api(Arc::new(Auth)).await.unwrap();

    let auth = conn.client.bind("Auth").await.unwrap();
    let err = auth.call("throwNumber", vec![]).await.unwrap_err();

    let thrown = err.thrown().expect("expected a relayed value");
    assert_eq!(thrown.value, Value::Data(json!(42)));
}

// --- Test 6: Unrelayed Fault ---

#[tokio::test]
async fn test_unrelayed_fault_stays_in_exposing_process() {
    init_tracing();
    let (main_transport, client_transport) = MemoryTransport::pair_named("main", "client");
    let faults = Arc::new(Mutex::new(Vec::new()));

    let seen = faults.clone();
    let main = Runtime::builder(Arc::new(main_transport))
        .side("main")
        .peer("client")
        .on_fault(move |report| {
            seen.lock()
                .unwrap()
                .push((report.wire_name.clone(), report.error.to_string()));
        })
        .build();
    let client = Runtime::builder(Arc::new(client_transport))
        .side("client")
        .peer("main")
        .build();

    main.expose_api(Arc::new(Auth)).await.unwrap();
    let auth = client.bind("Auth").await.unwrap();

    let err = auth.call("broken", vec![]).await.unwrap_err();
    assert!(err.thrown().is_none());
    match &err {
        CallError::Transport(transport::Error::Remote(message)) => {
            assert!(message.contains("Auth:broken"));
            assert!(!message.contains("database"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let faults = faults.lock().unwrap();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].0, "Auth:broken");
    assert!(faults[0].1.contains("database handle is gone"));
}

// --- Test 7: Idempotent Exposure ---

#[tokio::test]
async fn test_exposing_twice_registers_once() {
    let conn = connect();
    let auth = Arc::new(Auth);

    conn.main.expose_api(auth.clone()).await.unwrap();
    conn.main.expose_api(auth.clone()).await.unwrap();

    let registration = conn.main.exposed("Auth").unwrap();
    assert_eq!(registration.method_names, vec!["login", "loginStrict", "throwNumber", "broken"]);
    assert_eq!(conn.main_transport.sent_count(DISCOVERY_RESPONSE), 1);

    let proxy = conn.client.bind("Auth").await.unwrap();
    assert_eq!(proxy.methods().len(), 4);

    // a later connection from another process still binds
    let (main_transport, other_transport) = MemoryTransport::pair_named("main", "other");
    let main = Runtime::builder(Arc::new(main_transport)).side("main").build();
    let other = Runtime::builder(Arc::new(other_transport)).side("other").build();

    main.expose_api(auth.clone()).await.unwrap();
    main.expose_api(auth).await.unwrap();
    let proxy = other.bind("Auth").await.unwrap();
    assert!(proxy.has_method("login"));
}

#[tokio::test]
async fn test_conflicting_owner_is_rejected() {
    let conn = connect();

    conn.main.expose_api(Arc::new(Geometry)).await.unwrap();
    let impostor = ApiBuilder::new("Geometry", Arc::new(Auth)).method("login", login).build();

    let err = conn.main.expose(impostor).await.unwrap_err();
    assert!(matches!(err, ExposeError::NameConflict { ref api, .. } if api == "Geometry"));
    assert_eq!(conn.main.exposed("Geometry").unwrap().method_names.len(), 3);
}

// --- Test 8: Bind Timeout ---

#[tokio::test]
async fn test_bind_times_out_naming_the_api() {
    let conn = connect();
    conn.client.set_bind_timeout(Duration::from_millis(50));

    let started = Instant::now();
    let err = conn.client.bind("NeverExposed").await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(50), "failed too early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(150), "failed too late: {elapsed:?}");
    assert!(err.to_string().contains("NeverExposed"));
    assert!(err.to_string().contains("main process"));
    assert_eq!(conn.client.bind_state("NeverExposed"), BindState::Unbound);
}

#[tokio::test]
async fn test_timeout_change_applies_to_waiting_bind() {
    let conn = connect();
    conn.client.set_bind_timeout(Duration::from_secs(30));

    let client = conn.client.clone();
    let started = Instant::now();
    let waiting = tokio::spawn(async move { client.bind("NeverExposed").await });

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(conn.client.bind_state("NeverExposed"), BindState::Discovering);
    conn.client.set_bind_timeout(Duration::from_millis(40));

    let result = waiting.await.unwrap();
    assert!(result.is_err());
    assert!(started.elapsed() < Duration::from_secs(5));
}

// --- Test 9: Callback Relay ---

#[tokio::test]
async fn test_callback_receives_exact_arguments() {
    let conn = connect();
    conn.main.expose_api(Arc::new(Events)).await.unwrap();

    let events = conn.client.bind("Events").await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let listener = Callback::new(move |args| {
        let _ = tx.send(args);
    });

    events.call("subscribe", vec![Value::Callback(listener)]).await.unwrap();

    assert_eq!(recv_within(&mut rx).await, vec![json!("ev"), json!(7)]);
    assert_eq!(conn.client.callback_channels(), 1);
}

#[tokio::test]
async fn test_callback_invocations_keep_order() {
    let conn = connect();
    conn.main.expose_api(Arc::new(Events)).await.unwrap();

    let events = conn.client.bind("Events").await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let listener = Callback::new(move |args| {
        let _ = tx.send(args);
    });

    let result = events
        .call("countdown", vec![Value::from(3i64), Value::Callback(listener)])
        .await
        .unwrap();
    assert_eq!(result, Value::from(3i64));

    for expected in [2, 1, 0] {
        assert_eq!(recv_within(&mut rx).await, vec![json!(expected)]);
    }
}

// --- Test 10: Concurrent Binds ---

#[tokio::test]
async fn test_concurrent_binds_share_one_discovery() {
    let conn = connect();

    let main = conn.main.clone();
    let expose_later = async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        main.expose_api(Arc::new(Geometry)).await.unwrap();
    };

    let (first, second, ()) = tokio::join!(
        conn.client.bind("Geometry"),
        conn.client.bind("Geometry"),
        expose_later
    );

    let first = first.unwrap();
    let second = second.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(conn.client_transport.sent_count(DISCOVERY_REQUEST), 1);

    let third = conn.client.bind("Geometry").await.unwrap();
    assert!(Arc::ptr_eq(&first, &third));
    assert_eq!(conn.client_transport.sent_count(DISCOVERY_REQUEST), 1);
    assert_eq!(conn.client.bind_state("Geometry"), BindState::Bound);
}

// --- Test 11: Startup Races ---

#[tokio::test]
async fn test_bind_survives_jittered_exposure() {
    for _ in 0..5 {
        let conn = connect();
        let delay = Duration::from_millis(rand::thread_rng().gen_range(0..40));

        let main = conn.main.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            main.expose_api(Arc::new(Geometry)).await.unwrap();
        });

        let geometry = conn.client.bind("Geometry").await.unwrap();
        let result = geometry.call("echo", vec![Value::from("hi")]).await.unwrap();
        assert_eq!(result, Value::from("hi"));
    }
}

#[tokio::test]
async fn test_request_before_exposure_is_answered() {
    let conn = connect();

    // the main side learns of the request before it has anything to offer
    let client = conn.client.clone();
    let waiting = tokio::spawn(async move { client.bind("Events").await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    conn.main.expose_api(Arc::new(Events)).await.unwrap();
    let events = waiting.await.unwrap().unwrap();
    assert_eq!(events.methods(), ["subscribe", "countdown"]);
}

// --- Test 12: Both Directions ---

struct ClientInfo;

async fn version(_this: Arc<ClientInfo>, _args: Args) -> MethodResult {
    Ok(Value::from("1.2.3"))
}

impl Api for ClientInfo {
    fn define(builder: ApiBuilder<Self>) -> ApiBuilder<Self> {
        builder.method("version", version)
    }
}

#[tokio::test]
async fn test_apis_flow_in_both_directions() {
    let conn = connect();

    conn.main.expose_api(Arc::new(Geometry)).await.unwrap();
    conn.client.expose_api(Arc::new(ClientInfo)).await.unwrap();

    let info = conn.main.bind("ClientInfo").await.unwrap();
    let version: String = info.call_as("version", vec![]).await.unwrap();
    assert_eq!(version, "1.2.3");

    let geometry = conn.client.bind("Geometry").await.unwrap();
    assert!(geometry.has_method("translate"));
}

// --- Test 13: Unknown Method ---

#[tokio::test]
async fn test_unlisted_method_fails_locally() {
    let conn = connect();
    conn.main.expose_api(Arc::new(Geometry)).await.unwrap();

    let geometry = conn.client.bind("Geometry").await.unwrap();
    let err = geometry.call("rotate", vec![]).await.unwrap_err();

    assert!(matches!(err, CallError::UnknownMethod { ref method, .. } if method == "rotate"));
    assert_eq!(conn.client_transport.sent_count("Geometry:rotate"), 0);
}
