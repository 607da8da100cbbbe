//! End-to-end tests over real WebSockets: server, client, and everything
//! between them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use filament::{
    AnySchema, Client, ClientConfig, Dispatcher, HandlerError, Observer,
    Params, ResourceHandlers, ResourceSchemas, Router, RpcServer, SchemaMap,
    ServerMessage, Subscribable, SubscribeOptions, UnsubscribeFn,
    Unsubscribable, WsTransport, decode_frame,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

/// An in-memory post list whose clones share state. `subscribe` emits the
/// current snapshot immediately and again after every `add`.
#[derive(Clone, Default)]
struct Board {
    posts: Arc<Mutex<Vec<Value>>>,
    observers: Arc<Mutex<Vec<(u64, Observer<Value>)>>>,
    next_observer: Arc<AtomicU64>,
}

impl Board {
    fn snapshot(&self) -> Value {
        Value::Array(self.posts.lock().unwrap().clone())
    }

    fn add(&self, post: Value) -> Value {
        self.posts.lock().unwrap().push(post);
        let snapshot = self.snapshot();
        for (_, observer) in self.observers.lock().unwrap().iter() {
            observer.next(snapshot.clone());
        }
        snapshot
    }

    fn observer_count(&self) -> usize {
        self.observers.lock().unwrap().len()
    }
}

impl Subscribable<Value> for Board {
    fn subscribe(&self, observer: Observer<Value>) -> Box<dyn Unsubscribable> {
        observer.next(self.snapshot());
        let id = self.next_observer.fetch_add(1, Ordering::SeqCst);
        self.observers.lock().unwrap().push((id, observer));
        let observers = Arc::clone(&self.observers);
        UnsubscribeFn::new(move || {
            observers.lock().unwrap().retain(|(oid, _)| *oid != id);
        })
    }
}

fn board_router(board: Board) -> (Router, SchemaMap) {
    let get_board = board.clone();
    let set_board = board.clone();
    let by_id_board = board.clone();
    let router = Router::builder()
        .resource(
            "/posts",
            ResourceHandlers::new()
                .on_get(move |_args| {
                    let board = get_board.clone();
                    async move { Ok(board.snapshot()) }
                })
                .on_subscribe(move |_args| {
                    Ok(Box::new(board.clone()) as Box<dyn Subscribable<Value>>)
                }),
        )
        .resource(
            "/posts/new",
            ResourceHandlers::new().on_set(move |args| {
                let board = set_board.clone();
                async move {
                    let post = args.data.ok_or_else(|| {
                        HandlerError::new("missing post payload")
                    })?;
                    Ok(board.add(post))
                }
            }),
        )
        .resource(
            "/posts/:postId",
            ResourceHandlers::new().on_get(move |args| {
                let board = by_id_board.clone();
                async move {
                    let id: usize = args
                        .params
                        .as_ref()
                        .and_then(|p| p.get("postId"))
                        .and_then(|raw| raw.parse().ok())
                        .ok_or_else(|| HandlerError::new("bad post id"))?;
                    board
                        .posts
                        .lock()
                        .unwrap()
                        .get(id)
                        .cloned()
                        .ok_or_else(|| HandlerError::new("no such post"))
                }
            }),
        )
        .build();

    let mut schemas = SchemaMap::new();
    schemas.insert("/posts".into(), ResourceSchemas::new(AnySchema));
    schemas.insert("/posts/new".into(), ResourceSchemas::new(AnySchema));
    schemas.insert("/posts/:postId".into(), ResourceSchemas::new(AnySchema));
    (router, schemas)
}

/// Starts a server on a random port and returns its URL.
async fn start_server(board: Board) -> String {
    let (router, schemas) = board_router(board);
    let server = RpcServer::builder()
        .bind("127.0.0.1:0")
        .build(router, schemas)
        .await
        .expect("server should build");
    let addr = server.local_addr().expect("should have local addr");
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    format!("ws://{addr}")
}

fn fast_config(url: &str) -> ClientConfig {
    ClientConfig::new(url)
        .reconnect_delays(vec![Duration::from_millis(20)])
        .jitter(0.0)
}

fn collecting_observer() -> (Observer<Value>, Arc<Mutex<Vec<Value>>>) {
    let values = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&values);
    let observer = Observer::new().on_next(move |value: Value| {
        sink.lock().unwrap().push(value);
    });
    (observer, values)
}

async fn wait_for<F: Fn() -> bool>(what: &str, cond: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "timed out: {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_get_over_real_socket() {
    let url = start_server(Board::default()).await;
    let client = Client::connect(fast_config(&url)).await.unwrap();

    let posts = client.get("/posts", None, None).await.unwrap();
    assert_eq!(posts, json!([]));
}

#[tokio::test]
async fn test_set_then_get_roundtrip() {
    let url = start_server(Board::default()).await;
    let client = Client::connect(fast_config(&url)).await.unwrap();

    let after_set = client
        .set("/posts/new", json!({ "content": "hello" }), None)
        .await
        .unwrap();
    assert_eq!(after_set, json!([{ "content": "hello" }]));

    let mut params = Params::new();
    params.insert("postId".into(), "0".into());
    let post = client
        .get("/posts/:postId", Some(params), None)
        .await
        .unwrap();
    assert_eq!(post, json!({ "content": "hello" }));
}

#[tokio::test]
async fn test_unknown_resource_rejected_end_to_end() {
    let url = start_server(Board::default()).await;
    let client = Client::connect(fast_config(&url)).await.unwrap();

    let result = client.get("/missing", None, None).await;
    match result {
        Err(filament::ClientError::Rejected(error)) => {
            assert_eq!(error, "resource not found");
        }
        other => panic!("expected Rejected, got {other:?}"),
    }
}

#[tokio::test]
async fn test_subscription_events_arrive_in_order() {
    let url = start_server(Board::default()).await;
    let client = Client::connect(fast_config(&url)).await.unwrap();

    let (observer, values) = collecting_observer();
    let subscription = client.subscribe(SubscribeOptions::new("/posts"));
    let _handle = subscription.subscribe(observer);

    // Initial snapshot from the board's subscribe.
    wait_for("initial event", || !values.lock().unwrap().is_empty()).await;

    for i in 0..3 {
        client
            .set("/posts/new", json!({ "n": i }), None)
            .await
            .unwrap();
    }

    wait_for("three updates", || values.lock().unwrap().len() >= 4).await;
    let values = values.lock().unwrap();
    assert_eq!(values[0], json!([]));
    assert_eq!(values[1], json!([{ "n": 0 }]));
    assert_eq!(values[2], json!([{ "n": 0 }, { "n": 1 }]));
    assert_eq!(values[3], json!([{ "n": 0 }, { "n": 1 }, { "n": 2 }]));
}

#[tokio::test]
async fn test_shared_subscription_is_one_wire_stream() {
    let board = Board::default();
    let url = start_server(board.clone()).await;
    let client = Client::connect(fast_config(&url)).await.unwrap();

    let subscription = client.subscribe(SubscribeOptions::new("/posts"));
    let (observer_a, values_a) = collecting_observer();
    let (observer_b, values_b) = collecting_observer();
    let _handle_a = subscription.subscribe(observer_a);
    let _handle_b = subscription.subscribe(observer_b);

    wait_for("both initial values", || {
        !values_a.lock().unwrap().is_empty()
            && !values_b.lock().unwrap().is_empty()
    })
    .await;

    // The server saw exactly one subscription for the two observers.
    assert_eq!(board.observer_count(), 1);
}

#[tokio::test]
async fn test_unsubscribe_stops_events() {
    let board = Board::default();
    let url = start_server(board.clone()).await;
    let client = Client::connect(fast_config(&url)).await.unwrap();

    let (observer, values) = collecting_observer();
    let subscription = client.subscribe(SubscribeOptions::new("/posts"));
    let handle = subscription.subscribe(observer);
    wait_for("initial event", || !values.lock().unwrap().is_empty()).await;

    handle.unsubscribe();
    wait_for("server-side teardown", || board.observer_count() == 0).await;

    client
        .set("/posts/new", json!({ "late": true }), None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(values.lock().unwrap().len(), 1, "no events after teardown");
}

#[tokio::test]
async fn test_client_reconnects_and_resubscribes() {
    let board = Board::default();
    let (router, schemas) = board_router(board.clone());
    let mut transport = WsTransport::bind("127.0.0.1:0").await.unwrap();
    let addr = transport.local_addr().unwrap();
    let dispatcher = Arc::new(Dispatcher::new(router, schemas));

    // Drop the first connection outright so the client has to reconnect;
    // serve every later one normally.
    tokio::spawn(async move {
        let first = transport.accept().await.unwrap();
        drop(first);
        loop {
            let Ok((sink, source, addr)) = transport.accept().await else {
                break;
            };
            Arc::clone(&dispatcher)
                .add_connection(sink, source, Some(addr))
                .await;
        }
    });

    let client = Client::connect(fast_config(&format!("ws://{addr}")))
        .await
        .unwrap();

    let (observer, values) = collecting_observer();
    let subscription = client.subscribe(SubscribeOptions::new("/posts"));
    let _handle = subscription.subscribe(observer);

    // After the forced drop, the cached subscription re-establishes
    // itself on the next connection and the stream resumes.
    wait_for("resubscribed after reconnect", || {
        !values.lock().unwrap().is_empty()
    })
    .await;

    client
        .set("/posts/new", json!({ "after": "reconnect" }), None)
        .await
        .unwrap();
    wait_for("event after reconnect", || {
        values.lock().unwrap().last()
            == Some(&json!([{ "after": "reconnect" }]))
    })
    .await;
}

#[tokio::test]
async fn test_raw_socket_gets_reject_for_garbage() {
    let url = start_server(Board::default()).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("should connect");
    ws.send(Message::text("not json")).await.expect("send");

    let msg = timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("timed out")
        .unwrap()
        .expect("recv");
    let Message::Text(frame) = msg else {
        panic!("expected text frame");
    };
    let message: ServerMessage = decode_frame(frame.as_str()).unwrap();
    assert_eq!(
        message,
        ServerMessage::Reject {
            error: "malformed frame".into(),
        }
    );
}
