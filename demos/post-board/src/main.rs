//! A small message board: create posts, fetch them, watch them change.
//!
//! Run with `cargo run -p post-board`, then point any filament client at
//! `ws://127.0.0.1:9200`. Set `RUST_LOG=debug` to watch the dispatcher.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use filament::{
    HandlerError, Observer, ResourceHandlers, ResourceSchemas, Router,
    RpcServer, Schema, SchemaIssues, SchemaMap, Subscribable, UnsubscribeFn,
    Unsubscribable,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Board types
// ---------------------------------------------------------------------------

#[derive(Clone, Serialize, Deserialize)]
struct Post {
    id: u64,
    content: String,
}

#[derive(Clone, Serialize, Deserialize)]
struct NewPost {
    content: String,
}

#[derive(Clone, Serialize, Deserialize)]
struct Comment {
    id: u64,
    content: String,
}

#[derive(Clone, Serialize, Deserialize)]
struct NewComment {
    content: String,
}

// ---------------------------------------------------------------------------
// Schemas
// ---------------------------------------------------------------------------

/// Validates JSON against a serde type by round-tripping through it.
///
/// Deserializing normalizes the value (unknown fields dropped, numbers
/// coerced to the declared width), so the value handlers and subscribers
/// see is exactly what `T` can represent.
struct TypedSchema<T>(PhantomData<fn() -> T>);

impl<T> TypedSchema<T> {
    fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Schema for TypedSchema<T>
where
    T: Serialize + for<'de> Deserialize<'de>,
{
    fn validate(&self, value: &Value) -> Result<Value, SchemaIssues> {
        let typed: T = serde_json::from_value(value.clone())
            .map_err(|e| SchemaIssues::new(e.to_string()))?;
        serde_json::to_value(typed)
            .map_err(|e| SchemaIssues::new(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Keyed JSON store with change listeners.
///
/// Values live under resolved resource keys (`/posts/3`). Writing a key
/// notifies that key's listeners with the new value and the parent key's
/// listeners (`/posts`) with a fresh listing, so both single-item and
/// collection subscriptions stay live from one write.
#[derive(Clone, Default)]
struct Store {
    values: Arc<Mutex<BTreeMap<String, Value>>>,
    listeners: Arc<Mutex<BTreeMap<String, Vec<(u64, Observer<Value>)>>>>,
    next_listener: Arc<AtomicU64>,
}

impl Store {
    fn get(&self, key: &str) -> Value {
        self.values
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// All values stored directly under `prefix`, in key order. Deeper
    /// keys (`/posts/0/comments/1` under `/posts`) are not included.
    fn list(&self, prefix: &str) -> Value {
        let lead = format!("{prefix}/");
        let values = self.values.lock().unwrap();
        Value::Array(
            values
                .range(lead.clone()..)
                .take_while(|(k, _)| k.starts_with(&lead))
                .filter(|(k, _)| !k[lead.len()..].contains('/'))
                .map(|(_, v)| v.clone())
                .collect(),
        )
    }

    fn insert(&self, key: String, value: Value) {
        self.values.lock().unwrap().insert(key.clone(), value.clone());
        self.notify(&key, value);
        if let Some((parent, _)) = key.rsplit_once('/') {
            if !parent.is_empty() {
                let listing = self.list(parent);
                self.notify(parent, listing);
            }
        }
    }

    fn notify(&self, key: &str, value: Value) {
        let listeners = self.listeners.lock().unwrap();
        if let Some(observers) = listeners.get(key) {
            for (_, observer) in observers {
                observer.next(value.clone());
            }
        }
    }

    /// A stream of one key's value, current value first.
    fn watch(&self, key: impl Into<String>) -> StoreStream {
        StoreStream {
            store: self.clone(),
            key: key.into(),
            listing: false,
        }
    }

    /// A stream of a collection's listing, current listing first.
    fn watch_list(&self, prefix: impl Into<String>) -> StoreStream {
        StoreStream {
            store: self.clone(),
            key: prefix.into(),
            listing: true,
        }
    }

    #[cfg(test)]
    fn listener_count(&self, key: &str) -> usize {
        self.listeners
            .lock()
            .unwrap()
            .get(key)
            .map_or(0, Vec::len)
    }
}

struct StoreStream {
    store: Store,
    key: String,
    listing: bool,
}

impl Subscribable<Value> for StoreStream {
    fn subscribe(&self, observer: Observer<Value>) -> Box<dyn Unsubscribable> {
        let current = if self.listing {
            self.store.list(&self.key)
        } else {
            self.store.get(&self.key)
        };
        observer.next(current);

        let id = self.store.next_listener.fetch_add(1, Ordering::SeqCst);
        self.store
            .listeners
            .lock()
            .unwrap()
            .entry(self.key.clone())
            .or_default()
            .push((id, observer));

        let listeners = Arc::clone(&self.store.listeners);
        let key = self.key.clone();
        UnsubscribeFn::new(move || {
            let mut listeners = listeners.lock().unwrap();
            if let Some(observers) = listeners.get_mut(&key) {
                observers.retain(|(oid, _)| *oid != id);
                if observers.is_empty() {
                    listeners.remove(&key);
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

fn board(store: Store) -> (Router, SchemaMap) {
    let next_post = Arc::new(AtomicU64::new(0));
    let next_comment = Arc::new(AtomicU64::new(0));

    let list_store = store.clone();
    let watch_store = store.clone();
    let create_store = store.clone();
    let single_store = store.clone();
    let watch_single = store.clone();
    let comments_store = store.clone();
    let watch_comments = store.clone();
    let comment_store = store;

    let router = Router::builder()
        .resource(
            "/posts",
            ResourceHandlers::new()
                .on_get(move |_args| {
                    let store = list_store.clone();
                    async move { Ok(store.list("/posts")) }
                })
                .on_subscribe(move |_args| {
                    Ok(Box::new(watch_store.watch_list("/posts"))
                        as Box<dyn Subscribable<Value>>)
                }),
        )
        .resource(
            "/posts/new",
            ResourceHandlers::new().on_set(move |args| {
                let store = create_store.clone();
                let next_post = Arc::clone(&next_post);
                async move {
                    // Payload already passed the NewPost request schema.
                    let new_post: NewPost =
                        serde_json::from_value(args.data.ok_or_else(
                            || HandlerError::new("missing post payload"),
                        )?)
                        .map_err(|e| HandlerError::new(e.to_string()))?;

                    let id = next_post.fetch_add(1, Ordering::SeqCst);
                    let post = Post {
                        id,
                        content: new_post.content,
                    };
                    let value = serde_json::to_value(&post)
                        .map_err(|e| HandlerError::new(e.to_string()))?;
                    store.insert(format!("/posts/{id}"), value.clone());
                    tracing::info!(id, "post created");
                    Ok(value)
                }
            }),
        )
        .resource(
            "/posts/:postId",
            ResourceHandlers::new()
                .on_get(move |args| {
                    let store = single_store.clone();
                    async move { Ok(store.get(&args.resource_with_params)) }
                })
                .on_subscribe(move |args| {
                    Ok(Box::new(
                        watch_single.watch(args.resource_with_params),
                    ) as Box<dyn Subscribable<Value>>)
                }),
        )
        .resource(
            "/posts/:postId/comments",
            ResourceHandlers::new()
                .on_get(move |args| {
                    let store = comments_store.clone();
                    async move { Ok(store.list(&args.resource_with_params)) }
                })
                .on_subscribe(move |args| {
                    Ok(Box::new(
                        watch_comments.watch_list(args.resource_with_params),
                    ) as Box<dyn Subscribable<Value>>)
                }),
        )
        .resource(
            "/posts/:postId/comments/new",
            ResourceHandlers::new().on_set(move |args| {
                let store = comment_store.clone();
                let next_comment = Arc::clone(&next_comment);
                async move {
                    let new_comment: NewComment =
                        serde_json::from_value(args.data.ok_or_else(
                            || HandlerError::new("missing comment payload"),
                        )?)
                        .map_err(|e| HandlerError::new(e.to_string()))?;

                    let base = args
                        .resource_with_params
                        .strip_suffix("/new")
                        .unwrap_or(&args.resource_with_params)
                        .to_string();
                    let id = next_comment.fetch_add(1, Ordering::SeqCst);
                    let comment = Comment {
                        id,
                        content: new_comment.content,
                    };
                    let value = serde_json::to_value(&comment)
                        .map_err(|e| HandlerError::new(e.to_string()))?;
                    store.insert(format!("{base}/{id}"), value.clone());
                    Ok(value)
                }
            }),
        )
        .build();

    let mut schemas = SchemaMap::new();
    schemas.insert(
        "/posts".into(),
        ResourceSchemas::new(TypedSchema::<Vec<Post>>::new()),
    );
    schemas.insert(
        "/posts/new".into(),
        ResourceSchemas::new(TypedSchema::<Post>::new())
            .with_request(TypedSchema::<NewPost>::new()),
    );
    schemas.insert(
        "/posts/:postId".into(),
        ResourceSchemas::new(TypedSchema::<Option<Post>>::new()),
    );
    schemas.insert(
        "/posts/:postId/comments".into(),
        ResourceSchemas::new(TypedSchema::<Vec<Comment>>::new()),
    );
    schemas.insert(
        "/posts/:postId/comments/new".into(),
        ResourceSchemas::new(TypedSchema::<Comment>::new())
            .with_request(TypedSchema::<NewComment>::new()),
    );
    (router, schemas)
}

// ---------------------------------------------------------------------------
// Server bootstrap
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let (router, schemas) = board(Store::default());
    let server = RpcServer::builder()
        .bind("127.0.0.1:9200")
        .build(router, schemas)
        .await?;
    tracing::info!(addr = %server.local_addr()?, "post-board listening");

    server.run().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use filament::{Client, ClientConfig, SubscribeOptions};
    use serde_json::json;

    use super::*;

    async fn start() -> (String, Store) {
        let store = Store::default();
        let (router, schemas) = board(store.clone());
        let server = RpcServer::builder()
            .bind("127.0.0.1:0")
            .build(router, schemas)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = server.run().await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        (format!("ws://{addr}"), store)
    }

    async fn connect(url: &str) -> Client {
        Client::connect(ClientConfig::new(url).jitter(0.0))
            .await
            .unwrap()
    }

    fn collecting() -> (Observer<Value>, Arc<Mutex<Vec<Value>>>) {
        let values = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&values);
        let observer = Observer::new().on_next(move |value: Value| {
            sink.lock().unwrap().push(value);
        });
        (observer, values)
    }

    async fn wait_until<F: Fn() -> bool>(cond: F) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !cond() {
            assert!(tokio::time::Instant::now() < deadline, "timed out");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_create_then_list() {
        let (url, _) = start().await;
        let client = connect(&url).await;

        let created = client
            .set("/posts/new", json!({ "content": "first" }), None)
            .await
            .unwrap();
        assert_eq!(created, json!({ "id": 0, "content": "first" }));

        client
            .set("/posts/new", json!({ "content": "second" }), None)
            .await
            .unwrap();

        let posts = client.get("/posts", None, None).await.unwrap();
        assert_eq!(
            posts,
            json!([
                { "id": 0, "content": "first" },
                { "id": 1, "content": "second" },
            ])
        );
    }

    #[tokio::test]
    async fn test_get_post_by_id() {
        let (url, _) = start().await;
        let client = connect(&url).await;

        client
            .set("/posts/new", json!({ "content": "hello" }), None)
            .await
            .unwrap();

        let mut params = filament::Params::new();
        params.insert("postId".into(), "0".into());
        let post = client
            .get("/posts/:postId", Some(params), None)
            .await
            .unwrap();
        assert_eq!(post, json!({ "id": 0, "content": "hello" }));
    }

    #[tokio::test]
    async fn test_missing_post_is_null() {
        let (url, _) = start().await;
        let client = connect(&url).await;

        let mut params = filament::Params::new();
        params.insert("postId".into(), "42".into());
        let post = client
            .get("/posts/:postId", Some(params), None)
            .await
            .unwrap();
        assert_eq!(post, Value::Null);
    }

    #[tokio::test]
    async fn test_invalid_post_payload_rejected() {
        let (url, _) = start().await;
        let client = connect(&url).await;

        // `content` must be a string per the NewPost request schema.
        let result = client
            .set("/posts/new", json!({ "content": 7 }), None)
            .await;
        assert!(matches!(
            result,
            Err(filament::ClientError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_list_subscription_follows_creates() {
        let (url, _) = start().await;
        let client = connect(&url).await;

        let (observer, values) = collecting();
        let subscription = client.subscribe(SubscribeOptions::new("/posts"));
        let _handle = subscription.subscribe(observer);
        wait_until(|| !values.lock().unwrap().is_empty()).await;

        client
            .set("/posts/new", json!({ "content": "a" }), None)
            .await
            .unwrap();
        client
            .set("/posts/new", json!({ "content": "b" }), None)
            .await
            .unwrap();

        wait_until(|| values.lock().unwrap().len() >= 3).await;
        let values = values.lock().unwrap();
        assert_eq!(values[0], json!([]));
        assert_eq!(values[1], json!([{ "id": 0, "content": "a" }]));
        assert_eq!(
            values[2],
            json!([
                { "id": 0, "content": "a" },
                { "id": 1, "content": "b" },
            ])
        );
    }

    #[tokio::test]
    async fn test_single_post_subscription() {
        let (url, _) = start().await;
        let client = connect(&url).await;

        let mut params = filament::Params::new();
        params.insert("postId".into(), "0".into());
        let (observer, values) = collecting();
        let subscription = client.subscribe(
            SubscribeOptions::new("/posts/:postId").params(params),
        );
        let _handle = subscription.subscribe(observer);

        // Not created yet: the stream opens with null.
        wait_until(|| !values.lock().unwrap().is_empty()).await;
        assert_eq!(values.lock().unwrap()[0], Value::Null);

        client
            .set("/posts/new", json!({ "content": "now exists" }), None)
            .await
            .unwrap();

        wait_until(|| values.lock().unwrap().len() >= 2).await;
        assert_eq!(
            values.lock().unwrap()[1],
            json!({ "id": 0, "content": "now exists" })
        );
    }

    #[tokio::test]
    async fn test_comments_live_under_their_post() {
        let (url, _) = start().await;
        let client = connect(&url).await;

        client
            .set("/posts/new", json!({ "content": "post" }), None)
            .await
            .unwrap();

        let mut params = filament::Params::new();
        params.insert("postId".into(), "0".into());
        client
            .set(
                "/posts/:postId/comments/new",
                json!({ "content": "nice" }),
                Some(params.clone()),
            )
            .await
            .unwrap();

        let comments = client
            .get("/posts/:postId/comments", Some(params), None)
            .await
            .unwrap();
        assert_eq!(comments, json!([{ "id": 0, "content": "nice" }]));

        // Comments never leak into the posts listing.
        let posts = client.get("/posts", None, None).await.unwrap();
        assert_eq!(posts, json!([{ "id": 0, "content": "post" }]));
    }

    // -----------------------------------------------------------------
    // Store unit tests — deterministic, no network.
    // -----------------------------------------------------------------

    #[test]
    fn test_store_list_orders_by_key() {
        let store = Store::default();
        store.insert("/posts/0".into(), json!({ "id": 0 }));
        store.insert("/posts/1".into(), json!({ "id": 1 }));
        store.insert("/other/9".into(), json!({ "id": 9 }));

        assert_eq!(
            store.list("/posts"),
            json!([{ "id": 0 }, { "id": 1 }])
        );
    }

    #[test]
    fn test_store_list_skips_nested_keys() {
        let store = Store::default();
        store.insert("/posts/0".into(), json!({ "id": 0 }));
        store.insert("/posts/0/comments/0".into(), json!({ "id": 0 }));

        assert_eq!(store.list("/posts"), json!([{ "id": 0 }]));
        assert_eq!(
            store.list("/posts/0/comments"),
            json!([{ "id": 0 }])
        );
    }

    #[test]
    fn test_store_insert_notifies_key_and_parent() {
        let store = Store::default();
        let (key_observer, key_values) = collecting();
        let (list_observer, list_values) = collecting();
        let _key_handle = store.watch("/posts/0").subscribe(key_observer);
        let _list_handle =
            store.watch_list("/posts").subscribe(list_observer);
        // Initial emissions: null value, empty listing.
        assert_eq!(key_values.lock().unwrap().as_slice(), [Value::Null]);
        assert_eq!(list_values.lock().unwrap().as_slice(), [json!([])]);

        store.insert("/posts/0".into(), json!({ "id": 0 }));

        assert_eq!(key_values.lock().unwrap()[1], json!({ "id": 0 }));
        assert_eq!(list_values.lock().unwrap()[1], json!([{ "id": 0 }]));
    }

    #[test]
    fn test_store_unsubscribe_removes_listener() {
        let store = Store::default();
        let (observer, _values) = collecting();
        let handle = store.watch_list("/posts").subscribe(observer);
        assert_eq!(store.listener_count("/posts"), 1);

        handle.unsubscribe();
        assert_eq!(store.listener_count("/posts"), 0);
    }

    #[test]
    fn test_typed_schema_rejects_wrong_shape() {
        let schema = TypedSchema::<Post>::new();
        assert!(schema.validate(&json!({ "content": "no id" })).is_err());
        assert!(
            schema
                .validate(&json!({ "id": 1, "content": "ok" }))
                .is_ok()
        );
    }
}
