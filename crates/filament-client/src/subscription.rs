//! The subscription surface handed to callers.

use std::sync::atomic::{AtomicU64, Ordering};

use filament_protocol::{
    Observer, Params, Subscribable, UnsubscribeFn, Unsubscribable,
    resource_with_params,
};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::client::Command;

/// Counter for observer handles, unique for the lifetime of the process.
static NEXT_OBSERVER_ID: AtomicU64 = AtomicU64::new(1);

/// What to subscribe to, and whether the stream may be shared.
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    pub(crate) resource: String,
    pub(crate) params: Option<Params>,
    pub(crate) data: Option<Value>,
    pub(crate) cache: bool,
}

impl SubscribeOptions {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            params: None,
            data: None,
            cache: true,
        }
    }

    pub fn params(mut self, params: Params) -> Self {
        self.params = Some(params);
        self
    }

    /// Attaches a request payload. The payload becomes part of the cache
    /// key, so differently refined subscriptions are never shared.
    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Opts out of sharing: this subscription gets its own wire stream
    /// and never replays another stream's last value.
    pub fn no_cache(mut self) -> Self {
        self.cache = false;
        self
    }

    /// The shared-stream identity: the resolved resource key, composite
    /// with the payload when one is set.
    pub(crate) fn cache_key(&self) -> String {
        let resolved =
            resource_with_params(&self.resource, self.params.as_ref());
        match &self.data {
            Some(data) => format!("{resolved}?{data}"),
            None => resolved,
        }
    }
}

/// A lazily subscribed resource stream.
///
/// Created by [`Client::subscribe`](crate::Client::subscribe); nothing
/// touches the wire until an [`Observer`] is attached. Each attached
/// observer gets its own teardown handle, and the wire subscription ends
/// when the last observer of a shared stream detaches.
pub struct Subscription {
    commands: mpsc::UnboundedSender<Command>,
    options: SubscribeOptions,
}

impl Subscription {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<Command>,
        options: SubscribeOptions,
    ) -> Self {
        Self { commands, options }
    }
}

impl Subscribable<Value> for Subscription {
    fn subscribe(&self, observer: Observer<Value>) -> Box<dyn Unsubscribable> {
        let observer_id = NEXT_OBSERVER_ID.fetch_add(1, Ordering::Relaxed);
        let _ = self.commands.send(Command::Attach {
            options: self.options.clone(),
            observer_id,
            observer,
        });
        let commands = self.commands.clone();
        UnsubscribeFn::new(move || {
            let _ = commands.send(Command::Detach { observer_id });
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_cache_key_resolves_params() {
        let options = SubscribeOptions::new("/posts/:postId")
            .params(params(&[("postId", "42")]));
        assert_eq!(options.cache_key(), "/posts/42");
    }

    #[test]
    fn test_cache_key_includes_payload() {
        let options =
            SubscribeOptions::new("/posts").data(json!({ "limit": 10 }));
        assert_eq!(options.cache_key(), "/posts?{\"limit\":10}");
    }

    #[test]
    fn test_cache_key_same_inputs_match() {
        let a = SubscribeOptions::new("/posts/:postId")
            .params(params(&[("postId", "1")]));
        let b = SubscribeOptions::new("/posts/:postId")
            .params(params(&[("postId", "1")]));
        assert_eq!(a.cache_key(), b.cache_key());
    }
}
