//! The observer surface shared by both endpoints.
//!
//! A [`Subscribable`] is anything that can be subscribed to with an
//! [`Observer`] and hands back an [`Unsubscribable`] teardown handle. The
//! server's `subscribe` handlers return one (backed by whatever the
//! application's data source is); the client hands one to callers of
//! `subscribe` (backed by the wire subscription).

/// Callback bundle for consuming a stream of values.
///
/// All three callbacks are optional; construct with [`Observer::new`] and
/// chain the ones you need:
///
/// ```
/// use filament_protocol::Observer;
///
/// let observer: Observer<u32> = Observer::new()
///     .on_next(|value| println!("got {value}"))
///     .on_error(|err| eprintln!("stream failed: {err}"));
/// ```
pub struct Observer<T> {
    next: Option<Box<dyn Fn(T) + Send + Sync>>,
    error: Option<Box<dyn Fn(String) + Send + Sync>>,
    complete: Option<Box<dyn Fn() + Send + Sync>>,
}

impl<T> Observer<T> {
    pub fn new() -> Self {
        Self {
            next: None,
            error: None,
            complete: None,
        }
    }

    pub fn on_next(mut self, f: impl Fn(T) + Send + Sync + 'static) -> Self {
        self.next = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(String) + Send + Sync + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.complete = Some(Box::new(f));
        self
    }

    /// Delivers one value, if a `next` callback is registered.
    pub fn next(&self, value: T) {
        if let Some(next) = &self.next {
            next(value);
        }
    }

    /// Delivers a terminal error, if an `error` callback is registered.
    pub fn error(&self, err: String) {
        if let Some(error) = &self.error {
            error(err);
        }
    }

    /// Signals completion, if a `complete` callback is registered.
    pub fn complete(&self) {
        if let Some(complete) = &self.complete {
            complete();
        }
    }
}

impl<T> Default for Observer<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A handle that tears down one subscription when consumed.
pub trait Unsubscribable: Send {
    fn unsubscribe(self: Box<Self>);
}

/// A source of values that can be observed.
pub trait Subscribable<T>: Send + Sync {
    fn subscribe(&self, observer: Observer<T>) -> Box<dyn Unsubscribable>;
}

/// Adapts a closure into an [`Unsubscribable`].
pub struct UnsubscribeFn(Box<dyn FnOnce() + Send>);

impl UnsubscribeFn {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Box<dyn Unsubscribable> {
        Box::new(Self(Box::new(f)))
    }
}

impl Unsubscribable for UnsubscribeFn {
    fn unsubscribe(self: Box<Self>) {
        (self.0)();
    }
}
