use std::error::Error;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};
use std::task::{Context, Poll};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{trace, warn};

/// Events multicast to session observers.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceEvent {
    /// Adapter discovery/availability changed.
    StateUpdate { discovering: bool, available: bool },
    /// A link to `device_id` came up.
    Connected { device_id: String },
    /// The link to `device_id` went down.
    Disconnected { device_id: String },
    /// The instrument measured on its own button press.
    SpontaneousMeasurement { mode: u8 },
}

/// Failure reported by an event handler.
pub type HandlerError = Box<dyn Error + Send + Sync>;

/// Receives published events.
pub trait EventHandler: Send + Sync {
    /// Handles one event.
    ///
    /// # Errors
    ///
    /// A returned error is logged by the bus and does not affect other handlers.
    fn handle(&self, event: &DeviceEvent) -> Result<(), HandlerError>;
}

impl<F> EventHandler for F
where
    F: Fn(&DeviceEvent) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, event: &DeviceEvent) -> Result<(), HandlerError> {
        self(event)
    }
}

/// Shared handle used for subscription identity.
pub type SharedHandler = Arc<dyn EventHandler>;

/// Wraps a closure as a [`SharedHandler`].
///
/// ```
/// use colorimeter::{EventBus, handler_fn};
///
/// let bus = EventBus::new();
/// let handler = handler_fn(|event| {
///     println!("{event:?}");
///     Ok(())
/// });
/// bus.subscribe(&handler);
/// assert_eq!(1, bus.subscriber_count());
/// ```
pub fn handler_fn<F>(handler: F) -> SharedHandler
where
    F: Fn(&DeviceEvent) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    Arc::new(handler)
}

/// Synchronous multicast of [`DeviceEvent`]s.
///
/// Handlers are identified by their `Arc` allocation: subscribing the same
/// handle twice is a no-op and unsubscribing an unknown handle does nothing.
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Arc<RwLock<Vec<SharedHandler>>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, handler: &SharedHandler) {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if handlers.iter().any(|known| Arc::ptr_eq(known, handler)) {
            return;
        }
        handlers.push(Arc::clone(handler));
    }

    pub fn unsubscribe(&self, handler: &SharedHandler) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|known| !Arc::ptr_eq(known, handler));
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Delivers `event` to every handler in subscription order.
    ///
    /// Handlers run against a snapshot of the list, so they may subscribe or
    /// unsubscribe while being called. A handler that errors or panics is
    /// logged and skipped.
    pub fn publish(&self, event: &DeviceEvent) {
        let snapshot = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        trace!(?event, handlers = snapshot.len(), "publishing event");

        for (index, handler) in snapshot.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| handler.handle(event))) {
                Ok(Ok(())) => {}
                Ok(Err(error)) => warn!(handler = index, %error, "event handler failed"),
                Err(_) => warn!(handler = index, "event handler panicked"),
            }
        }
    }

    /// Returns a stream of every event published from now on.
    ///
    /// The backing subscription is removed when the stream is dropped.
    #[must_use]
    pub fn stream(&self) -> EventStream {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handler = handler_fn(move |event| {
            sender
                .send(event.clone())
                .map_err(|_| HandlerError::from("event stream receiver dropped"))
        });
        self.subscribe(&handler);
        EventStream {
            inner: UnboundedReceiverStream::new(receiver),
            bus: self.clone(),
            handler,
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Event stream returned by [`EventBus::stream`].
pub struct EventStream {
    inner: UnboundedReceiverStream<DeviceEvent>,
    bus: EventBus,
    handler: SharedHandler,
}

impl Stream for EventStream {
    type Item = DeviceEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.bus.unsubscribe(&self.handler);
    }
}
