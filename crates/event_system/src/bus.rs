//! The event bus.
//!
//! Handlers are registered per [`EventName`] and called in subscription order.
//! Calling a handler runs its synchronous part immediately, inside
//! [`EventBus::emit`], and hands back a future for the rest of its work. Each
//! future is spawned as its own tokio task, so `emit` never waits on a handler
//! and a slow or failing handler cannot hold up its siblings.
//!
//! Every handler failure (an `Err`, a panic in either part, or a missing
//! runtime) ends up in one place: it is logged, counted in [`EventBusStats`]
//! and broadcast to [`EventBus::subscribe_faults`] receivers.

use crate::error::{panic_message, EventError};
use crate::events::{EventName, EventPayload, ServerEvent};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// The asynchronous remainder of a handler.
pub type HandlerFuture = BoxFuture<'static, Result<(), EventError>>;

/// Capacity of the fault broadcast channel. Slow subscribers observe `Lagged`.
const FAULT_CHANNEL_CAPACITY: usize = 256;

/// A future that is already done. Handy for handlers with nothing left to do
/// after their synchronous part.
pub fn completed() -> HandlerFuture {
    futures::future::ready(Ok(())).boxed()
}

/// Something that can be subscribed to the bus.
pub trait EventHandler: Send + Sync {
    /// Runs the synchronous part of the handler and returns the remainder.
    fn handle(&self, event: &ServerEvent) -> HandlerFuture;

    /// Name used in logs and fault reports.
    fn handler_name(&self) -> &str;
}

/// Handler backed by a closure over the raw envelope.
struct FnHandler<F> {
    name: String,
    handler: F,
}

impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&ServerEvent) -> HandlerFuture + Send + Sync,
{
    fn handle(&self, event: &ServerEvent) -> HandlerFuture {
        (self.handler)(event)
    }

    fn handler_name(&self) -> &str {
        &self.name
    }
}

/// Handler backed by a closure over one payload type.
pub struct TypedEventHandler<E, F>
where
    E: EventPayload,
    F: Fn(&E) -> HandlerFuture + Send + Sync,
{
    handler: F,
    name: String,
    _phantom: std::marker::PhantomData<fn(&E)>,
}

impl<E, F> TypedEventHandler<E, F>
where
    E: EventPayload,
    F: Fn(&E) -> HandlerFuture + Send + Sync,
{
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            handler,
            name: name.into(),
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<E, F> EventHandler for TypedEventHandler<E, F>
where
    E: EventPayload,
    F: Fn(&E) -> HandlerFuture + Send + Sync,
{
    fn handle(&self, event: &ServerEvent) -> HandlerFuture {
        match E::from_event(event) {
            Some(payload) => (self.handler)(payload),
            None => {
                let mismatch = EventError::PayloadMismatch {
                    expected: E::NAME,
                    received: event.name(),
                };
                futures::future::ready(Err(mismatch)).boxed()
            }
        }
    }

    fn handler_name(&self) -> &str {
        &self.name
    }
}

/// A handler failure as seen by fault subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFault {
    pub event: EventName,
    pub handler: String,
    pub message: String,
}

/// Bus counters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EventBusStats {
    pub total_handlers: usize,
    pub events_emitted: u64,
    pub handler_failures: u64,
}

/// Shared between the bus and the tasks it spawns.
struct FaultSink {
    stats: Mutex<EventBusStats>,
    sender: broadcast::Sender<HandlerFault>,
}

impl FaultSink {
    fn report(&self, event: EventName, handler: &str, error: EventError) {
        error!("❌ Handler {} failed on {}: {}", handler, event, error);
        self.stats.lock().handler_failures += 1;
        // No subscribers is fine; the failure is already logged and counted.
        let _ = self.sender.send(HandlerFault {
            event,
            handler: handler.to_string(),
            message: error.to_string(),
        });
    }
}

/// Handle on the tasks spawned by one [`EventBus::emit`] call.
///
/// Dropping it does not cancel anything.
#[derive(Debug)]
pub struct Dispatch {
    event: EventName,
    tasks: Vec<JoinHandle<()>>,
}

impl Dispatch {
    /// The emitted event.
    pub fn event(&self) -> EventName {
        self.event
    }

    /// Number of handler tasks that were spawned.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Waits until every spawned handler task has finished.
    ///
    /// Failures are not returned here; they go to the fault channel.
    pub async fn settled(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                debug!("Handler task for {} did not complete: {}", self.event, e);
            }
        }
    }
}

/// Typed publish/subscribe bus keyed by [`EventName`].
pub struct EventBus {
    handlers: RwLock<HashMap<EventName, Vec<Arc<dyn EventHandler>>>>,
    faults: Arc<FaultSink>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &"[handlers]")
            .field("stats", &self.stats())
            .finish()
    }
}

impl EventBus {
    /// Creates a bus with no registered handlers.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(FAULT_CHANNEL_CAPACITY);
        Self {
            handlers: RwLock::new(HashMap::new()),
            faults: Arc::new(FaultSink {
                stats: Mutex::new(EventBusStats::default()),
                sender,
            }),
        }
    }

    /// Registers a closure over the raw envelope.
    pub fn on<F>(&self, event: EventName, handler_name: impl Into<String>, handler: F)
    where
        F: Fn(&ServerEvent) -> HandlerFuture + Send + Sync + 'static,
    {
        self.subscribe(
            event,
            Arc::new(FnHandler {
                name: handler_name.into(),
                handler,
            }),
        );
    }

    /// Registers a closure over one payload type.
    ///
    /// ```ignore
    /// bus.on_event("audit", |started: &SessionStarted| {
    ///     info!("session {} is live", started.session_id);
    ///     completed()
    /// });
    /// ```
    pub fn on_event<E, F>(&self, handler_name: impl Into<String>, handler: F)
    where
        E: EventPayload,
        F: Fn(&E) -> HandlerFuture + Send + Sync + 'static,
    {
        self.subscribe(E::NAME, Arc::new(TypedEventHandler::new(handler_name, handler)));
    }

    /// Appends a handler to the list for `event`.
    pub fn subscribe(&self, event: EventName, handler: Arc<dyn EventHandler>) {
        debug!("📝 Registered handler {} for {}", handler.handler_name(), event);
        self.handlers.write().entry(event).or_default().push(handler);
        self.faults.stats.lock().total_handlers += 1;
    }

    /// Removes one previously subscribed handler.
    ///
    /// Handlers are matched by identity, so `handler` must be the same `Arc`
    /// that was passed to [`subscribe`](EventBus::subscribe).
    ///
    /// # Returns
    ///
    /// `true` if the handler was found and removed.
    pub fn unsubscribe(&self, event: EventName, handler: &Arc<dyn EventHandler>) -> bool {
        let target = Arc::as_ptr(handler) as *const ();
        let removed = {
            let mut handlers = self.handlers.write();
            let Some(list) = handlers.get_mut(&event) else {
                return false;
            };
            let before = list.len();
            list.retain(|existing| Arc::as_ptr(existing) as *const () != target);
            let removed = before - list.len();
            if list.is_empty() {
                handlers.remove(&event);
            }
            removed
        };

        if removed == 0 {
            return false;
        }

        let mut stats = self.faults.stats.lock();
        stats.total_handlers = stats.total_handlers.saturating_sub(removed);
        debug!("🧹 Unsubscribed handler {} from {}", handler.handler_name(), event);
        true
    }

    /// Emits an event to every handler registered for its name.
    ///
    /// Synchronous parts run here, in registration order, on the calling
    /// thread. Asynchronous remainders are spawned on the current tokio runtime
    /// and not awaited; their failures go to the fault channel.
    ///
    /// # Arguments
    ///
    /// * `event` - A payload struct or an already built [`ServerEvent`]
    ///
    /// # Returns
    ///
    /// A [`Dispatch`] for the spawned handler tasks. Dropping it is fine;
    /// awaiting [`Dispatch::settled`] waits for every handler to finish.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use event_system::{create_event_bus, EndReason, SessionFinished};
    ///
    /// # async fn example() {
    /// let bus = create_event_bus();
    /// bus.emit(SessionFinished {
    ///     session_id: "s1".to_string(),
    ///     end_reason: EndReason::Kicked,
    /// })
    /// .settled()
    /// .await;
    /// # }
    /// ```
    pub fn emit(&self, event: impl Into<ServerEvent>) -> Dispatch {
        let event = event.into();
        let name = event.name();

        // Snapshot so handlers may (un)subscribe while being called.
        let handlers = self.handlers.read().get(&name).cloned().unwrap_or_default();
        self.faults.stats.lock().events_emitted += 1;

        if handlers.is_empty() {
            debug!("No handlers for event: {}", name);
            return Dispatch {
                event: name,
                tasks: Vec::new(),
            };
        }

        debug!("📤 Emitting {} to {} handlers", name, handlers.len());

        let runtime = Handle::try_current().ok();
        let mut tasks = Vec::with_capacity(handlers.len());

        for handler in handlers {
            let future = match std::panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&event))) {
                Ok(future) => future,
                Err(panic) => {
                    self.faults.report(
                        name,
                        handler.handler_name(),
                        EventError::HandlerPanicked(panic_message(panic)),
                    );
                    continue;
                }
            };

            let Some(runtime) = runtime.as_ref() else {
                self.faults
                    .report(name, handler.handler_name(), EventError::NoRuntime);
                continue;
            };

            let faults = Arc::clone(&self.faults);
            let handler_name = handler.handler_name().to_string();
            tasks.push(runtime.spawn(async move {
                let result = match AssertUnwindSafe(future).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => Err(EventError::HandlerPanicked(panic_message(panic))),
                };
                if let Err(error) = result {
                    faults.report(name, &handler_name, error);
                }
            }));
        }

        Dispatch { event: name, tasks }
    }

    /// Removes every handler registered for `event`, returning how many were removed.
    pub fn remove_handlers(&self, event: EventName) -> usize {
        let removed = self
            .handlers
            .write()
            .remove(&event)
            .map(|handlers| handlers.len())
            .unwrap_or(0);

        if removed > 0 {
            let mut stats = self.faults.stats.lock();
            stats.total_handlers = stats.total_handlers.saturating_sub(removed);
            info!("🧹 Removed {} handlers for {}", removed, event);
        }
        removed
    }

    pub fn handler_count(&self, event: EventName) -> usize {
        self.handlers.read().get(&event).map_or(0, Vec::len)
    }

    /// Events with at least one handler, in declaration order.
    pub fn registered_events(&self) -> Vec<EventName> {
        let handlers = self.handlers.read();
        EventName::ALL
            .iter()
            .copied()
            .filter(|name| handlers.get(name).is_some_and(|list| !list.is_empty()))
            .collect()
    }

    /// Receives every handler failure reported after this call.
    ///
    /// Failures are also logged and counted in [`EventBusStats::handler_failures`],
    /// so nobody has to listen. A receiver that falls more than 256 faults
    /// behind gets `RecvError::Lagged` and skips ahead.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # async fn example(bus: &event_system::EventBus) {
    /// let mut faults = bus.subscribe_faults();
    /// while let Ok(fault) = faults.recv().await {
    ///     eprintln!("{} failed on {}: {}", fault.handler, fault.event, fault.message);
    /// }
    /// # }
    /// ```
    pub fn subscribe_faults(&self) -> broadcast::Receiver<HandlerFault> {
        self.faults.sender.subscribe()
    }

    pub fn stats(&self) -> EventBusStats {
        self.faults.stats.lock().clone()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Creates a shared event bus.
pub fn create_event_bus() -> Arc<EventBus> {
    Arc::new(EventBus::new())
}
