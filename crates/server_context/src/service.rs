//! Service base and declarative event bindings.
//!
//! A service declares which events it handles in a static table,
//! [`Service::EVENT_BINDINGS`], pairing an [`EventName`] with the name of one of
//! its methods. [`Service::event_method`] resolves a method name to a bus
//! handler, usually through [`bind_method`]. When the context constructs a
//! service it walks the table once and subscribes every pair it can resolve.
//!
//! ```ignore
//! impl Service for Greeter {
//!     const EVENT_BINDINGS: &'static [EventBinding] = &[
//!         EventBinding::new(EventName::PlayerConnecting, "on_player_connecting"),
//!     ];
//!
//!     fn create(base: ServiceBase) -> Result<Self, ServiceError> {
//!         Ok(Self { base })
//!     }
//!
//!     fn base(&self) -> &ServiceBase {
//!         &self.base
//!     }
//!
//!     fn event_method(self: &Arc<Self>, method: &str) -> Option<EventMethod> {
//!         match method {
//!             "on_player_connecting" => Some(bind_method(self, method, Self::on_player_connecting)),
//!             _ => None,
//!         }
//!     }
//! }
//! ```

use crate::api::EngineApi;
use crate::context::ServerContext;
use crate::error::{ContextError, ServiceError};
use crate::logging::Logger;
use async_trait::async_trait;
use event_system::{
    completed, EventBus, EventError, EventHandler, EventName, EventPayload, HandlerFuture, HookBus,
    ServerEvent,
};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock, Weak};
use tracing::debug;

/// One `(event, method)` pair of a binding table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventBinding {
    pub event: EventName,
    pub method: &'static str,
}

impl EventBinding {
    pub const fn new(event: EventName, method: &'static str) -> Self {
        Self { event, method }
    }
}

/// A resolved handler method, ready to be subscribed.
pub type EventMethod = Arc<dyn EventHandler>;

/// Where a service is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceLifecycle {
    Created,
    Initialized,
    Disposed,
}

/// A unit of server behavior registered on a [`ServerContext`].
///
/// The context owns the instance; it calls [`create`](Service::create) once at
/// registration, then [`init`](Service::init) and [`dispose`](Service::dispose)
/// at most once each.
#[async_trait]
pub trait Service: Send + Sync + Sized + 'static {
    /// Declared event handlers. Not merged with any other type's table.
    const EVENT_BINDINGS: &'static [EventBinding] = &[];

    fn create(base: ServiceBase) -> Result<Self, ServiceError>;

    fn base(&self) -> &ServiceBase;

    /// Resolves a method named in [`EVENT_BINDINGS`](Service::EVENT_BINDINGS).
    fn event_method(self: &Arc<Self>, _method: &str) -> Option<EventMethod> {
        None
    }

    async fn init(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn dispose(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Short type name, used in logs and errors.
    fn service_name() -> &'static str {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }
}

/// Object-safe view of a service used by the context's lifecycle loop.
pub(crate) trait ManagedService: Send + Sync {
    fn managed_base(&self) -> &ServiceBase;
    fn run_init(&self) -> BoxFuture<'_, Result<(), ServiceError>>;
    fn run_dispose(&self) -> BoxFuture<'_, Result<(), ServiceError>>;
}

impl<S: Service> ManagedService for S {
    fn managed_base(&self) -> &ServiceBase {
        Service::base(self)
    }

    fn run_init(&self) -> BoxFuture<'_, Result<(), ServiceError>> {
        Service::init(self)
    }

    fn run_dispose(&self) -> BoxFuture<'_, Result<(), ServiceError>> {
        Service::dispose(self)
    }
}

/// Context-provided state every service carries.
pub struct ServiceBase {
    name: &'static str,
    context: Weak<ServerContext>,
    events: Arc<EventBus>,
    hooks: Arc<HookBus>,
    logger: Arc<dyn Logger>,
    bound_events: OnceLock<Vec<EventBinding>>,
    lifecycle: Mutex<ServiceLifecycle>,
}

impl std::fmt::Debug for ServiceBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceBase")
            .field("name", &self.name)
            .field("bound_events", &self.bound_events())
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}

impl ServiceBase {
    pub(crate) fn new(name: &'static str, context: &Arc<ServerContext>) -> Self {
        Self {
            name,
            context: Arc::downgrade(context),
            events: context.events(),
            hooks: context.hooks(),
            logger: context.logger(),
            bound_events: OnceLock::new(),
            lifecycle: Mutex::new(ServiceLifecycle::Created),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The owning context, unless it has been dropped.
    pub fn context(&self) -> Result<Arc<ServerContext>, ContextError> {
        self.context.upgrade().ok_or(ContextError::ContextDropped)
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn hooks(&self) -> &Arc<HookBus> {
        &self.hooks
    }

    pub fn logger(&self) -> &Arc<dyn Logger> {
        &self.logger
    }

    /// Shorthand for [`ServerContext::get_api`].
    pub fn get_api<A: EngineApi>(&self) -> Result<Arc<A>, ContextError> {
        self.context()?.get_api::<A>()
    }

    /// Shorthand for [`ServerContext::get_service`].
    pub fn get_service<S: Service>(&self) -> Result<Arc<S>, ContextError> {
        self.context()?.get_service::<S>()
    }

    /// Bindings that were resolved and subscribed at construction.
    pub fn bound_events(&self) -> &[EventBinding] {
        self.bound_events.get().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn lifecycle(&self) -> ServiceLifecycle {
        *self.lifecycle.lock()
    }

    pub(crate) fn record_bindings(&self, bindings: Vec<EventBinding>) {
        if self.bound_events.set(bindings).is_err() {
            debug!("Bindings for {} were already recorded", self.name);
        }
    }

    pub(crate) fn mark_initialized(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if *lifecycle == ServiceLifecycle::Created {
            *lifecycle = ServiceLifecycle::Initialized;
        }
    }

    /// Moves to `Disposed`, returning false if already there.
    pub(crate) fn begin_dispose(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        let first = *lifecycle != ServiceLifecycle::Disposed;
        *lifecycle = ServiceLifecycle::Disposed;
        first
    }
}

/// Bus handler calling a service method through a weak reference.
struct BoundMethod<S, E> {
    service: Weak<S>,
    name: String,
    method: fn(&Arc<S>, &E) -> HandlerFuture,
}

impl<S, E> EventHandler for BoundMethod<S, E>
where
    S: Service,
    E: EventPayload,
{
    fn handle(&self, event: &ServerEvent) -> HandlerFuture {
        let Some(service) = self.service.upgrade() else {
            debug!("Skipping {}: service has been dropped", self.name);
            return completed();
        };

        match E::from_event(event) {
            Some(payload) => (self.method)(&service, payload),
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

/// Adapts a typed service method into a bus handler.
///
/// The handler only holds a weak reference, so subscribing never keeps a
/// service alive.
pub fn bind_method<S, E>(
    service: &Arc<S>,
    method_name: &str,
    method: fn(&Arc<S>, &E) -> HandlerFuture,
) -> EventMethod
where
    S: Service,
    E: EventPayload,
{
    Arc::new(BoundMethod {
        service: Arc::downgrade(service),
        name: format!("{}::{}", S::service_name(), method_name),
        method,
    })
}

/// Resolves every pair of `S::EVENT_BINDINGS` the service can handle.
///
/// Nothing is subscribed here; the context does that once the service is
/// committed to its registry.
pub(crate) fn resolve_declared<S: Service>(service: &Arc<S>) -> Vec<(EventBinding, EventMethod)> {
    let mut resolved = Vec::with_capacity(S::EVENT_BINDINGS.len());

    for binding in S::EVENT_BINDINGS {
        match service.event_method(binding.method) {
            Some(handler) => resolved.push((*binding, handler)),
            None => debug!(
                "Skipping binding {} -> {}::{}: method not found",
                binding.event,
                S::service_name(),
                binding.method
            ),
        }
    }

    resolved
}
