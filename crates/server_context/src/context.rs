//! The server context: service registry, API cache and lifecycle driver.

use crate::api::{EngineApi, EngineClient};
use crate::error::ContextError;
use crate::logging::{Logger, TracingLogger};
use crate::service::{
    resolve_declared, EventMethod, ManagedService, Service, ServiceBase, ServiceLifecycle,
};
use dashmap::DashMap;
use event_system::{EventBus, EventName, HookBus, DEFAULT_HOOK_CHAIN_LIMIT};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Collaborators a context is built from.
#[derive(Clone)]
pub struct ContextOptions {
    pub logger: Arc<dyn Logger>,
    pub engine: Arc<dyn EngineClient>,
    pub hook_chain_limit: usize,
}

impl ContextOptions {
    /// Options logging through `tracing`.
    pub fn new(engine: Arc<dyn EngineClient>) -> Self {
        Self {
            logger: Arc::new(TracingLogger),
            engine,
            hook_chain_limit: DEFAULT_HOOK_CHAIN_LIMIT,
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_hook_chain_limit(mut self, limit: usize) -> Self {
        self.hook_chain_limit = limit;
        self
    }
}

/// Builds a customized context around a freshly created base.
///
/// Custom contexts wrap the base and deref to it, so anything written
/// against `Arc<ServerContext>` keeps working.
pub trait ContextFactory: Sized {
    fn build(base: Arc<ServerContext>) -> Self;
}

impl ContextFactory for Arc<ServerContext> {
    fn build(base: Arc<ServerContext>) -> Self {
        base
    }
}

#[derive(Clone)]
struct ServiceEntry {
    name: &'static str,
    lifecycle: Arc<dyn ManagedService>,
    instance: Arc<dyn Any + Send + Sync>,
    handlers: Vec<(EventName, EventMethod)>,
}

/// Shared state behind every service.
///
/// Services are kept in registration order; `init` walks that order and
/// `dispose` walks it backwards.
pub struct ServerContext {
    logger: Arc<dyn Logger>,
    engine: Arc<dyn EngineClient>,
    events: Arc<EventBus>,
    hooks: Arc<HookBus>,
    initialized: AtomicBool,
    services: RwLock<IndexMap<TypeId, ServiceEntry>>,
    apis: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl std::fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerContext")
            .field("initialized", &self.is_initialized())
            .field("services", &self.service_names())
            .field("apis", &self.apis.len())
            .finish()
    }
}

impl ServerContext {
    pub fn new(options: ContextOptions) -> Arc<Self> {
        Arc::new(Self {
            logger: options.logger,
            engine: options.engine,
            events: Arc::new(EventBus::new()),
            hooks: Arc::new(HookBus::with_chain_limit(options.hook_chain_limit)),
            initialized: AtomicBool::new(false),
            services: RwLock::new(IndexMap::new()),
            apis: DashMap::new(),
        })
    }

    /// Creates a context and hands it to `C`'s factory.
    pub fn create<C: ContextFactory>(options: ContextOptions) -> C {
        C::build(Self::new(options))
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    pub fn hooks(&self) -> Arc<HookBus> {
        self.hooks.clone()
    }

    pub fn logger(&self) -> Arc<dyn Logger> {
        self.logger.clone()
    }

    pub fn engine(&self) -> Arc<dyn EngineClient> {
        self.engine.clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Registered service names, in registration order.
    pub fn service_names(&self) -> Vec<&'static str> {
        self.services.read().values().map(|entry| entry.name).collect()
    }

    /// Returns the API wrapper of type `A`, building it on first use.
    ///
    /// Every call for the same `A` returns the same instance for the lifetime
    /// of the context.
    ///
    /// # Returns
    ///
    /// The shared wrapper, or [`ContextError::ApiTypeMismatch`] if the cache
    /// slot for `A` holds something else. The slot is left untouched in that
    /// case so the instance handed out earlier stays the only one.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let sessions = context.get_api::<SessionApi>()?;
    /// assert!(Arc::ptr_eq(&sessions, &context.get_api::<SessionApi>()?));
    /// ```
    pub fn get_api<A: EngineApi>(&self) -> Result<Arc<A>, ContextError> {
        let erased = self
            .apis
            .entry(TypeId::of::<A>())
            .or_insert_with(|| {
                debug!("🔌 Creating API {}", std::any::type_name::<A>());
                Arc::new(A::new(self.engine.clone())) as Arc<dyn Any + Send + Sync>
            })
            .clone();

        erased.downcast::<A>().map_err(|_| {
            let api = std::any::type_name::<A>();
            error!("❌ API cache slot for {} holds another type", api);
            ContextError::ApiTypeMismatch { api }
        })
    }

    /// Constructs `S`, registers it and subscribes its declared handlers.
    ///
    /// Registering a type again replaces the previous instance but keeps its
    /// position in the lifecycle order. The replaced instance's handlers are
    /// removed from the bus.
    ///
    /// # Returns
    ///
    /// `self`, for chaining.
    ///
    /// # Errors
    ///
    /// * [`ContextError::AlreadyInitialized`] once [`init`](ServerContext::init) has been called
    /// * [`ContextError::Construction`] if [`Service::create`] fails
    ///
    /// Nothing is subscribed when an error is returned.
    ///
    /// # Example
    ///
    /// ```ignore
    /// context.add_service::<SessionService>()?.add_service::<ReferenceService>()?;
    /// ```
    pub fn add_service<S: Service>(self: &Arc<Self>) -> Result<&Arc<Self>, ContextError> {
        let name = S::service_name();
        if self.is_initialized() {
            return Err(ContextError::AlreadyInitialized { service: name });
        }

        let base = ServiceBase::new(name, self);
        let service = Arc::new(
            S::create(base).map_err(|source| ContextError::Construction { service: name, source })?,
        );
        let resolved = resolve_declared(&service);

        let mut services = self.services.write();
        // Checked again under the lock so a concurrent init cannot miss this service.
        if self.is_initialized() {
            return Err(ContextError::AlreadyInitialized { service: name });
        }

        let mut bound = Vec::with_capacity(resolved.len());
        let mut handlers = Vec::with_capacity(resolved.len());
        for (binding, handler) in resolved {
            self.events.subscribe(binding.event, handler.clone());
            bound.push(binding);
            handlers.push((binding.event, handler));
        }
        service.base().record_bindings(bound);

        let entry = ServiceEntry {
            name,
            lifecycle: service.clone(),
            instance: service,
            handlers,
        };
        match services.insert(TypeId::of::<S>(), entry) {
            Some(replaced) => {
                for (event, handler) in &replaced.handlers {
                    self.events.unsubscribe(*event, handler);
                }
                info!("🔁 Replaced service {}", name);
            }
            None => info!("📦 Registered service {}", name),
        }

        Ok(self)
    }

    /// Returns the registered instance of `S`. Never constructs one.
    ///
    /// # Errors
    ///
    /// [`ContextError::NotRegistered`], naming `S`, if no instance is registered.
    pub fn get_service<S: Service>(&self) -> Result<Arc<S>, ContextError> {
        let not_registered = || ContextError::NotRegistered {
            service: S::service_name(),
        };

        let instance = self
            .services
            .read()
            .get(&TypeId::of::<S>())
            .map(|entry| entry.instance.clone())
            .ok_or_else(not_registered)?;

        instance.downcast::<S>().map_err(|_| not_registered())
    }

    fn snapshot(&self) -> Vec<ServiceEntry> {
        self.services.read().values().cloned().collect()
    }

    /// Initializes every service in registration order, one at a time.
    ///
    /// The context counts as initialized from the moment this is called, even
    /// if a service fails. Later calls are no-ops.
    ///
    /// # Errors
    ///
    /// The first [`ContextError::ServiceInit`]. Services after the failing one
    /// are not initialized.
    pub async fn init(&self) -> Result<(), ContextError> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            debug!("Server context already initialized");
            return Ok(());
        }

        let services = self.snapshot();
        info!("🚀 Initializing {} services", services.len());

        for entry in services {
            // Services that were already disposed are not brought back.
            if entry.lifecycle.managed_base().lifecycle() != ServiceLifecycle::Created {
                continue;
            }
            if let Err(source) = entry.lifecycle.run_init().await {
                error!("❌ Service {} failed to initialize: {}", entry.name, source);
                return Err(ContextError::ServiceInit {
                    service: entry.name,
                    source,
                });
            }
            entry.lifecycle.managed_base().mark_initialized();
            info!("✅ Service {} initialized", entry.name);
        }

        info!("🎉 Server context initialized");
        Ok(())
    }

    /// Disposes every service in reverse registration order.
    ///
    /// Failures are reported through the logger and never stop the loop.
    pub async fn dispose(&self) {
        if !self.is_initialized() {
            return;
        }

        let services = self.snapshot();
        info!("Disposing {} services", services.len());

        for entry in services.iter().rev() {
            if !entry.lifecycle.managed_base().begin_dispose() {
                continue;
            }
            if let Err(e) = entry.lifecycle.run_dispose().await {
                self.logger
                    .error(&format!("Error disposing service {}: {}", entry.name, e));
            }
        }

        self.initialized.store(false, Ordering::SeqCst);
        info!("All services disposed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::NullEngine;

    fn context() -> Arc<ServerContext> {
        ServerContext::new(ContextOptions::new(Arc::new(NullEngine)))
    }

    struct Plain {
        base: ServiceBase,
    }

    impl Service for Plain {
        fn create(base: ServiceBase) -> Result<Self, crate::ServiceError> {
            Ok(Self { base })
        }

        fn base(&self) -> &ServiceBase {
            &self.base
        }
    }

    #[tokio::test]
    async fn test_fresh_context_state() {
        let context = context();
        assert!(!context.is_initialized());
        assert!(context.service_names().is_empty());

        // Dispose before init does nothing.
        context.dispose().await;
        assert!(!context.is_initialized());
    }

    #[tokio::test]
    async fn test_service_name_and_lifecycle() {
        let context = context();
        context.add_service::<Plain>().unwrap();
        assert_eq!(context.service_names(), vec!["Plain"]);

        let plain = context.get_service::<Plain>().unwrap();
        assert_eq!(plain.base().name(), "Plain");
        assert_eq!(plain.base().lifecycle(), ServiceLifecycle::Created);

        context.init().await.unwrap();
        assert_eq!(plain.base().lifecycle(), ServiceLifecycle::Initialized);

        context.dispose().await;
        assert_eq!(plain.base().lifecycle(), ServiceLifecycle::Disposed);
        assert!(!context.is_initialized());
    }

    #[derive(Debug)]
    struct Api;

    impl EngineApi for Api {
        fn new(_engine: Arc<dyn EngineClient>) -> Self {
            Api
        }
    }

    #[tokio::test]
    async fn test_get_api_refuses_foreign_cache_slot() {
        let context = context();
        let planted: Arc<dyn Any + Send + Sync> = Arc::new(String::from("not an api"));
        context.apis.insert(TypeId::of::<Api>(), planted.clone());

        let err = context.get_api::<Api>().unwrap_err();
        assert!(matches!(err, ContextError::ApiTypeMismatch { .. }));

        // The slot is not overwritten with a fresh instance.
        let slot = context.apis.get(&TypeId::of::<Api>()).unwrap().clone();
        assert!(Arc::ptr_eq(&slot, &planted));
    }

    #[tokio::test]
    async fn test_service_base_sees_context() {
        let context = context();
        context.add_service::<Plain>().unwrap();
        let plain = context.get_service::<Plain>().unwrap();

        let resolved = plain.base().get_service::<Plain>().unwrap();
        assert!(Arc::ptr_eq(&plain, &resolved));

        drop(context);
        assert!(matches!(
            plain.base().context(),
            Err(ContextError::ContextDropped)
        ));
    }
}
