use async_trait::async_trait;
use event_system::{completed, EndReason, EventName, HandlerFuture, SessionFinished, SessionStarted};
use parking_lot::Mutex;
use server_context::testing::{context_with_memory_logger, NullEngine};
use server_context::{
    bind_method, ContextError, ContextFactory, ContextOptions, EngineApi, EngineClient,
    EventBinding, EventMethod, LogLevel, ServerContext, Service, ServiceBase, ServiceError,
};
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

/// Shared recorder, resolved by every test service through `get_api`.
#[derive(Default)]
struct Journal {
    entries: Mutex<Vec<String>>,
}

impl EngineApi for Journal {
    fn new(_client: Arc<dyn EngineClient>) -> Self {
        Self::default()
    }
}

impl Journal {
    fn record(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    fn count(&self, entry: &str) -> usize {
        self.entries.lock().iter().filter(|e| *e == entry).count()
    }
}

struct Registry {
    _marker: u8,
}

impl EngineApi for Registry {
    fn new(_client: Arc<dyn EngineClient>) -> Self {
        Self { _marker: 1 }
    }
}

fn journal(base: &ServiceBase) -> Result<Arc<Journal>, ServiceError> {
    Ok(base.get_api::<Journal>()?)
}

fn new_context() -> Arc<ServerContext> {
    ServerContext::new(ContextOptions::new(Arc::new(NullEngine)))
}

struct Alpha {
    base: ServiceBase,
}

#[async_trait]
impl Service for Alpha {
    fn create(base: ServiceBase) -> Result<Self, ServiceError> {
        Ok(Self { base })
    }

    fn base(&self) -> &ServiceBase {
        &self.base
    }

    async fn init(&self) -> Result<(), ServiceError> {
        let journal = journal(&self.base)?;
        journal.record("alpha:init:start");
        tokio::time::sleep(Duration::from_millis(20)).await;
        journal.record("alpha:init:end");
        Ok(())
    }

    async fn dispose(&self) -> Result<(), ServiceError> {
        journal(&self.base)?.record("alpha:dispose");
        Ok(())
    }
}

#[derive(Debug)]
struct Beta {
    base: ServiceBase,
}

#[async_trait]
impl Service for Beta {
    fn create(base: ServiceBase) -> Result<Self, ServiceError> {
        Ok(Self { base })
    }

    fn base(&self) -> &ServiceBase {
        &self.base
    }

    async fn init(&self) -> Result<(), ServiceError> {
        journal(&self.base)?.record("beta:init:start");
        Ok(())
    }

    async fn dispose(&self) -> Result<(), ServiceError> {
        journal(&self.base)?.record("beta:dispose");
        Ok(())
    }
}

struct FailingInit {
    base: ServiceBase,
}

#[async_trait]
impl Service for FailingInit {
    fn create(base: ServiceBase) -> Result<Self, ServiceError> {
        Ok(Self { base })
    }

    fn base(&self) -> &ServiceBase {
        &self.base
    }

    async fn init(&self) -> Result<(), ServiceError> {
        Err(ServiceError::InitializationFailed("database offline".to_string()))
    }
}

struct BrokenDispose {
    base: ServiceBase,
}

#[async_trait]
impl Service for BrokenDispose {
    fn create(base: ServiceBase) -> Result<Self, ServiceError> {
        Ok(Self { base })
    }

    fn base(&self) -> &ServiceBase {
        &self.base
    }

    async fn dispose(&self) -> Result<(), ServiceError> {
        Err(ServiceError::Runtime("socket stuck".to_string()))
    }
}

struct Unbuildable;

impl Service for Unbuildable {
    fn create(_base: ServiceBase) -> Result<Self, ServiceError> {
        Err(ServiceError::Domain("missing configuration".to_string()))
    }

    fn base(&self) -> &ServiceBase {
        unreachable!("never constructed")
    }
}

struct ListenerOne {
    base: ServiceBase,
}

impl ListenerOne {
    fn on_session_started(self: &Arc<Self>, event: &SessionStarted) -> HandlerFuture {
        if let Ok(journal) = journal(&self.base) {
            journal.record(format!("one:{}", event.session_id));
        }
        completed()
    }
}

impl Service for ListenerOne {
    const EVENT_BINDINGS: &'static [EventBinding] = &[
        EventBinding::new(EventName::SessionStarted, "on_session_started"),
        EventBinding::new(EventName::SessionFinished, "on_session_finished"),
    ];

    fn create(base: ServiceBase) -> Result<Self, ServiceError> {
        Ok(Self { base })
    }

    fn base(&self) -> &ServiceBase {
        &self.base
    }

    // `on_session_finished` is declared but never resolved.
    fn event_method(self: &Arc<Self>, method: &str) -> Option<EventMethod> {
        match method {
            "on_session_started" => Some(bind_method(self, method, Self::on_session_started)),
            _ => None,
        }
    }
}

struct ListenerTwo {
    base: ServiceBase,
}

impl ListenerTwo {
    fn on_session_started(self: &Arc<Self>, event: &SessionStarted) -> HandlerFuture {
        if let Ok(journal) = journal(&self.base) {
            journal.record(format!("two:{}", event.session_id));
        }
        completed()
    }
}

impl Service for ListenerTwo {
    const EVENT_BINDINGS: &'static [EventBinding] =
        &[EventBinding::new(EventName::SessionStarted, "on_session_started")];

    fn create(base: ServiceBase) -> Result<Self, ServiceError> {
        Ok(Self { base })
    }

    fn base(&self) -> &ServiceBase {
        &self.base
    }

    fn event_method(self: &Arc<Self>, method: &str) -> Option<EventMethod> {
        match method {
            "on_session_started" => Some(bind_method(self, method, Self::on_session_started)),
            _ => None,
        }
    }
}

fn started(id: &str) -> SessionStarted {
    SessionStarted {
        session_id: id.to_string(),
        session_token: format!("token-{}", id),
    }
}

#[tokio::test]
async fn test_init_runs_in_registration_order() {
    let context = new_context();
    context.add_service::<Alpha>().unwrap().add_service::<Beta>().unwrap();

    context.init().await.unwrap();

    assert!(context.is_initialized());
    assert_eq!(
        context.get_api::<Journal>().unwrap().entries(),
        vec!["alpha:init:start", "alpha:init:end", "beta:init:start"]
    );
}

#[tokio::test]
async fn test_dispose_runs_in_reverse_order() {
    let context = new_context();
    context.add_service::<Alpha>().unwrap().add_service::<Beta>().unwrap();
    context.init().await.unwrap();

    context.dispose().await;

    let entries = context.get_api::<Journal>().unwrap().entries();
    assert_eq!(&entries[3..], ["beta:dispose", "alpha:dispose"]);
    assert!(!context.is_initialized());
}

#[tokio::test]
async fn test_get_api_is_cached_per_type() {
    let context = new_context();

    let first = context.get_api::<Journal>().unwrap();
    let second = context.get_api::<Journal>().unwrap();
    let registry = context.get_api::<Registry>().unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_ne!(
        Arc::as_ptr(&first) as *const (),
        Arc::as_ptr(&registry) as *const ()
    );
}

#[tokio::test]
async fn test_add_service_after_successful_init_fails() {
    let context = new_context();
    context.add_service::<Alpha>().unwrap();
    context.init().await.unwrap();

    let err = context.add_service::<Beta>().unwrap_err();
    assert!(matches!(err, ContextError::AlreadyInitialized { service: "Beta" }));
}

#[tokio::test]
async fn test_failed_init_still_marks_context_initialized() {
    let context = new_context();
    context
        .add_service::<Alpha>()
        .unwrap()
        .add_service::<FailingInit>()
        .unwrap()
        .add_service::<Beta>()
        .unwrap();

    let err = context.init().await.unwrap_err();
    match &err {
        ContextError::ServiceInit { service, source } => {
            assert_eq!(*service, "FailingInit");
            assert!(matches!(source, ServiceError::InitializationFailed(msg) if msg == "database offline"));
        }
        other => panic!("unexpected error: {other}"),
    }

    assert!(context.is_initialized());
    // Services after the failing one never started.
    assert_eq!(context.get_api::<Journal>().unwrap().count("beta:init:start"), 0);

    let err = context.add_service::<Beta>().unwrap_err();
    assert!(matches!(err, ContextError::AlreadyInitialized { .. }));
}

#[tokio::test]
async fn test_get_unregistered_service_names_it() {
    let context = new_context();
    context.add_service::<Alpha>().unwrap();

    let err = context.get_service::<Beta>().unwrap_err();
    assert!(matches!(err, ContextError::NotRegistered { service: "Beta" }));
    assert!(err.to_string().contains("Beta"));
}

#[tokio::test]
async fn test_dispose_failure_is_logged_and_does_not_stop_others() {
    let (context, logger) = context_with_memory_logger(Arc::new(NullEngine));
    context
        .add_service::<Alpha>()
        .unwrap()
        .add_service::<BrokenDispose>()
        .unwrap()
        .add_service::<Beta>()
        .unwrap();
    context.init().await.unwrap();

    context.dispose().await;

    assert!(logger.contains(LogLevel::Error, "BrokenDispose"));
    let journal = context.get_api::<Journal>().unwrap();
    assert_eq!(journal.count("beta:dispose"), 1);
    assert_eq!(journal.count("alpha:dispose"), 1);
    assert!(!context.is_initialized());
}

#[tokio::test]
async fn test_two_services_receive_the_same_event_in_order() {
    let context = new_context();
    context
        .add_service::<ListenerOne>()
        .unwrap()
        .add_service::<ListenerTwo>()
        .unwrap();
    context.init().await.unwrap();

    let events = context.events();
    events.emit(started("s1")).settled().await;
    events.emit(started("s2")).settled().await;

    assert_eq!(
        context.get_api::<Journal>().unwrap().entries(),
        vec!["one:s1", "two:s1", "one:s2", "two:s2"]
    );
}

#[tokio::test]
async fn test_unresolved_binding_is_skipped() {
    let context = new_context();
    context.add_service::<ListenerOne>().unwrap();

    let listener = context.get_service::<ListenerOne>().unwrap();
    assert_eq!(
        listener.base().bound_events(),
        &[EventBinding::new(EventName::SessionStarted, "on_session_started")]
    );
    assert_eq!(context.events().handler_count(EventName::SessionFinished), 0);

    // Emitting the unbound event is harmless.
    context
        .events()
        .emit(SessionFinished {
            session_id: "s1".to_string(),
            end_reason: EndReason::Kicked,
        })
        .settled()
        .await;
    assert!(context.get_api::<Journal>().unwrap().entries().is_empty());
}

#[tokio::test]
async fn test_re_registration_replaces_in_place() {
    let context = new_context();
    context
        .add_service::<ListenerOne>()
        .unwrap()
        .add_service::<Beta>()
        .unwrap();
    let original = context.get_service::<ListenerOne>().unwrap();

    context.add_service::<ListenerOne>().unwrap();
    let replacement = context.get_service::<ListenerOne>().unwrap();

    assert!(!Arc::ptr_eq(&original, &replacement));
    assert_eq!(context.service_names(), vec!["ListenerOne", "Beta"]);

    // The replaced instance is unsubscribed even while still referenced.
    context.events().emit(started("s1")).settled().await;
    assert_eq!(context.get_api::<Journal>().unwrap().entries(), vec!["one:s1"]);
}

#[tokio::test]
async fn test_re_registration_does_not_grow_handler_lists() {
    let context = new_context();
    context.add_service::<ListenerOne>().unwrap();
    let events = context.events();
    assert_eq!(events.handler_count(EventName::SessionStarted), 1);

    for _ in 0..3 {
        context.add_service::<ListenerOne>().unwrap();
    }

    assert_eq!(events.handler_count(EventName::SessionStarted), 1);
    assert_eq!(events.stats().total_handlers, 1);
}

#[tokio::test]
async fn test_rejected_registration_subscribes_nothing() {
    let context = new_context();
    context.add_service::<ListenerTwo>().unwrap();
    context.init().await.unwrap();

    let err = context.add_service::<ListenerOne>().unwrap_err();
    assert!(matches!(err, ContextError::AlreadyInitialized { service: "ListenerOne" }));

    let events = context.events();
    assert_eq!(events.handler_count(EventName::SessionStarted), 1);
    assert_eq!(events.stats().total_handlers, 1);
}

#[tokio::test]
async fn test_concurrent_init_runs_services_once() {
    let context = new_context();
    context.add_service::<Alpha>().unwrap();

    let (first, second) = tokio::join!(context.init(), context.init());
    first.unwrap();
    second.unwrap();

    assert_eq!(context.get_api::<Journal>().unwrap().count("alpha:init:start"), 1);
}

#[tokio::test]
async fn test_construction_error_propagates() {
    let context = new_context();

    let err = context.add_service::<Unbuildable>().unwrap_err();
    assert!(matches!(err, ContextError::Construction { service: "Unbuildable", .. }));
    assert!(context.service_names().is_empty());
}

/// A context carrying extra state on top of the shared base.
struct RegionContext {
    base: Arc<ServerContext>,
    region: &'static str,
}

impl ContextFactory for RegionContext {
    fn build(base: Arc<ServerContext>) -> Self {
        Self {
            base,
            region: "eu-west",
        }
    }
}

impl Deref for RegionContext {
    type Target = Arc<ServerContext>;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

#[tokio::test]
async fn test_create_builds_custom_context() {
    let context: RegionContext = ServerContext::create(ContextOptions::new(Arc::new(NullEngine)));
    assert_eq!(context.region, "eu-west");

    context.add_service::<Alpha>().unwrap();
    context.init().await.unwrap();
    assert!(context.is_initialized());

    let alpha = context.get_service::<Alpha>().unwrap();
    let through_base = alpha.base().context().unwrap();
    assert!(Arc::ptr_eq(&through_base, &context.base));

    let plain: Arc<ServerContext> = ServerContext::create(ContextOptions::new(Arc::new(NullEngine)));
    assert!(!plain.is_initialized());
}
