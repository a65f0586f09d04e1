use event_system::{
    completed, EndReason, EventPayload, FutureExt, HookFlow, LocaleAdded, LocaleRemoved,
    LocaleUpdated, ReferenceUpdated, SessionFinished, SessionStarted, SessionUpdated,
};
use game_services::api::{Locale, ReferenceSet, SessionRecord};
use game_services::{
    DomainError, EngineSeed, InboundAdapter, LocalizationService, MemoryEngine, ReferenceService,
    ServiceKind, SessionService, SessionStartHook, SessionState,
};
use server_context::testing::{context_with_memory_logger, MemoryLogger};
use server_context::{LogLevel, ServerContext};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const SEED: &str = r#"{
    "sessions": [{ "id": "seeded", "ipAddress": "10.0.0.9" }],
    "references": [
        { "kind": "vehicles", "version": 3, "entries": [{ "id": "car", "data": { "seats": 4 } }] },
        { "kind": "weapons", "version": 1, "entries": [] }
    ],
    "locales": [
        { "code": "en", "isDefault": true, "translations": { "hello": "Hello", "bye": "Goodbye" } },
        { "code": "fr", "translations": { "hello": "Bonjour" } }
    ]
}"#;

struct Harness {
    context: Arc<ServerContext>,
    engine: Arc<MemoryEngine>,
    logger: Arc<MemoryLogger>,
    inbound: InboundAdapter,
}

impl Harness {
    async fn start(kinds: &[ServiceKind]) -> Self {
        let engine = Arc::new(MemoryEngine::from_seed(EngineSeed::from_json(SEED).unwrap()));
        let (context, logger) = context_with_memory_logger(engine.clone());
        for kind in kinds {
            kind.register(&context).unwrap();
        }
        context.init().await.unwrap();

        let inbound = InboundAdapter::from_context(&context);
        Self {
            context,
            engine,
            logger,
            inbound,
        }
    }

    fn sessions(&self) -> Arc<SessionService> {
        self.context.get_service::<SessionService>().unwrap()
    }

    /// Collects every emission of `E` from now on.
    fn record<E: EventPayload>(&self) -> mpsc::UnboundedReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.context.events().on_event("recorder", move |event: &E| {
            let _ = tx.send(event.clone());
            completed()
        });
        rx
    }

    async fn push(&self, raw: &str) {
        self.inbound.push_json(raw).unwrap().settled().await;
    }
}

async fn next<E>(rx: &mut mpsc::UnboundedReceiver<E>) -> E {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("recorder closed")
}

fn session_started_count(rx: &mut mpsc::UnboundedReceiver<SessionStarted>) -> usize {
    let mut count = 0;
    while rx.try_recv().is_ok() {
        count += 1;
    }
    count
}

#[tokio::test]
async fn test_start_then_finish() {
    let harness = Harness::start(&[ServiceKind::Session]).await;
    let mut started = harness.record::<SessionStarted>();
    let mut finished = harness.record::<SessionFinished>();

    harness.inbound.player_connecting("s1", "1.2.3.4").settled().await;

    let event = next(&mut started).await;
    assert_eq!(event.session_id, "s1");
    let cached = harness.sessions().get_session("s1").unwrap();
    assert_eq!(cached.state, SessionState::Active);
    assert_eq!(cached.session_token.as_deref(), Some(event.session_token.as_str()));
    assert_eq!(cached.ip_address.as_deref(), Some("1.2.3.4"));

    let dispatch = harness
        .inbound
        .push_json(r#"{"event":"socketSessionFinished","data":{"id":"s1","endReason":"Kicked"}}"#)
        .unwrap();
    // Removal happens before the emit call returns.
    assert!(harness.sessions().find_session("s1").is_none());
    dispatch.settled().await;

    assert_eq!(
        next(&mut finished).await,
        SessionFinished {
            session_id: "s1".to_string(),
            end_reason: EndReason::Kicked
        }
    );
    assert!(matches!(
        harness.sessions().get_session("s1"),
        Err(DomainError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_pending_entry_is_visible_before_token_arrives() {
    let harness = Harness::start(&[ServiceKind::Session]).await;

    let dispatch = harness.inbound.player_connecting("s1", "1.2.3.4");
    assert_eq!(
        harness.sessions().find_session("s1").map(|s| s.state),
        Some(SessionState::Pending)
    );

    dispatch.settled().await;
    assert_eq!(
        harness.sessions().find_session("s1").map(|s| s.state),
        Some(SessionState::Active)
    );
}

#[tokio::test]
async fn test_finish_before_token_does_not_resurrect() {
    let harness = Harness::start(&[ServiceKind::Session]).await;
    let mut started = harness.record::<SessionStarted>();
    let mut finished = harness.record::<SessionFinished>();

    let connecting = harness.inbound.player_connecting("s1", "1.2.3.4");
    harness
        .inbound
        .player_dropped("s1", EndReason::ConnectionDropped)
        .settled()
        .await;
    connecting.settled().await;

    assert!(harness.sessions().find_session("s1").is_none());
    assert_eq!(session_started_count(&mut started), 0);
    assert_eq!(next(&mut finished).await.end_reason, EndReason::ConnectionDropped);
}

#[tokio::test]
async fn test_update_for_unknown_session_is_ignored() {
    let harness = Harness::start(&[ServiceKind::Session]).await;
    let mut updated = harness.record::<SessionUpdated>();
    let mut finished = harness.record::<SessionFinished>();
    let before = harness.sessions().sessions();
    let requests_before = harness.engine.request_count();

    harness
        .push(r#"{"event":"socketSessionUpdated","data":{"id":"ghost"}}"#)
        .await;

    assert_eq!(harness.sessions().sessions(), before);
    assert!(updated.try_recv().is_err());
    assert!(finished.try_recv().is_err());
    assert_eq!(harness.engine.request_count(), requests_before);
}

#[tokio::test]
async fn test_update_for_vanished_session_finishes_it() {
    let harness = Harness::start(&[ServiceKind::Session]).await;
    let mut finished = harness.record::<SessionFinished>();
    assert!(harness.sessions().find_session("seeded").is_some());

    harness.engine.remove_session("seeded");
    harness
        .push(r#"{"event":"socketSessionUpdated","data":{"id":"seeded"}}"#)
        .await;

    assert!(harness.sessions().find_session("seeded").is_none());
    assert_eq!(
        next(&mut finished).await,
        SessionFinished {
            session_id: "seeded".to_string(),
            end_reason: EndReason::Unknown
        }
    );
}

#[tokio::test]
async fn test_ids_with_slashes_stay_addressable() {
    let harness = Harness::start(&[ServiceKind::Session]).await;
    let mut finished = harness.record::<SessionFinished>();

    harness.inbound.player_connecting("team/1", "1.2.3.4").settled().await;
    assert!(harness.engine.session("team/1").is_some());

    harness
        .push(r#"{"event":"socketSessionUpdated","data":{"id":"team/1"}}"#)
        .await;

    assert_eq!(
        harness.sessions().find_session("team/1").map(|s| s.state),
        Some(SessionState::Active)
    );
    assert!(finished.try_recv().is_err());
}

#[tokio::test]
async fn test_update_merges_and_emits_only_with_user() {
    let harness = Harness::start(&[ServiceKind::Session]).await;
    let mut updated = harness.record::<SessionUpdated>();

    // No user yet: merged silently.
    harness
        .push(r#"{"event":"socketSessionUpdated","data":{"id":"seeded"}}"#)
        .await;
    assert!(updated.try_recv().is_err());

    harness.engine.upsert_session(SessionRecord {
        id: "seeded".to_string(),
        user_id: Some("u42".to_string()),
        ip_address: None,
    });
    harness
        .push(r#"{"event":"socketSessionUpdated","data":{"id":"seeded"}}"#)
        .await;

    assert_eq!(
        next(&mut updated).await,
        SessionUpdated {
            session_id: "seeded".to_string(),
            user_id: "u42".to_string()
        }
    );
    let cached = harness.sessions().get_session("seeded").unwrap();
    assert_eq!(cached.user_id.as_deref(), Some("u42"));
    // Missing fields in the refresh keep what was cached.
    assert_eq!(cached.ip_address.as_deref(), Some("10.0.0.9"));
}

#[tokio::test]
async fn test_refresh_failure_leaves_entry_and_reports_fault() {
    let harness = Harness::start(&[ServiceKind::Session]).await;
    let mut faults = harness.context.events().subscribe_faults();
    let mut finished = harness.record::<SessionFinished>();

    harness.engine.set_unavailable(true);
    harness
        .push(r#"{"event":"socketSessionUpdated","data":{"id":"seeded"}}"#)
        .await;

    assert!(harness.sessions().find_session("seeded").is_some());
    assert!(finished.try_recv().is_err());

    let fault = faults.recv().await.unwrap();
    assert_eq!(fault.handler, "SessionService::on_session_updated");
    assert!(fault.message.contains("unavailable"));
    assert_eq!(harness.context.events().stats().handler_failures, 1);
}

#[tokio::test]
async fn test_token_failure_discards_pending_entry() {
    let harness = Harness::start(&[ServiceKind::Session]).await;
    let mut faults = harness.context.events().subscribe_faults();

    harness.engine.set_unavailable(true);
    harness.inbound.player_connecting("s1", "1.2.3.4").settled().await;

    assert!(harness.sessions().find_session("s1").is_none());
    assert_eq!(
        faults.recv().await.unwrap().handler,
        "SessionService::on_player_connecting"
    );
}

#[tokio::test]
async fn test_native_and_push_finish_emit_once() {
    let harness = Harness::start(&[ServiceKind::Session]).await;
    let mut finished = harness.record::<SessionFinished>();

    harness
        .inbound
        .player_dropped("seeded", EndReason::Timeout)
        .settled()
        .await;
    harness
        .push(r#"{"event":"socketSessionFinished","data":{"id":"seeded","endReason":"Timeout"}}"#)
        .await;

    assert_eq!(next(&mut finished).await.session_id, "seeded");
    assert!(finished.try_recv().is_err());
    // The engine was told about the native drop.
    assert!(harness.engine.session("seeded").is_none());
}

#[tokio::test]
async fn test_end_session() {
    let harness = Harness::start(&[ServiceKind::Session]).await;
    let sessions = harness.sessions();
    let mut finished = harness.record::<SessionFinished>();

    assert!(matches!(
        sessions.end_session("ghost", EndReason::Kicked).await,
        Err(DomainError::NotFound(_))
    ));

    let connecting = harness.inbound.player_connecting("s1", "1.2.3.4");
    assert!(matches!(
        sessions.end_session("s1", EndReason::Kicked).await,
        Err(DomainError::Conflict(_))
    ));
    connecting.settled().await;

    sessions.end_session("s1", EndReason::Banned).await.unwrap();
    assert!(sessions.find_session("s1").is_none());
    assert!(harness.engine.session("s1").is_none());
    assert_eq!(next(&mut finished).await.end_reason, EndReason::Banned);
}

#[tokio::test]
async fn test_start_hook_can_veto() {
    let harness = Harness::start(&[ServiceKind::Session]).await;
    let mut started = harness.record::<SessionStarted>();

    harness
        .context
        .hooks()
        .register::<SessionStartHook, _>("ban-list", |connecting| {
            async move {
                if connecting.ip_address == "6.6.6.6" {
                    Ok(HookFlow::Veto("banned address".to_string()))
                } else {
                    Ok(HookFlow::Continue(connecting))
                }
            }
            .boxed()
        })
        .unwrap();

    harness.inbound.player_connecting("bad", "6.6.6.6").settled().await;
    harness.inbound.player_connecting("good", "1.2.3.4").settled().await;

    assert!(harness.sessions().find_session("bad").is_none());
    assert_eq!(next(&mut started).await.session_id, "good");
    assert_eq!(session_started_count(&mut started), 0);
}

#[tokio::test]
async fn test_start_hook_rewrites_address() {
    let harness = Harness::start(&[ServiceKind::Session]).await;

    harness
        .context
        .hooks()
        .register::<SessionStartHook, _>("nat", |mut connecting| {
            async move {
                connecting.ip_address = "192.168.0.1".to_string();
                Ok(HookFlow::Continue(connecting))
            }
            .boxed()
        })
        .unwrap();

    harness.inbound.player_connecting("s1", "1.2.3.4").settled().await;

    let cached = harness.sessions().get_session("s1").unwrap();
    assert_eq!(cached.state, SessionState::Active);
    assert_eq!(cached.ip_address.as_deref(), Some("192.168.0.1"));
    assert_eq!(
        harness.engine.session("s1").unwrap().ip_address.as_deref(),
        Some("192.168.0.1")
    );
}

#[tokio::test]
async fn test_start_hook_cannot_rename_session() {
    let harness = Harness::start(&[ServiceKind::Session]).await;
    let mut started = harness.record::<SessionStarted>();
    let mut faults = harness.context.events().subscribe_faults();

    harness
        .context
        .hooks()
        .register::<SessionStartHook, _>("rename", |mut connecting| {
            async move {
                connecting.session_id = format!("{}-x", connecting.session_id);
                Ok(HookFlow::Continue(connecting))
            }
            .boxed()
        })
        .unwrap();

    harness.inbound.player_connecting("s1", "1.2.3.4").settled().await;

    assert!(harness.sessions().find_session("s1").is_none());
    assert!(harness.sessions().find_session("s1-x").is_none());
    assert!(harness.engine.session("s1").is_none());
    assert!(harness.engine.session("s1-x").is_none());
    assert_eq!(session_started_count(&mut started), 0);

    let fault = faults.recv().await.unwrap();
    assert_eq!(fault.handler, "SessionService::on_player_connecting");
    assert!(fault.message.contains("may not change session id"));
}

#[tokio::test]
async fn test_end_to_end_scenario() {
    let harness = Harness::start(&[ServiceKind::Session, ServiceKind::Reference]).await;
    let mut started = harness.record::<SessionStarted>();
    let mut finished = harness.record::<SessionFinished>();

    let references = harness.context.get_service::<ReferenceService>().unwrap();
    assert_eq!(references.kinds(), vec!["vehicles", "weapons"]);

    harness.inbound.player_connecting("s1", "1.2.3.4").settled().await;
    assert!(harness.sessions().find_session("s1").is_some());
    let event = next(&mut started).await;
    assert_eq!(event.session_id, "s1");
    assert!(!event.session_token.is_empty());

    harness
        .push(r#"{"event":"socketSessionFinished","data":{"id":"s1","endReason":"ConnectionDropped"}}"#)
        .await;
    assert!(harness.sessions().find_session("s1").is_none());
    assert_eq!(
        next(&mut finished).await,
        SessionFinished {
            session_id: "s1".to_string(),
            end_reason: EndReason::ConnectionDropped
        }
    );

    harness.context.dispose().await;

    let disposals: Vec<String> = harness
        .logger
        .messages(LogLevel::Debug)
        .into_iter()
        .filter(|message| message.starts_with("Dropped"))
        .collect();
    assert_eq!(disposals.len(), 2);
    assert!(disposals[0].ends_with("reference sets"));
    assert!(disposals[1].ends_with("cached sessions"));
    assert_eq!(harness.sessions().session_count(), 0);
}

#[tokio::test]
async fn test_reference_sync() {
    let harness = Harness::start(&[ServiceKind::Reference]).await;
    let references = harness.context.get_service::<ReferenceService>().unwrap();
    let mut updated = harness.record::<ReferenceUpdated>();

    assert_eq!(references.get_reference("vehicles").unwrap().version, 3);
    assert_eq!(
        references.find_entry("vehicles", "car").unwrap().data["seats"],
        4
    );
    assert!(references.find_entry("vehicles", "boat").is_none());

    harness.engine.upsert_reference(ReferenceSet {
        kind: "vehicles".to_string(),
        version: 4,
        entries: Vec::new(),
    });
    let update = r#"{"event":"socketReferenceUpdated","data":{"kind":"vehicles"}}"#;
    harness.push(update).await;
    assert_eq!(
        next(&mut updated).await,
        ReferenceUpdated {
            kind: "vehicles".to_string(),
            version: 4
        }
    );

    // Same version again: nothing to announce.
    harness.push(update).await;
    assert!(updated.try_recv().is_err());

    // Uncached kinds are not fetched.
    harness.engine.upsert_reference(ReferenceSet {
        kind: "maps".to_string(),
        version: 1,
        entries: Vec::new(),
    });
    harness
        .push(r#"{"event":"socketReferenceUpdated","data":{"kind":"maps"}}"#)
        .await;
    assert!(matches!(
        references.get_reference("maps"),
        Err(DomainError::NotFound(_))
    ));

    harness.engine.remove_reference("weapons");
    harness
        .push(r#"{"event":"socketReferenceUpdated","data":{"kind":"weapons"}}"#)
        .await;
    assert_eq!(references.kinds(), vec!["vehicles"]);
}

#[tokio::test]
async fn test_localization_sync() {
    let harness = Harness::start(&[ServiceKind::Localization]).await;
    let locales = harness.context.get_service::<LocalizationService>().unwrap();
    let mut added = harness.record::<LocaleAdded>();
    let mut updated = harness.record::<LocaleUpdated>();
    let mut removed = harness.record::<LocaleRemoved>();

    assert_eq!(locales.default_locale().as_deref(), Some("en"));
    assert_eq!(locales.translate("fr", "hello").unwrap(), "Bonjour");
    assert_eq!(locales.translate("fr", "bye").unwrap(), "Goodbye");
    assert!(matches!(locales.translate("fr", "missing"), Err(DomainError::NotFound(_))));
    assert!(matches!(locales.translate("de", "hello"), Err(DomainError::NotFound(_))));

    harness.engine.upsert_locale(Locale {
        code: "de".to_string(),
        is_default: false,
        translations: HashMap::from([("hello".to_string(), "Hallo".to_string())]),
    });
    harness
        .push(r#"{"event":"socketLocaleAdded","data":{"code":"de"}}"#)
        .await;
    assert_eq!(next(&mut added).await.code, "de");
    assert_eq!(locales.translate("de", "hello").unwrap(), "Hallo");

    harness.engine.upsert_locale(Locale {
        code: "fr".to_string(),
        is_default: false,
        translations: HashMap::from([("hello".to_string(), "Salut".to_string())]),
    });
    harness
        .push(r#"{"event":"socketLocaleUpdated","data":{"code":"fr"}}"#)
        .await;
    assert_eq!(next(&mut updated).await.code, "fr");
    assert_eq!(locales.translate("fr", "hello").unwrap(), "Salut");

    harness
        .push(r#"{"event":"socketLocaleRemoved","data":{"code":"de"}}"#)
        .await;
    assert_eq!(next(&mut removed).await.code, "de");

    // A refresh that finds nothing removes the locale too.
    harness.engine.remove_locale("fr");
    harness
        .push(r#"{"event":"socketLocaleUpdated","data":{"code":"fr"}}"#)
        .await;
    assert_eq!(next(&mut removed).await.code, "fr");
    assert_eq!(locales.locales(), vec!["en"]);
}

#[tokio::test]
async fn test_locale_removed_during_add_fetch_stays_removed() {
    let harness = Harness::start(&[ServiceKind::Localization]).await;
    let locales = harness.context.get_service::<LocalizationService>().unwrap();
    let mut added = harness.record::<LocaleAdded>();
    let mut removed = harness.record::<LocaleRemoved>();

    harness.engine.upsert_locale(Locale {
        code: "de".to_string(),
        is_default: false,
        translations: HashMap::from([("hello".to_string(), "Hallo".to_string())]),
    });

    // The fetch for the add is spawned but has not run yet.
    let adding = harness
        .inbound
        .push_json(r#"{"event":"socketLocaleAdded","data":{"code":"de"}}"#)
        .unwrap();
    harness
        .push(r#"{"event":"socketLocaleRemoved","data":{"code":"de"}}"#)
        .await;
    adding.settled().await;

    assert_eq!(locales.locales(), vec!["en", "fr"]);
    assert!(added.try_recv().is_err());
    assert!(removed.try_recv().is_err());

    // A later add goes through as usual.
    harness
        .push(r#"{"event":"socketLocaleAdded","data":{"code":"de"}}"#)
        .await;
    assert_eq!(next(&mut added).await.code, "de");
    assert_eq!(locales.translate("de", "hello").unwrap(), "Hallo");
}
