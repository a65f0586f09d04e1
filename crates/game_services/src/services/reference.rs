//! Reference data cache.
//!
//! Loaded in bulk at init. A `socketReferenceUpdated` push refetches the kind
//! and `referenceUpdated` is emitted only when the version moved forward.

use crate::api::{ReferenceApi, ReferenceEntry, ReferenceSet};
use crate::error::DomainError;
use async_trait::async_trait;
use dashmap::DashMap;
use event_system::{
    completed, EventError, EventName, FutureExt, HandlerFuture, ReferenceUpdated,
    SocketReferenceUpdated,
};
use server_context::{bind_method, EventBinding, EventMethod, Service, ServiceBase, ServiceError};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct ReferenceService {
    base: ServiceBase,
    references: DashMap<String, ReferenceSet>,
}

impl ReferenceService {
    /// Returns the cached reference set of `kind`.
    ///
    /// Only kinds loaded at init are ever cached; update notifications for
    /// other kinds are ignored.
    ///
    /// # Errors
    ///
    /// [`DomainError::NotFound`] if `kind` is not cached.
    pub fn get_reference(&self, kind: &str) -> Result<ReferenceSet, DomainError> {
        self.references
            .get(kind)
            .map(|reference| reference.clone())
            .ok_or_else(|| DomainError::NotFound(format!("reference {}", kind)))
    }

    pub fn find_entry(&self, kind: &str, id: &str) -> Option<ReferenceEntry> {
        self.references
            .get(kind)
            .and_then(|reference| reference.entry(id).cloned())
    }

    /// Cached kinds, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.references.iter().map(|entry| entry.key().clone()).collect();
        kinds.sort();
        kinds
    }

    fn on_reference_updated(self: &Arc<Self>, event: &SocketReferenceUpdated) -> HandlerFuture {
        if !self.references.contains_key(&event.kind) {
            debug!("Ignoring update for uncached reference {}", event.kind);
            return completed();
        }

        let service = Arc::clone(self);
        let kind = event.kind.clone();
        async move { service.refresh(kind).await }.boxed()
    }

    async fn refresh(&self, kind: String) -> Result<(), EventError> {
        let api = self.base.get_api::<ReferenceApi>().map_err(EventError::handler)?;

        let fresh = match api.get_reference(&kind).await {
            Ok(fresh) => fresh,
            Err(e) if e.is_not_found() => {
                if self.references.remove(&kind).is_some() {
                    info!("🗑️ Reference {} no longer exists", kind);
                }
                return Ok(());
            }
            Err(e) => {
                warn!("⚠️ Failed to refresh reference {}: {}", kind, e);
                return Err(EventError::handler(e));
            }
        };

        let version = fresh.version;
        let advanced = match self.references.get_mut(&kind) {
            Some(mut cached) if fresh.version > cached.version => {
                *cached = fresh;
                true
            }
            _ => false,
        };

        if !advanced {
            debug!("Reference {} unchanged at version {}", kind, version);
            return Ok(());
        }

        info!("📚 Reference {} updated to version {}", kind, version);
        self.base.events().emit(ReferenceUpdated { kind, version });
        Ok(())
    }
}

#[async_trait]
impl Service for ReferenceService {
    const EVENT_BINDINGS: &'static [EventBinding] = &[EventBinding::new(
        EventName::SocketReferenceUpdated,
        "on_reference_updated",
    )];

    fn create(base: ServiceBase) -> Result<Self, ServiceError> {
        Ok(Self {
            base,
            references: DashMap::new(),
        })
    }

    fn base(&self) -> &ServiceBase {
        &self.base
    }

    fn event_method(self: &Arc<Self>, method: &str) -> Option<EventMethod> {
        match method {
            "on_reference_updated" => Some(bind_method(self, method, Self::on_reference_updated)),
            _ => None,
        }
    }

    async fn init(&self) -> Result<(), ServiceError> {
        let api = self.base.get_api::<ReferenceApi>()?;
        for reference in api.list_references().await? {
            self.references.insert(reference.kind.clone(), reference);
        }

        self.base
            .logger()
            .info(&format!("Loaded {} reference sets", self.references.len()));
        Ok(())
    }

    async fn dispose(&self) -> Result<(), ServiceError> {
        let cached = self.references.len();
        self.references.clear();
        self.base
            .logger()
            .debug(&format!("Dropped {} reference sets", cached));
        Ok(())
    }
}
