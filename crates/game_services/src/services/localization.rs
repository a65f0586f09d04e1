//! Locale cache and translation lookup.

use crate::api::{Locale, LocaleApi};
use crate::error::DomainError;
use async_trait::async_trait;
use dashmap::DashMap;
use event_system::{
    completed, EventError, EventName, FutureExt, HandlerFuture, LocaleAdded, LocaleRemoved,
    LocaleUpdated, SocketLocaleAdded, SocketLocaleRemoved, SocketLocaleUpdated,
};
use server_context::{bind_method, EventBinding, EventMethod, Service, ServiceBase, ServiceError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct LocalizationService {
    base: ServiceBase,
    locales: DashMap<String, Locale>,
    /// Locales whose add notification is still being fetched, keyed to the
    /// fetch that owns them. A removal clears the marker so the fetch drops
    /// its result.
    pending_adds: DashMap<String, u64>,
    next_fetch: AtomicU64,
}

impl LocalizationService {
    /// Looks `key` up in `code`, falling back to the default locale.
    ///
    /// # Arguments
    ///
    /// * `code` - A cached locale code, e.g. `"fr"`
    /// * `key` - The translation key
    ///
    /// # Errors
    ///
    /// [`DomainError::NotFound`] if `code` is not cached, or if neither it nor
    /// the default locale has `key`.
    pub fn translate(&self, code: &str, key: &str) -> Result<String, DomainError> {
        let translated = self
            .locales
            .get(code)
            .ok_or_else(|| DomainError::NotFound(format!("locale {}", code)))?
            .translations
            .get(key)
            .cloned();

        if let Some(text) = translated {
            return Ok(text);
        }

        self.locales
            .iter()
            .find(|locale| locale.is_default && locale.code != code)
            .and_then(|locale| locale.translations.get(key).cloned())
            .ok_or_else(|| DomainError::NotFound(format!("translation {} in {}", key, code)))
    }

    /// Cached locale codes, sorted.
    pub fn locales(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.locales.iter().map(|entry| entry.key().clone()).collect();
        codes.sort();
        codes
    }

    pub fn default_locale(&self) -> Option<String> {
        self.locales
            .iter()
            .find(|locale| locale.is_default)
            .map(|locale| locale.code.clone())
    }

    fn on_locale_added(self: &Arc<Self>, event: &SocketLocaleAdded) -> HandlerFuture {
        let fetch = self.next_fetch.fetch_add(1, Ordering::SeqCst);
        self.pending_adds.insert(event.code.clone(), fetch);

        let service = Arc::clone(self);
        let code = event.code.clone();
        async move { service.fetch_added(code, fetch).await }.boxed()
    }

    /// Clears the marker of `fetch`, returning false if it was already
    /// cleared by a removal or taken over by a newer add.
    fn claim_pending(&self, code: &str, fetch: u64) -> bool {
        self.pending_adds
            .remove_if(code, |_, owner| *owner == fetch)
            .is_some()
    }

    async fn fetch_added(&self, code: String, fetch: u64) -> Result<(), EventError> {
        let api = match self.base.get_api::<LocaleApi>() {
            Ok(api) => api,
            Err(e) => {
                self.claim_pending(&code, fetch);
                return Err(EventError::handler(e));
            }
        };

        let fetched = api.get_locale(&code).await;
        if !self.claim_pending(&code, fetch) {
            debug!("Locale {} was removed or re-added while being fetched", code);
            return Ok(());
        }

        let locale = match fetched {
            Ok(locale) => locale,
            Err(e) if e.is_not_found() => {
                debug!("Added locale {} is already gone", code);
                return Ok(());
            }
            Err(e) => {
                warn!("⚠️ Failed to fetch added locale {}: {}", code, e);
                return Err(EventError::handler(e));
            }
        };

        self.locales.insert(code.clone(), locale);
        info!("🌐 Locale {} added", code);
        self.base.events().emit(LocaleAdded { code });
        Ok(())
    }

    fn on_locale_updated(self: &Arc<Self>, event: &SocketLocaleUpdated) -> HandlerFuture {
        if !self.locales.contains_key(&event.code) {
            debug!("Ignoring update for uncached locale {}", event.code);
            return completed();
        }

        let service = Arc::clone(self);
        let code = event.code.clone();
        async move { service.refresh(code).await }.boxed()
    }

    async fn refresh(&self, code: String) -> Result<(), EventError> {
        let api = self.base.get_api::<LocaleApi>().map_err(EventError::handler)?;

        let locale = match api.get_locale(&code).await {
            Ok(locale) => locale,
            Err(e) if e.is_not_found() => {
                self.remove(&code);
                return Ok(());
            }
            Err(e) => {
                warn!("⚠️ Failed to refresh locale {}: {}", code, e);
                return Err(EventError::handler(e));
            }
        };

        let replaced = match self.locales.get_mut(&code) {
            Some(mut cached) => {
                *cached = locale;
                true
            }
            None => false,
        };

        if replaced {
            self.base.events().emit(LocaleUpdated { code });
        }
        Ok(())
    }

    fn on_locale_removed(self: &Arc<Self>, event: &SocketLocaleRemoved) -> HandlerFuture {
        if self.pending_adds.remove(&event.code).is_some() {
            debug!("Dropping in-flight add of locale {}", event.code);
        }
        self.remove(&event.code);
        completed()
    }

    fn remove(&self, code: &str) {
        if self.locales.remove(code).is_some() {
            info!("🌐 Locale {} removed", code);
            self.base.events().emit(LocaleRemoved {
                code: code.to_string(),
            });
        }
    }
}

#[async_trait]
impl Service for LocalizationService {
    const EVENT_BINDINGS: &'static [EventBinding] = &[
        EventBinding::new(EventName::SocketLocaleAdded, "on_locale_added"),
        EventBinding::new(EventName::SocketLocaleUpdated, "on_locale_updated"),
        EventBinding::new(EventName::SocketLocaleRemoved, "on_locale_removed"),
    ];

    fn create(base: ServiceBase) -> Result<Self, ServiceError> {
        Ok(Self {
            base,
            locales: DashMap::new(),
            pending_adds: DashMap::new(),
            next_fetch: AtomicU64::new(0),
        })
    }

    fn base(&self) -> &ServiceBase {
        &self.base
    }

    fn event_method(self: &Arc<Self>, method: &str) -> Option<EventMethod> {
        match method {
            "on_locale_added" => Some(bind_method(self, method, Self::on_locale_added)),
            "on_locale_updated" => Some(bind_method(self, method, Self::on_locale_updated)),
            "on_locale_removed" => Some(bind_method(self, method, Self::on_locale_removed)),
            _ => None,
        }
    }

    async fn init(&self) -> Result<(), ServiceError> {
        let api = self.base.get_api::<LocaleApi>()?;
        for locale in api.list_locales().await? {
            self.locales.insert(locale.code.clone(), locale);
        }

        self.base
            .logger()
            .info(&format!("Loaded {} locales", self.locales.len()));
        Ok(())
    }

    async fn dispose(&self) -> Result<(), ServiceError> {
        let cached = self.locales.len();
        self.locales.clear();
        self.pending_adds.clear();
        self.base.logger().debug(&format!("Dropped {} locales", cached));
        Ok(())
    }
}
