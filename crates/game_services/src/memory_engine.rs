//! In-process engine.
//!
//! Implements the routes used by the API wrappers on top of concurrent maps.
//! The host binary runs against it and tests mutate it directly to simulate
//! remote changes.
//!
//! | method | path                    | answer                              |
//! |--------|-------------------------|-------------------------------------|
//! | GET    | `/sessions`             | every session                       |
//! | POST   | `/sessions`             | new session token                   |
//! | GET    | `/sessions/{id}`        | one session                         |
//! | POST   | `/sessions/{id}/finish` | removes the session                 |
//! | GET    | `/references`           | every reference set                 |
//! | GET    | `/references/{kind}`    | one reference set                   |
//! | GET    | `/locales`              | every locale                        |
//! | GET    | `/locales/{code}`       | one locale                          |
//!
//! Path segments are percent-decoded before matching. Anything else is
//! answered with [`EngineError::BadRequest`].

use crate::api::{Locale, ReferenceSet, SessionRecord, SessionToken};
use crate::error::SeedError;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use server_context::{EngineClient, EngineError, EngineMethod, EngineRequest};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info};
use uuid::Uuid;

/// Initial engine contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineSeed {
    #[serde(default)]
    pub sessions: Vec<SessionRecord>,
    #[serde(default)]
    pub references: Vec<ReferenceSet>,
    #[serde(default)]
    pub locales: Vec<Locale>,
}

impl EngineSeed {
    pub fn from_json(raw: &str) -> Result<Self, SeedError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SeedError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }
}

/// How many recent requests [`MemoryEngine::requests`] keeps by default.
pub const DEFAULT_REQUEST_LOG_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct MemoryEngine {
    sessions: DashMap<String, SessionRecord>,
    references: DashMap<String, ReferenceSet>,
    locales: DashMap<String, Locale>,
    unavailable: AtomicBool,
    requests: Mutex<VecDeque<EngineRequest>>,
    request_log_capacity: usize,
    request_count: AtomicU64,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self {
            sessions: DashMap::new(),
            references: DashMap::new(),
            locales: DashMap::new(),
            unavailable: AtomicBool::new(false),
            requests: Mutex::new(VecDeque::new()),
            request_log_capacity: DEFAULT_REQUEST_LOG_CAPACITY,
            request_count: AtomicU64::new(0),
        }
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps at most `capacity` recent requests. Zero turns the log off.
    pub fn with_request_log_capacity(mut self, capacity: usize) -> Self {
        self.request_log_capacity = capacity;
        self
    }

    pub fn from_seed(seed: EngineSeed) -> Self {
        let engine = Self::new();
        info!(
            "🌱 Seeding memory engine: {} sessions, {} reference sets, {} locales",
            seed.sessions.len(),
            seed.references.len(),
            seed.locales.len()
        );
        for session in seed.sessions {
            engine.upsert_session(session);
        }
        for reference in seed.references {
            engine.upsert_reference(reference);
        }
        for locale in seed.locales {
            engine.upsert_locale(locale);
        }
        engine
    }

    pub fn upsert_session(&self, session: SessionRecord) {
        self.sessions.insert(session.id.clone(), session);
    }

    pub fn remove_session(&self, id: &str) -> Option<SessionRecord> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    pub fn session(&self, id: &str) -> Option<SessionRecord> {
        self.sessions.get(id).map(|session| session.clone())
    }

    pub fn upsert_reference(&self, reference: ReferenceSet) {
        self.references.insert(reference.kind.clone(), reference);
    }

    pub fn remove_reference(&self, kind: &str) -> Option<ReferenceSet> {
        self.references.remove(kind).map(|(_, reference)| reference)
    }

    pub fn upsert_locale(&self, locale: Locale) {
        self.locales.insert(locale.code.clone(), locale);
    }

    pub fn remove_locale(&self, code: &str) -> Option<Locale> {
        self.locales.remove(code).map(|(_, locale)| locale)
    }

    /// Makes every request fail with [`EngineError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// The most recent requests, oldest first.
    pub fn requests(&self) -> Vec<EngineRequest> {
        self.requests.lock().iter().cloned().collect()
    }

    /// Number of requests received since creation.
    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::SeqCst)
    }

    fn log_request(&self, request: &EngineRequest) {
        self.request_count.fetch_add(1, Ordering::SeqCst);
        if self.request_log_capacity == 0 {
            return;
        }

        let mut requests = self.requests.lock();
        while requests.len() >= self.request_log_capacity {
            requests.pop_front();
        }
        requests.push_back(request.clone());
    }

    fn route(&self, request: &EngineRequest) -> Result<serde_json::Value, EngineError> {
        let decoded = request
            .path
            .trim_matches('/')
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| {
                urlencoding::decode(segment)
                    .map(|segment| segment.into_owned())
                    .map_err(|e| {
                        EngineError::BadRequest(format!("bad path segment in {}: {}", request, e))
                    })
            })
            .collect::<Result<Vec<String>, EngineError>>()?;
        let segments: Vec<&str> = decoded.iter().map(String::as_str).collect();

        match (request.method, segments.as_slice()) {
            (EngineMethod::Get, ["sessions"]) => {
                let mut sessions: Vec<SessionRecord> =
                    self.sessions.iter().map(|entry| entry.value().clone()).collect();
                sessions.sort_by(|a, b| a.id.cmp(&b.id));
                to_value(&sessions)
            }
            (EngineMethod::Post, ["sessions"]) => self.create_session(request.body.as_ref()),
            (EngineMethod::Get, ["sessions", id]) => {
                let session = self
                    .session(id)
                    .ok_or_else(|| EngineError::NotFound(format!("session {}", id)))?;
                to_value(&session)
            }
            (EngineMethod::Post, ["sessions", id, "finish"]) => {
                self.remove_session(id)
                    .ok_or_else(|| EngineError::NotFound(format!("session {}", id)))?;
                Ok(serde_json::Value::Null)
            }
            (EngineMethod::Get, ["references"]) => {
                let mut references: Vec<ReferenceSet> =
                    self.references.iter().map(|entry| entry.value().clone()).collect();
                references.sort_by(|a, b| a.kind.cmp(&b.kind));
                to_value(&references)
            }
            (EngineMethod::Get, ["references", kind]) => {
                let reference = self
                    .references
                    .get(*kind)
                    .map(|reference| reference.clone())
                    .ok_or_else(|| EngineError::NotFound(format!("reference {}", kind)))?;
                to_value(&reference)
            }
            (EngineMethod::Get, ["locales"]) => {
                let mut locales: Vec<Locale> =
                    self.locales.iter().map(|entry| entry.value().clone()).collect();
                locales.sort_by(|a, b| a.code.cmp(&b.code));
                to_value(&locales)
            }
            (EngineMethod::Get, ["locales", code]) => {
                let locale = self
                    .locales
                    .get(*code)
                    .map(|locale| locale.clone())
                    .ok_or_else(|| EngineError::NotFound(format!("locale {}", code)))?;
                to_value(&locale)
            }
            _ => Err(EngineError::BadRequest(format!("no route for {}", request))),
        }
    }

    fn create_session(&self, body: Option<&serde_json::Value>) -> Result<serde_json::Value, EngineError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct CreateSession {
            session_id: String,
            ip_address: String,
        }

        let body = body.cloned().unwrap_or(serde_json::Value::Null);
        let create: CreateSession = serde_json::from_value(body)
            .map_err(|e| EngineError::InvalidResponse(format!("bad session body: {}", e)))?;

        if self.sessions.contains_key(&create.session_id) {
            return Err(EngineError::Conflict(format!(
                "session {} already exists",
                create.session_id
            )));
        }

        self.upsert_session(SessionRecord {
            id: create.session_id.clone(),
            user_id: None,
            ip_address: Some(create.ip_address),
        });

        to_value(&SessionToken {
            session_id: create.session_id,
            session_token: Uuid::new_v4().to_string(),
        })
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<serde_json::Value, EngineError> {
    serde_json::to_value(value).map_err(|e| EngineError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl EngineClient for MemoryEngine {
    async fn send(&self, request: EngineRequest) -> Result<serde_json::Value, EngineError> {
        debug!("Memory engine request: {}", request);
        self.log_request(&request);

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EngineError::Unavailable(format!("engine is down ({})", request)));
        }

        self.route(&request)
    }
}
