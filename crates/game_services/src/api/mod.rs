//! Typed wrappers over the engine client.
//!
//! Each wrapper is an [`EngineApi`](server_context::EngineApi) and is obtained
//! through `ServerContext::get_api`, so every service shares one instance.

mod locales;
mod references;
mod sessions;

pub use locales::{Locale, LocaleApi};
pub use references::{ReferenceApi, ReferenceEntry, ReferenceSet};
pub use sessions::{SessionApi, SessionRecord, SessionToken};
