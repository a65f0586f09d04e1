//! Cache-synchronizing services.

mod localization;
mod reference;
mod session;

pub use localization::LocalizationService;
pub use reference::ReferenceService;
pub use session::{CachedSession, SessionService, SessionStartHook, SessionState};

use server_context::{ContextError, ServerContext};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Services that can be enabled by name, e.g. from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    Session,
    Reference,
    Localization,
}

impl ServiceKind {
    pub const ALL: &'static [ServiceKind] = &[
        ServiceKind::Session,
        ServiceKind::Reference,
        ServiceKind::Localization,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Session => "session",
            ServiceKind::Reference => "reference",
            ServiceKind::Localization => "localization",
        }
    }

    /// Registers the matching service on `context`.
    pub fn register(&self, context: &Arc<ServerContext>) -> Result<(), ContextError> {
        match self {
            ServiceKind::Session => context.add_service::<SessionService>()?,
            ServiceKind::Reference => context.add_service::<ReferenceService>()?,
            ServiceKind::Localization => context.add_service::<LocalizationService>()?,
        };
        Ok(())
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = String;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        ServiceKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| format!("unknown service '{}'", name))
    }
}
