//! Ordered hook chains.
//!
//! A hook is the request/response sibling of an event: handlers run one after
//! another, each sees the value produced by the previous one, and any handler
//! may end the chain early. Hooks are never fire-and-forget; `invoke` returns
//! only once the chain has finished.

use crate::error::{EventError, HookError};
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Handlers allowed in one chain unless configured otherwise.
pub const DEFAULT_HOOK_CHAIN_LIMIT: usize = 16;

/// Declares a hook point.
///
/// ```ignore
/// struct BeforeSessionStart;
///
/// impl Hook for BeforeSessionStart {
///     const NAME: &'static str = "beforeSessionStart";
///     type Input = PlayerConnecting;
/// }
/// ```
pub trait Hook: 'static {
    const NAME: &'static str;
    type Input: Send + 'static;
}

/// What a single handler decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookFlow<T> {
    /// Pass the (possibly transformed) value to the next handler.
    Continue(T),
    /// End the chain with this value.
    Stop(T),
    /// End the chain and refuse the operation.
    Veto(String),
}

/// How a whole chain ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome<T> {
    Completed(T),
    Stopped { value: T, by: String },
    Vetoed { reason: String, by: String },
}

impl<T> HookOutcome<T> {
    /// The final value, unless the chain was vetoed.
    pub fn into_value(self) -> Option<T> {
        match self {
            HookOutcome::Completed(value) | HookOutcome::Stopped { value, .. } => Some(value),
            HookOutcome::Vetoed { .. } => None,
        }
    }

    pub fn is_vetoed(&self) -> bool {
        matches!(self, HookOutcome::Vetoed { .. })
    }
}

pub type HookFuture<T> = BoxFuture<'static, Result<HookFlow<T>, EventError>>;

type HookFn<T> = Arc<dyn Fn(T) -> HookFuture<T> + Send + Sync>;

/// Chain entries for one hook, type-erased in the registry.
type Chain<T> = Vec<(String, HookFn<T>)>;

/// Registry of hook chains keyed by hook name.
pub struct HookBus {
    chains: RwLock<HashMap<&'static str, Arc<dyn Any + Send + Sync>>>,
    chain_limit: usize,
}

impl std::fmt::Debug for HookBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookBus")
            .field("hooks", &self.hook_names())
            .field("chain_limit", &self.chain_limit)
            .finish()
    }
}

impl HookBus {
    pub fn new() -> Self {
        Self::with_chain_limit(DEFAULT_HOOK_CHAIN_LIMIT)
    }

    pub fn with_chain_limit(chain_limit: usize) -> Self {
        Self {
            chains: RwLock::new(HashMap::new()),
            chain_limit,
        }
    }

    pub fn chain_limit(&self) -> usize {
        self.chain_limit
    }

    /// Appends a handler to the chain of `H`.
    pub fn register<H, F>(&self, handler_name: impl Into<String>, handler: F) -> Result<(), HookError>
    where
        H: Hook,
        F: Fn(H::Input) -> HookFuture<H::Input> + Send + Sync + 'static,
    {
        let handler_name = handler_name.into();
        let mut chains = self.chains.write();

        let mut chain: Chain<H::Input> = match chains.get(H::NAME) {
            Some(existing) => existing
                .downcast_ref::<Chain<H::Input>>()
                .ok_or(HookError::InputMismatch { hook: H::NAME })?
                .clone(),
            None => Vec::new(),
        };

        if chain.len() >= self.chain_limit {
            return Err(HookError::ChainFull {
                hook: H::NAME,
                limit: self.chain_limit,
            });
        }

        debug!("🪝 Registered hook handler {} for {}", handler_name, H::NAME);
        chain.push((handler_name, Arc::new(handler)));
        chains.insert(H::NAME, Arc::new(chain));
        Ok(())
    }

    /// Runs the chain of `H` against `input`.
    ///
    /// An empty or unknown chain completes with the input unchanged.
    pub async fn invoke<H: Hook>(&self, input: H::Input) -> Result<HookOutcome<H::Input>, HookError> {
        let erased = self.chains.read().get(H::NAME).cloned();
        let chain = match erased {
            Some(erased) => erased
                .downcast::<Chain<H::Input>>()
                .map_err(|_| HookError::InputMismatch { hook: H::NAME })?,
            None => return Ok(HookOutcome::Completed(input)),
        };

        let mut value = input;
        for (name, handler) in chain.iter() {
            let flow = handler(value).await.map_err(|source| HookError::Handler {
                hook: H::NAME,
                handler: name.clone(),
                source,
            })?;

            match flow {
                HookFlow::Continue(next) => value = next,
                HookFlow::Stop(value) => {
                    debug!("Hook {} stopped by {}", H::NAME, name);
                    return Ok(HookOutcome::Stopped {
                        value,
                        by: name.clone(),
                    });
                }
                HookFlow::Veto(reason) => {
                    debug!("Hook {} vetoed by {}: {}", H::NAME, name, reason);
                    return Ok(HookOutcome::Vetoed {
                        reason,
                        by: name.clone(),
                    });
                }
            }
        }

        Ok(HookOutcome::Completed(value))
    }

    /// Number of handlers in the chain of `H`.
    pub fn handler_count<H: Hook>(&self) -> usize {
        self.chains
            .read()
            .get(H::NAME)
            .and_then(|erased| erased.downcast_ref::<Chain<H::Input>>().map(Vec::len))
            .unwrap_or(0)
    }

    pub fn hook_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.chains.read().keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for HookBus {
    fn default() -> Self {
        Self::new()
    }
}
