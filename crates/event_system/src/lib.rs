//! # Event System
//!
//! Typed dispatch primitives for the game server:
//!
//! - [`events`]: the closed set of server events, their wire names and payloads
//! - [`EventBus`]: publish/subscribe with synchronous registration and
//!   fire-and-forget emission, plus a fault channel for failed handlers
//! - [`HookBus`]: bounded, ordered hook chains that may transform, stop or veto
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use event_system::{completed, create_event_bus, SessionStarted};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = create_event_bus();
//! bus.on_event("greeter", |started: &SessionStarted| {
//!     println!("welcome {}", started.session_id);
//!     completed()
//! });
//!
//! bus.emit(SessionStarted {
//!     session_id: "s1".to_string(),
//!     session_token: "t1".to_string(),
//! })
//! .settled()
//! .await;
//! # }
//! ```

pub mod bus;
pub mod error;
pub mod events;
pub mod hooks;
pub mod utils;

pub use bus::{
    completed, create_event_bus, Dispatch, EventBus, EventBusStats, EventHandler, HandlerFault,
    HandlerFuture, TypedEventHandler,
};
pub use error::{EventError, HookError};
pub use events::*;
pub use hooks::{Hook, HookBus, HookFlow, HookFuture, HookOutcome, DEFAULT_HOOK_CHAIN_LIMIT};
pub use utils::current_timestamp;

// Re-exported so handler code can box futures without naming `futures` itself.
pub use futures::future::{BoxFuture, FutureExt};
