//! # Pipit
//!
//! Client core for a feed of discrete, classified messages
//! ("zephyrgrams"), each tagged with a class/instance/recipient topic and
//! delivered out of band by an external transport.
//!
//! ## Core Concepts
//!
//! - **Filters**: a small boolean expression language compiled into
//!   reusable, named predicates over message attributes
//! - **Message store**: an append-only, id-ordered log with filtered
//!   forward/backward navigation and counting
//! - **Subscriptions**: a registry of `(class, instance, recipient)`
//!   triples with "un-class" escalation watermarks
//! - **Session**: the thin controller draining inbound messages and
//!   forwarding subscription changes to the transport
//!
//! ## Example
//!
//! ```ignore
//! use pipit::{Filter, MessageStore, StoreConfig, ZephyrgramInput};
//!
//! let store = MessageStore::open_or_create(StoreConfig {
//!     path: "./my-grams".into(),
//!     ..Default::default()
//! })?;
//!
//! let gram = store.append(ZephyrgramInput::new("help", "pipit.setup"))?;
//!
//! let filter = Filter::compile("cla is \"help\" and ins is-not \"spam\"")?;
//! let next = store.advance(gram.id, 1, &filter)?;
//! ```

pub mod error;
pub mod filter;
pub mod session;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use error::{ClientError, Result};
pub use filter::{CompileError, Filter};
pub use session::{
    default_principal, DefaultDisplay, DisplayConfig, DisplayProperties, Session, SessionConfig,
    Transport, ZsubsImport,
};
pub use store::{MessageStore, ScanIter, StoreConfig, ZephyrgramLog};
pub use subscriptions::{
    RegistryOptions, SubTriple, Subscription, SubscriptionRegistry,
};
pub use types::{
    strip_un_prefix, un_class, Timestamp, Zephyrgram, ZephyrgramId, ZephyrgramInput,
    PERSONAL_CLASS,
};
