//! Proxy Rule Engine - tab-scoped request redirection rules for Rust
//!
//! This library manages user-defined redirect rules and keeps a native
//! redirect engine in step with them:
//! - Rule groups ("tabs") that can be switched ACTIVE or INACTIVE
//! - A JSONC editor format where commented-out entries are disabled rules
//! - Comment-preserving enable/disable of single entries in that text
//! - Compilation of enabled rules into engine directives
//! - Persistence through an async key-value backend
//! - Query-parameter inspection with saved notes
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use proxy_rule_engine::{
//!     MemoryBackend, MemoryEngine, ProxyAction, ProxySession, SessionOptions, StorageBridge,
//!     StorageKeys,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let storage = StorageBridge::new(Arc::new(MemoryBackend::new()), StorageKeys::default());
//! let engine = Arc::new(MemoryEngine::new());
//! let mut session = ProxySession::new(storage, engine.clone(), SessionOptions::new());
//! session.load().await;
//!
//! // Edit the default group as JSONC text
//! let text = r#"{
//!   "proxy": [
//!     ["^https://api\\.example\\.com/(.*)", "http://localhost:3000/\\1"],
//!     // ["^https://cdn\\.example\\.com/(.*)", "http://localhost:3001/\\1"],
//!   ]
//! }"#;
//! session
//!     .dispatch(ProxyAction::UpdateText { key: "default".into(), text: text.into() })
//!     .await;
//!
//! // Only the uncommented rule reaches the engine
//! assert_eq!(session.open_proxy().await.unwrap(), 1);
//! assert_eq!(
//!     engine.redirect("https://api.example.com/users").as_deref(),
//!     Some("http://localhost:3000/users")
//! );
//! # }
//! ```
//!
//! # Rule Text Format
//!
//! ```text
//! {
//!   "proxy": [
//!     ["pattern", "target"],        // enabled
//!     // ["pattern", "target"],     // disabled
//!   ]
//! }
//! ```
//!
//! Patterns are regular expressions. Targets may refer to capture groups as
//! `\1`, `\2`, ...
//!
//! Entries are numbered by position in the text, commented or not, so
//! toggling an entry never renumbers the others.

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod jsonc;
pub mod query;
pub mod reconcile;
pub mod session;
pub mod storage;
pub mod store;
pub mod types;

// Re-export commonly used items
pub use config::{Config, EngineConfig, Environment, RuleEntry, RulesConfig, StorageConfig, StorageKeys};
pub use error::{EngineErrorKind, ProxyError, Result, StorageErrorKind};
pub use events::{EventBus, ProxyEvent};
pub use jsonc::{
    append_rules, rules_to_text, set_rule_enabled, text_to_rules, try_set_rule_enabled,
};
pub use types::{
    GroupStatus, ProxyCollection, ProxyMode, ProxyRule, ProxySettings, RuleGroup,
    DEFAULT_GROUP_KEY,
};

// Re-export store types
pub use store::{ProxyAction, ProxyState, RuleIdGenerator, StoreOptions};

// Re-export storage and engine types
pub use engine::{MemoryEngine, RedirectEngine};
pub use storage::{FileBackend, KeyValueBackend, MemoryBackend, StorageBridge};

// Re-export reconcile types
pub use reconcile::{
    compute_active_directives, validate_directives, Directive, DirectiveAction,
    DirectiveCondition, Reconciler, ResourceType, ALL_RESOURCE_TYPES,
};

// Re-export session and query types
pub use query::{parse_link, replace_link, ParsedLink, QueryNote, QueryNotes, QueryParam};
pub use session::{ProxySession, SessionOptions};
