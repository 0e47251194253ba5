//! Redirect engine interface.
//!
//! The engine is the native request-rewriting layer that receives the
//! compiled directive set. Implementations:
//! - `MemoryEngine`: keeps directives in process, with optional limits

use async_trait::async_trait;

use crate::error::Result;
use crate::reconcile::Directive;

mod memory;

pub use memory::MemoryEngine;

/// Trait for the engine holding the dynamic redirect rules
#[async_trait]
pub trait RedirectEngine: Send + Sync {
    /// Remove every dynamic rule
    async fn clear_dynamic_rules(&self) -> Result<()>;

    /// Install `directives` next to the current rules.
    ///
    /// The call is all-or-nothing: on error no directive was added.
    async fn add_dynamic_rules(&self, directives: &[Directive]) -> Result<()>;

    /// Currently installed rules
    async fn dynamic_rules(&self) -> Result<Vec<Directive>>;

    /// Number of installed rules
    async fn dynamic_rule_count(&self) -> Result<usize> {
        Ok(self.dynamic_rules().await?.len())
    }
}
