//! Compile rule groups into engine directives and push them to the engine.

use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::engine::RedirectEngine;
use crate::error::{EngineErrorKind, ProxyError, Result};
use crate::events::{EventBus, ProxyEvent};
use crate::storage::StorageBridge;
use crate::types::ProxyCollection;

/// Priority given to every directive
pub const DEFAULT_PRIORITY: u32 = 1;

/// Request types a directive applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    #[serde(rename = "main_frame")]
    MainFrame,
    #[serde(rename = "sub_frame")]
    SubFrame,
    #[serde(rename = "stylesheet")]
    Stylesheet,
    #[serde(rename = "script")]
    Script,
    #[serde(rename = "image")]
    Image,
    #[serde(rename = "font")]
    Font,
    #[serde(rename = "xmlhttprequest")]
    XmlHttpRequest,
    #[serde(rename = "other")]
    Other,
}

/// Resource types every directive covers
pub const ALL_RESOURCE_TYPES: [ResourceType; 8] = [
    ResourceType::MainFrame,
    ResourceType::SubFrame,
    ResourceType::Stylesheet,
    ResourceType::Script,
    ResourceType::Image,
    ResourceType::Font,
    ResourceType::XmlHttpRequest,
    ResourceType::Other,
];

/// One rule in the engine's format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directive {
    /// 1-based, dense within one directive set
    pub id: u32,
    pub priority: u32,
    pub action: DirectiveAction,
    pub condition: DirectiveCondition,
}

/// What to do with a matching request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DirectiveAction {
    Redirect { redirect: RedirectTarget },
}

/// Redirect destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectTarget {
    /// Substitution using `\1`-style group references
    pub regex_substitution: String,
}

/// Which requests a directive matches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectiveCondition {
    pub regex_filter: String,
    pub resource_types: Vec<ResourceType>,
}

impl Directive {
    /// Redirect directive covering every resource type.
    pub fn redirect(id: u32, regex_filter: impl Into<String>, substitution: impl Into<String>) -> Self {
        Self {
            id,
            priority: DEFAULT_PRIORITY,
            action: DirectiveAction::Redirect {
                redirect: RedirectTarget {
                    regex_substitution: substitution.into(),
                },
            },
            condition: DirectiveCondition {
                regex_filter: regex_filter.into(),
                resource_types: ALL_RESOURCE_TYPES.to_vec(),
            },
        }
    }

    /// Pattern requests are matched against
    pub fn regex_filter(&self) -> &str {
        &self.condition.regex_filter
    }

    /// Redirect substitution
    pub fn substitution(&self) -> &str {
        match &self.action {
            DirectiveAction::Redirect { redirect } => &redirect.regex_substitution,
        }
    }

    /// Check the directive on its own: positive id, non-empty substitution
    /// and a compiling filter.
    pub fn validate(&self) -> Result<()> {
        if self.id == 0 {
            return Err(ProxyError::InvalidDirective("id must be at least 1".to_string()));
        }
        if self.substitution().is_empty() {
            return Err(ProxyError::InvalidDirective(format!(
                "directive {} has an empty substitution",
                self.id
            )));
        }
        Regex::new(self.regex_filter()).map_err(|e| {
            ProxyError::InvalidDirective(format!(
                "directive {} has an invalid regexFilter: {}",
                self.id, e
            ))
        })?;
        Ok(())
    }
}

/// Directives for every enabled rule of every ACTIVE group.
///
/// Groups are visited in collection order and rules in list order. Ids run
/// 1, 2, 3, ... over the whole result.
pub fn compute_active_directives(collection: &ProxyCollection) -> Vec<Directive> {
    collection
        .iter()
        .filter(|group| group.group_enabled())
        .flat_map(|group| group.rules().iter().filter(|rule| rule.enabled))
        .enumerate()
        .map(|(idx, rule)| {
            let (pattern, target) = rule.route();
            Directive::redirect(idx as u32 + 1, pattern, target)
        })
        .collect()
}

/// Check a directive set: every directive valid and ids exactly `1..=n`.
pub fn validate_directives(directives: &[Directive]) -> Result<()> {
    for (idx, directive) in directives.iter().enumerate() {
        let expected = idx as u32 + 1;
        if directive.id != expected {
            return Err(ProxyError::InvalidDirective(format!(
                "expected id {}, found {}",
                expected, directive.id
            )));
        }
        directive.validate()?;
    }
    Ok(())
}

/// Pushes directive sets to the engine and announces the result.
#[derive(Clone)]
pub struct Reconciler {
    engine: Arc<dyn RedirectEngine>,
    storage: StorageBridge,
    events: EventBus,
}

impl Reconciler {
    /// Create a reconciler.
    pub fn new(engine: Arc<dyn RedirectEngine>, storage: StorageBridge, events: EventBus) -> Self {
        Self {
            engine,
            storage,
            events,
        }
    }

    /// Replace the engine's rules with `directives`.
    ///
    /// Existing rules are cleared first. If the set is invalid or adding
    /// fails, the engine is left empty and an
    /// [`ProxyError::EngineUpdate`] is returned. On success a
    /// [`ProxyEvent::RulesUpdated`] carrying the count is emitted.
    pub async fn apply_directives(&self, directives: &[Directive]) -> Result<usize> {
        self.engine.clear_dynamic_rules().await?;

        if !directives.is_empty() {
            let added = match validate_directives(directives) {
                Ok(()) => self.engine.add_dynamic_rules(directives).await,
                Err(e) => Err(e),
            };
            if let Err(e) = added {
                warn!(error = %e, "engine rejected directives, clearing");
                if let Err(clear_err) = self.engine.clear_dynamic_rules().await {
                    warn!(error = %clear_err, "failed to clear engine after rejection");
                }
                return Err(match e {
                    err @ ProxyError::EngineUpdate { .. } => err,
                    other => ProxyError::engine(EngineErrorKind::Rejected, other.to_string()),
                });
            }
        }

        let count = directives.len();
        info!(count, "redirect rules applied");
        self.events.emit(ProxyEvent::RulesUpdated { count });
        Ok(count)
    }

    /// Apply `directives` only while the global proxy flag is on.
    ///
    /// Returns whether the engine was touched.
    pub async fn update_if_enabled(&self, directives: &[Directive]) -> Result<bool> {
        if !self.storage.proxy_settings().await.enabled {
            debug!("proxy disabled, leaving engine untouched");
            return Ok(false);
        }
        self.apply_directives(directives).await?;
        Ok(true)
    }

    /// Remove every rule from the engine.
    pub async fn clear(&self) -> Result<()> {
        self.engine.clear_dynamic_rules().await
    }

    /// Number of rules installed in the engine
    pub async fn installed_count(&self) -> Result<usize> {
        self.engine.dynamic_rule_count().await
    }

    /// Event bus announcements go to
    pub fn events(&self) -> &EventBus {
        &self.events
    }
}
