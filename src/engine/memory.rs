//! In-process redirect engine.
//!
//! Holds directives in memory and can rewrite URLs with them, which makes it
//! usable both as a test double and as a standalone rule evaluator.

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::{EngineErrorKind, ProxyError, Result};
use crate::reconcile::Directive;

use super::RedirectEngine;

/// Engine keeping directives in memory.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    rules: Mutex<Vec<Directive>>,
    max_rules: Option<usize>,
}

impl MemoryEngine {
    /// Create an engine without a size limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine with the limits from `config`.
    pub fn from_config(config: &EngineConfig) -> Self {
        let engine = Self::new();
        match config.max_rules {
            Some(max) => engine.with_max_rules(max),
            None => engine,
        }
    }

    /// Reject directive sets that would exceed `max` rules.
    pub fn with_max_rules(mut self, max: usize) -> Self {
        self.max_rules = Some(max);
        self
    }

    /// Copy of the installed directives
    pub fn snapshot(&self) -> Vec<Directive> {
        self.rules.lock().clone()
    }

    /// Rewrite `url` with the highest-priority matching directive, lowest id
    /// first among equals.
    pub fn redirect(&self, url: &str) -> Option<String> {
        let mut rules = self.snapshot();
        rules.sort_by_key(|d| (std::cmp::Reverse(d.priority), d.id));
        rules.iter().find_map(|directive| {
            let re = Regex::new(directive.regex_filter()).ok()?;
            if !re.is_match(url) {
                return None;
            }
            Some(
                re.replace(url, to_regex_replacement(directive.substitution()).as_str())
                    .into_owned(),
            )
        })
    }
}

#[async_trait]
impl RedirectEngine for MemoryEngine {
    async fn clear_dynamic_rules(&self) -> Result<()> {
        self.rules.lock().clear();
        Ok(())
    }

    async fn add_dynamic_rules(&self, directives: &[Directive]) -> Result<()> {
        let mut rules = self.rules.lock();

        if let Some(max) = self.max_rules {
            let total = rules.len() + directives.len();
            if total > max {
                return Err(ProxyError::engine(
                    EngineErrorKind::LimitExceeded,
                    format!("{} rules exceed the limit of {}", total, max),
                ));
            }
        }

        let mut seen: HashSet<u32> = rules.iter().map(|d| d.id).collect();
        for directive in directives {
            if !seen.insert(directive.id) {
                return Err(ProxyError::engine(
                    EngineErrorKind::Rejected,
                    format!("duplicate rule id {}", directive.id),
                ));
            }
            if let Err(e) = Regex::new(directive.regex_filter()) {
                return Err(ProxyError::engine(
                    EngineErrorKind::Rejected,
                    format!("rule {} has an invalid regexFilter: {}", directive.id, e),
                ));
            }
        }

        rules.extend_from_slice(directives);
        debug!(added = directives.len(), total = rules.len(), "engine rules updated");
        Ok(())
    }

    async fn dynamic_rules(&self) -> Result<Vec<Directive>> {
        Ok(self.snapshot())
    }
}

/// Convert `\1`-style group references to the `${1}` syntax of `regex`.
fn to_regex_replacement(substitution: &str) -> String {
    let mut out = String::with_capacity(substitution.len());
    let mut chars = substitution.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.peek() {
                Some(d) if d.is_ascii_digit() => {
                    out.push_str(&format!("${{{}}}", d));
                    chars.next();
                }
                _ => out.push('\\'),
            },
            '$' => out.push_str("$$"),
            _ => out.push(c),
        }
    }
    out
}
