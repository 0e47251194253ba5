//! Session module.
//!
//! Ties the tab state to storage and the redirect engine: every dispatched
//! action is reduced, persisted and then reconciled with the engine.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::engine::RedirectEngine;
use crate::error::Result;
use crate::events::{EventBus, ProxyEvent};
use crate::reconcile::{compute_active_directives, Directive, Reconciler};
use crate::storage::StorageBridge;
use crate::store::{ProxyAction, ProxyState, StoreOptions};
use crate::types::{ProxyMode, ProxySettings};

/// Session options.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Seeds for new groups
    pub store: StoreOptions,
    /// Buffered events per subscriber. Zero means the default.
    pub event_capacity: usize,
}

impl SessionOptions {
    /// Create default session options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the store options.
    pub fn with_store(mut self, store: StoreOptions) -> Self {
        self.store = store;
        self
    }

    /// Set the event buffer size.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

/// The rule store bound to persistence and the redirect engine.
pub struct ProxySession {
    state: ProxyState,
    settings: ProxySettings,
    storage: StorageBridge,
    reconciler: Reconciler,
    events: EventBus,
}

impl ProxySession {
    /// Create a session. Call [`ProxySession::load`] to read persisted state.
    pub fn new(
        storage: StorageBridge,
        engine: Arc<dyn RedirectEngine>,
        options: SessionOptions,
    ) -> Self {
        let events = if options.event_capacity == 0 {
            EventBus::default()
        } else {
            EventBus::new(options.event_capacity)
        };
        let reconciler = Reconciler::new(engine, storage.clone(), events.clone());
        Self {
            state: ProxyState::new(options.store),
            settings: ProxySettings::default(),
            storage,
            reconciler,
            events,
        }
    }

    /// Create a session with storage and seeds from `config`.
    pub fn from_config(config: &Config, engine: Arc<dyn RedirectEngine>) -> Self {
        let storage = StorageBridge::from_config(&config.storage);
        let options = SessionOptions::new().with_store(config.rules.store_options());
        Self::new(storage, engine, options)
    }

    /// Current tab state
    pub fn state(&self) -> &ProxyState {
        &self.state
    }

    /// Global proxy settings as last loaded or written
    pub fn settings(&self) -> ProxySettings {
        self.settings
    }

    /// Storage the session persists to
    pub fn storage(&self) -> &StorageBridge {
        &self.storage
    }

    /// Subscribe to engine notifications.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ProxyEvent> {
        self.events.subscribe()
    }

    /// Directives the current state compiles to
    pub fn active_directives(&self) -> Vec<Directive> {
        compute_active_directives(self.state.collection())
    }

    /// Read settings and the current mode's collection from storage, then
    /// bring the engine in line.
    pub async fn load(&mut self) -> &ProxyState {
        self.settings = self.storage.proxy_settings().await;
        let loaded = self.storage.get_rule_collection(self.settings.mode).await;
        debug!(mode = ?self.settings.mode, found = loaded.is_some(), "loading rule collection");
        self.reduce(ProxyAction::Initialize(loaded));
        self.reconcile().await;
        &self.state
    }

    /// Apply an action, persist the result and update the engine.
    ///
    /// Failures are logged. An engine rejection turns proxying off.
    pub async fn dispatch(&mut self, action: ProxyAction) {
        let persist = action.mutates_collection();
        self.reduce(action);
        if persist {
            self.persist().await;
            self.reconcile().await;
        }
    }

    /// Turn proxying on and push the active rules to the engine.
    ///
    /// In editor mode every group's rules are first re-derived from its raw
    /// text. On failure proxying is turned back off and the error returned.
    pub async fn open_proxy(&mut self) -> Result<usize> {
        match self.try_open_proxy().await {
            Ok(count) => {
                info!(count, "proxy opened");
                Ok(count)
            }
            Err(e) => {
                error!(error = %e, "failed to open proxy");
                self.close_proxy().await;
                Err(e)
            }
        }
    }

    async fn try_open_proxy(&mut self) -> Result<usize> {
        self.settings.enabled = true;
        self.storage.set_proxy_settings(&self.settings).await?;

        if self.settings.mode == ProxyMode::Editor {
            let state = std::mem::take(&mut self.state);
            self.state = state.resync_from_text();
        }

        let directives = self.active_directives();
        let count = self.reconciler.apply_directives(&directives).await?;
        self.persist().await;
        Ok(count)
    }

    /// Turn proxying off and clear the engine.
    pub async fn close_proxy(&mut self) {
        self.settings.enabled = false;
        if let Err(e) = self.storage.set_proxy_settings(&self.settings).await {
            error!(error = %e, "failed to store proxy settings");
        }
        if let Err(e) = self.reconciler.clear().await {
            error!(error = %e, "failed to clear engine rules");
        }
        self.persist().await;
        self.events.emit(ProxyEvent::RulesUpdated { count: 0 });
        info!("proxy closed");
    }

    /// Flip proxying, returning whether it is now on.
    pub async fn toggle_proxy(&mut self) -> Result<bool> {
        if self.settings.enabled {
            self.close_proxy().await;
            Ok(false)
        } else {
            self.open_proxy().await?;
            Ok(true)
        }
    }

    /// Switch editing mode and load that mode's collection.
    pub async fn set_mode(&mut self, mode: ProxyMode) {
        if self.settings.mode == mode {
            return;
        }
        self.settings.mode = mode;
        if let Err(e) = self.storage.set_proxy_settings(&self.settings).await {
            error!(error = %e, "failed to store proxy mode");
        }
        let loaded = self.storage.get_rule_collection(mode).await;
        self.reduce(ProxyAction::Initialize(loaded));
        self.reconcile().await;
    }

    /// Rules installed in the engine, 0 while proxying is off.
    pub async fn proxy_rules_count(&self) -> usize {
        if !self.storage.proxy_settings().await.enabled {
            return 0;
        }
        self.reconciler.installed_count().await.unwrap_or_else(|e| {
            warn!(error = %e, "failed to read engine rule count");
            0
        })
    }

    fn reduce(&mut self, action: ProxyAction) {
        let state = std::mem::take(&mut self.state);
        self.state = state.reduce(action);
    }

    async fn persist(&self) {
        if let Err(e) = self
            .storage
            .set_rule_collection(self.state.collection(), self.settings.mode)
            .await
        {
            error!(error = %e, mode = ?self.settings.mode, "failed to persist rule collection");
        }
    }

    async fn reconcile(&mut self) {
        let directives = self.active_directives();
        match self.reconciler.update_if_enabled(&directives).await {
            Ok(applied) => debug!(applied, count = directives.len(), "reconciled engine"),
            Err(e) => {
                error!(error = %e, "engine update failed, closing proxy");
                self.close_proxy().await;
            }
        }
    }
}
