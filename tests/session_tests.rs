//! Integration tests for ProxySession against in-memory and file storage

use std::sync::Arc;

use async_trait::async_trait;
use proxy_rule_engine::{
    Config, Directive, EngineErrorKind, Environment, FileBackend, GroupStatus, MemoryBackend,
    MemoryEngine, ProxyAction, ProxyError, ProxyEvent, ProxyMode, ProxyRule, ProxySession,
    RedirectEngine, Result, SessionOptions, StorageBridge, StorageKeys, StoreOptions,
    DEFAULT_GROUP_KEY,
};

/// Engine that refuses every non-empty directive set
struct RejectingEngine;

#[async_trait]
impl RedirectEngine for RejectingEngine {
    async fn clear_dynamic_rules(&self) -> Result<()> {
        Ok(())
    }

    async fn add_dynamic_rules(&self, _directives: &[Directive]) -> Result<()> {
        Err(ProxyError::EngineUpdate {
            kind: EngineErrorKind::Unavailable,
            message: "engine offline".to_string(),
        })
    }

    async fn dynamic_rules(&self) -> Result<Vec<Directive>> {
        Ok(Vec::new())
    }
}

fn memory_storage() -> StorageBridge {
    StorageBridge::new(Arc::new(MemoryBackend::new()), StorageKeys::default())
}

fn options() -> SessionOptions {
    SessionOptions::new().with_store(
        StoreOptions::new().with_default_rules(vec![
            ProxyRule::new(1, "^/a", "/b"),
            ProxyRule::new(2, "^/c", "/d").with_enabled(false),
        ]),
    )
}

async fn loaded_session(storage: StorageBridge, engine: Arc<dyn RedirectEngine>) -> ProxySession {
    let mut session = ProxySession::new(storage, engine, options());
    session.load().await;
    session
}

#[tokio::test]
async fn test_add_tab_scenario() {
    let engine = Arc::new(MemoryEngine::new());
    let mut session = loaded_session(memory_storage(), engine).await;

    session.dispatch(ProxyAction::AddTab("staging".into())).await;

    let state = session.state();
    assert_eq!(state.collection().len(), 2);
    assert_eq!(state.current_tab(), "staging");
    assert_eq!(state.group("staging").unwrap().status(), GroupStatus::Inactive);
}

#[tokio::test]
async fn test_open_proxy_applies_and_notifies() {
    let engine = Arc::new(MemoryEngine::new());
    let mut session = loaded_session(memory_storage(), engine.clone()).await;
    let mut events = session.subscribe();

    assert_eq!(session.open_proxy().await.unwrap(), 1);
    assert!(session.settings().enabled);
    assert_eq!(events.recv().await.unwrap(), ProxyEvent::RulesUpdated { count: 1 });

    let installed = engine.snapshot();
    assert_eq!(installed.len(), 1);
    assert_eq!(installed[0].id, 1);
    assert_eq!(installed[0].regex_filter(), "^/a");
    assert_eq!(installed[0].substitution(), "/b");

    session.close_proxy().await;
    assert_eq!(events.recv().await.unwrap(), ProxyEvent::RulesUpdated { count: 0 });
    assert!(!session.settings().enabled);
    assert!(engine.snapshot().is_empty());
}

#[tokio::test]
async fn test_mutations_reach_engine_only_when_enabled() {
    let engine = Arc::new(MemoryEngine::new());
    let mut session = loaded_session(memory_storage(), engine.clone()).await;

    session
        .dispatch(ProxyAction::SetRuleEnabled {
            key: DEFAULT_GROUP_KEY.into(),
            rule_id: 2,
            enabled: true,
        })
        .await;
    assert!(engine.snapshot().is_empty());

    session.open_proxy().await.unwrap();
    assert_eq!(engine.snapshot().len(), 2);

    session
        .dispatch(ProxyAction::ToggleGroupStatus(DEFAULT_GROUP_KEY.into()))
        .await;
    assert!(engine.snapshot().is_empty());
    assert_eq!(session.proxy_rules_count().await, 0);
    // Proxying itself stays on
    assert!(session.settings().enabled);
}

#[tokio::test]
async fn test_set_rule_enabled_rewrites_text() {
    let engine = Arc::new(MemoryEngine::new());
    let mut session = loaded_session(memory_storage(), engine).await;

    session
        .dispatch(ProxyAction::SetRuleEnabled {
            key: DEFAULT_GROUP_KEY.into(),
            rule_id: 1,
            enabled: false,
        })
        .await;

    let group = session.state().group(DEFAULT_GROUP_KEY).unwrap();
    assert!(group.rules().iter().all(|r| !r.enabled));
    let text = group.raw_text().unwrap();
    assert!(text.contains(r#"// ["^/a", "/b"],"#));
    assert!(text.contains(r#"// ["^/c", "/d"],"#));
}

#[tokio::test]
async fn test_engine_rejection_closes_proxy() {
    let storage = memory_storage();
    let mut session = loaded_session(storage.clone(), Arc::new(RejectingEngine)).await;
    let mut events = session.subscribe();

    let err = session.open_proxy().await.unwrap_err();
    assert!(matches!(
        err,
        ProxyError::EngineUpdate {
            kind: EngineErrorKind::Unavailable,
            ..
        }
    ));
    assert!(!session.settings().enabled);
    assert!(!storage.proxy_settings().await.enabled);
    assert_eq!(events.recv().await.unwrap(), ProxyEvent::RulesUpdated { count: 0 });
    assert_eq!(session.proxy_rules_count().await, 0);

    assert!(session.toggle_proxy().await.is_err());
    assert!(!session.settings().enabled);
}

#[tokio::test]
async fn test_engine_limit_during_dispatch_closes_proxy() {
    let engine = Arc::new(MemoryEngine::new().with_max_rules(1));
    let mut session = loaded_session(memory_storage(), engine.clone()).await;
    session.open_proxy().await.unwrap();

    session
        .dispatch(ProxyAction::MergeRules {
            key: DEFAULT_GROUP_KEY.into(),
            rules: vec![ProxyRule::new(0, "^/e", "/f")],
        })
        .await;

    assert!(!session.settings().enabled);
    assert!(engine.snapshot().is_empty());
    // The merged rule is still part of the state
    assert_eq!(session.state().group(DEFAULT_GROUP_KEY).unwrap().rules().len(), 3);
}

#[tokio::test]
async fn test_toggle_proxy() {
    let engine = Arc::new(MemoryEngine::new());
    let mut session = loaded_session(memory_storage(), engine.clone()).await;

    assert!(session.toggle_proxy().await.unwrap());
    assert_eq!(session.proxy_rules_count().await, 1);
    assert!(!session.toggle_proxy().await.unwrap());
    assert_eq!(session.proxy_rules_count().await, 0);
}

#[tokio::test]
async fn test_modes_keep_separate_collections() {
    let storage = memory_storage();
    let engine = Arc::new(MemoryEngine::new());
    let mut session = loaded_session(storage.clone(), engine).await;

    session.dispatch(ProxyAction::AddTab("table-only".into())).await;
    session.set_mode(ProxyMode::Editor).await;
    assert!(session.state().group("table-only").is_none());

    session.dispatch(ProxyAction::AddTab("editor-only".into())).await;
    session.set_mode(ProxyMode::Table).await;
    assert!(session.state().group("table-only").is_some());
    assert!(session.state().group("editor-only").is_none());

    let editor = storage.get_rule_collection(ProxyMode::Editor).await.unwrap();
    assert!(editor.contains("editor-only"));
    assert_eq!(storage.proxy_settings().await.mode, ProxyMode::Table);
}

#[tokio::test]
async fn test_editor_mode_open_rederives_rules_from_text() {
    let engine = Arc::new(MemoryEngine::new());
    let mut session = loaded_session(memory_storage(), engine.clone()).await;
    session.set_mode(ProxyMode::Editor).await;

    session
        .dispatch(ProxyAction::UpdateText {
            key: DEFAULT_GROUP_KEY.into(),
            text: r#"{
  "proxy": [
    ["^/one", "/1"],
    ["^/two", "/2"],
    // ["^/three", "/3"],
  ]
}"#
            .into(),
        })
        .await;

    assert_eq!(session.open_proxy().await.unwrap(), 2);
    let filters: Vec<String> = engine
        .snapshot()
        .iter()
        .map(|d| d.regex_filter().to_string())
        .collect();
    assert_eq!(filters, vec!["^/one", "^/two"]);
}

#[tokio::test]
async fn test_invalid_text_leaves_group_without_rules() {
    let engine = Arc::new(MemoryEngine::new());
    let mut session = loaded_session(memory_storage(), engine.clone()).await;
    session.open_proxy().await.unwrap();

    session
        .dispatch(ProxyAction::UpdateText {
            key: DEFAULT_GROUP_KEY.into(),
            text: "{ \"proxy\": [".into(),
        })
        .await;

    assert!(session.state().group(DEFAULT_GROUP_KEY).unwrap().rules().is_empty());
    assert!(engine.snapshot().is_empty());
    assert!(session.settings().enabled);
}

#[tokio::test]
async fn test_state_survives_restart_with_file_backend() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let storage = || StorageBridge::new(Arc::new(FileBackend::new(&path)), StorageKeys::default());

    {
        let engine = Arc::new(MemoryEngine::new());
        let mut session = loaded_session(storage(), engine).await;
        session.dispatch(ProxyAction::AddTab("qa".into())).await;
        session.dispatch(ProxyAction::ToggleGroupStatus("qa".into())).await;
        session.open_proxy().await.unwrap();
    }

    let engine = Arc::new(MemoryEngine::new());
    let session = loaded_session(storage(), engine.clone()).await;
    assert!(session.settings().enabled);
    assert_eq!(session.state().custom_tabs(), vec!["qa"]);
    assert_eq!(session.state().group("qa").unwrap().status(), GroupStatus::Active);
    // Loading with proxying on re-installs the rules
    assert_eq!(engine.snapshot().len(), 2);
}

#[tokio::test]
async fn test_from_config_development_environment() {
    let mut config = Config::from_toml_str(
        r#"
[storage]
environment = "development"

[rules]
seed_pattern = "^https://seed\\.example\\.com/(.*)"
seed_target = "http://localhost:9000/\\1"
"#,
    )
    .unwrap();
    config.rules.default_rules.clear();
    assert_eq!(config.storage.environment(), Environment::Development);

    let engine = Arc::new(MemoryEngine::from_config(&config.engine));
    let mut session = ProxySession::from_config(&config, engine);
    session.load().await;
    session.dispatch(ProxyAction::AddTab("seeded".into())).await;

    let rules = session.state().group("seeded").unwrap().rules();
    assert_eq!(rules[0].pattern, "^https://seed\\.example\\.com/(.*)");
    assert_eq!(rules[0].target, "http://localhost:9000/\\1");
    assert!(session.state().group(DEFAULT_GROUP_KEY).unwrap().rules().is_empty());
}
