//! Tab state and its transitions.
//!
//! `ProxyState` is a value: every action consumes the old state and returns
//! the next one. Persistence and engine updates happen in
//! [`crate::session::ProxySession`] after a transition.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::jsonc;
use crate::types::{GroupStatus, ProxyCollection, ProxyRule, RuleGroup, DEFAULT_GROUP_KEY};

/// Pattern of the rule seeded into a freshly added tab
pub const SEED_PATTERN: &str = r"^https://example\.com/new/(.*)";

/// Target of the rule seeded into a freshly added tab
pub const SEED_TARGET: &str = r"http://localhost:8080/\1";

/// Options that shape new groups.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Rules of the default group seeded into an empty store
    pub default_rules: Vec<ProxyRule>,
    /// Pattern of the single rule a new tab starts with
    pub seed_pattern: String,
    /// Target of the single rule a new tab starts with
    pub seed_target: String,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            default_rules: vec![
                ProxyRule::new(
                    1,
                    r"^https://api\.example\.com/users/(.*)",
                    r"https://test-api.example.com/users/\1",
                ),
                ProxyRule::new(
                    2,
                    r"^https://api\.example\.com/orders/(.*)",
                    r"https://test-api.example.com/orders/\1",
                )
                .with_enabled(false),
            ],
            seed_pattern: SEED_PATTERN.to_string(),
            seed_target: SEED_TARGET.to_string(),
        }
    }
}

impl StoreOptions {
    /// Create default store options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the rules of the seeded default group.
    pub fn with_default_rules(mut self, rules: Vec<ProxyRule>) -> Self {
        self.default_rules = rules;
        self
    }

    /// Set the rule a new tab starts with.
    pub fn with_seed_rule(mut self, pattern: impl Into<String>, target: impl Into<String>) -> Self {
        self.seed_pattern = pattern.into();
        self.seed_target = target.into();
        self
    }
}

/// Hands out rule ids that do not collide within a group.
#[derive(Debug, Clone)]
pub struct RuleIdGenerator {
    next: u64,
}

impl RuleIdGenerator {
    /// Start at an explicit id.
    pub fn starting_at(next: u64) -> Self {
        Self { next }
    }

    /// Start at the current wall clock in milliseconds.
    pub fn from_clock() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(1);
        Self::starting_at(millis)
    }

    /// Next id greater than every id already in `group`.
    pub fn next_for(&mut self, group: &RuleGroup) -> u64 {
        let floor = group.max_rule_id().map_or(0, |max| max.saturating_add(1));
        let id = self.next.max(floor);
        self.next = id.saturating_add(1);
        id
    }
}

/// A transition request for [`ProxyState::reduce`].
#[derive(Debug, Clone)]
pub enum ProxyAction {
    /// Adopt a loaded collection, or seed the default group when absent
    Initialize(Option<ProxyCollection>),
    /// Switch the displayed tab
    SelectTab(String),
    /// Create a tab (or select it if it already exists)
    AddTab(String),
    /// Remove a custom tab
    DeleteTab(String),
    /// Flip a group between ACTIVE and INACTIVE
    ToggleGroupStatus(String),
    /// Replace a group's rule list
    UpdateRules { key: String, rules: Vec<ProxyRule> },
    /// Replace a group's raw JSONC text and re-derive its rules
    UpdateText { key: String, text: String },
    /// Enable or disable one rule, keeping the raw text in step
    SetRuleEnabled {
        key: String,
        rule_id: u64,
        enabled: bool,
    },
    /// Append rules whose (pattern, target) is not present yet
    MergeRules { key: String, rules: Vec<ProxyRule> },
}

impl ProxyAction {
    /// Whether the transition changes the collection and needs persisting.
    pub fn mutates_collection(&self) -> bool {
        !matches!(
            self,
            ProxyAction::Initialize(_) | ProxyAction::SelectTab(_)
        )
    }
}

/// Rule groups plus the currently displayed tab.
#[derive(Debug, Clone)]
pub struct ProxyState {
    current_tab: String,
    collection: ProxyCollection,
    ids: RuleIdGenerator,
    options: Arc<StoreOptions>,
}

impl Default for ProxyState {
    fn default() -> Self {
        Self::new(StoreOptions::default())
    }
}

impl ProxyState {
    /// Create a state holding only the seeded default group.
    pub fn new(options: StoreOptions) -> Self {
        Self::with_id_generator(options, RuleIdGenerator::from_clock())
    }

    /// Create a seeded state with an explicit id source.
    pub fn with_id_generator(options: StoreOptions, ids: RuleIdGenerator) -> Self {
        let state = Self {
            current_tab: DEFAULT_GROUP_KEY.to_string(),
            collection: ProxyCollection::new(),
            ids,
            options: Arc::new(options),
        };
        state.initialize(None)
    }

    /// Key of the displayed tab
    pub fn current_tab(&self) -> &str {
        &self.current_tab
    }

    /// All rule groups
    pub fn collection(&self) -> &ProxyCollection {
        &self.collection
    }

    /// Group by key
    pub fn group(&self, key: &str) -> Option<&RuleGroup> {
        self.collection.get(key)
    }

    /// Group of the displayed tab, if it exists
    pub fn current_group(&self) -> Option<&RuleGroup> {
        self.collection.get(&self.current_tab)
    }

    /// Keys of every group except `default`, in insertion order
    pub fn custom_tabs(&self) -> Vec<&str> {
        self.collection.custom_keys().collect()
    }

    /// Apply an action.
    pub fn reduce(self, action: ProxyAction) -> Self {
        debug!(?action, "reducing proxy state");
        match action {
            ProxyAction::Initialize(loaded) => self.initialize(loaded),
            ProxyAction::SelectTab(key) => self.select_tab(&key),
            ProxyAction::AddTab(key) => self.add_tab(&key),
            ProxyAction::DeleteTab(key) => self.delete_tab(&key),
            ProxyAction::ToggleGroupStatus(key) => self.toggle_group_status(&key),
            ProxyAction::UpdateRules { key, rules } => self.update_rules(&key, rules),
            ProxyAction::UpdateText { key, text } => self.update_text(&key, text),
            ProxyAction::SetRuleEnabled {
                key,
                rule_id,
                enabled,
            } => self.set_rule_enabled(&key, rule_id, enabled),
            ProxyAction::MergeRules { key, rules } => self.merge_rules(&key, rules),
        }
    }

    /// Adopt `loaded` verbatim, or seed an ACTIVE default group when it is
    /// missing or empty.
    pub fn initialize(mut self, loaded: Option<ProxyCollection>) -> Self {
        match loaded.filter(|c| !c.is_empty()) {
            Some(collection) => {
                self.collection = collection;
                if !self.collection.contains(&self.current_tab) {
                    self.current_tab = self.fallback_tab();
                }
            }
            None => {
                let rules = self.options.default_rules.clone();
                let text = jsonc::rules_to_text(&rules);
                let group = RuleGroup::new(DEFAULT_GROUP_KEY, GroupStatus::Active, rules)
                    .with_raw_text(text);
                self.collection = std::iter::once(group).collect();
                self.current_tab = DEFAULT_GROUP_KEY.to_string();
            }
        }
        self
    }

    /// Display `key`. Unknown keys other than `default` are ignored.
    pub fn select_tab(mut self, key: &str) -> Self {
        if key != DEFAULT_GROUP_KEY && !self.collection.contains(key) {
            warn!(key, "cannot select unknown tab");
            return self;
        }
        self.current_tab = key.to_string();
        self
    }

    /// Create an INACTIVE tab holding the seed rule and display it.
    pub fn add_tab(mut self, key: &str) -> Self {
        let key = key.trim();
        if key.is_empty() {
            warn!("cannot add a tab with an empty key");
            return self;
        }
        if self.collection.contains(key) {
            return self.select_tab(key);
        }

        let mut group = RuleGroup::new(key, GroupStatus::Inactive, Vec::new());
        let id = self.ids.next_for(&group);
        let seed = ProxyRule::new(
            id,
            self.options.seed_pattern.as_str(),
            self.options.seed_target.as_str(),
        );
        group.set_raw_text(Some(jsonc::rules_to_text(std::slice::from_ref(&seed))));
        group.set_rules(vec![seed]);

        self.collection.insert(group);
        self.current_tab = key.to_string();
        self
    }

    /// Remove a custom tab. `default` and unknown keys are ignored.
    pub fn delete_tab(mut self, key: &str) -> Self {
        if key == DEFAULT_GROUP_KEY {
            warn!("the default tab cannot be deleted");
            return self;
        }
        if self.collection.remove(key).is_none() {
            return self;
        }
        if self.current_tab == key {
            self.current_tab = self.fallback_tab();
        }
        self
    }

    /// Flip a group between ACTIVE and INACTIVE.
    pub fn toggle_group_status(mut self, key: &str) -> Self {
        match self.collection.get_mut(key) {
            Some(group) => group.toggle_status(),
            None => warn!(key, "cannot toggle unknown group"),
        }
        self
    }

    /// Replace a group's rules, regenerating its raw text when it has one.
    pub fn update_rules(mut self, key: &str, rules: Vec<ProxyRule>) -> Self {
        let Some(group) = self.collection.get_mut(key) else {
            warn!(key, "cannot update rules of unknown group");
            return self;
        };
        if group.raw_text().is_some() {
            group.set_raw_text(Some(jsonc::rules_to_text(&rules)));
        }
        group.set_rules(rules);
        self
    }

    /// Store new raw text for a group and re-derive its rules from it.
    ///
    /// Text that does not parse leaves the group with no rules.
    pub fn update_text(mut self, key: &str, text: String) -> Self {
        let Some(group) = self.collection.get_mut(key) else {
            warn!(key, "cannot update text of unknown group");
            return self;
        };
        let rules = jsonc::text_to_rules(&text).unwrap_or_else(|e| {
            warn!(key, error = %e, "rule text does not parse, clearing rules");
            Vec::new()
        });
        group.set_rules(rules);
        group.set_raw_text(Some(text));
        self
    }

    /// Enable or disable one rule.
    ///
    /// When the group carries raw text, the matching entry in the text is
    /// commented or uncommented as well.
    pub fn set_rule_enabled(mut self, key: &str, rule_id: u64, enabled: bool) -> Self {
        let Some(group) = self.collection.get_mut(key) else {
            warn!(key, "cannot toggle rule of unknown group");
            return self;
        };
        if !group.rules().iter().any(|r| r.id == rule_id) {
            warn!(key, rule_id, "no such rule");
            return self;
        }

        if let Some(text) = group.raw_text() {
            let updated = match text_slot(text, group.rules(), rule_id) {
                Some(slot) => jsonc::set_rule_enabled(text, slot, enabled),
                None => {
                    warn!(key, rule_id, "rule has no entry in the raw text");
                    text.to_string()
                }
            };
            group.set_raw_text(Some(updated));
        }
        if let Some(rule) = group.rules_mut().iter_mut().find(|r| r.id == rule_id) {
            rule.enabled = enabled;
        }
        self
    }

    /// Append incoming rules whose (pattern, target) is not in the group yet.
    ///
    /// Appended rules get fresh ids. Pairs repeated within `incoming` are
    /// added once.
    pub fn merge_rules(mut self, key: &str, incoming: Vec<ProxyRule>) -> Self {
        let Some(group) = self.collection.get_mut(key) else {
            warn!(key, "cannot merge rules into unknown group");
            return self;
        };

        let mut added: Vec<ProxyRule> = Vec::new();
        for rule in incoming {
            let pattern = rule.pattern.trim();
            let target = rule.target.trim();
            if group.contains_route(pattern, target)
                || added.iter().any(|r| r.route() == (pattern, target))
            {
                continue;
            }
            let id = self.ids.next_for(group);
            added.push(ProxyRule::new(id, pattern, target).with_enabled(rule.enabled));
        }
        debug!(key, added = added.len(), "merged rules");
        if added.is_empty() {
            return self;
        }

        // Text written by hand keeps its comments; the merged entries are
        // appended and the rules re-read from it
        let appended = group
            .raw_text()
            .filter(|text| matches_text(group.rules(), text))
            .and_then(|text| jsonc::append_rules(text, &added))
            .and_then(|text| jsonc::text_to_rules(&text).ok().map(|rules| (text, rules)));
        match appended {
            Some((text, rules)) => {
                group.set_rules(rules);
                group.set_raw_text(Some(text));
            }
            None => {
                group.rules_mut().extend(added);
                if group.raw_text().is_some() {
                    let text = jsonc::rules_to_text(group.rules());
                    group.set_raw_text(Some(text));
                }
            }
        }
        self
    }

    /// Re-derive every group's rules from its raw text.
    ///
    /// Groups whose text does not parse keep their current rules.
    pub fn resync_from_text(mut self) -> Self {
        for group in self.collection.iter_mut() {
            let Some(text) = group.raw_text() else {
                continue;
            };
            match jsonc::text_to_rules(text) {
                Ok(rules) => group.set_rules(rules),
                Err(e) => warn!(key = group.key(), error = %e, "keeping rules, text does not parse"),
            }
        }
        self
    }

    fn fallback_tab(&self) -> String {
        self.collection
            .custom_keys()
            .next()
            .unwrap_or(DEFAULT_GROUP_KEY)
            .to_string()
    }
}

/// Whether `rules` are exactly what decoding `text` yields, ids included.
fn matches_text(rules: &[ProxyRule], text: &str) -> bool {
    jsonc::text_to_rules(text).is_ok_and(|decoded| same_entries(rules, &decoded))
}

fn same_entries(rules: &[ProxyRule], decoded: &[ProxyRule]) -> bool {
    rules.len() == decoded.len()
        && rules
            .iter()
            .all(|r| decoded.iter().any(|d| d.id == r.id && d.route() == r.route()))
}

/// Text position of the rule `rule_id`.
///
/// Rules decoded from the text carry their position as id. Otherwise the
/// rules were rendered in list order, and the rule is matched by the
/// occurrence of its (pattern, target) among the entries in text order.
fn text_slot(text: &str, rules: &[ProxyRule], rule_id: u64) -> Option<u64> {
    let mut decoded = jsonc::text_to_rules(text).ok()?;
    if same_entries(rules, &decoded) {
        return Some(rule_id);
    }

    let position = rules.iter().position(|r| r.id == rule_id)?;
    let route = rules[position].route();
    let occurrence = rules[..position]
        .iter()
        .filter(|r| r.route() == route)
        .count();

    decoded.sort_by_key(|r| r.id);
    decoded
        .iter()
        .filter(|r| r.route() == route)
        .nth(occurrence)
        .map(|r| r.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ProxyState {
        ProxyState::with_id_generator(StoreOptions::default(), RuleIdGenerator::starting_at(100))
    }

    fn group_with_text(key: &str, rules: Vec<ProxyRule>) -> RuleGroup {
        let text = jsonc::rules_to_text(&rules);
        RuleGroup::new(key, GroupStatus::Active, rules).with_raw_text(text)
    }

    #[test]
    fn test_seeded_state() {
        let state = state();
        assert_eq!(state.current_tab(), DEFAULT_GROUP_KEY);
        let group = state.group(DEFAULT_GROUP_KEY).unwrap();
        assert_eq!(group.status(), GroupStatus::Active);
        assert_eq!(group.rules().len(), 2);
        assert!(group.raw_text().is_some());
    }

    #[test]
    fn test_initialize_adopts_loaded_collection() {
        let loaded: ProxyCollection = vec![
            RuleGroup::new(DEFAULT_GROUP_KEY, GroupStatus::Inactive, vec![]),
            RuleGroup::new("staging", GroupStatus::Active, vec![ProxyRule::new(1, "a", "b")]),
        ]
        .into_iter()
        .collect();

        let state = state().reduce(ProxyAction::Initialize(Some(loaded.clone())));
        assert_eq!(state.collection(), &loaded);
        assert_eq!(state.current_tab(), DEFAULT_GROUP_KEY);
    }

    #[test]
    fn test_initialize_with_empty_collection_seeds_default() {
        let state = state().reduce(ProxyAction::Initialize(Some(ProxyCollection::new())));
        assert_eq!(state.collection().len(), 1);
        assert!(state.group(DEFAULT_GROUP_KEY).unwrap().group_enabled());
    }

    #[test]
    fn test_initialize_falls_back_to_first_custom_tab() {
        let state = state().add_tab("gone");
        assert_eq!(state.current_tab(), "gone");

        let loaded: ProxyCollection = vec![
            RuleGroup::new(DEFAULT_GROUP_KEY, GroupStatus::Active, vec![]),
            RuleGroup::new("qa", GroupStatus::Active, vec![]),
        ]
        .into_iter()
        .collect();
        let state = state.initialize(Some(loaded));
        assert_eq!(state.current_tab(), "qa");
    }

    #[test]
    fn test_add_tab_seeds_inactive_group() {
        let state = state().reduce(ProxyAction::AddTab("dev".into()));
        assert_eq!(state.current_tab(), "dev");
        let group = state.group("dev").unwrap();
        assert_eq!(group.status(), GroupStatus::Inactive);
        assert_eq!(group.rules().len(), 1);
        assert_eq!(group.rules()[0].pattern, SEED_PATTERN);
        assert_eq!(group.rules()[0].target, SEED_TARGET);
        assert_eq!(group.rules()[0].id, 100);
        assert_eq!(state.custom_tabs(), vec!["dev"]);
    }

    #[test]
    fn test_add_existing_tab_only_selects() {
        let state = state()
            .add_tab("dev")
            .update_rules("dev", vec![])
            .select_tab(DEFAULT_GROUP_KEY)
            .add_tab("dev");
        assert_eq!(state.current_tab(), "dev");
        assert!(state.group("dev").unwrap().rules().is_empty());
    }

    #[test]
    fn test_add_tab_rejects_blank_key() {
        let state = state().add_tab("   ");
        assert_eq!(state.collection().len(), 1);
    }

    #[test]
    fn test_select_unknown_tab_is_ignored() {
        let state = state().add_tab("dev").select_tab("missing");
        assert_eq!(state.current_tab(), "dev");
        let state = state.select_tab(DEFAULT_GROUP_KEY);
        assert_eq!(state.current_tab(), DEFAULT_GROUP_KEY);
    }

    #[test]
    fn test_delete_tab() {
        let state = state().add_tab("a").add_tab("b");
        assert_eq!(state.current_tab(), "b");

        let state = state.reduce(ProxyAction::DeleteTab("b".into()));
        assert!(state.group("b").is_none());
        assert_eq!(state.current_tab(), "a");

        let state = state.delete_tab("a");
        assert_eq!(state.current_tab(), DEFAULT_GROUP_KEY);
    }

    #[test]
    fn test_delete_unselected_tab_keeps_selection() {
        let state = state().add_tab("a").add_tab("b").delete_tab("a");
        assert_eq!(state.current_tab(), "b");
    }

    #[test]
    fn test_default_tab_cannot_be_deleted() {
        let state = state().delete_tab(DEFAULT_GROUP_KEY).delete_tab("nope");
        assert!(state.group(DEFAULT_GROUP_KEY).is_some());
        assert_eq!(state.collection().len(), 1);
    }

    #[test]
    fn test_toggle_group_status() {
        let state = state().add_tab("dev").toggle_group_status("dev");
        assert_eq!(state.group("dev").unwrap().status(), GroupStatus::Active);
        let state = state.reduce(ProxyAction::ToggleGroupStatus("dev".into()));
        assert_eq!(state.group("dev").unwrap().status(), GroupStatus::Inactive);
    }

    #[test]
    fn test_update_rules_regenerates_text() {
        let rules = vec![ProxyRule::new(1, "^/x", "/y").with_enabled(false)];
        let state = state().update_rules(DEFAULT_GROUP_KEY, rules.clone());
        let group = state.group(DEFAULT_GROUP_KEY).unwrap();
        assert_eq!(group.rules(), rules.as_slice());
        assert_eq!(group.raw_text(), Some(jsonc::rules_to_text(&rules).as_str()));
    }

    #[test]
    fn test_update_rules_without_text_stays_textless() {
        let loaded: ProxyCollection =
            std::iter::once(RuleGroup::new(DEFAULT_GROUP_KEY, GroupStatus::Active, vec![]))
                .collect();
        let state = state()
            .initialize(Some(loaded))
            .update_rules(DEFAULT_GROUP_KEY, vec![ProxyRule::new(1, "a", "b")]);
        assert!(state.group(DEFAULT_GROUP_KEY).unwrap().raw_text().is_none());
    }

    #[test]
    fn test_update_text() {
        let text = r#"{"proxy": [["^/a", "/b"]]}"#.to_string();
        let state = state().reduce(ProxyAction::UpdateText {
            key: DEFAULT_GROUP_KEY.into(),
            text: text.clone(),
        });
        let group = state.group(DEFAULT_GROUP_KEY).unwrap();
        assert_eq!(group.raw_text(), Some(text.as_str()));
        assert_eq!(group.rules().len(), 1);
        assert_eq!(group.rules()[0].route(), ("^/a", "/b"));
    }

    #[test]
    fn test_update_text_with_invalid_json_clears_rules() {
        let state = state().update_text(DEFAULT_GROUP_KEY, "{ not json".to_string());
        let group = state.group(DEFAULT_GROUP_KEY).unwrap();
        assert!(group.rules().is_empty());
        assert_eq!(group.raw_text(), Some("{ not json"));
    }

    #[test]
    fn test_set_rule_enabled_updates_model_and_text() {
        let rules = vec![
            ProxyRule::new(7, "^/a", "/b"),
            ProxyRule::new(9, "^/c", "/d"),
        ];
        let loaded: ProxyCollection =
            std::iter::once(group_with_text(DEFAULT_GROUP_KEY, rules)).collect();

        let state = state().initialize(Some(loaded)).reduce(ProxyAction::SetRuleEnabled {
            key: DEFAULT_GROUP_KEY.into(),
            rule_id: 9,
            enabled: false,
        });

        let group = state.group(DEFAULT_GROUP_KEY).unwrap();
        assert!(group.rules()[0].enabled);
        assert!(!group.rules()[1].enabled);
        let text = group.raw_text().unwrap();
        assert!(text.contains(r#"    // ["^/c", "/d"],"#));
        assert!(text.contains(r#"    ["^/a", "/b"],"#));

        let state = state.set_rule_enabled(DEFAULT_GROUP_KEY, 9, true);
        let group = state.group(DEFAULT_GROUP_KEY).unwrap();
        assert!(group.rules()[1].enabled);
        assert!(group.raw_text().unwrap().contains(r#"    ["^/c", "/d"],"#));
    }

    #[test]
    fn test_set_rule_enabled_duplicate_routes_map_by_occurrence() {
        let rules = vec![ProxyRule::new(1, "^/a", "/b"), ProxyRule::new(2, "^/a", "/b")];
        let loaded: ProxyCollection =
            std::iter::once(group_with_text(DEFAULT_GROUP_KEY, rules)).collect();
        let state = state()
            .initialize(Some(loaded))
            .set_rule_enabled(DEFAULT_GROUP_KEY, 2, false);

        let text = state.group(DEFAULT_GROUP_KEY).unwrap().raw_text().unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[2], r#"    ["^/a", "/b"],"#);
        assert_eq!(lines[3], r#"    // ["^/a", "/b"],"#);
    }

    #[test]
    fn test_set_rule_enabled_duplicate_routes_from_text() {
        let text = "{\n  \"proxy\": [\n    // [\"^/a\", \"/b\"],\n    [\"^/a\", \"/b\"],\n  ]\n}";
        let state = state().update_text(DEFAULT_GROUP_KEY, text.to_string());
        let disabled = state
            .group(DEFAULT_GROUP_KEY)
            .unwrap()
            .rules()
            .iter()
            .find(|r| !r.enabled)
            .unwrap()
            .id;

        let state = state.set_rule_enabled(DEFAULT_GROUP_KEY, disabled, true);
        let group = state.group(DEFAULT_GROUP_KEY).unwrap();
        let text = group.raw_text().unwrap();
        assert!(!text.contains("//"));
        assert!(group.rules().iter().all(|r| r.enabled));
        assert!(jsonc::text_to_rules(text).unwrap().iter().all(|r| r.enabled));
        assert!(matches_text(group.rules(), text));
    }

    #[test]
    fn test_set_rule_enabled_unknown_rule_is_noop() {
        let before = state();
        let after = before.clone().set_rule_enabled(DEFAULT_GROUP_KEY, 12345, false);
        assert_eq!(before.collection(), after.collection());
    }

    #[test]
    fn test_merge_rules_skips_existing_pairs() {
        let state = state().add_tab("dev");
        let incoming = vec![
            ProxyRule::new(0, SEED_PATTERN, SEED_TARGET),
            ProxyRule::new(0, " ^/new ", " /n "),
            ProxyRule::new(0, "^/new", "/n"),
        ];
        let state = state.reduce(ProxyAction::MergeRules {
            key: "dev".into(),
            rules: incoming,
        });

        let group = state.group("dev").unwrap();
        assert_eq!(group.rules().len(), 2);
        let added = &group.rules()[1];
        assert_eq!(added.route(), ("^/new", "/n"));
        assert!(added.id > group.rules()[0].id);
        assert!(jsonc::text_to_rules(group.raw_text().unwrap())
            .unwrap()
            .iter()
            .any(|r| r.route() == ("^/new", "/n")));
    }

    #[test]
    fn test_merge_into_edited_text_keeps_comments() {
        let text = "{\n  // staging overrides\n  \"proxy\": [\n    [\"^/a\", \"/b\"],\n  ]\n}";
        let state = state().update_text(DEFAULT_GROUP_KEY, text.to_string()).merge_rules(
            DEFAULT_GROUP_KEY,
            vec![ProxyRule::new(0, "^/c", "/d"), ProxyRule::new(0, "^/a", "/b")],
        );

        let group = state.group(DEFAULT_GROUP_KEY).unwrap();
        let merged = group.raw_text().unwrap();
        assert_eq!(
            merged,
            "{\n  // staging overrides\n  \"proxy\": [\n    [\"^/a\", \"/b\"],\n    [\"^/c\", \"/d\"],\n  ]\n}"
        );
        assert_eq!(group.rules().len(), 2);
        assert!(matches_text(group.rules(), merged));
    }

    #[test]
    fn test_merge_ids_stay_unique() {
        let state = state().add_tab("dev");
        let incoming = (0..5)
            .map(|i| ProxyRule::new(0, format!("^/{}", i), "/x"))
            .collect();
        let state = state.merge_rules("dev", incoming);
        let mut ids: Vec<u64> = state.group("dev").unwrap().rules().iter().map(|r| r.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 6);
    }

    #[test]
    fn test_id_generator_skips_past_existing_ids() {
        let group = RuleGroup::new("g", GroupStatus::Active, vec![ProxyRule::new(500, "a", "b")]);
        let mut ids = RuleIdGenerator::starting_at(10);
        assert_eq!(ids.next_for(&group), 501);
        assert_eq!(ids.next_for(&group), 502);
    }

    #[test]
    fn test_resync_from_text() {
        let text = r#"{"proxy": [["^/only", "/one"]]}"#;
        let group = RuleGroup::new(DEFAULT_GROUP_KEY, GroupStatus::Active, vec![])
            .with_raw_text(text);
        let loaded: ProxyCollection = std::iter::once(group).collect();
        let state = state().initialize(Some(loaded)).resync_from_text();
        let rules = state.group(DEFAULT_GROUP_KEY).unwrap().rules();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].route(), ("^/only", "/one"));
    }

    #[test]
    fn test_mutating_actions() {
        assert!(!ProxyAction::SelectTab("a".into()).mutates_collection());
        assert!(!ProxyAction::Initialize(None).mutates_collection());
        assert!(ProxyAction::AddTab("a".into()).mutates_collection());
        assert!(ProxyAction::ToggleGroupStatus("a".into()).mutates_collection());
    }
}
