use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Key of the group that always exists and cannot be deleted.
pub const DEFAULT_GROUP_KEY: &str = "default";

/// A single redirect rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRule {
    /// Identifier, unique within the owning group
    pub id: u64,
    /// Regular expression matched against request URLs
    pub pattern: String,
    /// Replacement template (may contain back-references)
    pub target: String,
    /// Whether the rule takes part in reconciliation
    pub enabled: bool,
}

impl ProxyRule {
    /// Create an enabled rule
    pub fn new(id: u64, pattern: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id,
            pattern: pattern.into(),
            target: target.into(),
            enabled: true,
        }
    }

    /// Set the enabled flag
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// The `(pattern, target)` pair with surrounding whitespace removed.
    ///
    /// Duplicate detection compares on this pair, never on `id`.
    pub fn route(&self) -> (&str, &str) {
        (self.pattern.trim(), self.target.trim())
    }
}

/// Group-level status controlling reconciliation eligibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupStatus {
    Active,
    #[default]
    Inactive,
}

impl GroupStatus {
    /// Check if the group is active
    pub fn is_active(&self) -> bool {
        matches!(self, GroupStatus::Active)
    }

    /// The opposite status
    pub fn toggled(&self) -> Self {
        match self {
            GroupStatus::Active => GroupStatus::Inactive,
            GroupStatus::Inactive => GroupStatus::Active,
        }
    }
}

/// A named rule group (one tab in the UI).
///
/// `groupEnabled` is derived from the status, so the two can never disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredRuleGroup", into = "StoredRuleGroup")]
pub struct RuleGroup {
    key: String,
    status: GroupStatus,
    rules: Vec<ProxyRule>,
    raw_text: Option<String>,
}

impl RuleGroup {
    /// Create a new group without raw text
    pub fn new(key: impl Into<String>, status: GroupStatus, rules: Vec<ProxyRule>) -> Self {
        Self {
            key: key.into(),
            status,
            rules,
            raw_text: None,
        }
    }

    /// Attach the JSONC source text
    pub fn with_raw_text(mut self, text: impl Into<String>) -> Self {
        self.raw_text = Some(text.into());
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn status(&self) -> GroupStatus {
        self.status
    }

    /// Mirrors `status == Active`
    pub fn group_enabled(&self) -> bool {
        self.status.is_active()
    }

    pub fn rules(&self) -> &[ProxyRule] {
        &self.rules
    }

    pub fn raw_text(&self) -> Option<&str> {
        self.raw_text.as_deref()
    }

    /// Highest rule id in the group, if any
    pub fn max_rule_id(&self) -> Option<u64> {
        self.rules.iter().map(|r| r.id).max()
    }

    /// Check whether a rule with the same trimmed `(pattern, target)` exists
    pub fn contains_route(&self, pattern: &str, target: &str) -> bool {
        let wanted = (pattern.trim(), target.trim());
        self.rules.iter().any(|r| r.route() == wanted)
    }

    pub(crate) fn set_key(&mut self, key: String) {
        self.key = key;
    }

    pub(crate) fn toggle_status(&mut self) {
        self.status = self.status.toggled();
    }

    pub(crate) fn set_rules(&mut self, rules: Vec<ProxyRule>) {
        self.rules = rules;
    }

    pub(crate) fn rules_mut(&mut self) -> &mut Vec<ProxyRule> {
        &mut self.rules
    }

    pub(crate) fn set_raw_text(&mut self, text: Option<String>) {
        self.raw_text = text;
    }
}

/// Persisted group shape.
///
/// `groupStatus` wins over `groupEnabled`; legacy records without a status
/// derive it from `groupEnabled`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredRuleGroup {
    #[serde(default)]
    key: String,
    #[serde(default)]
    group: Option<String>,
    #[serde(default)]
    group_enabled: bool,
    #[serde(default)]
    group_status: Option<GroupStatus>,
    #[serde(default)]
    rule: Vec<ProxyRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    jsonc: Option<String>,
}

impl From<StoredRuleGroup> for RuleGroup {
    fn from(stored: StoredRuleGroup) -> Self {
        let status = stored.group_status.unwrap_or(if stored.group_enabled {
            GroupStatus::Active
        } else {
            GroupStatus::Inactive
        });
        let key = if stored.key.is_empty() {
            stored.group.unwrap_or_default()
        } else {
            stored.key
        };
        Self {
            key,
            status,
            rules: stored.rule,
            raw_text: stored.jsonc,
        }
    }
}

impl From<RuleGroup> for StoredRuleGroup {
    fn from(group: RuleGroup) -> Self {
        Self {
            group: Some(group.key.clone()),
            key: group.key,
            group_enabled: group.status.is_active(),
            group_status: Some(group.status),
            rule: group.rules,
            jsonc: group.raw_text,
        }
    }
}

/// Ordered mapping from group key to group.
///
/// Insertion order is display order. The whole collection is the unit of
/// persistence and serializes as a JSON object keyed by group key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyCollection {
    groups: Vec<RuleGroup>,
}

impl ProxyCollection {
    /// Create an empty collection
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    pub fn get(&self, key: &str) -> Option<&RuleGroup> {
        self.groups.iter().find(|g| g.key == key)
    }

    pub(crate) fn get_mut(&mut self, key: &str) -> Option<&mut RuleGroup> {
        self.groups.iter_mut().find(|g| g.key == key)
    }

    /// Insert a group, replacing an existing one with the same key in place
    pub fn insert(&mut self, group: RuleGroup) {
        match self.position(group.key()) {
            Some(idx) => self.groups[idx] = group,
            None => self.groups.push(group),
        }
    }

    /// Remove a group by key
    pub fn remove(&mut self, key: &str) -> Option<RuleGroup> {
        self.position(key).map(|idx| self.groups.remove(idx))
    }

    /// Group keys in display order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|g| g.key())
    }

    /// Keys of every group except the default one
    pub fn custom_keys(&self) -> impl Iterator<Item = &str> {
        self.keys().filter(|k| *k != DEFAULT_GROUP_KEY)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RuleGroup> {
        self.groups.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut RuleGroup> {
        self.groups.iter_mut()
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.groups.iter().position(|g| g.key == key)
    }
}

impl FromIterator<RuleGroup> for ProxyCollection {
    fn from_iter<I: IntoIterator<Item = RuleGroup>>(iter: I) -> Self {
        let mut collection = ProxyCollection::new();
        for group in iter {
            collection.insert(group);
        }
        collection
    }
}

impl Serialize for ProxyCollection {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.groups.len()))?;
        for group in &self.groups {
            map.serialize_entry(group.key(), group)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ProxyCollection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct CollectionVisitor;

        impl<'de> Visitor<'de> for CollectionVisitor {
            type Value = ProxyCollection;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of group key to rule group")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut collection = ProxyCollection::new();
                while let Some((key, mut group)) = access.next_entry::<String, RuleGroup>()? {
                    // The map key is authoritative
                    group.set_key(key);
                    collection.insert(group);
                }
                Ok(collection)
            }
        }

        deserializer.deserialize_map(CollectionVisitor)
    }
}

/// Which representation the user edits rules in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    #[default]
    Table,
    Editor,
}

/// Global proxy switch plus the current editing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "StoredSettings")]
pub struct ProxySettings {
    /// Global proxying flag, separate from per-group status
    pub enabled: bool,
    pub mode: ProxyMode,
}

/// Older records stored only the bare enabled flag.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredSettings {
    Flag(bool),
    Full {
        #[serde(default)]
        enabled: bool,
        #[serde(default)]
        mode: ProxyMode,
    },
}

impl From<StoredSettings> for ProxySettings {
    fn from(stored: StoredSettings) -> Self {
        match stored {
            StoredSettings::Flag(enabled) => Self {
                enabled,
                mode: ProxyMode::default(),
            },
            StoredSettings::Full { enabled, mode } => Self { enabled, mode },
        }
    }
}
