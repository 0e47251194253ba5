//! Query-parameter inspection and saved parameter notes.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::{ProxyError, Result};
use crate::storage::StorageBridge;

/// One `key=value` pair of a query string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParam {
    pub key: String,
    pub value: String,
}

impl QueryParam {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A URL split into its base and decoded query parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLink {
    /// URL without query and fragment
    pub base_url: String,
    /// Parameters in order, duplicates kept
    pub params: Vec<QueryParam>,
    /// Fragment without the leading `#`
    pub fragment: Option<String>,
}

impl ParsedLink {
    /// Rebuild the URL from its parts.
    pub fn to_url(&self) -> Result<String> {
        let mut url = build_url(&self.base_url, &self.params)?;
        url.set_fragment(self.fragment.as_deref());
        Ok(url.into())
    }
}

/// Split `url` into base URL and percent-decoded parameters.
pub fn parse_link(url: &str) -> Result<ParsedLink> {
    let parsed = Url::parse(url.trim()).map_err(|e| ProxyError::InvalidUrl(format!("{}: {}", url, e)))?;
    let params = parsed
        .query_pairs()
        .map(|(key, value)| QueryParam::new(key, value))
        .collect();
    let fragment = parsed.fragment().map(str::to_string);

    let mut base = parsed;
    base.set_query(None);
    base.set_fragment(None);

    Ok(ParsedLink {
        base_url: base.into(),
        params,
        fragment,
    })
}

/// Join `base_url` with `params`, percent-encoding keys and values.
///
/// Any query already on `base_url` is replaced.
pub fn replace_link(base_url: &str, params: &[QueryParam]) -> Result<String> {
    Ok(build_url(base_url, params)?.into())
}

fn build_url(base_url: &str, params: &[QueryParam]) -> Result<Url> {
    let mut url = Url::parse(base_url.trim())
        .map_err(|e| ProxyError::InvalidUrl(format!("{}: {}", base_url, e)))?;
    url.set_query(None);
    if !params.is_empty() {
        url.query_pairs_mut()
            .extend_pairs(params.iter().map(|p| (p.key.as_str(), p.value.as_str())));
    }
    Ok(url)
}

/// Note attached to a parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryNote {
    pub key: String,
    pub value: String,
    pub note: String,
    /// Milliseconds since the Unix epoch of the last edit
    pub timestamp: u64,
}

/// Saved notes grouped by base URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryNotes {
    links: BTreeMap<String, Vec<QueryNote>>,
}

impl QueryNotes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notes saved for `base_url`
    pub fn notes_for(&self, base_url: &str) -> &[QueryNote] {
        self.links.get(base_url).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Base URLs that have notes
    pub fn base_urls(&self) -> impl Iterator<Item = &str> {
        self.links.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Set the note for `(key, value)` under `base_url`, replacing an
    /// existing one.
    pub fn add_note(
        &mut self,
        base_url: &str,
        key: &str,
        value: &str,
        note: impl Into<String>,
        timestamp: u64,
    ) {
        let note = note.into();
        let entries = self.links.entry(base_url.to_string()).or_default();
        match entries.iter_mut().find(|n| n.key == key && n.value == value) {
            Some(existing) => {
                existing.note = note;
                existing.timestamp = timestamp;
            }
            None => entries.push(QueryNote {
                key: key.to_string(),
                value: value.to_string(),
                note,
                timestamp,
            }),
        }
    }

    /// Remove the note for `(key, value)`. A base URL left without notes is
    /// dropped. Returns whether a note was removed.
    pub fn delete_note(&mut self, base_url: &str, key: &str, value: &str) -> bool {
        let Some(entries) = self.links.get_mut(base_url) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|n| !(n.key == key && n.value == value));
        let removed = entries.len() != before;
        if entries.is_empty() {
            self.links.remove(base_url);
        }
        removed
    }
}

/// Store a note for a parameter and persist it.
pub async fn save_note(
    storage: &StorageBridge,
    base_url: &str,
    param: &QueryParam,
    note: &str,
) -> Result<()> {
    let mut notes = storage.query_notes().await;
    notes.add_note(base_url, &param.key, &param.value, note, now_millis());
    storage.set_query_notes(&notes).await?;
    debug!(base_url, key = %param.key, "saved query note");
    Ok(())
}

/// Remove a parameter note and persist the change.
pub async fn remove_note(storage: &StorageBridge, base_url: &str, param: &QueryParam) -> Result<bool> {
    let mut notes = storage.query_notes().await;
    if !notes.delete_note(base_url, &param.key, &param.value) {
        return Ok(false);
    }
    storage.set_query_notes(&notes).await?;
    Ok(true)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
