// ===============================
// src/dictionary.rs (canonical name -> item id)
// ===============================
use ahash::AHashMap as HashMap;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::ItemId;
use crate::matching::normalize;

#[derive(Debug, Error)]
pub enum DictionaryError {
    #[error("cannot read dictionary {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("dictionary is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("dictionary entry {0:?} has an empty name or id")]
    InvalidEntry(String),
    #[error("dictionary has no entries")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DictEntry {
    /// Canonical display name, as loaded.
    pub name: String,
    /// Normalized key used for scoring.
    pub key: String,
    pub id: ItemId,
}

/// Accepts `{"Xanax": 206}` or `[{"name": "Xanax", "id": "206"}]`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawDictionary {
    Map(std::collections::BTreeMap<String, RawId>),
    Rows(Vec<RawRow>),
}

#[derive(Deserialize)]
struct RawRow {
    #[serde(alias = "key")]
    name: String,
    id: RawId,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Num(u64),
    Text(String),
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            RawId::Num(n) => n.to_string(),
            RawId::Text(s) => s.trim().to_string(),
        }
    }
}

/// Read-only after construction; shared between requests behind an Arc.
/// Distinct names may share a normalized key ("Blood Bag : A+" / "Blood Bag : A-");
/// all of them are kept and the matcher breaks the tie.
#[derive(Debug, Clone)]
pub struct Dictionary {
    entries: Vec<DictEntry>,
    by_key: HashMap<String, Vec<usize>>,
}

impl Dictionary {
    pub fn from_pairs<I, N, D>(pairs: I) -> Result<Self, DictionaryError>
    where
        I: IntoIterator<Item = (N, D)>,
        N: Into<String>,
        D: Into<String>,
    {
        let mut entries: Vec<DictEntry> = Vec::new();
        let mut by_key: HashMap<String, Vec<usize>> = HashMap::new();

        for (name, id) in pairs {
            let name: String = name.into();
            let id: String = id.into();
            let key = normalize(&name);
            if key.is_empty() || id.trim().is_empty() {
                return Err(DictionaryError::InvalidEntry(name));
            }
            let entry = DictEntry { name, key: key.clone(), id: ItemId(id.trim().to_string()) };

            let slot = by_key.entry(key).or_default();
            if slot.iter().any(|&i| entries[i].name == entry.name && entries[i].id == entry.id) {
                continue;
            }
            if let Some(&other) = slot.first() {
                warn!(key = %entry.key, first = %entries[other].id, id = %entry.id, "dictionary key shared by several names");
            }
            slot.push(entries.len());
            entries.push(entry);
        }

        if entries.is_empty() {
            return Err(DictionaryError::Empty);
        }
        Ok(Dictionary { entries, by_key })
    }

    pub fn from_json(text: &str) -> Result<Self, DictionaryError> {
        let pairs: Vec<(String, String)> = match serde_json::from_str::<RawDictionary>(text)? {
            RawDictionary::Map(m) => m.into_iter().map(|(k, v)| (k, v.into_string())).collect(),
            RawDictionary::Rows(rows) => rows.into_iter().map(|r| (r.name, r.id.into_string())).collect(),
        };
        Self::from_pairs(pairs)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, DictionaryError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|source| DictionaryError::Io { path: path.display().to_string(), source })?;
        let dict = Self::from_json(&text)?;
        info!(path = %path.display(), entries = dict.len(), "dictionary loaded");
        Ok(dict)
    }

    pub fn len(&self) -> usize { self.entries.len() }
    pub fn entries(&self) -> &[DictEntry] { &self.entries }
    /// Every entry whose normalized key equals `key`, in load order.
    pub fn entries_for_key<'a>(&'a self, key: &str) -> impl Iterator<Item = &'a DictEntry> + 'a {
        self.by_key
            .get(key)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .map(move |&i| &self.entries[i])
    }
}
