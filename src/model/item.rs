//! Stable identity for discovered work items.
//!
//! Two scrapes of the same listing should map to the same id even when the
//! title picks up stray punctuation, casing or whitespace between runs.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hex-encoded sha256 of the normalized title and source name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    /// Derive the id of an item from its title and source name.
    ///
    /// Returns `None` when either part normalizes to nothing, since such an
    /// item has no stable identity.
    pub fn derive(title: &str, source: &str) -> Option<Self> {
        let title = normalize_text(title);
        let source = normalize_text(source);
        if title.is_empty() || source.is_empty() {
            return None;
        }

        let mut hasher = Sha256::new();
        hasher.update(title.as_bytes());
        hasher.update(source.as_bytes());
        Some(Self(hex::encode(hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Lowercase, keep only ASCII letters, digits and whitespace, collapse
/// whitespace runs to a single space, trim.
pub fn normalize_text(text: &str) -> String {
    let kept: String = text
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c.is_whitespace())
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}
