//! Node descriptors and candidate claims.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role a node plays inside a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Subject,
    Predicate,
    Object,
}

impl NodeRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Subject => "subject",
            Self::Predicate => "predicate",
            Self::Object => "object",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical description of a node (atom).
///
/// The node id is derived by the ledger from [`NodeDescriptor::canonical_bytes`];
/// any change to that encoding changes every identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl NodeDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            url: None,
            image: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Canonical encoding submitted to the ledger's id derivation.
    ///
    /// Fields are trimmed, empty optionals are dropped, and keys are emitted in
    /// sorted order, so cosmetic differences never produce a different id.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        // Inserted in key order so the output is sorted with or without
        // serde_json's `preserve_order` feature.
        let fields = [
            ("description", self.description.as_deref()),
            ("image", self.image.as_deref()),
            ("name", Some(self.name.as_str())),
            ("url", self.url.as_deref()),
        ];
        let mut map = serde_json::Map::new();
        for (key, value) in fields {
            let value = value.map(str::trim);
            if key == "name" || value.is_some_and(|v| !v.is_empty()) {
                map.insert(
                    key.to_string(),
                    serde_json::Value::String(value.unwrap_or_default().to_string()),
                );
            }
        }
        serde_json::Value::Object(map).to_string().into_bytes()
    }
}

/// A claim as supplied by the activity/heuristic layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateClaim {
    /// Where the observation came from (tab, page, importer...).
    pub source: String,
    pub subject: NodeDescriptor,
    /// Lookup key into the predicate table, not a descriptor.
    pub predicate: String,
    pub object: NodeDescriptor,
    pub observed_at: DateTime<Utc>,
}

impl CandidateClaim {
    pub fn new(
        source: impl Into<String>,
        subject: NodeDescriptor,
        predicate: impl Into<String>,
        object: NodeDescriptor,
    ) -> Self {
        Self {
            source: source.into(),
            subject,
            predicate: predicate.into(),
            object,
            observed_at: Utc::now(),
        }
    }
}

/// Normalized predicate lookup key.
pub(crate) fn predicate_key(name: &str) -> String {
    name.trim().to_lowercase()
}
