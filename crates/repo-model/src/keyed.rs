//! Simple keyed resources with no cross-resource dependencies
//! (plus the environment-scoped secrets and variables).

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::address::Scope;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    /// Six lowercase hex digits, no leading `#`.
    pub color: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    #[default]
    Json,
    Form,
}

/// A repository webhook, matched against live hooks by `url`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Webhook {
    pub url: String,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default)]
    pub insecure_ssl: bool,
    pub events: BTreeSet<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Write-only. Live reads carry the platform's redaction marker.
    #[serde(default, skip_serializing)]
    pub secret: Option<String>,
}

impl fmt::Debug for Webhook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Webhook")
            .field("url", &self.url)
            .field("content_type", &self.content_type)
            .field("insecure_ssl", &self.insecure_ssl)
            .field("events", &self.events)
            .field("active", &self.active)
            .field("secret", &self.secret.as_ref().map(|_| "********"))
            .finish()
    }
}

fn default_true() -> bool {
    true
}

/// A deploy key, matched against live keys by `title`. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployKey {
    pub title: String,
    pub key: String,
    #[serde(default = "default_true")]
    pub read_only: bool,
}

/// An autolink reference. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Autolink {
    pub key_prefix: String,
    pub url_template: String,
    #[serde(default = "default_true")]
    pub is_alphanumeric: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomProperty {
    pub name: String,
    pub value: PropertyValue,
}

/// A typed custom property value. Multi-select values are unordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    String(String),
    SingleSelect(String),
    MultiSelect(BTreeSet<String>),
    Boolean(bool),
}

/// An Actions secret. The value is write-only and never serialized.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub scope: Scope,
    pub name: String,
    #[serde(default, skip_serializing)]
    pub value: Option<String>,
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("scope", &self.scope)
            .field("name", &self.name)
            .field("value", &self.value.as_ref().map(|_| "********"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub scope: Scope,
    pub name: String,
    pub value: String,
}
