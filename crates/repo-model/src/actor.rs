//! Actor references and deferred resolution tokens.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The directory an actor name is resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    User,
    Team,
    Integration,
}

impl fmt::Display for ActorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Team => f.write_str("team"),
            Self::Integration => f.write_str("integration"),
        }
    }
}

/// A reference to a platform identity.
///
/// `Name` is a deferred-resolution token: it stands in for the numeric id
/// until the applier resolves it immediately before the dependent call.
/// Live descriptors always carry `Id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActorRef {
    Id(u64),
    Name(String),
}

impl ActorRef {
    /// Interpret a document value: all-digit strings are ids, anything else
    /// is a name to resolve later.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.parse::<u64>() {
            Ok(id) => Self::Id(id),
            Err(_) => Self::Name(trimmed.to_string()),
        }
    }

    pub fn id(&self) -> Option<u64> {
        match self {
            Self::Id(id) => Some(*id),
            Self::Name(_) => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Id(_) => None,
            Self::Name(name) => Some(name),
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Id(_))
    }
}

impl fmt::Display for ActorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{}", id),
            Self::Name(name) => f.write_str(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_distinguishes_ids_from_names() {
        assert_eq!(ActorRef::parse("1199797"), ActorRef::Id(1199797));
        assert_eq!(ActorRef::parse("test-team"), ActorRef::Name("test-team".into()));
        assert_eq!(ActorRef::parse(" 42 "), ActorRef::Id(42));
    }

    #[test]
    fn untagged_serde_keeps_shape() {
        let id: ActorRef = serde_json::from_str("5").unwrap();
        let name: ActorRef = serde_json::from_str("\"admins\"").unwrap();
        assert_eq!(id, ActorRef::Id(5));
        assert_eq!(name.name(), Some("admins"));
        assert!(!name.is_resolved());
    }
}
