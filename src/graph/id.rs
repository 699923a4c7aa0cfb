//! Resource identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between type and name in the textual form of an identity.
const SEPARATOR: &str = "::";

/// Stable identity of a declaration: its resource type plus its logical name.
///
/// Types follow the `package:module:Kind` convention (for example
/// `gcp:sql:DatabaseInstance`), so the textual form `type::name` is
/// unambiguous.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    /// Resource type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Logical name, unique per type.
    pub name: String,
}

impl ResourceId {
    /// Creates a new identity.
    #[must_use]
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Returns the package segment of the type (`gcp` for `gcp:sql:User`).
    #[must_use]
    pub fn package(&self) -> &str {
        self.kind.split(':').next().unwrap_or(&self.kind)
    }

    /// Parses the `type::name` textual form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let (kind, name) = s.rsplit_once(SEPARATOR)?;
        if kind.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(kind, name))
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.kind, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_parse() {
        let id = ResourceId::new("gcp:sql:User", "blackcandy/user");
        let text = id.to_string();
        assert_eq!(text, "gcp:sql:User::blackcandy/user");
        assert_eq!(ResourceId::parse(&text), Some(id));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(ResourceId::parse("no-separator").is_none());
        assert!(ResourceId::parse("::name").is_none());
        assert!(ResourceId::parse("kind::").is_none());
    }

    #[test]
    fn test_package() {
        assert_eq!(ResourceId::new("random:index:RandomPassword", "pw").package(), "random");
        assert_eq!(ResourceId::new("plain", "x").package(), "plain");
    }
}
