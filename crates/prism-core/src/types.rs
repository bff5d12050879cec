//! Core domain types

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Unique name a client registers under
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientName(String);

impl ClientName {
    /// Create a new client name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the raw name
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the name is empty (never valid for registration)
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ClientName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ClientName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ClientName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Borrow<str> for ClientName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ClientName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_client_name_display() {
        assert_eq!(format!("{}", ClientName::new("alice")), "alice");
    }

    #[test]
    fn test_lookup_by_str() {
        let mut map = HashMap::new();
        map.insert(ClientName::new("alice"), 1);
        assert_eq!(map.get("alice"), Some(&1));
    }

    #[test]
    fn test_empty_name() {
        assert!(ClientName::new("").is_empty());
        assert!(!ClientName::from("bob").is_empty());
    }
}
