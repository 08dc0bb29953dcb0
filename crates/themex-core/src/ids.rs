//! Branded identifier newtypes.
//!
//! Upstream collaborators hand us their own excerpt and source identifiers, so
//! every ID can be built from a raw string. Engine-minted IDs carry a prefix
//! and a time-ordered UUID v7.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident, $prefix:expr) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Mint a fresh prefixed identifier.
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            /// Wrap an identifier supplied by a collaborator.
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Borrow the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

branded_id!(
    /// Identifies one pipeline run.
    RunId,
    "run"
);
branded_id!(
    /// Identifies a theme, construct, category, or meta-theme.
    ThemeId,
    "theme"
);
branded_id!(
    /// Identifies an excerpt.
    ExcerptId,
    "exc"
);
branded_id!(
    /// Identifies an originating source document.
    SourceId,
    "src"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_has_prefix() {
        let id = RunId::new();
        assert!(id.as_str().starts_with("run_"), "got: {id}");
    }

    #[test]
    fn theme_id_has_prefix() {
        let id = ThemeId::new();
        assert!(id.as_str().starts_with("theme_"), "got: {id}");
    }

    #[test]
    fn ids_are_unique() {
        let a = ExcerptId::new();
        let b = ExcerptId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn from_raw_preserves_value() {
        let id = SourceId::from_raw("doi:10.1000/182");
        assert_eq!(id.as_str(), "doi:10.1000/182");
        assert_eq!(id.to_string(), "doi:10.1000/182");
    }

    #[test]
    fn serde_transparent() {
        let id = ExcerptId::from_raw("e-1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"e-1\"");
        let back: ExcerptId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
