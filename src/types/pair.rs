//! Unordered pairs: speakers (dyads) and topics (tensions)

use serde::{Deserialize, Serialize};

/// Unordered pair of strings, stored sorted so (a, b) == (b, a)
macro_rules! unordered_pair {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name {
            first: String,
            second: String,
        }

        impl $name {
            pub fn new(a: impl Into<String>, b: impl Into<String>) -> Self {
                let (a, b) = (a.into(), b.into());
                if a <= b {
                    Self { first: a, second: b }
                } else {
                    Self { first: b, second: a }
                }
            }

            pub fn first(&self) -> &str {
                &self.first
            }

            pub fn second(&self) -> &str {
                &self.second
            }

            pub fn contains(&self, item: &str) -> bool {
                self.first == item || self.second == item
            }

            /// The member that is not `item`, if `item` is a member
            pub fn other(&self, item: &str) -> Option<&str> {
                if self.first == item {
                    Some(&self.second)
                } else if self.second == item {
                    Some(&self.first)
                } else {
                    None
                }
            }

            /// Flat key used in snapshot records ("a|b")
            pub fn key(&self) -> String {
                format!("{}|{}", self.first, self.second)
            }

            pub fn as_tuple(&self) -> (String, String) {
                (self.first.clone(), self.second.clone())
            }

            pub fn to_array(&self) -> [String; 2] {
                [self.first.clone(), self.second.clone()]
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{} / {}", self.first, self.second)
            }
        }
    };
}

unordered_pair!(DyadKey, "Unordered pair of speaker identifiers");
unordered_pair!(TensionPair, "Unordered pair of opposing topic labels");

// =============================================================================
// TESTS
// =============================================================================
