//! Strongly-typed identifiers.
//!
//! Ids minted by this service are ULIDs with a short display prefix. Ids
//! assigned by the outside world (telephony call ids, tenants, CRM customer
//! ids, upstream correlation ids) are opaque non-empty strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Error returned when parsing an ID from a string fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The type of ID that failed to parse.
    pub id_type: &'static str,
    /// The reason for the parse failure.
    pub reason: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {}: {}", self.id_type, self.reason)
    }
}

impl std::error::Error for ParseIdError {}

/// Generates a ULID-backed id with a display prefix.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Ulid);

        impl $name {
            /// Creates a new ID with a randomly generated ULID.
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            /// Returns the underlying ULID.
            #[must_use]
            pub const fn as_ulid(&self) -> Ulid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let ulid_str = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);

                Ulid::from_str(ulid_str)
                    .map(Self)
                    .map_err(|e| ParseIdError {
                        id_type: stringify!($name),
                        reason: e.to_string(),
                    })
            }
        }
    };
}

/// Generates an opaque, externally assigned string key.
///
/// `reserved` lists characters the key may not contain, for keys that are
/// joined into composite storage keys.
macro_rules! define_key {
    ($(#[$meta:meta])* $name:ident) => {
        define_key!($(#[$meta])* $name, reserved = []);
    };
    ($(#[$meta:meta])* $name:ident, reserved = [$($reserved:literal),*]) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a key, rejecting empty or whitespace-only input.
            ///
            /// # Errors
            ///
            /// Returns an error if `value` is blank or contains a reserved
            /// character.
            pub fn new(value: impl Into<String>) -> Result<Self, ParseIdError> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err(ParseIdError {
                        id_type: stringify!($name),
                        reason: "must not be empty".to_string(),
                    });
                }
                $(
                    if value.contains($reserved) {
                        return Err(ParseIdError {
                            id_type: stringify!($name),
                            reason: format!("must not contain '{}'", $reserved),
                        });
                    }
                )*
                Ok(Self(value))
            }

            /// Returns the key as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = ParseIdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(key: $name) -> Self {
                key.0
            }
        }
    };
}

define_id!(
    /// Unique identifier for one connected dashboard client.
    DashboardSessionId,
    "dsh"
);

define_key!(
    /// Identifier of a live or recently ended voice conversation.
    ConversationId
);

define_key!(
    /// Identifier of the business that owns the data.
    ///
    /// Storage keys are `{kind}:{tenant}:{key}`, so a tenant never contains
    /// `:` and the first separator after the tenant is unambiguous.
    TenantId,
    reserved = [':']
);

define_key!(
    /// Identifier of a customer or lead.
    CustomerId
);

define_key!(
    /// Opaque id pairing an upstream tool-call request with its result.
    CorrelationId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dashboard_session_id_display_format() {
        let id = DashboardSessionId::new();
        assert!(id.to_string().starts_with("dsh_"));
    }

    #[test]
    fn parse_with_and_without_prefix() {
        let id = DashboardSessionId::new();
        let parsed: DashboardSessionId = id.to_string().parse().expect("should parse");
        assert_eq!(id, parsed);

        let raw: DashboardSessionId = id.as_ulid().to_string().parse().expect("should parse");
        assert_eq!(id, raw);
    }

    #[test]
    fn parse_invalid_ulid() {
        let err = "dsh_nope".parse::<DashboardSessionId>().unwrap_err();
        assert_eq!(err.id_type, "DashboardSessionId");
    }

    #[test]
    fn keys_reject_blank_input() {
        assert!(ConversationId::new("").is_err());
        assert!(CustomerId::new("   ").is_err());
        let err = TenantId::new("").unwrap_err();
        assert_eq!(err.id_type, "TenantId");
    }

    #[test]
    fn tenant_rejects_key_separator() {
        let err = TenantId::new("acme:x").unwrap_err();
        assert_eq!(err.id_type, "TenantId");
        assert_eq!(err.reason, "must not contain ':'");

        let conversation = ConversationId::new("x:y").unwrap();
        assert_eq!(conversation.as_str(), "x:y");
    }

    #[test]
    fn key_display_is_the_raw_value() {
        let id = ConversationId::new("conv1").unwrap();
        assert_eq!(id.to_string(), "conv1");
        assert_eq!(id.as_str(), "conv1");
    }

    #[test]
    fn key_deserialization_validates() {
        let ok: CorrelationId = serde_json::from_str("\"evt1\"").unwrap();
        assert_eq!(ok.as_str(), "evt1");

        let bad: Result<CorrelationId, _> = serde_json::from_str("\"\"");
        assert!(bad.is_err());
    }

    #[test]
    fn keys_hash_by_value() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(ConversationId::new("a").unwrap());
        set.insert(ConversationId::new("b").unwrap());
        set.insert(ConversationId::new("a").unwrap());
        assert_eq!(set.len(), 2);
    }
}
