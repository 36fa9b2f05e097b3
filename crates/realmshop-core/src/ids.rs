//! Identifier types for realmshop.
//!
//! This module provides strongly-typed identifiers for catalog rows, purchases,
//! payments and accounts.
//!
//! # Macro-based ID Types
//!
//! The `int_id_type!` macro reduces boilerplate for the integer keys handed out by
//! the database, ensuring consistent implementation of serialization, parsing, and
//! display traits. Delivery jobs use a UUID so they can be minted before the row
//! exists.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Macro to define an `i64`-backed identifier type with standard trait implementations.
///
/// This macro generates a newtype wrapper around `i64` with implementations for:
/// - `Clone`, `Copy`, `PartialEq`, `Eq`, `Hash`, `PartialOrd`, `Ord`
/// - `Serialize`, `Deserialize` (as a bare number)
/// - `FromStr`, `Display`, `Debug`
/// - `From<i64>`, `Into<i64>`
macro_rules! int_id_type {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wrap a raw database key.
            #[must_use]
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            /// Return the raw database key.
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim()
                    .parse::<i64>()
                    .map(Self)
                    .map_err(|_| IdError::InvalidInteger(s.to_string()))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

int_id_type!(ItemId, "A shop item identifier.");
int_id_type!(CategoryId, "A shop category identifier.");
int_id_type!(PurchaseId, "A purchase header identifier.");
int_id_type!(PaymentId, "A donation payment identifier.");
int_id_type!(SiteId, "A vote site identifier.");
int_id_type!(RealmId, "A game realm identifier.\n\nItems scoped to a realm can only be delivered into that realm.");
int_id_type!(ItemEntry, "A world item reference (the item template entry inside the game world).");
int_id_type!(CharacterGuid, "An in-game character identifier.");

/// Maximum accepted username length.
pub const MAX_USERNAME_LEN: usize = 32;

/// An account username.
///
/// Usernames are the unique key of the balance ledger. They are issued by the
/// authentication collaborator and only validated for shape here.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Username(String);

impl Username {
    /// Borrow the username as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Username {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.len() > MAX_USERNAME_LEN {
            return Err(IdError::InvalidUsername(s.to_string()));
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(IdError::InvalidUsername(s.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl fmt::Debug for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Username({})", self.0)
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Username {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Username> for String {
    fn from(name: Username) -> Self {
        name.0
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A delivery outbox job identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeliveryJobId(uuid::Uuid);

impl DeliveryJobId {
    /// Create a new identifier from a UUID.
    #[must_use]
    pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Generate a new random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Return the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl FromStr for DeliveryJobId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = uuid::Uuid::parse_str(s).map_err(|_| IdError::InvalidUuid)?;
        Ok(Self(uuid))
    }
}

impl fmt::Debug for DeliveryJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeliveryJobId({})", self.0)
    }
}

impl fmt::Display for DeliveryJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for DeliveryJobId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeliveryJobId> for String {
    fn from(id: DeliveryJobId) -> Self {
        id.0.to_string()
    }
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input is not a valid UUID.
    #[error("invalid UUID format")]
    InvalidUuid,

    /// The input is not a valid integer key.
    #[error("invalid integer identifier: {0}")]
    InvalidInteger(String),

    /// The input is not an acceptable username.
    #[error("invalid username: {0:?}")]
    InvalidUsername(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_ids_parse_and_display() {
        let id: PurchaseId = " 42 ".parse().unwrap();
        assert_eq!(id, PurchaseId::new(42));
        assert_eq!(id.to_string(), "42");
        assert!("forty".parse::<PurchaseId>().is_err());
    }

    #[test]
    fn integer_ids_serialize_as_numbers() {
        let json = serde_json::to_string(&ItemId::new(7)).unwrap();
        assert_eq!(json, "7");
        let parsed: ItemId = serde_json::from_str("7").unwrap();
        assert_eq!(parsed.get(), 7);
    }

    #[test]
    fn username_is_trimmed_and_validated() {
        let name: Username = "  arthas ".parse().unwrap();
        assert_eq!(name.as_str(), "arthas");
        assert!("".parse::<Username>().is_err());
        assert!("two words".parse::<Username>().is_err());
        assert!("x".repeat(MAX_USERNAME_LEN + 1).parse::<Username>().is_err());
    }

    #[test]
    fn username_rejects_bad_json() {
        assert!(serde_json::from_str::<Username>("\"\"").is_err());
        let name: Username = serde_json::from_str("\"jaina\"").unwrap();
        assert_eq!(name.to_string(), "jaina");
    }

    #[test]
    fn delivery_job_id_parses_uuid() {
        let id = DeliveryJobId::generate();
        let parsed: DeliveryJobId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert_eq!("nope".parse::<DeliveryJobId>(), Err(IdError::InvalidUuid));
    }
}
