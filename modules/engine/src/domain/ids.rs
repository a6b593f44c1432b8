//! Identifier newtypes
//!
//! Orders and payments use plain UUIDs; refunds and webhook deliveries use
//! prefixed opaque strings (`ref_…`, `whk_…`) so they are recognizable in
//! logs and subscriber payloads without a lookup.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }

            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_id!(OrderId);
uuid_id!(PaymentId);

macro_rules! prefixed_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            /// Mint a fresh id: `<prefix><uuid without hyphens>`.
            pub fn new() -> Self {
                Self(format!("{}{}", $prefix, Uuid::new_v4().simple()))
            }

            /// Accept an existing id, verifying the prefix.
            pub fn parse(s: &str) -> Result<Self, InvalidId> {
                if s.starts_with($prefix) && s.len() > $prefix.len() {
                    Ok(Self(s.to_string()))
                } else {
                    Err(InvalidId {
                        expected_prefix: $prefix,
                        value: s.to_string(),
                    })
                }
            }

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
    };
}

prefixed_id!(RefundId, "ref_");
prefixed_id!(WebhookId, "whk_");

/// An opaque id that does not carry the expected prefix.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid id `{value}`: expected prefix `{expected_prefix}`")]
pub struct InvalidId {
    pub expected_prefix: &'static str,
    pub value: String,
}
