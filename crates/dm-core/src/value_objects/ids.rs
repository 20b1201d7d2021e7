//! Typed identifiers
//!
//! UUID-backed newtypes so a user id can never be passed where a
//! conversation id is expected. Message ids are also minted client-side
//! as optimistic placeholders and later replaced by the server-assigned
//! id on ack.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Error when parsing a typed id from a string
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum IdParseError {
    #[error("invalid id format")]
    InvalidFormat,
}

macro_rules! define_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Wrap a raw UUID
            #[inline]
            pub const fn new(id: Uuid) -> Self {
                Self(id)
            }

            /// Get the inner UUID
            #[inline]
            pub const fn into_inner(self) -> Uuid {
                self.0
            }

            /// Check whether this is the nil id (uninitialized)
            #[inline]
            pub const fn is_nil(&self) -> bool {
                self.0.is_nil()
            }

            /// Parse from string representation
            pub fn parse(s: &str) -> Result<Self, IdParseError> {
                Uuid::parse_str(s)
                    .map($name)
                    .map_err(|_| IdParseError::InvalidFormat)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $name::parse(s)
            }
        }
    };
}

define_id!(
    /// Identifier of an authenticated user
    UserId
);

define_id!(
    /// Identifier of a conversation between participants
    ConversationId
);

define_id!(
    /// Identifier of a message, client-minted or server-assigned
    MessageId
);

impl UserId {
    /// Generate a random user id (tests, fixtures)
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl ConversationId {
    /// Generate a random conversation id (tests, fixtures)
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl MessageId {
    /// Mint a fresh client-side placeholder id for an optimistic insert.
    ///
    /// Each send attempt gets its own placeholder; a retry never reuses
    /// the id of the failed attempt.
    #[must_use]
    pub fn placeholder() -> Self {
        Self(Uuid::new_v4())
    }
}
