use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Row ids are assigned by the store (AUTOINCREMENT), so there is no
/// constructor that mints fresh ids, only `from_raw`.
macro_rules! entity_id {
    ($name:ident) => {
        #[derive(
            Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            pub fn from_raw(v: i64) -> Self {
                Self(v)
            }

            pub fn as_i64(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }

        impl From<i64> for $name {
            fn from(v: i64) -> Self {
                Self(v)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> i64 {
                id.0
            }
        }
    };
}

entity_id!(TaskId);
entity_id!(TagId);
entity_id!(SessionId);
entity_id!(LogId);
entity_id!(RecordId);
entity_id!(EntryId);
