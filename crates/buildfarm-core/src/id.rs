//! Resource identifiers.
//!
//! Catalog records are keyed by monotonically increasing integers, so a
//! lower id always means an older record. The dispatcher relies on this to
//! break score ties in favour of older builds.

use derive_more::Display;
use serde::{Deserialize, Serialize};

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
        )]
        #[display("{_0}")]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Get the underlying integer.
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }
    };
}

numeric_id!(
    /// Identifies one build of a source package for one architecture.
    BuildId
);

numeric_id!(
    /// Identifies a build queue entry.
    JobId
);

numeric_id!(
    /// Identifies a registered builder.
    BuilderId
);

numeric_id!(
    /// Identifies an archive.
    ArchiveId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_order_numerically() {
        assert!(BuildId(9) < BuildId(10));
        assert_eq!(BuildId(42).to_string(), "42");
    }

    #[test]
    fn test_id_parse() {
        let id: JobId = "17".parse().unwrap();
        assert_eq!(id, JobId(17));
        assert!("x".parse::<JobId>().is_err());
    }

    #[test]
    fn test_id_serializes_transparently() {
        let json = serde_json::to_string(&BuilderId(3)).unwrap();
        assert_eq!(json, "3");
    }
}
