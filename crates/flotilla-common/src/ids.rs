//! Strongly typed identifiers
//!
//! Every entity the engine stores is keyed by a small integer. Wrapping them in
//! distinct newtypes keeps an environment ID from being passed where a stack ID
//! is expected. Storage keys are zero-padded so prefix scans return entries in
//! numeric order.

/// Generates a `u32` identifier newtype with serde, display, parsing and
/// storage-key helpers.
#[macro_export]
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            Default,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            pub const fn new(id: u32) -> Self {
                Self(id)
            }

            pub const fn value(self) -> u32 {
                self.0
            }

            /// Fixed-width key used by the storage layer
            pub fn storage_key(self) -> String {
                format!("{:010}", self.0)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Display::fmt(&self.0, f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim()
                    .parse::<u32>()
                    .map($name)
                    .map_err(|e| format!("Invalid {}: {} ({})", stringify!($name), s, e))
            }
        }

        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }
    };
}

define_id!(
    /// Identifier of a managed environment (Docker or Kubernetes host)
    EnvironmentId
);
define_id!(
    /// Identifier of an environment group
    EnvironmentGroupId
);
define_id!(
    /// Identifier of an edge group
    EdgeGroupId
);
define_id!(
    /// Identifier of an edge stack
    EdgeStackId
);
define_id!(
    /// Identifier of a tag
    TagId
);
