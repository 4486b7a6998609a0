//! Flotilla Common - Shared types, traits, and utilities
//!
//! This crate provides the foundational types used across all Flotilla components:
//! - Error types and error codes
//! - Strongly typed identifiers for environments, groups, stacks, and tags
//! - Collaborator traits for dependency injection
//! - Name validation helpers

pub mod error;
pub mod ids;
pub mod traits;
pub mod utils;

// Re-exports for convenience
pub use error::{ErrorCode, ErrorKind, FlotillaError, FlotillaResult};
pub use ids::{EdgeGroupId, EdgeStackId, EnvironmentGroupId, EnvironmentId, TagId};
pub use traits::ManifestStorage;
pub use utils::is_valid_stack_name;

/// Folder, relative to the manifest root, under which edge stack projects live
pub const EDGE_STACK_FOLDER: &str = "edge_stacks";

/// File name used for compose stack entry points
pub const DEFAULT_COMPOSE_FILE: &str = "docker-compose.yml";

/// File name used for Kubernetes manifests
pub const DEFAULT_MANIFEST_FILE: &str = "manifest.yml";
