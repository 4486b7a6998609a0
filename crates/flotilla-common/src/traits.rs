//! Collaborator traits for dependency injection
//!
//! These traits abstract away concrete implementations, allowing
//! the engine to depend only on the narrow surface it needs.

use crate::error::FlotillaResult;

/// File storage for stack manifests
///
/// Manifests are stored per stack project folder. Paths returned by
/// [`ManifestStorage::store_manifest`] are what the engine records on the
/// stack as its entry point or manifest path.
pub trait ManifestStorage: Send + Sync {
    /// Write `content` to `folder/file_name`, creating the folder if needed,
    /// and return the stored file path
    fn store_manifest(&self, folder: &str, file_name: &str, content: &[u8])
    -> FlotillaResult<String>;

    /// Recursively remove a project folder
    fn remove_directory(&self, folder: &str) -> FlotillaResult<()>;

    /// Remove one file of a project folder; a missing file is not an error
    fn remove_manifest(&self, folder: &str, file_name: &str) -> FlotillaResult<()>;

    /// Absolute location of a project folder
    fn project_path(&self, folder: &str) -> String;
}
