//! Filesystem-backed manifest storage

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use flotilla_common::{FlotillaError, FlotillaResult, ManifestStorage};

/// Stores stack project folders under a root directory
#[derive(Clone, Debug)]
pub struct FsManifestStorage {
    root: PathBuf,
}

impl FsManifestStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn folder_path(&self, folder: &str) -> FlotillaResult<PathBuf> {
        let relative = Path::new(folder);
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(FlotillaError::invalid_input(format!(
                "manifest folder '{}' must stay under the manifest root",
                folder
            )));
        }
        Ok(self.root.join(relative))
    }
}

impl ManifestStorage for FsManifestStorage {
    fn store_manifest(
        &self,
        folder: &str,
        file_name: &str,
        content: &[u8],
    ) -> FlotillaResult<String> {
        let dir = self.folder_path(folder)?;
        fs::create_dir_all(&dir).map_err(|e| {
            FlotillaError::storage(format!("failed to create {}: {}", dir.display(), e))
        })?;

        let path = dir.join(file_name);
        fs::write(&path, content).map_err(|e| {
            FlotillaError::storage(format!("failed to write {}: {}", path.display(), e))
        })?;

        debug!(path = %path.display(), bytes = content.len(), "Stored manifest");
        Ok(path.to_string_lossy().into_owned())
    }

    fn remove_directory(&self, folder: &str) -> FlotillaResult<()> {
        let dir = self.folder_path(folder)?;
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                debug!(path = %dir.display(), "Removed project directory");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FlotillaError::storage(format!(
                "failed to remove {}: {}",
                dir.display(),
                e
            ))),
        }
    }

    fn remove_manifest(&self, folder: &str, file_name: &str) -> FlotillaResult<()> {
        let path = self.folder_path(folder)?.join(file_name);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "Removed manifest");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FlotillaError::storage(format!(
                "failed to remove {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn project_path(&self, folder: &str) -> String {
        self.root.join(folder).to_string_lossy().into_owned()
    }
}
