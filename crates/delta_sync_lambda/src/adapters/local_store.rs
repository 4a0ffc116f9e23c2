use std::fs;
use std::path::{Component, Path, PathBuf};

use delta_sync_core::dispatch::ArtifactStore;

/// Artifacts on the local filesystem, keys mapped to paths below `root`.
#[derive(Clone, Debug)]
pub struct LocalDirStore {
    root: PathBuf,
}

impl LocalDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, String> {
        let relative = Path::new(key.trim_start_matches('/'));
        if relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
        {
            return Err(format!("artifact key '{key}' must be a plain relative path"));
        }
        Ok(self.root.join(relative))
    }
}

impl ArtifactStore for LocalDirStore {
    fn write_object(&self, key: &str, body: &[u8]) -> Result<(), String> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|error| format!("failed to create {}: {error}", parent.display()))?;
        }
        fs::write(&path, body).map_err(|error| format!("failed to write {}: {error}", path.display()))
    }

    fn read_object(&self, key: &str) -> Result<Vec<u8>, String> {
        let path = self.path_for(key)?;
        fs::read(&path).map_err(|error| format!("failed to read {}: {error}", path.display()))
    }
}
