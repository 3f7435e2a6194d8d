use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Filesystem questions the validator asks about bound config directories.
///
/// Validation itself never reads files; it only needs to know whether paths
/// exist, so the check can be swapped out in tests.
pub trait HostProbe: Send + Sync {
    fn is_dir(&self, path: &Path) -> bool;

    fn is_file(&self, path: &Path) -> bool;
}

/// Probe backed by the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsProbe;

impl HostProbe for FsProbe {
    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }
}

/// In-memory probe: a fixed set of directories and files.
#[derive(Debug, Clone, Default)]
pub struct StaticProbe {
    dirs: BTreeSet<PathBuf>,
    files: BTreeSet<PathBuf>,
}

impl StaticProbe {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dirs.insert(dir.into());
        self
    }

    /// Register a file; its parent directory is registered too.
    #[must_use]
    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        let file = file.into();
        if let Some(parent) = file.parent() {
            self.dirs.insert(parent.to_path_buf());
        }
        self.files.insert(file);
        self
    }
}

impl HostProbe for StaticProbe {
    fn is_dir(&self, path: &Path) -> bool {
        self.dirs.contains(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        self.files.contains(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_probe_registers_parents() {
        let probe = StaticProbe::new().with_file("/srv/configs/web/app.json");
        assert!(probe.is_dir(Path::new("/srv/configs/web")));
        assert!(probe.is_file(Path::new("/srv/configs/web/app.json")));
        assert!(!probe.is_file(Path::new("/srv/configs/web/other.json")));
    }

    #[test]
    fn fs_probe_sees_real_paths() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("app.json");
        std::fs::write(&file, "{}").unwrap();
        assert!(FsProbe.is_dir(dir.path()));
        assert!(FsProbe.is_file(&file));
        assert!(!FsProbe.is_dir(&file));
    }
}
