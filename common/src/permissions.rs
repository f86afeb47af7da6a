use std::os::unix::prelude::PermissionsExt;
use tracing::{event, Level};

/// Owner write bit.
pub const OWNER_WRITE: u32 = 0o200;

/// Returns true if the owner may write into a directory with these permissions.
pub fn owner_can_write(metadata: &std::fs::Metadata) -> bool {
    metadata.permissions().mode() & OWNER_WRITE != 0
}

/// Temporarily grants write access to a directory the owner cannot write to.
///
/// The original permission bits are put back when the guard is dropped, whether or not the
/// work done in between succeeded. A failed restore is logged and otherwise ignored.
#[derive(Debug)]
pub struct DirWriteGuard {
    path: std::path::PathBuf,
    original: Option<std::fs::Permissions>,
}

impl DirWriteGuard {
    /// Relax `path` to `mode` if its current permissions (`metadata`) lack the owner write bit.
    ///
    /// If changing the mode fails nothing is restored later and the caller's own operation is
    /// left to report the resulting permission error.
    pub fn relax(path: &std::path::Path, metadata: &std::fs::Metadata, mode: u32) -> Self {
        if owner_can_write(metadata) {
            return Self {
                path: path.to_owned(),
                original: None,
            };
        }
        let original = metadata.permissions();
        match std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)) {
            Ok(()) => {
                event!(
                    Level::DEBUG,
                    "relaxed {:?} from {:o} to {:o}",
                    path,
                    original.mode() & 0o7777,
                    mode
                );
                Self {
                    path: path.to_owned(),
                    original: Some(original),
                }
            }
            Err(error) => {
                tracing::warn!("cannot make {:?} writable: {}", path, error);
                Self {
                    path: path.to_owned(),
                    original: None,
                }
            }
        }
    }

    /// Whether the permissions were changed and will be restored on drop.
    pub fn is_relaxed(&self) -> bool {
        self.original.is_some()
    }
}

impl Drop for DirWriteGuard {
    fn drop(&mut self) {
        if let Some(original) = self.original.take() {
            let mode = original.mode() & 0o7777;
            if let Err(error) = std::fs::set_permissions(&self.path, original) {
                tracing::warn!(
                    "failed restoring permissions {:o} on {:?}: {}",
                    mode,
                    &self.path,
                    error
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mode_of(path: &std::path::Path) -> u32 {
        std::fs::metadata(path).unwrap().permissions().mode() & 0o7777
    }

    #[test]
    fn writable_dir_is_left_alone() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o750)).unwrap();
        let metadata = std::fs::metadata(tmp.path()).unwrap();
        {
            let guard = DirWriteGuard::relax(tmp.path(), &metadata, 0o755);
            assert!(!guard.is_relaxed());
            assert_eq!(mode_of(tmp.path()), 0o750);
        }
        assert_eq!(mode_of(tmp.path()), 0o750);
    }

    #[test]
    fn read_only_dir_is_restored_on_drop() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("ro");
        std::fs::create_dir(&dir).unwrap();
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o555)).unwrap();
        let metadata = std::fs::metadata(&dir).unwrap();
        {
            let guard = DirWriteGuard::relax(&dir, &metadata, 0o755);
            assert!(guard.is_relaxed());
            assert_eq!(mode_of(&dir), 0o755);
            std::fs::write(dir.join("file"), "data").unwrap();
        }
        assert_eq!(mode_of(&dir), 0o555);
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn restore_failure_does_not_panic() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("gone");
        std::fs::create_dir(&dir).unwrap();
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o555)).unwrap();
        let metadata = std::fs::metadata(&dir).unwrap();
        let guard = DirWriteGuard::relax(&dir, &metadata, 0o755);
        assert!(guard.is_relaxed());
        std::fs::remove_dir(&dir).unwrap();
        drop(guard);
        assert!(!dir.exists());
    }
}
