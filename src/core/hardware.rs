use std::path::{Path, PathBuf};
use tracing::debug;

/// Reports whether the removable card is still mounted.
pub trait CardPresence: Send + Sync {
    /// Mount point of the card being ingested.
    fn path(&self) -> &Path;

    /// Returns false once the card has been removed.
    fn is_present(&self) -> bool;
}

/// Checks the card mount directly: the mount point must still be a
/// directory and its filesystem must still answer `statvfs`.
#[derive(Debug, Clone)]
pub struct MountedCard {
    path: PathBuf,
}

impl MountedCard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CardPresence for MountedCard {
    fn path(&self) -> &Path {
        &self.path
    }

    fn is_present(&self) -> bool {
        if !self.path.is_dir() {
            debug!(path = %self.path.display(), "Card mount point is gone");
            return false;
        }

        match nix::sys::statvfs::statvfs(&self.path) {
            Ok(_) => true,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "Card filesystem did not answer statvfs");
                false
            }
        }
    }
}
