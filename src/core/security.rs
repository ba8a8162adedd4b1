//! Path authorization against a single allowed root.
//!
//! A `PathGuard` holds one allowed base path. It is not meant to be shared
//! between operations that need different roots: build one per operation.

use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("path {} resolves outside the allowed root {}", path.display(), allowed.display())]
    PathTraversal { path: PathBuf, allowed: PathBuf },

    #[error("path contains a null byte")]
    NullByte,

    #[error("no allowed base path has been configured")]
    NoAllowedBase,

    #[error("failed to resolve {}: {source}", path.display())]
    Unresolvable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl SecurityError {
    pub fn code(&self) -> &'static str {
        match self {
            SecurityError::PathTraversal { .. } => "PATH_TRAVERSAL",
            SecurityError::NullByte => "NULL_BYTE",
            SecurityError::NoAllowedBase => "NO_ALLOWED_BASE",
            SecurityError::Unresolvable { .. } => "UNRESOLVABLE",
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct PathGuard {
    allowed_base: Option<PathBuf>,
}

impl PathGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Guard already scoped to `root`.
    pub fn scoped(root: &Path) -> Result<Self, SecurityError> {
        let mut guard = Self::new();
        guard.set_allowed_base_path(root)?;
        Ok(guard)
    }

    pub fn set_allowed_base_path(&mut self, root: &Path) -> Result<(), SecurityError> {
        self.allowed_base = Some(resolve(root)?);
        Ok(())
    }

    pub fn allowed_base_path(&self) -> Option<&Path> {
        self.allowed_base.as_deref()
    }

    /// Resolve `path` (following symlinks on the part that exists) and
    /// return it if it lies under the allowed base.
    pub fn validate_file_path(&self, path: &Path) -> Result<PathBuf, SecurityError> {
        let base = self.allowed_base.as_ref().ok_or(SecurityError::NoAllowedBase)?;

        let candidate = if path.is_absolute() {
            path.to_path_buf()
        } else {
            base.join(path)
        };

        let resolved = resolve(&candidate)?;
        if !resolved.starts_with(base) {
            return Err(SecurityError::PathTraversal {
                path: path.to_path_buf(),
                allowed: base.clone(),
            });
        }

        Ok(resolved)
    }
}

/// Symlink hops followed while resolving a path that does not fully exist.
const MAX_SYMLINK_HOPS: usize = 40;

/// Lexically normalize, then canonicalize the deepest existing ancestor and
/// re-append the components that do not exist yet. A dangling symlink is
/// replaced by its target, so the result is where a write would land.
fn resolve(path: &Path) -> Result<PathBuf, SecurityError> {
    if path.as_os_str().as_encoded_bytes().contains(&0) {
        return Err(SecurityError::NullByte);
    }

    let unresolvable = |source: io::Error| SecurityError::Unresolvable {
        path: path.to_path_buf(),
        source,
    };

    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().map_err(unresolvable)?.join(path)
    };

    let mut existing = normalize(&absolute);
    let mut pending = Vec::new();
    let mut hops = 0;
    loop {
        match existing.canonicalize() {
            Ok(canonical) => {
                let mut resolved = canonical;
                for component in pending.iter().rev() {
                    resolved.push(component);
                }
                return Ok(resolved);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let Some(parent) = existing.parent().map(Path::to_path_buf) else {
                    return Err(unresolvable(e));
                };

                let is_link = existing
                    .symlink_metadata()
                    .is_ok_and(|m| m.file_type().is_symlink());
                if is_link {
                    hops += 1;
                    if hops > MAX_SYMLINK_HOPS {
                        return Err(unresolvable(io::Error::from_raw_os_error(libc::ELOOP)));
                    }
                    let target = std::fs::read_link(&existing).map_err(unresolvable)?;
                    let base = parent.canonicalize().map_err(unresolvable)?;
                    existing = normalize(&base.join(target));
                    continue;
                }

                if let Some(name) = existing.file_name() {
                    pending.push(name.to_os_string());
                }
                existing = parent;
            }
            Err(e) => return Err(unresolvable(e)),
        }
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}
