//! Shared path manipulation utilities.

use std::env;
use std::path::{Component, Path, PathBuf};

/// Expand a leading `~` or `~/` using `$HOME`. Other paths are returned as-is.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    env::var_os("HOME").map_or_else(|| path.to_path_buf(), |home| PathBuf::from(home).join(rest))
}

/// Resolve a path to an absolute, normalized path.
///
/// Uses `fs::canonicalize` when the path exists so symlinked ancestors resolve.
/// Otherwise the path is made absolute relative to CWD and `..`/`.` components
/// are resolved syntactically.
pub fn resolve_absolute_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
    };

    if let Ok(canonical) = std::fs::canonicalize(&absolute) {
        return canonical;
    }

    normalize_syntactic(&absolute)
}

/// True when `candidate` sits directly inside `root` (one level, no traversal).
///
/// Only the candidate's parent is canonicalized: the candidate itself may be a
/// symlink whose target must not be followed.
pub fn is_direct_child(root: &Path, candidate: &Path) -> bool {
    let Some(name) = candidate.file_name() else {
        return false;
    };
    if name == "." || name == ".." {
        return false;
    }
    let Some(parent) = candidate.parent() else {
        return false;
    };
    resolve_absolute_path(parent) == resolve_absolute_path(root)
}

fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
        }
    }
    components.into_iter().collect()
}
