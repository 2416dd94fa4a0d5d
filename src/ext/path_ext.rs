use std::path::{Component, Path, PathBuf};

/// Renders paths for log lines and error messages.
///
/// Existing paths are shown canonicalized. Paths that cannot be canonicalized (usually
/// because they do not exist yet, e.g. a destination about to be created) are made
/// absolute and lexically normalized instead, so messages never show `./a/../b`.
pub trait BestEffortPathExt {
    fn best_effort_path_display(&self) -> String;
}

impl<P: AsRef<Path> + ?Sized> BestEffortPathExt for P {
    fn best_effort_path_display(&self) -> String {
        let path = self.as_ref();
        if let Ok(canonical) = path.canonicalize() {
            return canonical.display().to_string();
        }

        let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        lexically_normalize(&absolute).display().to_string()
    }
}

fn lexically_normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !matches!(
                    normalized.components().next_back(),
                    None | Some(Component::RootDir | Component::Prefix(_))
                ) {
                    normalized.pop();
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}
