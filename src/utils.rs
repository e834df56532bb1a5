//! Miscellaneous helper utilities.
use std::env;
use std::path::{Path, PathBuf};

/// Search `PATH` for the first matching executable name.
#[must_use]
pub fn get_binary_path(names: &[&str]) -> Option<PathBuf> {
    let path_var = env::var_os("PATH")?;
    find_in_dirs(env::split_paths(&path_var), names)
}

fn find_in_dirs(dirs: impl IntoIterator<Item = PathBuf>, names: &[&str]) -> Option<PathBuf> {
    for dir in dirs {
        for name in names {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }

            if cfg!(windows) {
                for ext in ["exe", "cmd", "bat"] {
                    let candidate = dir.join(format!("{}.{}", name, ext));
                    if candidate.is_file() {
                        return Some(candidate);
                    }
                }
            }
        }
    }

    None
}

/// Display name for a path in log lines (its base name when it has one).
pub fn display_name(path: &Path) -> std::borrow::Cow<'_, str> {
    path.file_name()
        .unwrap_or(path.as_os_str())
        .to_string_lossy()
}
