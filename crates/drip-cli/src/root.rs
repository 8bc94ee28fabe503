use drip_core::paths::DRIP_DIR;
use std::path::{Path, PathBuf};

/// Resolve the project root.
///
/// `--root` / `DRIP_ROOT` wins; otherwise walk upward from the current
/// directory looking for `.drip/`, falling back to the current directory.
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_drip_dir(&cwd).unwrap_or(cwd)
}

fn find_drip_dir(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(DRIP_DIR).is_dir())
        .map(Path::to_path_buf)
}
