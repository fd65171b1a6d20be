//! Pruning of saved policy checkpoints.
use log::{debug, warn};
use std::{
    fs,
    path::{Path, PathBuf},
};

fn is_policy_checkpoint(path: &Path) -> bool {
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name.starts_with("policy_") && name.ends_with(".pt"),
        None => false,
    }
}

fn list_policies(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = vec![];
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_policy_checkpoint(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Removes all but the newest `keep_last_n` `policy_*.pt` files in `dir`.
///
/// Files are ordered by name, so checkpoint names are expected to embed a
/// zero-padded epoch (`policy_000120.pt`). A missing directory is a no-op.
/// Failures never propagate: they are logged and the remaining files are left alone.
pub fn cleanup_old_policies(dir: impl AsRef<Path>, keep_last_n: usize) {
    let dir = dir.as_ref();
    if !dir.exists() {
        return;
    }

    let files = match list_policies(dir) {
        Ok(files) => files,
        Err(e) => {
            warn!("Failed to list checkpoints in {:?}: {}", dir, e);
            return;
        }
    };

    if files.len() <= keep_last_n {
        return;
    }

    let n_remove = files.len() - keep_last_n;
    for path in files.iter().take(n_remove) {
        match fs::remove_file(path) {
            Ok(()) => debug!("Removed old checkpoint {:?}", path),
            Err(e) => warn!("Failed to remove checkpoint {:?}: {}", path, e),
        }
    }
}
