//! Minimal repository metadata read straight from `.git`.

use std::path::{Path, PathBuf};

use crate::error::{Result, ServiceError};

/// Name of the checked-out branch, or `HEAD` when detached.
///
/// Handles both a `.git` directory and a `.git` file pointing elsewhere
/// (worktrees, submodules).
pub fn active_branch(repo: &Path) -> Result<String> {
    let head_path = git_dir(repo)?.join("HEAD");
    let head = read(&head_path)?;
    Ok(branch_from_head(&head))
}

fn git_dir(repo: &Path) -> Result<PathBuf> {
    let dot_git = repo.join(".git");
    if dot_git.is_file() {
        let contents = read(&dot_git)?;
        if let Some(target) = contents.trim().strip_prefix("gitdir:") {
            return Ok(repo.join(target.trim()));
        }
    }
    Ok(dot_git)
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| ServiceError::Filesystem {
        path: path.to_path_buf(),
        source,
    })
}

fn branch_from_head(head: &str) -> String {
    match head.trim().strip_prefix("ref:") {
        Some(reference) => {
            let reference = reference.trim();
            reference
                .strip_prefix("refs/heads/")
                .unwrap_or(reference)
                .to_string()
        }
        None => "HEAD".to_string(),
    }
}
