//! Moves staged files to their public destination with collision-safe
//! naming, and cleans the staging area up afterwards.

use crate::common::EngineError;
use crate::utils::paths::staging_relative;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;

/// Upper bound on numbered candidates tried for one name.
const MAX_SUFFIX_ATTEMPTS: u32 = 10_000;

/// Finds an available path by appending ` (N)` suffix if the target already exists.
/// Returns the original path unchanged if no collision.
/// Does not create any files, see `reserve_destination` for that.
///
/// Fails when a candidate cannot be checked (a suffixed name longer than
/// the filesystem allows, say) or when no free number turns up.
pub async fn find_available_path(mut path: PathBuf) -> io::Result<PathBuf> {
    if !tokio::fs::try_exists(&path).await? {
        return Ok(path);
    }

    let filename = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("unnamed")
        .to_string();

    let parent_dir = path
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));

    // Everything after the first dot stays together: "a.tar.gz" -> "a (1).tar.gz".
    // Hidden files keep their whole name as the base.
    let (base_name, all_extensions) = match filename.find('.') {
        Some(dot_pos) if dot_pos > 0 => (
            filename[..dot_pos].to_string(),
            filename[dot_pos..].to_string(),
        ),
        _ => (filename.clone(), String::new()),
    };

    // Continue from an existing counter instead of stacking "(1) (1)".
    let (stem, mut counter) = match base_name.rfind(" (") {
        Some(paren_pos) if base_name.ends_with(')') => {
            match base_name[paren_pos + 2..base_name.len() - 1]
                .parse::<u32>()
                .ok()
                .and_then(|num| num.checked_add(1))
            {
                Some(next) => (base_name[..paren_pos].to_string(), next),
                None => (base_name, 1),
            }
        }
        _ => (base_name, 1),
    };

    for _ in 0..MAX_SUFFIX_ATTEMPTS {
        path = parent_dir.join(format!("{stem} ({counter}){all_extensions}"));
        if !tokio::fs::try_exists(&path).await? {
            return Ok(path);
        }
        counter = match counter.checked_add(1) {
            Some(next) => next,
            None => break,
        };
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free name left for {filename} in {}", parent_dir.display()),
    ))
}

/// Claims a free destination name by creating an empty placeholder there.
///
/// `create_new` makes the claim atomic, so two relocations racing for the
/// same name end up with different suffixes.
pub async fn reserve_destination(target: PathBuf) -> io::Result<PathBuf> {
    loop {
        let candidate = find_available_path(target.clone()).await?;
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
}

fn outside_staging(source: &Path, err: impl std::fmt::Display) -> EngineError {
    EngineError::relocation(
        source,
        io::Error::new(io::ErrorKind::InvalidInput, err.to_string()),
    )
}

/// Relocates one staged file below `download_dir`, keeping its path
/// relative to `staging_dir`. Returns the final destination.
///
/// On failure the staging copy is left in place for manual recovery.
pub async fn relocate_file(
    source: &Path,
    staging_dir: &Path,
    download_dir: &Path,
) -> Result<PathBuf, EngineError> {
    let relative = staging_relative(staging_dir, source).map_err(|e| outside_staging(source, e))?;
    let target = download_dir.join(relative);

    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| EngineError::relocation(source, e))?;
    }

    let destination = reserve_destination(target)
        .await
        .map_err(|e| EngineError::relocation(source, e))?;

    match tokio::fs::rename(source, &destination).await {
        Ok(()) => Ok(destination),
        Err(rename_err) => {
            // Different filesystems: copy, then drop the staging copy.
            tracing::debug!(
                source = %source.display(),
                error = %rename_err,
                "Rename failed, falling back to copy"
            );
            match tokio::fs::copy(source, &destination).await {
                Ok(_) => {
                    if let Err(e) = tokio::fs::remove_file(source).await {
                        tracing::warn!(
                            path = %source.display(),
                            error = %e,
                            "Relocated file but failed to delete staging copy"
                        );
                    }
                    Ok(destination)
                }
                Err(copy_err) => {
                    let _ = tokio::fs::remove_file(&destination).await;
                    Err(EngineError::relocation(source, copy_err))
                }
            }
        }
    }
}

/// Deletes a staged file that will never be relocated.
pub async fn discard_staged(source: &Path, staging_dir: &Path) -> Result<(), EngineError> {
    staging_relative(staging_dir, source).map_err(|e| outside_staging(source, e))?;
    match tokio::fs::remove_file(source).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(EngineError::relocation(source, e)),
    }
}

/// Removes now-empty directories between each file and `root`, bottom-up,
/// `root` included. Stops climbing at the first directory that still has
/// content.
pub async fn prune_empty_dirs(root: &Path, files: &[PathBuf]) {
    for file in files.iter().filter(|f| f.starts_with(root)) {
        for dir in file.ancestors().skip(1) {
            if !dir.starts_with(root) {
                break;
            }
            match tokio::fs::remove_dir(dir).await {
                Ok(()) => tracing::debug!(dir = %dir.display(), "Removed empty staging directory"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(_) => break,
            }
        }
    }
}

/// Best-effort deletion of files produced by a finished session.
/// Returns how many were removed.
pub async fn remove_files(files: &[PathBuf]) -> usize {
    let mut removed = 0;
    for file in files {
        match tokio::fs::remove_file(file).await {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %file.display(),
                error = %e,
                "Failed to delete session artifact"
            ),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn find_available_path_returns_original_when_no_collision() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file.txt");
        let result = find_available_path(path.clone()).await.unwrap();
        assert_eq!(result, path);
    }

    #[tokio::test]
    async fn find_available_path_appends_suffix_on_collision() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file.txt");
        tokio::fs::write(&path, b"existing").await.unwrap();
        let result = find_available_path(path.clone()).await.unwrap();
        assert_eq!(result, dir.path().join("file (1).txt"));
    }

    #[tokio::test]
    async fn find_available_path_continues_existing_counter() {
        let dir = TempDir::new().unwrap();
        let path_1 = dir.path().join("file (1).txt");
        tokio::fs::write(&path_1, b"existing").await.unwrap();
        let result = find_available_path(path_1).await.unwrap();
        assert_eq!(result, dir.path().join("file (2).txt"));
    }

    #[tokio::test]
    async fn find_available_path_keeps_compound_extensions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("backup.tar.gz");
        tokio::fs::write(&path, b"existing").await.unwrap();
        let result = find_available_path(path).await.unwrap();
        assert_eq!(result, dir.path().join("backup (1).tar.gz"));
    }

    #[tokio::test]
    async fn find_available_path_handles_hidden_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".gitignore");
        tokio::fs::write(&path, b"existing").await.unwrap();
        let result = find_available_path(path.clone()).await.unwrap();
        assert_eq!(result, dir.path().join(".gitignore (1)"));
    }

    #[tokio::test]
    async fn find_available_path_restarts_counter_at_u32_max() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x (4294967295).txt");
        tokio::fs::write(&path, b"existing").await.unwrap();
        let result = find_available_path(path).await.unwrap();
        assert_eq!(result, dir.path().join("x (4294967295) (1).txt"));
    }

    #[tokio::test]
    async fn find_available_path_fails_when_suffix_exceeds_name_limit() {
        let dir = TempDir::new().unwrap();
        let name = format!("{}.bin", "a".repeat(251));
        let path = dir.path().join(&name);
        tokio::fs::write(&path, b"existing").await.unwrap();

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(3),
            find_available_path(path),
        )
        .await
        .expect("collision search must terminate");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn reserve_destination_creates_placeholders_in_sequence() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("photo.jpg");

        let first = reserve_destination(target.clone()).await.unwrap();
        let second = reserve_destination(target.clone()).await.unwrap();
        let third = reserve_destination(target).await.unwrap();

        assert_eq!(first, dir.path().join("photo.jpg"));
        assert_eq!(second, dir.path().join("photo (1).jpg"));
        assert_eq!(third, dir.path().join("photo (2).jpg"));
    }

    #[tokio::test]
    async fn relocate_moves_file_and_keeps_folder_layout() {
        let staging = TempDir::new().unwrap();
        let downloads = TempDir::new().unwrap();
        let source = staging.path().join("album").join("a.jpg");
        tokio::fs::create_dir_all(source.parent().unwrap()).await.unwrap();
        tokio::fs::write(&source, b"pixels").await.unwrap();

        let dest = relocate_file(&source, staging.path(), downloads.path())
            .await
            .unwrap();

        assert_eq!(dest, downloads.path().join("album").join("a.jpg"));
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"pixels");
        assert!(!source.exists());
    }

    #[tokio::test]
    async fn failed_relocation_leaves_no_placeholder() {
        let staging = TempDir::new().unwrap();
        let downloads = TempDir::new().unwrap();
        let source = staging.path().join("missing.bin");

        let err = relocate_file(&source, staging.path(), downloads.path())
            .await
            .expect_err("source does not exist");

        assert!(matches!(err, EngineError::RelocationFailure { .. }));
        assert!(!downloads.path().join("missing.bin").exists());
    }

    #[tokio::test]
    async fn refuses_sources_outside_staging() {
        let staging = TempDir::new().unwrap();
        let downloads = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let source = outside.path().join("mine.txt");
        tokio::fs::write(&source, b"keep me").await.unwrap();

        assert!(relocate_file(&source, staging.path(), downloads.path())
            .await
            .is_err());
        assert!(discard_staged(&source, staging.path()).await.is_err());
        assert!(source.exists());
    }

    #[tokio::test]
    async fn prune_removes_only_empty_directories() {
        let staging = TempDir::new().unwrap();
        let root = staging.path().join("album");
        let moved = root.join("2024").join("a.jpg");
        let kept = root.join("keep").join("b.jpg");
        tokio::fs::create_dir_all(moved.parent().unwrap()).await.unwrap();
        tokio::fs::create_dir_all(kept.parent().unwrap()).await.unwrap();
        tokio::fs::write(&kept, b"still here").await.unwrap();

        prune_empty_dirs(&root, &[moved.clone()]).await;

        assert!(!moved.parent().unwrap().exists());
        assert!(kept.exists());
        assert!(root.exists());
        assert!(staging.path().exists());
    }
}
