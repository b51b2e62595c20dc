use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::fs;

/// Files this subset considers when computing the narrower dependency
/// digest, which gates environment reuse (§3): only these can change the
/// installed interpreter/venv, so the content digest (which also covers
/// mapping logic, docs, fixtures, ...) is strictly finer-grained.
const DEPENDENCY_FILES: &[&str] = &["pyproject.toml", "requirements.txt", "manifest.json"];

/// Computes the content digest over every file under `root`: sorted
/// relative paths, each contributing `path_bytes || 0x00 || file_bytes ||
/// 0x00` to a single running hash. Deterministic regardless of traversal
/// order or platform path separators (paths are normalized to `/`).
pub async fn content_digest(root: &Path) -> ade_core::Result<String> {
    let files = collect_files(root).await?;
    Ok(hash_files(root, &files).await?)
}

/// Computes the narrower dependency digest over just [`DEPENDENCY_FILES`]
/// that exist under `root`.
pub async fn dependency_digest(root: &Path) -> ade_core::Result<String> {
    let mut present = Vec::new();
    for name in DEPENDENCY_FILES {
        let candidate = root.join(name);
        if fs::try_exists(&candidate).await? {
            present.push(candidate);
        }
    }
    present.sort();
    Ok(hash_files(root, &present).await?)
}

async fn hash_files(root: &Path, files: &[std::path::PathBuf]) -> ade_core::Result<String> {
    let mut hasher = Sha256::new();
    for file in files {
        let relative = file
            .strip_prefix(root)
            .unwrap_or(file)
            .to_string_lossy()
            .replace('\\', "/");
        hasher.update(relative.as_bytes());
        hasher.update([0u8]);
        let bytes = fs::read(file).await?;
        hasher.update(&bytes);
        hasher.update([0u8]);
    }
    Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
}

async fn collect_files(root: &Path) -> ade_core::Result<Vec<std::path::PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                if path.file_name().and_then(|n| n.to_str()) == Some(".venv") {
                    continue;
                }
                stack.push(path);
            } else if file_type.is_file() {
                out.push(path);
            }
        }
    }
    out.sort();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn is_deterministic_regardless_of_creation_order() {
        let dir_a = tempdir().unwrap();
        fs::write(dir_a.path().join("b.txt"), b"second").await.unwrap();
        fs::write(dir_a.path().join("a.txt"), b"first").await.unwrap();

        let dir_b = tempdir().unwrap();
        fs::write(dir_b.path().join("a.txt"), b"first").await.unwrap();
        fs::write(dir_b.path().join("b.txt"), b"second").await.unwrap();

        let digest_a = content_digest(dir_a.path()).await.unwrap();
        let digest_b = content_digest(dir_b.path()).await.unwrap();
        assert_eq!(digest_a, digest_b);
    }

    #[tokio::test]
    async fn changes_when_file_contents_change() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"first").await.unwrap();
        let before = content_digest(dir.path()).await.unwrap();
        fs::write(dir.path().join("a.txt"), b"changed").await.unwrap();
        let after = content_digest(dir.path()).await.unwrap();
        assert_ne!(before, after);
    }

    #[tokio::test]
    async fn excludes_venv_directory() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"first").await.unwrap();
        let before = content_digest(dir.path()).await.unwrap();
        fs::create_dir_all(dir.path().join(".venv")).await.unwrap();
        fs::write(dir.path().join(".venv").join("marker"), b"x")
            .await
            .unwrap();
        let after = content_digest(dir.path()).await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn dependency_digest_ignores_unrelated_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("pyproject.toml"), b"[project]")
            .await
            .unwrap();
        let before = dependency_digest(dir.path()).await.unwrap();
        fs::write(dir.path().join("readme.md"), b"docs").await.unwrap();
        let after = dependency_digest(dir.path()).await.unwrap();
        assert_eq!(before, after);
    }
}
