use std::cmp::Ordering;
use std::fs::Metadata;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::debug;

use crate::error::StartupError;
use crate::policy::{AccessPolicy, PolicyRules};

/// 对外共享的目录树：规范化根目录加访问策略，构建后不可变。
#[derive(Debug)]
pub struct Storage {
    root: PathBuf,
    policy: AccessPolicy,
}

/// 位于根目录内且通过策略检查的请求目标。
#[derive(Debug)]
pub struct ResolvedEntry {
    pub path: PathBuf,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("entry not found")]
    NotFound,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Storage {
    /// 规范化根目录并确认其为目录，然后据此构建访问策略。
    pub async fn open(root: &Path, rules: &PolicyRules) -> Result<Self, StartupError> {
        let invalid = |reason: String| StartupError::InvalidBaseDir {
            path: root.to_path_buf(),
            reason,
        };
        let canonical = fs::canonicalize(root)
            .await
            .map_err(|err| invalid(err.to_string()))?;
        let metadata = fs::metadata(&canonical)
            .await
            .map_err(|err| invalid(err.to_string()))?;
        if !metadata.is_dir() {
            return Err(invalid("not a directory".into()));
        }
        let policy = AccessPolicy::from_rules(&canonical, rules);
        Ok(Self::new(canonical, policy))
    }

    /// `root` 必须已规范化。
    pub fn new(root: PathBuf, policy: AccessPolicy) -> Self {
        Self { root, policy }
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// 拼接相对路径并解析符号链接，确认结果仍在根目录内。
    ///
    /// 所有失败都返回 [`StorageError::NotFound`]，不区分“越界”与“不存在”。
    pub async fn resolve(&self, relative: &str) -> Result<PathBuf, StorageError> {
        let joined = if relative.is_empty() {
            self.root.clone()
        } else {
            self.root.join(relative)
        };
        let canonical = match fs::canonicalize(&joined).await {
            Ok(path) => path,
            Err(err) => {
                debug!(path = relative, error = %err, "canonicalize failed");
                return Err(StorageError::NotFound);
            }
        };
        if !self.contains(&canonical) {
            debug!(path = relative, "resolved path escapes the base directory");
            return Err(StorageError::NotFound);
        }
        Ok(canonical)
    }

    /// 解析请求目标并应用访问策略。
    pub async fn resolve_entry(&self, relative: &str) -> Result<ResolvedEntry, StorageError> {
        let path = self.resolve(relative).await?;
        let metadata = fs::metadata(&path)
            .await
            .map_err(|_| StorageError::NotFound)?;
        if !self.policy.is_visible(&path, metadata.is_dir()) {
            debug!(path = relative, "entry hidden by access policy");
            return Err(StorageError::NotFound);
        }
        Ok(ResolvedEntry { path, metadata })
    }

    /// 列出目录中可见的子条目并排序；解析到根目录外或无法解析的条目被跳过。
    pub async fn list_dir(&self, dir: &Path) -> Result<Vec<DirEntry>, StorageError> {
        let mut reader = fs::read_dir(dir).await?;
        let mut entries = Vec::new();

        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let canonical = match fs::canonicalize(entry.path()).await {
                Ok(path) if self.contains(&path) => path,
                Ok(_) => {
                    debug!(name, "skipping entry resolving outside the base directory");
                    continue;
                }
                Err(err) => {
                    debug!(name, error = %err, "skipping unresolvable entry");
                    continue;
                }
            };
            let metadata = fs::metadata(&canonical).await.ok();
            let is_dir = metadata.as_ref().is_some_and(|meta| meta.is_dir());
            if !self.policy.is_visible(&canonical, is_dir) {
                continue;
            }
            let size = match (&metadata, is_dir) {
                (Some(meta), false) => meta.len(),
                _ => 0,
            };
            entries.push(DirEntry { name, is_dir, size });
        }

        entries.sort_by(compare_entries);
        Ok(entries)
    }

    fn contains(&self, candidate: &Path) -> bool {
        match candidate.strip_prefix(&self.root) {
            Ok(rest) => !rest
                .components()
                .any(|component| matches!(component, Component::ParentDir)),
            Err(_) => false,
        }
    }
}

/// 目录优先，再按名称忽略大小写排序，相同时按区分大小写比较。
pub fn compare_entries(a: &DirEntry, b: &DirEntry) -> Ordering {
    b.is_dir
        .cmp(&a.is_dir)
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        .then_with(|| a.name.cmp(&b.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn make_storage(rules: PolicyRules) -> (tempfile::TempDir, Storage) {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("root");
        std::fs::create_dir_all(root.join("sub/deeper")).expect("create root");
        std::fs::write(root.join("B.txt"), b"bb").expect("write B");
        std::fs::write(root.join("a.txt"), b"a").expect("write a");
        std::fs::write(root.join("sub/inner.txt"), b"inner").expect("write inner");
        std::fs::write(temp.path().join("outside.txt"), b"secret").expect("write outside");
        let storage = Storage::open(&root, &rules).await.expect("open storage");
        (temp, storage)
    }

    #[tokio::test]
    async fn resolve_stays_inside_root() {
        let (_temp, storage) = make_storage(PolicyRules::default()).await;
        let root = storage.root_path().to_path_buf();

        assert_eq!(storage.resolve("").await.expect("root"), root);
        assert_eq!(
            storage.resolve("sub/inner.txt").await.expect("inner"),
            root.join("sub/inner.txt")
        );
        assert_eq!(
            storage.resolve("sub/deeper/../inner.txt").await.expect("collapsed"),
            root.join("sub/inner.txt")
        );
        assert!(matches!(
            storage.resolve("../outside.txt").await,
            Err(StorageError::NotFound)
        ));
        assert!(matches!(
            storage.resolve("sub/../../outside.txt").await,
            Err(StorageError::NotFound)
        ));
        assert!(matches!(
            storage.resolve("missing.txt").await,
            Err(StorageError::NotFound)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_out_of_root_is_not_found_and_not_listed() {
        use std::os::unix::fs::symlink;

        let (temp, storage) = make_storage(PolicyRules::default()).await;
        let root = storage.root_path().to_path_buf();
        symlink(temp.path().join("outside.txt"), root.join("link.txt")).expect("symlink file");
        symlink(temp.path(), root.join("escape")).expect("symlink dir");
        symlink(root.join("a.txt"), root.join("alias.txt")).expect("symlink inside");

        assert!(matches!(
            storage.resolve("link.txt").await,
            Err(StorageError::NotFound)
        ));
        assert!(matches!(
            storage.resolve("escape/outside.txt").await,
            Err(StorageError::NotFound)
        ));
        assert_eq!(
            storage.resolve("alias.txt").await.expect("inside link"),
            root.join("a.txt")
        );

        let names: Vec<String> = storage
            .list_dir(&root)
            .await
            .expect("list")
            .into_iter()
            .map(|entry| entry.name)
            .collect();
        assert!(!names.contains(&"link.txt".to_string()));
        assert!(!names.contains(&"escape".to_string()));
        assert!(names.contains(&"alias.txt".to_string()));
    }

    #[tokio::test]
    async fn list_dir_sorts_directories_first() {
        let (_temp, storage) = make_storage(PolicyRules::default()).await;
        let root = storage.root_path().to_path_buf();
        let entries = storage.list_dir(&root).await.expect("list");
        let names: Vec<&str> = entries.iter().map(|entry| entry.name.as_str()).collect();
        assert_eq!(names, vec!["sub", "a.txt", "B.txt"]);
        assert!(entries[0].is_dir);
        assert_eq!(entries[0].size, 0);
        assert_eq!(entries[2].size, 2);
    }

    #[tokio::test]
    async fn list_dir_applies_policy() {
        let rules = PolicyRules {
            denied_extensions: vec!["txt".into()],
            ..Default::default()
        };
        let (_temp, storage) = make_storage(rules).await;
        let root = storage.root_path().to_path_buf();
        let entries = storage.list_dir(&root).await.expect("list");
        let names: Vec<&str> = entries.iter().map(|entry| entry.name.as_str()).collect();
        assert_eq!(names, vec!["sub"]);
        assert!(matches!(
            storage.resolve_entry("a.txt").await,
            Err(StorageError::NotFound)
        ));
    }

    #[test]
    fn compare_breaks_case_ties_deterministically() {
        let file = |name: &str| DirEntry {
            name: name.into(),
            is_dir: false,
            size: 0,
        };
        let mut entries = vec![file("a.txt"), file("B.txt"), file("A.txt")];
        entries.sort_by(compare_entries);
        let names: Vec<&str> = entries.iter().map(|entry| entry.name.as_str()).collect();
        assert_eq!(names, vec!["A.txt", "a.txt", "B.txt"]);
    }

    #[tokio::test]
    async fn open_rejects_file_root() {
        let temp = tempdir().expect("tempdir");
        let file = temp.path().join("file.txt");
        std::fs::write(&file, b"x").expect("write");
        assert!(matches!(
            Storage::open(&file, &PolicyRules::default()).await,
            Err(StartupError::InvalidBaseDir { .. })
        ));
        assert!(matches!(
            Storage::open(&temp.path().join("missing"), &PolicyRules::default()).await,
            Err(StartupError::InvalidBaseDir { .. })
        ));
    }
}
