//! 根目录下条目的可见性规则，启动时构建，之后只读。
//!
//! 优先级从高到低：
//!
//! 1. 被拒绝的文件，或祖先链上任一被拒绝的目录；
//! 2. 被拒绝的扩展名（仅文件）；
//! 3. 白名单模式下，属于允许的文件或目录，其祖先目录保持可浏览；
//! 4. 否则在配置了允许扩展名时按扩展名过滤。

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// 命令行给出的原始规则列表。
#[derive(Debug, Clone, Default)]
pub struct PolicyRules {
    pub allowed_extensions: Vec<String>,
    pub denied_extensions: Vec<String>,
    pub allowed_files: Vec<String>,
    pub denied_files: Vec<String>,
    pub allowed_dirs: Vec<String>,
    pub denied_dirs: Vec<String>,
}

#[derive(Debug, Default)]
pub struct AccessPolicy {
    allowed_extensions: HashSet<String>,
    denied_extensions: HashSet<String>,
    allowed_files: HashSet<PathBuf>,
    denied_files: HashSet<PathBuf>,
    allowed_dirs: Vec<PathBuf>,
    denied_dirs: Vec<PathBuf>,
    allowed_ancestors: HashSet<PathBuf>,
}

impl AccessPolicy {
    /// 基于已规范化的 `base` 构建策略。
    ///
    /// 相对规则路径以 `base` 为起点；存在的路径做规范化，不存在的按字面
    /// 规范化保留，条目之后出现时拒绝规则依然生效。
    pub fn from_rules(base: &Path, rules: &PolicyRules) -> Self {
        let allowed_files: HashSet<PathBuf> = rules
            .allowed_files
            .iter()
            .map(|value| resolve_rule_path(base, value))
            .collect();
        let allowed_dirs: Vec<PathBuf> = rules
            .allowed_dirs
            .iter()
            .map(|value| resolve_rule_path(base, value))
            .collect();

        let mut allowed_ancestors = HashSet::new();
        for allowed in allowed_files.iter().chain(allowed_dirs.iter()) {
            register_ancestors(base, allowed, &mut allowed_ancestors);
        }

        let policy = Self {
            allowed_extensions: normalize_extensions(&rules.allowed_extensions),
            denied_extensions: normalize_extensions(&rules.denied_extensions),
            allowed_files,
            denied_files: rules
                .denied_files
                .iter()
                .map(|value| resolve_rule_path(base, value))
                .collect(),
            allowed_dirs,
            denied_dirs: rules
                .denied_dirs
                .iter()
                .map(|value| resolve_rule_path(base, value))
                .collect(),
            allowed_ancestors,
        };
        debug!(
            allow_list = policy.allow_list_mode(),
            allowed_extensions = policy.allowed_extensions.len(),
            denied_extensions = policy.denied_extensions.len(),
            allowed_files = policy.allowed_files.len(),
            denied_files = policy.denied_files.len(),
            allowed_dirs = policy.allowed_dirs.len(),
            denied_dirs = policy.denied_dirs.len(),
            "access policy built"
        );
        policy
    }

    /// 配置了允许的文件或目录即进入白名单模式。
    pub fn allow_list_mode(&self) -> bool {
        !self.allowed_files.is_empty() || !self.allowed_dirs.is_empty()
    }

    /// 判断规范化路径能否被列出或下载。
    pub fn is_visible(&self, path: &Path, is_dir: bool) -> bool {
        if self.is_denied(path, is_dir) {
            return false;
        }

        if self.allow_list_mode() {
            if self.under_allowed_dir(path) {
                return true;
            }
            return if is_dir {
                self.allowed_ancestors.contains(path)
            } else {
                self.allowed_files.contains(path)
            };
        }

        if is_dir || self.allowed_extensions.is_empty() {
            return true;
        }
        extension_of(path).is_some_and(|ext| self.allowed_extensions.contains(&ext))
    }

    fn is_denied(&self, path: &Path, is_dir: bool) -> bool {
        if self.denied_dirs.iter().any(|dir| path.starts_with(dir)) {
            return true;
        }
        if is_dir {
            return false;
        }
        if self.denied_files.contains(path) {
            return true;
        }
        !self.denied_extensions.is_empty()
            && extension_of(path).is_some_and(|ext| self.denied_extensions.contains(&ext))
    }

    fn under_allowed_dir(&self, path: &Path) -> bool {
        self.allowed_dirs.iter().any(|dir| path.starts_with(dir))
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
}

fn normalize_extensions(values: &[String]) -> HashSet<String> {
    values
        .iter()
        .map(|value| value.trim().trim_start_matches('.').to_lowercase())
        .filter(|value| !value.is_empty())
        .collect()
}

fn resolve_rule_path(base: &Path, value: &str) -> PathBuf {
    let candidate = Path::new(value.trim());
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base.join(candidate)
    };

    let resolved = match std::fs::canonicalize(&joined) {
        Ok(path) => path,
        Err(err) => {
            warn!(path = %joined.display(), error = %err, "policy path does not resolve, using it as written");
            lexically_normalize(&joined)
        }
    };
    if !resolved.starts_with(base) {
        warn!(path = %resolved.display(), "policy path lies outside the base directory");
    }
    resolved
}

fn lexically_normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

fn register_ancestors(base: &Path, allowed: &Path, ancestors: &mut HashSet<PathBuf>) {
    if !allowed.starts_with(base) {
        return;
    }
    for ancestor in allowed.ancestors().skip(1) {
        ancestors.insert(ancestor.to_path_buf());
        if ancestor == base {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_tree() -> (tempfile::TempDir, PathBuf) {
        let temp = tempdir().expect("tempdir");
        let base = temp.path().join("base");
        std::fs::create_dir_all(base.join("public/nested")).expect("public");
        std::fs::create_dir_all(base.join("private")).expect("private");
        std::fs::write(base.join("public/readme.txt"), b"hi").expect("readme");
        std::fs::write(base.join("public/nested/deep.txt"), b"deep").expect("deep");
        std::fs::write(base.join("private/secret.txt"), b"secret").expect("secret");
        std::fs::write(base.join("trace.log"), b"log").expect("log");
        std::fs::write(base.join("trace.LOG"), b"log").expect("LOG");
        std::fs::write(base.join("notes.md"), b"md").expect("md");
        let base = std::fs::canonicalize(base).expect("canonical base");
        (temp, base)
    }

    #[test]
    fn default_mode_allows_everything() {
        let (_temp, base) = make_tree();
        let policy = AccessPolicy::from_rules(&base, &PolicyRules::default());
        assert!(!policy.allow_list_mode());
        assert!(policy.is_visible(&base, true));
        assert!(policy.is_visible(&base.join("private/secret.txt"), false));
        assert!(policy.is_visible(&base.join("trace.log"), false));
    }

    #[test]
    fn denied_extension_is_case_insensitive() {
        let (_temp, base) = make_tree();
        let rules = PolicyRules {
            denied_extensions: vec![".LOG".into()],
            ..Default::default()
        };
        let policy = AccessPolicy::from_rules(&base, &rules);
        assert!(!policy.is_visible(&base.join("trace.log"), false));
        assert!(!policy.is_visible(&base.join("trace.LOG"), false));
        assert!(policy.is_visible(&base.join("notes.md"), false));
    }

    #[test]
    fn directories_ignore_extension_rules() {
        let (_temp, base) = make_tree();
        let rules = PolicyRules {
            allowed_extensions: vec!["md".into()],
            denied_extensions: vec!["txt".into()],
            ..Default::default()
        };
        let policy = AccessPolicy::from_rules(&base, &rules);
        assert!(policy.is_visible(&base.join("public"), true));
        assert!(policy.is_visible(&base.join("notes.md"), false));
        assert!(!policy.is_visible(&base.join("public/readme.txt"), false));
        assert!(!policy.is_visible(&base.join("trace.log"), false));
        assert!(!policy.is_visible(&base.join("Makefile"), false));
    }

    #[test]
    fn allowed_dir_hides_siblings_but_keeps_ancestors() {
        let (_temp, base) = make_tree();
        let rules = PolicyRules {
            allowed_dirs: vec![base.join("public").to_string_lossy().into_owned()],
            ..Default::default()
        };
        let policy = AccessPolicy::from_rules(&base, &rules);
        assert!(policy.allow_list_mode());
        assert!(policy.is_visible(&base, true));
        assert!(policy.is_visible(&base.join("public"), true));
        assert!(policy.is_visible(&base.join("public/nested"), true));
        assert!(policy.is_visible(&base.join("public/nested/deep.txt"), false));
        assert!(!policy.is_visible(&base.join("private"), true));
        assert!(!policy.is_visible(&base.join("private/secret.txt"), false));
        assert!(!policy.is_visible(&base.join("notes.md"), false));
    }

    #[test]
    fn allowed_file_registers_its_ancestors() {
        let (_temp, base) = make_tree();
        let rules = PolicyRules {
            allowed_files: vec!["public/nested/deep.txt".into()],
            ..Default::default()
        };
        let policy = AccessPolicy::from_rules(&base, &rules);
        assert!(policy.is_visible(&base, true));
        assert!(policy.is_visible(&base.join("public"), true));
        assert!(policy.is_visible(&base.join("public/nested"), true));
        assert!(policy.is_visible(&base.join("public/nested/deep.txt"), false));
        assert!(!policy.is_visible(&base.join("public/readme.txt"), false));
        assert!(!policy.is_visible(&base.join("private"), true));
    }

    #[test]
    fn deny_beats_allow() {
        let (_temp, base) = make_tree();
        let rules = PolicyRules {
            allowed_dirs: vec!["public".into()],
            denied_dirs: vec!["public/nested".into()],
            denied_files: vec!["public/readme.txt".into()],
            ..Default::default()
        };
        let policy = AccessPolicy::from_rules(&base, &rules);
        assert!(policy.is_visible(&base.join("public"), true));
        assert!(!policy.is_visible(&base.join("public/readme.txt"), false));
        assert!(!policy.is_visible(&base.join("public/nested"), true));
        assert!(!policy.is_visible(&base.join("public/nested/deep.txt"), false));
    }

    #[test]
    fn denied_extension_applies_in_allow_list_mode() {
        let (_temp, base) = make_tree();
        let rules = PolicyRules {
            allowed_dirs: vec!["public".into()],
            denied_extensions: vec!["txt".into()],
            ..Default::default()
        };
        let policy = AccessPolicy::from_rules(&base, &rules);
        assert!(!policy.is_visible(&base.join("public/readme.txt"), false));
    }

    #[test]
    fn missing_deny_path_still_applies() {
        let (_temp, base) = make_tree();
        let rules = PolicyRules {
            denied_dirs: vec!["later/../later".into()],
            ..Default::default()
        };
        let policy = AccessPolicy::from_rules(&base, &rules);
        assert!(!policy.is_visible(&base.join("later"), true));
        assert!(!policy.is_visible(&base.join("later/file.txt"), false));
        assert!(policy.is_visible(&base.join("public"), true));
    }
}
