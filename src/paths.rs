//! Path helpers shared by the codec, the sync engine and the watcher.
//!
//! Paths handed between components are either absolute OS paths or *relative references*:
//! forward-slash separated, relative to the source root. Lookups against relative references
//! are case-insensitive, so most callers want the lowercased form from [`relative_key`].

use crate::error::RouxError;
use std::{
    collections::BTreeSet,
    path::{Component, Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

/// Separator used for relative references regardless of platform.
pub const SEP: char = '/';

pub fn os_path_to_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Convert any separator to `/` and trim leading/trailing separators.
pub fn normalize_separators(path: &str) -> String {
    path.replace('\\', "/").trim_matches(SEP).to_string()
}

/// Join the components of an already relative path with `/`.
pub fn path_to_reference(rel: &Path) -> String {
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Forward-slash path of `path` relative to `root`.
pub fn relative_reference(root: &Path, path: &Path) -> Result<String, RouxError> {
    Ok(path_to_reference(path.strip_prefix(root)?))
}

/// Lowercased [`relative_reference`]; the key used for path lookups and provisional ids.
pub fn relative_key(root: &Path, path: &Path) -> Result<String, RouxError> {
    Ok(relative_reference(root, path)?.to_lowercase())
}

/// True if any directory component of the root-relative `rel` path is in `excluded`. The final
/// component is treated as the file name and is not checked.
pub fn is_excluded(rel: &Path, excluded: &BTreeSet<String>) -> bool {
    let mut components: Vec<_> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect();
    components.pop();
    components.iter().any(|dir| excluded.contains(dir.as_ref()))
}

/// Lowercased extension of `path`, without the dot.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
}

/// Whether a link target already names a file extension: a final `.` followed by 1 to 4 ASCII
/// alphanumerics, in the last path segment.
pub fn has_extension(target: &str) -> bool {
    let segment = target.rsplit(SEP).next().unwrap_or(target);
    match segment.rfind('.') {
        Some(0) | None => false,
        Some(dot) => {
            let ext = &segment[dot + 1..];
            (1..=4).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric())
        }
    }
}

/// Resolve `candidate` against `root` without touching the filesystem and reject anything that
/// ends up outside of it. `candidate` may be relative (to `root`) or absolute.
pub fn resolve_within_root(root: &Path, candidate: &Path) -> Result<PathBuf, RouxError> {
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };
    let mut resolved = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::ParentDir => {
                if !resolved.pop() {
                    return Err(RouxError::PathTraversal(format!("{candidate:?}")));
                }
            }
            Component::CurDir => {}
            other => resolved.push(other.as_os_str()),
        }
    }
    if resolved == root || !resolved.starts_with(root) {
        return Err(RouxError::PathTraversal(format!(
            "{candidate:?} resolves outside of {root:?}"
        )));
    }
    Ok(resolved)
}

pub fn system_time_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_millis() as i64,
        Err(before) => -(before.duration().as_millis() as i64),
    }
}

pub fn now_millis() -> i64 {
    system_time_millis(SystemTime::now())
}

/// Modification time of `path` in epoch milliseconds.
pub async fn file_mtime_millis(path: &Path) -> Result<i64, RouxError> {
    let metadata = tokio::fs::metadata(path).await?;
    Ok(system_time_millis(metadata.modified()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_relative_key() {
        let root = Path::new("/vault");
        assert_eq!(
            relative_key(root, Path::new("/vault/Notes/Idea One.md")).unwrap(),
            "notes/idea one.md"
        );
        assert!(relative_key(root, Path::new("/elsewhere/a.md")).is_err());
    }

    #[test]
    fn test_excluded_dirs() {
        let excluded: BTreeSet<String> = [".git", "node_modules"].map(String::from).into();
        assert!(is_excluded(Path::new(".git/notes.md"), &excluded));
        assert!(is_excluded(Path::new("pkg/node_modules/x/readme.md"), &excluded));
        assert!(!is_excluded(Path::new("notes/.git"), &excluded));
        assert!(!is_excluded(Path::new("notes/a.md"), &excluded));
    }

    #[test]
    fn test_has_extension() {
        assert!(has_extension("note.md"));
        assert!(has_extension("folder/diagram.png"));
        assert!(has_extension("data.json"));
        assert!(!has_extension("my note"));
        assert!(!has_extension("v1.2 release notes"));
        assert!(!has_extension("archive.tar_gz"));
        assert!(!has_extension(".hidden"));
        assert!(!has_extension("some.dir/name"));
    }

    #[test]
    fn test_resolve_within_root() {
        let root = Path::new("/vault");
        assert_eq!(
            resolve_within_root(root, Path::new("notes/./a.md")).unwrap(),
            PathBuf::from("/vault/notes/a.md")
        );
        assert_eq!(
            resolve_within_root(root, Path::new("notes/../b.md")).unwrap(),
            PathBuf::from("/vault/b.md")
        );
        assert!(matches!(
            resolve_within_root(root, Path::new("../escape.md")),
            Err(RouxError::PathTraversal(_))
        ));
        assert!(matches!(
            resolve_within_root(root, Path::new("notes/../../escape.md")),
            Err(RouxError::PathTraversal(_))
        ));
        assert!(matches!(
            resolve_within_root(root, Path::new("/etc/passwd")),
            Err(RouxError::PathTraversal(_))
        ));
        assert!(resolve_within_root(root, Path::new("")).is_err());
    }

    #[test]
    fn test_normalize_separators() {
        assert_eq!(normalize_separators("\\notes\\a.md"), "notes/a.md");
    }
}
