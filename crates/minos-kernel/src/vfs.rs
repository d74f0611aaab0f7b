//! In-memory virtual filesystem collaborator.
//!
//! The kernel treats the filesystem as an external capability reachable
//! only through `vfs.*` syscalls; this module ships the default backend:
//! a hierarchical in-memory store wrapped in a `CapabilityHandler` that
//! serves the full `vfs` syscall table. All data is ephemeral.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::trace;

use crate::errors::{KernelError, KernelResult};
use crate::proc::unix_millis;
use crate::syscall::CapabilityHandler;

/// Type of directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::File => "file",
            EntryKind::Directory => "dir",
        }
    }
}

/// A directory entry returned by `read_dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VfsEntry {
    pub name: String,
    pub kind: EntryKind,
}

/// Metadata for a file or directory.
#[derive(Debug, Clone)]
pub struct VfsMetadata {
    pub kind: EntryKind,
    pub size: u64,
    pub mode: u32,
    pub created: SystemTime,
    pub modified: SystemTime,
}

#[derive(Debug, Clone)]
enum Node {
    File {
        data: String,
        mode: u32,
        created: SystemTime,
        modified: SystemTime,
    },
    Dir {
        mode: u32,
        created: SystemTime,
        modified: SystemTime,
    },
}

impl Node {
    fn dir() -> Self {
        let now = SystemTime::now();
        Node::Dir {
            mode: 0o755,
            created: now,
            modified: now,
        }
    }

    fn file(data: String) -> Self {
        let now = SystemTime::now();
        Node::File {
            data,
            mode: 0o644,
            created: now,
            modified: now,
        }
    }

    fn kind(&self) -> EntryKind {
        match self {
            Node::File { .. } => EntryKind::File,
            Node::Dir { .. } => EntryKind::Directory,
        }
    }
}

/// In-memory filesystem. Thread-safe via an internal `RwLock`.
pub struct MemoryVfs {
    entries: RwLock<HashMap<PathBuf, Node>>,
}

impl MemoryVfs {
    /// Create an empty filesystem. The root directory always exists.
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        entries.insert(PathBuf::new(), Node::dir());
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Normalize a path: strip the leading `/`, resolve `.` and `..`.
    fn normalize(path: &str) -> PathBuf {
        let mut result = PathBuf::new();
        for component in Path::new(path).components() {
            match component {
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
                Component::ParentDir => {
                    result.pop();
                }
                Component::Normal(s) => result.push(s),
            }
        }
        result
    }

    fn lock_read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<PathBuf, Node>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<PathBuf, Node>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_parents(entries: &mut HashMap<PathBuf, Node>, path: &Path) {
        let mut current = PathBuf::new();
        for component in path.parent().into_iter().flat_map(|p| p.components()) {
            if let Component::Normal(s) = component {
                current.push(s);
                entries.entry(current.clone()).or_insert_with(Node::dir);
            }
        }
    }

    /// Read the entire contents of a file.
    pub fn read_file(&self, path: &str) -> KernelResult<String> {
        let key = Self::normalize(path);
        match self.lock_read().get(&key) {
            Some(Node::File { data, .. }) => Ok(data.clone()),
            Some(Node::Dir { .. }) => Err(KernelError::Collaborator(format!(
                "{}: is a directory",
                path
            ))),
            None => Err(KernelError::NotFound(path.to_string())),
        }
    }

    /// Write a file, creating it and its parents if needed.
    pub fn write_file(&self, path: &str, content: &str, append: bool) -> KernelResult<()> {
        let key = Self::normalize(path);
        let mut entries = self.lock_write();
        Self::ensure_parents(&mut entries, &key);
        match entries.get_mut(&key) {
            Some(Node::Dir { .. }) => Err(KernelError::Collaborator(format!(
                "{}: is a directory",
                path
            ))),
            Some(Node::File { data, modified, .. }) => {
                if append {
                    data.push_str(content);
                } else {
                    *data = content.to_string();
                }
                *modified = SystemTime::now();
                Ok(())
            }
            None => {
                entries.insert(key, Node::file(content.to_string()));
                Ok(())
            }
        }
    }

    /// List a directory's immediate children, sorted by name.
    pub fn read_dir(&self, path: &str) -> KernelResult<Vec<VfsEntry>> {
        let key = Self::normalize(path);
        let entries = self.lock_read();
        match entries.get(&key) {
            Some(Node::Dir { .. }) => {}
            Some(Node::File { .. }) => {
                return Err(KernelError::Collaborator(format!(
                    "{}: not a directory",
                    path
                )))
            }
            None => return Err(KernelError::NotFound(path.to_string())),
        }
        let mut out: Vec<VfsEntry> = entries
            .iter()
            .filter(|(p, _)| p.parent() == Some(key.as_path()) && !p.as_os_str().is_empty())
            .map(|(p, node)| VfsEntry {
                name: p
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
                kind: node.kind(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    /// Stat a file or directory.
    pub fn stat(&self, path: &str) -> KernelResult<VfsMetadata> {
        let key = Self::normalize(path);
        match self.lock_read().get(&key) {
            Some(Node::File {
                data,
                mode,
                created,
                modified,
            }) => Ok(VfsMetadata {
                kind: EntryKind::File,
                size: data.len() as u64,
                mode: *mode,
                created: *created,
                modified: *modified,
            }),
            Some(Node::Dir {
                mode,
                created,
                modified,
            }) => Ok(VfsMetadata {
                kind: EntryKind::Directory,
                size: 0,
                mode: *mode,
                created: *created,
                modified: *modified,
            }),
            None => Err(KernelError::NotFound(path.to_string())),
        }
    }

    /// Create a directory and any missing parents.
    pub fn mkdir(&self, path: &str) -> KernelResult<()> {
        let key = Self::normalize(path);
        let mut entries = self.lock_write();
        if matches!(entries.get(&key), Some(Node::File { .. })) {
            return Err(KernelError::Collaborator(format!(
                "{}: file exists",
                path
            )));
        }
        Self::ensure_parents(&mut entries, &key);
        entries.entry(key).or_insert_with(Node::dir);
        Ok(())
    }

    /// Remove a file, or a directory when `recursive` (or empty).
    pub fn rm(&self, path: &str, recursive: bool) -> KernelResult<()> {
        let key = Self::normalize(path);
        if key.as_os_str().is_empty() {
            return Err(KernelError::Collaborator("cannot remove /".to_string()));
        }
        let mut entries = self.lock_write();
        match entries.get(&key) {
            None => return Err(KernelError::NotFound(path.to_string())),
            Some(Node::File { .. }) => {
                entries.remove(&key);
            }
            Some(Node::Dir { .. }) => {
                let has_children = entries.keys().any(|p| p.parent() == Some(key.as_path()));
                if has_children && !recursive {
                    return Err(KernelError::Collaborator(format!(
                        "{}: directory not empty",
                        path
                    )));
                }
                entries.retain(|p, _| p != &key && !p.starts_with(&key));
            }
        }
        Ok(())
    }

    /// Copy a file, or a subtree when `recursive`.
    pub fn copy(&self, source: &str, destination: &str, recursive: bool) -> KernelResult<()> {
        let src = Self::normalize(source);
        let dst = Self::normalize(destination);
        let mut entries = self.lock_write();
        let node = entries
            .get(&src)
            .cloned()
            .ok_or_else(|| KernelError::NotFound(source.to_string()))?;
        if matches!(node, Node::Dir { .. }) && !recursive {
            return Err(KernelError::Collaborator(format!(
                "{}: is a directory (use recursive)",
                source
            )));
        }
        Self::ensure_parents(&mut entries, &dst);
        let subtree: Vec<(PathBuf, Node)> = entries
            .iter()
            .filter(|(p, _)| p.starts_with(&src) && !p.as_os_str().is_empty())
            .map(|(p, n)| (p.clone(), n.clone()))
            .collect();
        for (p, n) in subtree {
            let rel = p.strip_prefix(&src).unwrap_or(&p).to_path_buf();
            entries.insert(dst.join(rel), n);
        }
        Ok(())
    }

    /// Move a file or subtree.
    pub fn rename(&self, source: &str, destination: &str) -> KernelResult<()> {
        self.copy(source, destination, true)?;
        self.rm(source, true)
    }

    /// Return the lines of a file matching `pattern` (a regex).
    pub fn grep(&self, path: &str, pattern: &str) -> KernelResult<Vec<String>> {
        let re = Regex::new(pattern)
            .map_err(|e| KernelError::InvalidSpec(format!("bad pattern {:?}: {}", pattern, e)))?;
        let content = self.read_file(path)?;
        Ok(content
            .lines()
            .filter(|line| re.is_match(line))
            .map(|line| line.to_string())
            .collect())
    }

    /// Set the permission bits on a file or directory.
    pub fn chmod(&self, path: &str, mode: u32) -> KernelResult<()> {
        let key = Self::normalize(path);
        let mut entries = self.lock_write();
        match entries.get_mut(&key) {
            Some(Node::File { mode: m, .. }) | Some(Node::Dir { mode: m, .. }) => {
                *m = mode;
                Ok(())
            }
            None => Err(KernelError::NotFound(path.to_string())),
        }
    }
}

impl Default for MemoryVfs {
    fn default() -> Self {
        Self::new()
    }
}

/// Capability handler exposing a `MemoryVfs` as the `vfs.*` syscall table.
pub struct VfsCapability {
    fs: Arc<MemoryVfs>,
}

impl VfsCapability {
    pub fn new(fs: Arc<MemoryVfs>) -> Self {
        Self { fs }
    }

    /// Direct access to the backing store, for embedders seeding files.
    pub fn fs(&self) -> Arc<MemoryVfs> {
        self.fs.clone()
    }
}

fn param_str(params: &Value, key: &str) -> KernelResult<String> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(|s| s.to_string())
        .ok_or_else(|| KernelError::InvalidSpec(format!("missing parameter: {}", key)))
}

fn param_bool(params: &Value, key: &str) -> bool {
    params.get(key).and_then(Value::as_bool).unwrap_or(false)
}

#[async_trait]
impl CapabilityHandler for VfsCapability {
    fn namespace(&self) -> &str {
        "vfs"
    }

    async fn handle(&self, call: &str, params: Value) -> KernelResult<Value> {
        // The calling user is accepted for contract compatibility but not
        // enforced: sandboxing beyond syscall mediation is a non-goal.
        if let Some(user) = params.get("user").and_then(Value::as_str) {
            trace!(call, user, "vfs syscall");
        }
        match call {
            "readDir" => {
                let path = param_str(&params, "path")?;
                let entries = self.fs.read_dir(&path)?;
                Ok(Value::Array(
                    entries
                        .into_iter()
                        .map(|e| json!({ "name": e.name, "type": e.kind.as_str() }))
                        .collect(),
                ))
            }
            "stat" => {
                let path = param_str(&params, "path")?;
                let meta = self.fs.stat(&path)?;
                Ok(json!({
                    "type": meta.kind.as_str(),
                    "size": meta.size,
                    "mtime": unix_millis(meta.modified),
                    "ctime": unix_millis(meta.created),
                }))
            }
            "readFile" => {
                let path = param_str(&params, "path")?;
                Ok(Value::String(self.fs.read_file(&path)?))
            }
            "writeFile" => {
                let path = param_str(&params, "path")?;
                let content = param_str(&params, "content")?;
                self.fs
                    .write_file(&path, &content, param_bool(&params, "append"))?;
                Ok(Value::Null)
            }
            "mkdir" => {
                let path = param_str(&params, "path")?;
                self.fs.mkdir(&path)?;
                Ok(Value::Null)
            }
            "rm" => {
                let path = param_str(&params, "path")?;
                self.fs.rm(&path, param_bool(&params, "recursive"))?;
                Ok(Value::Null)
            }
            "copyFile" => {
                let source = param_str(&params, "source")?;
                let destination = param_str(&params, "destination")?;
                self.fs
                    .copy(&source, &destination, param_bool(&params, "recursive"))?;
                Ok(Value::Null)
            }
            "move" => {
                let source = param_str(&params, "source")?;
                let destination = param_str(&params, "destination")?;
                self.fs.rename(&source, &destination)?;
                Ok(Value::Null)
            }
            "grep" => {
                let path = param_str(&params, "path")?;
                let pattern = param_str(&params, "pattern")?;
                let matches = self.fs.grep(&path, &pattern)?;
                Ok(Value::Array(
                    matches.into_iter().map(Value::String).collect(),
                ))
            }
            "chmod" => {
                let path = param_str(&params, "path")?;
                let mode_str = param_str(&params, "mode")?;
                let mode = u32::from_str_radix(&mode_str, 8).map_err(|_| {
                    KernelError::InvalidSpec(format!("bad mode: {:?}", mode_str))
                })?;
                self.fs.chmod(&path, mode)?;
                Ok(Value::Null)
            }
            other => Err(KernelError::NotFound(format!("vfs.{}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read() {
        let fs = MemoryVfs::new();
        fs.write_file("/home/amy/notes.txt", "hello", false).unwrap();
        assert_eq!(fs.read_file("/home/amy/notes.txt").unwrap(), "hello");
    }

    #[test]
    fn test_write_creates_parents() {
        let fs = MemoryVfs::new();
        fs.write_file("/a/b/c.txt", "x", false).unwrap();
        assert_eq!(fs.stat("/a/b").unwrap().kind, EntryKind::Directory);
    }

    #[test]
    fn test_append() {
        let fs = MemoryVfs::new();
        fs.write_file("/log", "one", false).unwrap();
        fs.write_file("/log", "\ntwo", true).unwrap();
        assert_eq!(fs.read_file("/log").unwrap(), "one\ntwo");
    }

    #[test]
    fn test_truncating_write() {
        let fs = MemoryVfs::new();
        fs.write_file("/f", "long old content", false).unwrap();
        fs.write_file("/f", "new", false).unwrap();
        assert_eq!(fs.read_file("/f").unwrap(), "new");
    }

    #[test]
    fn test_read_missing() {
        let fs = MemoryVfs::new();
        assert!(fs.read_file("/nope").unwrap_err().is_not_found());
    }

    #[test]
    fn test_read_dir_sorted() {
        let fs = MemoryVfs::new();
        fs.write_file("/d/b.txt", "", false).unwrap();
        fs.write_file("/d/a.txt", "", false).unwrap();
        fs.mkdir("/d/sub").unwrap();
        let names: Vec<_> = fs
            .read_dir("/d")
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, ["a.txt", "b.txt", "sub"]);
    }

    #[test]
    fn test_read_dir_lists_only_children() {
        let fs = MemoryVfs::new();
        fs.write_file("/d/sub/deep.txt", "", false).unwrap();
        fs.write_file("/d/top.txt", "", false).unwrap();
        let names: Vec<_> = fs
            .read_dir("/d")
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, ["sub", "top.txt"]);
    }

    #[test]
    fn test_rm_file_and_dir() {
        let fs = MemoryVfs::new();
        fs.write_file("/d/f.txt", "", false).unwrap();
        assert!(fs.rm("/d", false).is_err(), "non-empty dir needs recursive");
        fs.rm("/d", true).unwrap();
        assert!(fs.stat("/d").is_err());
        assert!(fs.rm("/d", false).unwrap_err().is_not_found());
    }

    #[test]
    fn test_copy_recursive() {
        let fs = MemoryVfs::new();
        fs.write_file("/src/a.txt", "a", false).unwrap();
        fs.write_file("/src/sub/b.txt", "b", false).unwrap();
        fs.copy("/src", "/dst", true).unwrap();
        assert_eq!(fs.read_file("/dst/a.txt").unwrap(), "a");
        assert_eq!(fs.read_file("/dst/sub/b.txt").unwrap(), "b");
        // Source untouched.
        assert_eq!(fs.read_file("/src/a.txt").unwrap(), "a");
    }

    #[test]
    fn test_move() {
        let fs = MemoryVfs::new();
        fs.write_file("/old.txt", "data", false).unwrap();
        fs.rename("/old.txt", "/new.txt").unwrap();
        assert_eq!(fs.read_file("/new.txt").unwrap(), "data");
        assert!(fs.read_file("/old.txt").is_err());
    }

    #[test]
    fn test_grep() {
        let fs = MemoryVfs::new();
        fs.write_file("/f", "alpha\nbeta\ngamma\nalphabet", false)
            .unwrap();
        assert_eq!(
            fs.grep("/f", "^alpha").unwrap(),
            ["alpha", "alphabet"]
        );
        assert!(fs.grep("/f", "(").is_err(), "bad pattern is InvalidSpec");
    }

    #[test]
    fn test_chmod_and_stat_mode() {
        let fs = MemoryVfs::new();
        fs.write_file("/f", "", false).unwrap();
        assert_eq!(fs.stat("/f").unwrap().mode, 0o644);
        fs.chmod("/f", 0o600).unwrap();
        assert_eq!(fs.stat("/f").unwrap().mode, 0o600);
    }

    #[tokio::test]
    async fn test_capability_round_trip() {
        let cap = VfsCapability::new(Arc::new(MemoryVfs::new()));
        cap.handle(
            "writeFile",
            json!({ "path": "/x", "content": "hi", "append": false, "user": "root" }),
        )
        .await
        .unwrap();
        let value = cap
            .handle("readFile", json!({ "path": "/x", "user": "root" }))
            .await
            .unwrap();
        assert_eq!(value, json!("hi"));
    }

    #[tokio::test]
    async fn test_capability_stat_shape() {
        let cap = VfsCapability::new(Arc::new(MemoryVfs::new()));
        cap.fs().write_file("/x", "abc", false).unwrap();
        let value = cap.handle("stat", json!({ "path": "/x" })).await.unwrap();
        assert_eq!(value["type"], "file");
        assert_eq!(value["size"], 3);
        assert!(value["mtime"].is_u64());
    }

    #[tokio::test]
    async fn test_capability_unknown_call() {
        let cap = VfsCapability::new(Arc::new(MemoryVfs::new()));
        let err = cap.handle("defrag", json!({})).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_capability_missing_param() {
        let cap = VfsCapability::new(Arc::new(MemoryVfs::new()));
        let err = cap.handle("readFile", json!({})).await.unwrap_err();
        assert!(matches!(err, KernelError::InvalidSpec(_)));
    }
}
