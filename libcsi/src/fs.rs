//! Filesystem capability used by the mount orchestration code.
//!
//! Backends never touch `tokio::fs` directly for the working directories they
//! manage.  Instead they receive an `Arc<dyn Filesystem>`, which is [`OsFs`]
//! in production and [`MemFs`] in tests.

use std::collections::BTreeMap;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

/// The subset of filesystem operations the CSI backends rely on.
///
/// All methods follow `std::fs` semantics, including the error kinds they
/// return (`NotFound`, `AlreadyExists`, ...).
#[async_trait]
pub trait Filesystem: Send + Sync {
    /// Create a single directory.  The parent must exist.
    async fn create_dir(&self, path: &Path) -> io::Result<()>;

    /// Create a directory and all missing parents.
    async fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Remove an empty directory.
    async fn remove_dir(&self, path: &Path) -> io::Result<()>;

    /// Remove a file or a directory and everything below it.
    async fn remove_all(&self, path: &Path) -> io::Result<()>;

    /// List the direct children of a directory (full paths, sorted).
    async fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// Read a whole file.
    async fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Create or truncate a file with the given contents and mode.
    async fn write(&self, path: &Path, contents: &[u8], mode: u32) -> io::Result<()>;

    /// Whether anything exists at `path`.
    async fn exists(&self, path: &Path) -> io::Result<bool>;

    /// Change the permission bits of `path` (including setuid/setgid/sticky).
    async fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()>;
}

// ---------------------------------------------------------------------------
// OsFs
// ---------------------------------------------------------------------------

/// [`Filesystem`] backed by the host file system through `tokio::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsFs;

#[async_trait]
impl Filesystem for OsFs {
    async fn create_dir(&self, path: &Path) -> io::Result<()> {
        tokio::fs::create_dir(path).await?;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o750)).await
    }

    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }

    async fn remove_dir(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_dir(path).await
    }

    async fn remove_all(&self, path: &Path) -> io::Result<()> {
        let meta = tokio::fs::symlink_metadata(path).await?;
        if meta.is_dir() {
            tokio::fs::remove_dir_all(path).await
        } else {
            tokio::fs::remove_file(path).await
        }
    }

    async fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut dir = tokio::fs::read_dir(path).await?;
        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            entries.push(entry.path());
        }
        entries.sort();
        Ok(entries)
    }

    async fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        tokio::fs::read(path).await
    }

    async fn write(&self, path: &Path, contents: &[u8], mode: u32) -> io::Result<()> {
        tokio::fs::write(path, contents).await?;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
    }

    async fn exists(&self, path: &Path) -> io::Result<bool> {
        tokio::fs::try_exists(path).await
    }

    async fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()> {
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
    }
}

// ---------------------------------------------------------------------------
// MemFs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Node {
    Dir { mode: u32 },
    File { contents: Vec<u8>, mode: u32 },
}

/// In-memory [`Filesystem`] used by unit tests.
///
/// Only absolute paths are supported.  The root directory always exists.
#[derive(Debug, Default)]
pub struct MemFs {
    nodes: Mutex<BTreeMap<PathBuf, Node>>,
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{} not found", path.display()))
}

fn is_root(path: &Path) -> bool {
    path.parent().is_none()
}

impl MemFs {
    /// Create an empty in-memory file system containing only `/`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Permission bits of the node at `path`, if any.
    pub fn mode(&self, path: &Path) -> Option<u32> {
        let nodes = self.lock();
        match nodes.get(path)? {
            Node::Dir { mode } | Node::File { mode, .. } => Some(*mode),
        }
    }

    /// Whether `path` is a directory.
    pub fn is_dir(&self, path: &Path) -> bool {
        is_root(path) || matches!(self.lock().get(path), Some(Node::Dir { .. }))
    }

    /// Whether `path` is a regular file.
    pub fn is_file(&self, path: &Path) -> bool {
        matches!(self.lock().get(path), Some(Node::File { .. }))
    }

    /// Contents of the file at `path` as UTF-8, if it is a file.
    pub fn read_to_string(&self, path: &Path) -> Option<String> {
        match self.lock().get(path)? {
            Node::File { contents, .. } => String::from_utf8(contents.clone()).ok(),
            Node::Dir { .. } => None,
        }
    }

    /// Seed a file, creating missing parent directories.
    pub fn insert_file(&self, path: &Path, contents: &[u8], mode: u32) {
        let mut nodes = self.lock();
        if let Some(parent) = path.parent() {
            for dir in parent.ancestors().filter(|p| !is_root(p)) {
                nodes
                    .entry(dir.to_path_buf())
                    .or_insert(Node::Dir { mode: 0o755 });
            }
        }
        nodes.insert(
            path.to_path_buf(),
            Node::File {
                contents: contents.to_vec(),
                mode,
            },
        );
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<PathBuf, Node>> {
        // A poisoned lock only means another test thread panicked; the map
        // itself is still consistent.
        self.nodes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn parent_is_dir(nodes: &BTreeMap<PathBuf, Node>, path: &Path) -> bool {
        match path.parent() {
            None => true,
            Some(p) if is_root(p) => true,
            Some(p) => matches!(nodes.get(p), Some(Node::Dir { .. })),
        }
    }
}

#[async_trait]
impl Filesystem for MemFs {
    async fn create_dir(&self, path: &Path) -> io::Result<()> {
        let mut nodes = self.lock();
        if is_root(path) || nodes.contains_key(path) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", path.display()),
            ));
        }
        if !Self::parent_is_dir(&nodes, path) {
            return Err(not_found(path));
        }
        nodes.insert(path.to_path_buf(), Node::Dir { mode: 0o750 });
        Ok(())
    }

    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut nodes = self.lock();
        for ancestor in path.ancestors().collect::<Vec<_>>().into_iter().rev() {
            if is_root(ancestor) {
                continue;
            }
            match nodes.get(ancestor) {
                Some(Node::Dir { .. }) => {}
                Some(Node::File { .. }) => {
                    return Err(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        format!("{} is a file", ancestor.display()),
                    ));
                }
                None => {
                    nodes.insert(ancestor.to_path_buf(), Node::Dir { mode: 0o755 });
                }
            }
        }
        Ok(())
    }

    async fn remove_dir(&self, path: &Path) -> io::Result<()> {
        let mut nodes = self.lock();
        match nodes.get(path) {
            Some(Node::Dir { .. }) => {}
            Some(Node::File { .. }) => {
                return Err(io::Error::other(format!("{} is not a directory", path.display())));
            }
            None => return Err(not_found(path)),
        }
        if nodes.keys().any(|k| k != path && k.starts_with(path)) {
            return Err(io::Error::other(format!("{} is not empty", path.display())));
        }
        nodes.remove(path);
        Ok(())
    }

    async fn remove_all(&self, path: &Path) -> io::Result<()> {
        let mut nodes = self.lock();
        if !nodes.contains_key(path) {
            return Err(not_found(path));
        }
        nodes.retain(|k, _| !k.starts_with(path));
        Ok(())
    }

    async fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let nodes = self.lock();
        if !is_root(path) && !matches!(nodes.get(path), Some(Node::Dir { .. })) {
            return Err(not_found(path));
        }
        Ok(nodes
            .keys()
            .filter(|k| k.parent() == Some(path))
            .cloned()
            .collect())
    }

    async fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        match self.lock().get(path) {
            Some(Node::File { contents, .. }) => Ok(contents.clone()),
            Some(Node::Dir { .. }) => {
                Err(io::Error::other(format!("{} is a directory", path.display())))
            }
            None => Err(not_found(path)),
        }
    }

    async fn write(&self, path: &Path, contents: &[u8], mode: u32) -> io::Result<()> {
        let mut nodes = self.lock();
        if !Self::parent_is_dir(&nodes, path) {
            return Err(not_found(path));
        }
        if matches!(nodes.get(path), Some(Node::Dir { .. })) {
            return Err(io::Error::other(format!("{} is a directory", path.display())));
        }
        nodes.insert(
            path.to_path_buf(),
            Node::File {
                contents: contents.to_vec(),
                mode,
            },
        );
        Ok(())
    }

    async fn exists(&self, path: &Path) -> io::Result<bool> {
        Ok(is_root(path) || self.lock().contains_key(path))
    }

    async fn set_mode(&self, path: &Path, new_mode: u32) -> io::Result<()> {
        match self.lock().get_mut(path) {
            Some(Node::Dir { mode }) | Some(Node::File { mode, .. }) => {
                *mode = new_mode;
                Ok(())
            }
            None => Err(not_found(path)),
        }
    }
}
