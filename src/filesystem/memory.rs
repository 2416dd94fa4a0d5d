use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashSet};
use std::ffi::OsString;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;

use super::{DirEntry, EntryKind, EntryMetadata, Filesystem};

const DEFAULT_FILE_MODE: u32 = 0o644;
const DEFAULT_DIR_MODE: u32 = 0o755;
const OWNER_WRITE: u32 = 0o200;

/// A node of the in-memory tree
#[derive(Debug, Clone, PartialEq, Eq)]
enum MemoryNode {
    File {
        contents: Vec<u8>,
        mode: u32,
        modified: SystemTime,
    },
    Directory {
        children: BTreeMap<String, MemoryNode>,
        mode: u32,
        modified: SystemTime,
    },
}

impl MemoryNode {
    fn directory(mode: u32, modified: SystemTime) -> Self {
        MemoryNode::Directory {
            children: BTreeMap::new(),
            mode,
            modified,
        }
    }

    fn metadata(&self) -> EntryMetadata {
        match self {
            MemoryNode::File {
                contents,
                mode,
                modified,
            } => EntryMetadata {
                kind: EntryKind::File,
                len: contents.len() as u64,
                mode: *mode,
                modified: Some(*modified),
            },
            MemoryNode::Directory { mode, modified, .. } => EntryMetadata {
                kind: EntryKind::Directory,
                len: 0,
                mode: *mode,
                modified: Some(*modified),
            },
        }
    }

    fn set_mode(&mut self, new_mode: u32) {
        match self {
            MemoryNode::File { mode, .. } | MemoryNode::Directory { mode, .. } => *mode = new_mode,
        }
    }

    fn set_modified(&mut self, stamp: SystemTime) {
        match self {
            MemoryNode::File { modified, .. } | MemoryNode::Directory { modified, .. } => {
                *modified = stamp
            }
        }
    }
}

#[derive(Debug, Default)]
struct Faults {
    writes: HashSet<PathBuf>,
    listings: HashSet<PathBuf>,
    stats: HashSet<PathBuf>,
}

/// In-memory [`Filesystem`] for tests.
///
/// Paths are interpreted from a single root, so `/src/a` and `src/a` name the same
/// node. Modification times come from a logical clock that ticks once per mutation.
/// Faults can be injected per path: a faulty path also affects everything below it.
///
/// Adding, renaming or removing an entry needs owner write permission on its
/// parent directory, like on a Unix disk. The builders ignore modes.
#[derive(Debug)]
pub struct MemoryFilesystem {
    root: RefCell<MemoryNode>,
    faults: RefCell<Faults>,
    clock: Cell<u64>,
    copies: Cell<usize>,
    cancel_after: RefCell<Option<(usize, CancellationToken)>>,
}

impl Default for MemoryFilesystem {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFilesystem {
    pub fn new() -> Self {
        Self {
            root: RefCell::new(MemoryNode::directory(DEFAULT_DIR_MODE, SystemTime::UNIX_EPOCH)),
            faults: RefCell::new(Faults::default()),
            clock: Cell::new(0),
            copies: Cell::new(0),
            cancel_after: RefCell::new(None),
        }
    }

    pub fn with_dir(self, path: impl AsRef<Path>) -> Self {
        self.insert_dirs(&Self::components(path.as_ref()))
            .expect("Failed to insert directory");
        self
    }

    pub fn with_file(self, path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Self {
        self.with_file_mode(path, contents, DEFAULT_FILE_MODE)
    }

    pub fn with_file_mode(
        self,
        path: impl AsRef<Path>,
        contents: impl AsRef<[u8]>,
        mode: u32,
    ) -> Self {
        let mut names = Self::components(path.as_ref());
        let name = names.pop().expect("File path must not be empty");
        self.insert_dirs(&names).expect("Failed to insert parents");
        let modified = self.tick();
        {
            let mut root = self.root.borrow_mut();
            let children = Self::children_mut(&mut root, &names).expect("Parent must exist");
            children.insert(
                name,
                MemoryNode::File {
                    contents: contents.as_ref().to_vec(),
                    mode,
                    modified,
                },
            );
        }
        self
    }

    /// Sets the mode of an entry that is already in the tree
    pub fn with_mode(self, path: impl AsRef<Path>, mode: u32) -> Self {
        self.with_node_mut(path.as_ref(), |node| node.set_mode(mode))
            .expect("Entry must exist");
        self
    }

    /// Cancels `token` as soon as the `copies`-th copy has completed
    pub fn cancel_after_copies(self, copies: usize, token: CancellationToken) -> Self {
        *self.cancel_after.borrow_mut() = Some((copies, token));
        self
    }

    /// Writes to `path` (or below it) fail with `PermissionDenied`
    pub fn fail_writes_to(self, path: impl AsRef<Path>) -> Self {
        self.faults
            .borrow_mut()
            .writes
            .insert(Self::normalize(path.as_ref()));
        self
    }

    /// Listing `path` (or anything below it) fails with `PermissionDenied`
    pub fn fail_listing_of(self, path: impl AsRef<Path>) -> Self {
        self.faults
            .borrow_mut()
            .listings
            .insert(Self::normalize(path.as_ref()));
        self
    }

    /// Looking up `path` (or anything below it) fails with `PermissionDenied`
    pub fn fail_stats_of(self, path: impl AsRef<Path>) -> Self {
        self.faults
            .borrow_mut()
            .stats
            .insert(Self::normalize(path.as_ref()));
        self
    }

    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        match self.node(path.as_ref()).ok()? {
            MemoryNode::File { contents, .. } => Some(contents),
            MemoryNode::Directory { .. } => None,
        }
    }

    pub fn mode(&self, path: impl AsRef<Path>) -> Option<u32> {
        self.node(path.as_ref()).ok().map(|node| node.metadata().mode)
    }

    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.node(path.as_ref()).is_ok()
    }

    pub fn is_dir(&self, path: impl AsRef<Path>) -> bool {
        matches!(self.node(path.as_ref()), Ok(MemoryNode::Directory { .. }))
    }

    /// Number of successful `copy` calls so far
    pub fn copy_count(&self) -> usize {
        self.copies.get()
    }

    /// Every path below `path`, relative to it, in traversal order
    pub fn paths_under(&self, path: impl AsRef<Path>) -> Vec<String> {
        fn collect(prefix: &str, node: &MemoryNode, out: &mut Vec<String>) {
            if let MemoryNode::Directory { children, .. } = node {
                for (name, child) in children {
                    let path = if prefix.is_empty() {
                        name.clone()
                    } else {
                        format!("{prefix}/{name}")
                    };
                    out.push(path.clone());
                    collect(&path, child, out);
                }
            }
        }

        let mut out = Vec::new();
        if let Ok(node) = self.node(path.as_ref()) {
            collect("", &node, &mut out);
        }
        out
    }

    fn tick(&self) -> SystemTime {
        let next = self.clock.get() + 1;
        self.clock.set(next);
        SystemTime::UNIX_EPOCH + Duration::from_secs(next)
    }

    fn components(path: &Path) -> Vec<String> {
        path.components()
            .filter_map(|component| match component {
                Component::Normal(name) => Some(name.to_string_lossy().to_string()),
                _ => None,
            })
            .collect()
    }

    fn normalize(path: &Path) -> PathBuf {
        Self::components(path).iter().collect()
    }

    fn is_faulty(faults: &HashSet<PathBuf>, path: &Path) -> bool {
        let path = Self::normalize(path);
        faults.iter().any(|faulty| path.starts_with(faulty))
    }

    fn denied(path: &Path) -> io::Error {
        io::Error::new(
            io::ErrorKind::PermissionDenied,
            format!("injected fault for {}", path.display()),
        )
    }

    fn read_only(path: &Path) -> io::Error {
        io::Error::new(
            io::ErrorKind::PermissionDenied,
            format!("{} is in a read-only directory", path.display()),
        )
    }

    fn not_found(path: &Path) -> io::Error {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} does not exist", path.display()),
        )
    }

    fn node(&self, path: &Path) -> io::Result<MemoryNode> {
        let root = self.root.borrow();
        let mut current = &*root;
        for name in Self::components(path) {
            current = match current {
                MemoryNode::Directory { children, .. } => {
                    children.get(&name).ok_or_else(|| Self::not_found(path))?
                }
                MemoryNode::File { .. } => {
                    return Err(io::Error::new(
                        io::ErrorKind::NotADirectory,
                        format!("{} passes through a file", path.display()),
                    ));
                }
            };
        }
        Ok(current.clone())
    }

    /// Fails when `path` is missing and the deepest existing directory on the way
    /// to it is not writable by its owner
    fn check_can_create(&self, path: &Path) -> io::Result<()> {
        let root = self.root.borrow();
        let mut current = &*root;
        for name in Self::components(path) {
            match current {
                MemoryNode::Directory { children, mode, .. } => match children.get(&name) {
                    Some(child) => current = child,
                    None if mode & OWNER_WRITE == 0 => return Err(Self::read_only(path)),
                    None => return Ok(()),
                },
                // The operation itself reports the broken path
                MemoryNode::File { .. } => return Ok(()),
            }
        }
        Ok(())
    }

    fn check_parent_writable(&self, path: &Path) -> io::Result<()> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };
        match self.node(parent) {
            Ok(MemoryNode::Directory { mode, .. }) if mode & OWNER_WRITE == 0 => {
                Err(Self::read_only(path))
            }
            _ => Ok(()),
        }
    }

    fn children_mut<'a>(
        root: &'a mut MemoryNode,
        names: &[String],
    ) -> io::Result<&'a mut BTreeMap<String, MemoryNode>> {
        let mut current = root;
        for name in names {
            current = match current {
                MemoryNode::Directory { children, .. } => children
                    .get_mut(name)
                    .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?,
                MemoryNode::File { .. } => return Err(io::ErrorKind::NotADirectory.into()),
            };
        }
        match current {
            MemoryNode::Directory { children, .. } => Ok(children),
            MemoryNode::File { .. } => Err(io::ErrorKind::NotADirectory.into()),
        }
    }

    fn insert_dirs(&self, names: &[String]) -> io::Result<()> {
        let modified = self.tick();
        let mut root = self.root.borrow_mut();
        let mut current = &mut *root;
        for name in names {
            current = match current {
                MemoryNode::Directory { children, .. } => children
                    .entry(name.clone())
                    .or_insert_with(|| MemoryNode::directory(DEFAULT_DIR_MODE, modified)),
                MemoryNode::File { .. } => return Err(io::ErrorKind::AlreadyExists.into()),
            };
        }
        match current {
            MemoryNode::Directory { .. } => Ok(()),
            MemoryNode::File { .. } => Err(io::ErrorKind::AlreadyExists.into()),
        }
    }

    fn with_node_mut<T>(
        &self,
        path: &Path,
        f: impl FnOnce(&mut MemoryNode) -> T,
    ) -> io::Result<T> {
        let mut names = Self::components(path);
        let name = names.pop().ok_or_else(|| Self::not_found(path))?;
        let mut root = self.root.borrow_mut();
        let children = Self::children_mut(&mut root, &names)?;
        let node = children.get_mut(&name).ok_or_else(|| Self::not_found(path))?;
        Ok(f(node))
    }
}

impl Filesystem for MemoryFilesystem {
    async fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        if Self::is_faulty(&self.faults.borrow().listings, path) {
            return Err(Self::denied(path));
        }
        match self.node(path)? {
            MemoryNode::Directory { children, .. } => Ok(children
                .iter()
                .map(|(name, child)| DirEntry {
                    name: OsString::from(name),
                    metadata: child.metadata(),
                })
                .collect()),
            MemoryNode::File { .. } => Err(io::ErrorKind::NotADirectory.into()),
        }
    }

    async fn metadata(&self, path: &Path) -> io::Result<EntryMetadata> {
        if Self::is_faulty(&self.faults.borrow().stats, path) {
            return Err(Self::denied(path));
        }
        self.node(path).map(|node| node.metadata())
    }

    // The tree holds no links, so nothing is followed either way
    async fn symlink_metadata(&self, path: &Path) -> io::Result<EntryMetadata> {
        self.metadata(path).await
    }

    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        if Self::is_faulty(&self.faults.borrow().writes, path) {
            return Err(Self::denied(path));
        }
        self.check_can_create(path)?;
        self.insert_dirs(&Self::components(path))
    }

    async fn copy(&self, from: &Path, to: &Path) -> io::Result<u64> {
        let contents = match self.node(from)? {
            MemoryNode::File { contents, .. } => contents,
            MemoryNode::Directory { .. } => return Err(io::ErrorKind::IsADirectory.into()),
        };
        if Self::is_faulty(&self.faults.borrow().writes, to) {
            return Err(Self::denied(to));
        }
        self.check_can_create(to)?;
        let mut names = Self::components(to);
        let name = names.pop().ok_or_else(|| Self::not_found(to))?;
        let modified = self.tick();
        let len = contents.len() as u64;

        {
            let mut root = self.root.borrow_mut();
            let children = Self::children_mut(&mut root, &names)?;
            let mode = match children.get(&name) {
                Some(MemoryNode::Directory { .. }) => {
                    return Err(io::ErrorKind::IsADirectory.into());
                }
                Some(MemoryNode::File { mode, .. }) => *mode,
                None => DEFAULT_FILE_MODE,
            };
            children.insert(
                name,
                MemoryNode::File {
                    contents,
                    mode,
                    modified,
                },
            );
        }

        let copies = self.copies.get() + 1;
        self.copies.set(copies);
        if let Some((after, token)) = &*self.cancel_after.borrow() {
            if copies == *after {
                token.cancel();
            }
        }
        Ok(len)
    }

    async fn set_permissions(&self, path: &Path, mode: u32) -> io::Result<()> {
        if Self::is_faulty(&self.faults.borrow().writes, path) {
            return Err(Self::denied(path));
        }
        self.with_node_mut(path, |node| node.set_mode(mode))
    }

    async fn set_modified(&self, path: &Path, modified: SystemTime) -> io::Result<()> {
        self.with_node_mut(path, |node| node.set_modified(modified))
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        if Self::is_faulty(&self.faults.borrow().writes, to) {
            return Err(Self::denied(to));
        }
        self.check_parent_writable(from)?;
        self.check_parent_writable(to)?;
        let mut from_names = Self::components(from);
        let from_name = from_names.pop().ok_or_else(|| Self::not_found(from))?;
        let mut to_names = Self::components(to);
        let to_name = to_names.pop().ok_or_else(|| Self::not_found(to))?;

        let mut root = self.root.borrow_mut();
        if let Some(MemoryNode::Directory { .. }) =
            Self::children_mut(&mut root, &to_names)?.get(&to_name)
        {
            return Err(io::ErrorKind::IsADirectory.into());
        }
        let node = Self::children_mut(&mut root, &from_names)?
            .remove(&from_name)
            .ok_or_else(|| Self::not_found(from))?;
        Self::children_mut(&mut root, &to_names)?.insert(to_name, node);
        Ok(())
    }

    async fn remove_all(&self, path: &Path) -> io::Result<()> {
        if Self::is_faulty(&self.faults.borrow().writes, path) {
            return Err(Self::denied(path));
        }
        self.check_parent_writable(path)?;
        let mut names = Self::components(path);
        let name = names.pop().ok_or_else(|| Self::not_found(path))?;
        let mut root = self.root.borrow_mut();
        Self::children_mut(&mut root, &names)?
            .remove(&name)
            .map(|_| ())
            .ok_or_else(|| Self::not_found(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[compio::test]
    async fn builder_creates_parents() {
        let fs = MemoryFilesystem::new().with_file("/src/a/b/file.txt", "content");

        assert!(fs.is_dir("/src/a/b"));
        assert_eq!(fs.contents("/src/a/b/file.txt"), Some(b"content".to_vec()));
        assert_eq!(fs.paths_under("/src"), vec!["a", "a/b", "a/b/file.txt"]);
    }

    #[compio::test]
    async fn copy_keeps_existing_mode_and_replaces_content() {
        let fs = MemoryFilesystem::new()
            .with_file("/new", "new")
            .with_file_mode("/f", "long old content", 0o600);

        let copied = fs
            .copy(Path::new("/new"), Path::new("/f"))
            .await
            .expect("Failed to copy");

        assert_eq!(copied, 3);
        assert_eq!(fs.contents("/f"), Some(b"new".to_vec()));
        assert_eq!(fs.mode("/f"), Some(0o600));
        assert_eq!(fs.copy_count(), 1);
    }

    #[compio::test]
    async fn copy_requires_existing_parent() {
        let fs = MemoryFilesystem::new().with_file("/f", "x");

        let result = fs.copy(Path::new("/f"), Path::new("/missing/f")).await;

        assert_eq!(
            result.expect_err("Expected an error").kind(),
            io::ErrorKind::NotFound
        );
    }

    #[compio::test]
    async fn injected_faults_cover_descendants() {
        let fs = MemoryFilesystem::new()
            .with_file("/f", "x")
            .with_dir("/dst/locked")
            .fail_writes_to("/dst/locked")
            .fail_listing_of("/src")
            .fail_stats_of("/stat");

        let write = fs.copy(Path::new("/f"), Path::new("/dst/locked/f")).await;
        let listing = fs.read_dir(Path::new("/src/nested")).await;
        let stat = fs.metadata(Path::new("/stat/x")).await;

        assert_eq!(write.unwrap_err().kind(), io::ErrorKind::PermissionDenied);
        assert_eq!(listing.unwrap_err().kind(), io::ErrorKind::PermissionDenied);
        assert_eq!(stat.unwrap_err().kind(), io::ErrorKind::PermissionDenied);
    }

    #[compio::test]
    async fn read_only_directory_refuses_new_and_removed_entries() {
        let fs = MemoryFilesystem::new()
            .with_file("/f", "x")
            .with_file("/ro/old", "o")
            .with_mode("/ro", 0o555);

        let copy = fs.copy(Path::new("/f"), Path::new("/ro/new")).await;
        let mkdir = fs.create_dir_all(Path::new("/ro/sub/deeper")).await;
        let remove = fs.remove_all(Path::new("/ro/old")).await;
        let rename = fs.rename(Path::new("/ro/old"), Path::new("/moved")).await;

        for result in [copy.map(|_| ()), mkdir, remove, rename] {
            assert_eq!(
                result.expect_err("Expected an error").kind(),
                io::ErrorKind::PermissionDenied
            );
        }
        assert!(fs.exists("/ro/old"));
        assert!(!fs.exists("/ro/new"));

        fs.set_permissions(Path::new("/ro"), 0o755)
            .await
            .expect("Failed to set permissions");
        fs.remove_all(Path::new("/ro/old"))
            .await
            .expect("Failed to remove after unlocking");
    }

    #[compio::test]
    async fn copies_cancel_the_token_once_reached() {
        let token = CancellationToken::new();
        let fs = MemoryFilesystem::new()
            .with_file("/f", "x")
            .cancel_after_copies(2, token.clone());

        fs.copy(Path::new("/f"), Path::new("/a"))
            .await
            .expect("Failed to copy");
        assert!(!token.is_cancelled());
        fs.copy(Path::new("/f"), Path::new("/b"))
            .await
            .expect("Failed to copy");

        assert!(token.is_cancelled());
    }

    #[compio::test]
    async fn rename_moves_node_and_refuses_directory_target() {
        let fs = MemoryFilesystem::new()
            .with_file("/d/tmp", "x")
            .with_dir("/d/dir");

        fs.rename(Path::new("/d/tmp"), Path::new("/d/final"))
            .await
            .expect("Failed to rename");
        let onto_dir = fs.rename(Path::new("/d/final"), Path::new("/d/dir")).await;

        assert!(!fs.exists("/d/tmp"));
        assert_eq!(fs.contents("/d/final"), Some(b"x".to_vec()));
        assert!(onto_dir.is_err());
    }

    #[compio::test]
    async fn remove_all_drops_whole_subtree() {
        let fs = MemoryFilesystem::new().with_file("/d/a/b/c", "x");

        fs.remove_all(Path::new("/d/a")).await.expect("Failed to remove");

        assert!(fs.exists("/d"));
        assert!(!fs.exists("/d/a"));
    }
}
