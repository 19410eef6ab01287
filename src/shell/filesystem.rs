//! In-memory filesystem backing the emulated shell.
//!
//! The tree is stored as an inode table (id -> node) with directory entries
//! naming child ids, so removals never move node data around. Paths handed to
//! the public operations are canonicalized first: `.` is dropped, `..` walks
//! up and stops at the root, and a leading `/` resolves from the root. Every
//! node carries the name of the user that created it; existing nodes can only
//! be rewritten or removed by "root".

use std::collections::HashMap;
use std::fmt;
use std::io::Read;

use flate2::read::GzDecoder;
use tar::Archive;

pub const ROOT_USER: &str = "root";

pub type NodeId = u64;

#[derive(Clone, Debug)]
pub enum NodeKind {
    Directory(Vec<DirEntry>),
    File(Vec<u8>),
}

#[derive(Clone, Debug)]
pub struct DirEntry {
    pub name: String,
    pub node: NodeId,
}

#[derive(Clone, Debug)]
pub struct Node {
    pub kind: NodeKind,
    pub owner: String,
}

impl Node {
    fn directory(owner: &str) -> Self {
        Node {
            kind: NodeKind::Directory(Vec::new()),
            owner: owner.to_string(),
        }
    }

    fn file(owner: &str, content: Vec<u8>) -> Self {
        Node {
            kind: NodeKind::File(content),
            owner: owner.to_string(),
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory(_))
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum FsError {
    NotFound,
    NotADirectory,
    IsADirectory,
    PermissionDenied,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsError::NotFound => write!(f, "No such file or directory"),
            FsError::NotADirectory => write!(f, "Not a directory"),
            FsError::IsADirectory => write!(f, "Is a directory"),
            FsError::PermissionDenied => write!(f, "Permission denied"),
        }
    }
}

impl std::error::Error for FsError {}

#[derive(Debug)]
pub struct Filesystem {
    nodes: HashMap<NodeId, Node>,
    root: NodeId,
    next_id: NodeId,
}

impl Default for Filesystem {
    fn default() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(1, Node::directory(ROOT_USER));
        Filesystem {
            nodes,
            root: 1,
            next_id: 2,
        }
    }
}

impl Filesystem {
    /// An empty filesystem with only the root directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// The filesystem every honeypot session sees: a handful of bait files
    /// sitting in the root directory, waiting to be exfiltrated.
    pub fn seeded() -> Self {
        let mut fs = Self::new();
        let seed: [(&str, &str); 3] = [
            ("usr.txt", "eberk0, cswyne, edan, aroullier, john, henk"),
            (
                "pwd.txt",
                "$2a$04$3ise9UoQ38ceyn6qUmb8neC8UyQnfNiog8ObMSPx.4KLV/vYU0XaC, \
                 $2a$04$Z2Orf4kkPuwncqrXae7L1uE5elj1Em9fhw4f8PmwS4POBAdvfzRPa, \
                 $2a$04$NkF1cDQf6CSkF83zfucmtO8.yChntXtG8HLB2zJJiZTiKIR2yHbTa, \
                 $2a$04$VFAUxOCo5hZuKjQqN6FW/.6TNoLQjFdId02Fk0pPhC0NmWiyUjwCW, \
                 $2a$04$y/dBmr4B7zWaNGpTNpjqUuZRHz9bxBaH0LwfEouan2283rBxoLWxu, \
                 $2a$04$ATK3lPdtQokdeoBJh.aOweV9h9yU6SMSQ24b7jXDZeUoHC0sMWmZS",
            ),
            (
                "cc.txt",
                "null, 4936739041871256, null, 5133014750298309, 3531203913896199, 4405957561612502",
            ),
        ];
        for (name, content) in seed {
            fs.write_file(&format!("/{name}"), ROOT_USER, Some(content.as_bytes()))
                .expect("seeding a fresh filesystem cannot fail");
        }
        fs
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Resolve `path` against the canonical directory `base` into a canonical
    /// absolute path. `..` above the root is clamped to the root.
    pub fn canonicalize(base: &str, path: &str) -> String {
        let joined = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("{}/{}", base, path)
        };
        let mut segments: Vec<&str> = Vec::new();
        for segment in joined.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                other => segments.push(other),
            }
        }
        if segments.is_empty() {
            "/".to_string()
        } else {
            format!("/{}", segments.join("/"))
        }
    }

    /// Look up `path` relative to the canonical directory `base`. Returns the
    /// canonical path alongside the node id when the path exists.
    pub fn lookup(&self, base: &str, path: &str) -> (String, Option<NodeId>) {
        let canonical = Self::canonicalize(base, path);
        let id = self.walk(&canonical);
        (canonical, id)
    }

    fn walk(&self, canonical: &str) -> Option<NodeId> {
        let mut current = self.root;
        for component in canonical.split('/').filter(|s| !s.is_empty()) {
            let node = self.nodes.get(&current)?;
            let NodeKind::Directory(entries) = &node.kind else {
                return None;
            };
            current = entries.iter().find(|e| e.name == component)?.node;
        }
        Some(current)
    }

    /// File content of `id`, or `None` when the node is missing or a directory.
    pub fn read_file(&self, id: NodeId) -> Option<&[u8]> {
        match &self.nodes.get(&id)?.kind {
            NodeKind::File(content) => Some(content),
            NodeKind::Directory(_) => None,
        }
    }

    /// Names of the entries of the directory `id`, in insertion order.
    pub fn list(&self, id: NodeId) -> Option<Vec<String>> {
        match &self.nodes.get(&id)?.kind {
            NodeKind::Directory(entries) => {
                Some(entries.iter().map(|e| e.name.clone()).collect())
            }
            NodeKind::File(_) => None,
        }
    }

    /// Create the file at the canonical absolute path `path`, or rewrite it.
    ///
    /// `content = None` creates an empty file but leaves an existing file's
    /// content untouched (`touch`). Rewriting an existing node is reserved to
    /// "root"; creating a new entry is always permitted.
    pub fn write_file(
        &mut self,
        path: &str,
        user: &str,
        content: Option<&[u8]>,
    ) -> Result<(), FsError> {
        let (parent_path, name) = split_parent(path)?;
        let parent = self.walk(parent_path).ok_or(FsError::NotFound)?;
        let existing = {
            let NodeKind::Directory(entries) = &self.nodes[&parent].kind else {
                return Err(FsError::NotADirectory);
            };
            entries.iter().find(|e| e.name == name).map(|e| e.node)
        };
        match existing {
            Some(id) => {
                if user != ROOT_USER {
                    return Err(FsError::PermissionDenied);
                }
                let node = self.nodes.get_mut(&id).ok_or(FsError::NotFound)?;
                match &mut node.kind {
                    NodeKind::Directory(_) => Err(FsError::IsADirectory),
                    NodeKind::File(existing_content) => {
                        if let Some(content) = content {
                            *existing_content = content.to_vec();
                        }
                        Ok(())
                    }
                }
            }
            None => {
                let id = self.allocate(Node::file(user, content.unwrap_or_default().to_vec()));
                self.link(parent, name, id);
                Ok(())
            }
        }
    }

    /// Create the directory at the canonical absolute path `path`, creating
    /// missing intermediate directories. Existing directories along the way
    /// are fine; a file in the way is not.
    pub fn mkdir_all(&mut self, path: &str, user: &str) -> Result<NodeId, FsError> {
        let mut current = self.root;
        for component in path.split('/').filter(|s| !s.is_empty()) {
            let existing = {
                let NodeKind::Directory(entries) = &self.nodes[&current].kind else {
                    return Err(FsError::NotADirectory);
                };
                entries.iter().find(|e| e.name == component).map(|e| e.node)
            };
            current = match existing {
                Some(id) => {
                    if !self.nodes[&id].is_dir() {
                        return Err(FsError::NotADirectory);
                    }
                    id
                }
                None => {
                    let id = self.allocate(Node::directory(user));
                    self.link(current, component, id);
                    id
                }
            };
        }
        Ok(current)
    }

    /// Remove the file at the canonical absolute path `path`. Directories are
    /// not removable, and existing entries can only be removed by "root".
    pub fn remove(&mut self, path: &str, user: &str) -> Result<(), FsError> {
        let (parent_path, name) = split_parent(path)?;
        let parent = self.walk(parent_path).ok_or(FsError::NotFound)?;
        let target = {
            let NodeKind::Directory(entries) = &self.nodes[&parent].kind else {
                return Err(FsError::NotADirectory);
            };
            entries
                .iter()
                .find(|e| e.name == name)
                .map(|e| e.node)
                .ok_or(FsError::NotFound)?
        };
        if self.nodes[&target].is_dir() {
            return Err(FsError::IsADirectory);
        }
        if user != ROOT_USER {
            return Err(FsError::PermissionDenied);
        }
        if let Some(NodeKind::Directory(entries)) =
            self.nodes.get_mut(&parent).map(|n| &mut n.kind)
        {
            entries.retain(|e| e.name != name);
        }
        self.nodes.remove(&target);
        Ok(())
    }

    /// Overlay a gzipped tarball onto the tree, owned by "root". Directories
    /// and regular files are materialized; other entry types are skipped.
    pub fn overlay_targz<R: Read>(&mut self, reader: R) -> std::io::Result<()> {
        let mut archive = Archive::new(GzDecoder::new(reader));
        for entry in archive.entries()? {
            let mut entry = entry?;
            let path = format!("/{}", entry.path()?.to_string_lossy());
            let canonical = Self::canonicalize("/", &path);
            let header_type = entry.header().entry_type();
            if header_type.is_dir() {
                if let Err(err) = self.mkdir_all(&canonical, ROOT_USER) {
                    log::warn!("skipping archive directory {canonical}: {err}");
                }
            } else if header_type.is_file() {
                let mut content = Vec::new();
                entry.read_to_end(&mut content)?;
                if canonical != "/" {
                    let (parent, _) = split_parent(&canonical).map_err(|_| {
                        std::io::Error::new(std::io::ErrorKind::InvalidData, "bad archive path")
                    })?;
                    if let Err(err) = self.mkdir_all(parent, ROOT_USER) {
                        log::warn!("skipping archive file {canonical}: {err}");
                        continue;
                    }
                }
                if let Err(err) = self.write_file(&canonical, ROOT_USER, Some(&content)) {
                    log::warn!("skipping archive file {canonical}: {err}");
                }
            } else {
                log::debug!("skipping archive entry {canonical}: unsupported type");
            }
        }
        Ok(())
    }

    fn allocate(&mut self, node: Node) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        self.nodes.insert(id, node);
        id
    }

    fn link(&mut self, parent: NodeId, name: &str, child: NodeId) {
        if let Some(NodeKind::Directory(entries)) =
            self.nodes.get_mut(&parent).map(|n| &mut n.kind)
        {
            entries.push(DirEntry {
                name: name.to_string(),
                node: child,
            });
        }
    }
}

fn split_parent(canonical: &str) -> Result<(&str, &str), FsError> {
    let (parent, name) = canonical.rsplit_once('/').ok_or(FsError::NotFound)?;
    if name.is_empty() {
        return Err(FsError::NotFound);
    }
    Ok((if parent.is_empty() { "/" } else { parent }, name))
}
