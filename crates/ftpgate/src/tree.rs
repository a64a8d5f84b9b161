//! In-memory directory tree of an FTP server and its JSON rendering.

use serde::Serialize;
use time::OffsetDateTime;

/// A directory node. The root of a tree has an empty `path` and `name`.
///
/// Every child's `path` is its parent's `path` + `/` + its `name`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directory {
    pub path: String,
    pub name: String,
    pub size: Option<u64>,
    pub subdirectories: Vec<Directory>,
    pub files: Vec<FileEntry>,
    /// Set once this directory's own children have been enumerated.
    pub last_updated: Option<OffsetDateTime>,
    /// The listing of this subtree failed or was cut off by a walk limit.
    pub incomplete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: String,
    pub name: String,
    pub size: Option<u64>,
    pub modified_at: Option<OffsetDateTime>,
}

impl Directory {
    /// An empty, unpopulated root.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn child_path(&self, name: &str) -> String {
        format!("{}/{}", self.path, name)
    }

    pub fn push_directory(&mut self, name: &str, size: Option<u64>) {
        let dir = Directory {
            path: self.child_path(name),
            name: name.to_owned(),
            size,
            ..Directory::default()
        };
        self.subdirectories.push(dir);
    }

    pub fn push_file(&mut self, name: &str, size: Option<u64>, modified_at: Option<OffsetDateTime>) {
        let file = FileEntry {
            path: self.child_path(name),
            name: name.to_owned(),
            size,
            modified_at,
        };
        self.files.push(file);
    }

    pub fn is_empty(&self) -> bool {
        self.subdirectories.is_empty() && self.files.is_empty()
    }

    /// Number of nodes below this directory (not counting itself).
    pub fn descendant_count(&self) -> usize {
        self.files.len()
            + self
                .subdirectories
                .iter()
                .map(|d| 1 + d.descendant_count())
                .sum::<usize>()
    }
}

/// A borrowed tree node, as produced by path resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRef<'a> {
    Directory(&'a Directory),
    File(&'a FileEntry),
}

impl<'a> NodeRef<'a> {
    pub fn path(self) -> &'a str {
        match self {
            NodeRef::Directory(d) => &d.path,
            NodeRef::File(f) => &f.path,
        }
    }

    /// Shallow JSON view of this node.
    pub fn view(self) -> NodeView<'a> {
        match self {
            NodeRef::Directory(d) => NodeView::Directory(DirectoryView::new(d)),
            NodeRef::File(f) => NodeView::File(FileView::new(f)),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum NodeView<'a> {
    Directory(DirectoryView<'a>),
    File(FileView<'a>),
}

/// A directory with its immediate children. Child directories are rendered as summaries
/// without their own children.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryView<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    path: &'a str,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    #[serde(
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    last_updated: Option<OffsetDateTime>,
    incomplete: bool,
    dirs: Vec<DirectorySummary<'a>>,
    files: Vec<FileView<'a>>,
}

impl<'a> DirectoryView<'a> {
    fn new(dir: &'a Directory) -> Self {
        Self {
            kind: "dir",
            path: &dir.path,
            name: &dir.name,
            size: dir.size,
            last_updated: dir.last_updated,
            incomplete: dir.incomplete,
            dirs: dir.subdirectories.iter().map(DirectorySummary::new).collect(),
            files: dir.files.iter().map(FileView::new).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectorySummary<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    path: &'a str,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    #[serde(
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    last_updated: Option<OffsetDateTime>,
    incomplete: bool,
}

impl<'a> DirectorySummary<'a> {
    fn new(dir: &'a Directory) -> Self {
        Self {
            kind: "dir",
            path: &dir.path,
            name: &dir.name,
            size: dir.size,
            last_updated: dir.last_updated,
            incomplete: dir.incomplete,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FileView<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    path: &'a str,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    #[serde(
        rename = "date",
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    modified_at: Option<OffsetDateTime>,
}

impl<'a> FileView<'a> {
    fn new(file: &'a FileEntry) -> Self {
        Self {
            kind: "file",
            path: &file.path,
            name: &file.name,
            size: file.size,
            modified_at: file.modified_at,
        }
    }
}

/// Response body for metadata requests: the node view plus the static note.
#[derive(Debug, Serialize)]
pub struct NodeResponse<'a> {
    #[serde(flatten)]
    pub node: NodeView<'a>,
    pub note: &'a str,
}
