/// Shared file tree with thread-safe incremental size aggregation.
///
/// Unlike a batch-built arena, this tree is mutated concurrently by every
/// walker thread: nodes are inserted under their parent's lock and sizes are
/// pushed up the ancestor chain with atomic adds, so a reader can observe a
/// consistent (if incomplete) tree at any point during a scan.
use super::file_node::{percent_of, FileNode};
use crate::error::TreeError;
use crate::platform::metadata::EntryMetadata;
use compact_str::CompactString;
use rayon::prelude::*;
use std::cmp::Ordering as CmpOrdering;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::SystemTime;

/// Ordering applied by [`FileTree::sort`].
///
/// Directories always come before files, whatever the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    NameAsc,
    NameDesc,
    PercentAsc,
    PercentDesc,
}

impl SortOrder {
    fn compare(self, a: &FileNode, b: &FileNode) -> CmpOrdering {
        let dirs_first = b.is_dir().cmp(&a.is_dir());
        if dirs_first != CmpOrdering::Equal {
            return dirs_first;
        }
        let by_name = || {
            a.name()
                .cmp(b.name())
                .then_with(|| a.os_name().cmp(b.os_name()))
        };
        let by_percent = || {
            a.percent_local()
                .total_cmp(&b.percent_local())
                .then_with(by_name)
        };
        match self {
            Self::NameAsc => by_name(),
            Self::NameDesc => by_name().reverse(),
            Self::PercentAsc => by_percent(),
            Self::PercentDesc => by_percent().reverse(),
        }
    }
}

/// The complete file tree produced by an analysis run.
#[derive(Debug)]
pub struct FileTree {
    root: Arc<FileNode>,

    /// Absolute path of the scan root. Node paths are resolved against it.
    root_path: PathBuf,

    /// Running totals, flushed in batches by the walker threads. Exact only
    /// after every walker thread terminated.
    files: AtomicU64,
    folders: AtomicU64,
}

impl FileTree {
    /// Create a tree containing only the root directory.
    pub fn new(root_path: PathBuf, modified: Option<SystemTime>) -> Self {
        let name = root_display_name(&root_path);
        let meta = EntryMetadata {
            path: root_path.clone(),
            name: CompactString::new(&name),
            is_dir: true,
            is_reparse: false,
            size: 0,
            modified,
        };
        Self {
            root: Arc::new(FileNode::from_metadata(&meta, Weak::new())),
            root_path,
            files: AtomicU64::new(0),
            folders: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn root(&self) -> &Arc<FileNode> {
        &self.root
    }

    #[inline]
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Total size of the scan root.
    #[inline]
    pub fn total_size(&self) -> u64 {
        self.root.size()
    }

    pub fn file_count(&self) -> u64 {
        self.files.load(Ordering::Relaxed)
    }

    pub fn folder_count(&self) -> u64 {
        self.folders.load(Ordering::Relaxed)
    }

    pub fn add_file_count(&self, files: u64) {
        self.files.fetch_add(files, Ordering::Relaxed);
    }

    pub fn add_folder_count(&self, folders: u64) {
        self.folders.fetch_add(folders, Ordering::Relaxed);
    }

    /// Idempotent insert: return the child of `parent` named `meta.name`,
    /// creating it if it does not exist yet.
    ///
    /// With `auto_size` set, a newly created file immediately propagates its
    /// size to every ancestor. Directories never do; their size is
    /// accumulated once their own contents are known.
    pub fn add_or_get_child(
        &self,
        parent: &Arc<FileNode>,
        meta: &EntryMetadata,
        auto_size: bool,
    ) -> Arc<FileNode> {
        self.insert_child(parent, meta, auto_size).0
    }

    /// Like [`add_or_get_child`](Self::add_or_get_child), also reporting
    /// whether the node was created by this call.
    pub(crate) fn insert_child(
        &self,
        parent: &Arc<FileNode>,
        meta: &EntryMetadata,
        auto_size: bool,
    ) -> (Arc<FileNode>, bool) {
        let (node, created) = {
            let mut state = parent.lock();
            match state.child(meta.file_name()) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let node = Arc::new(FileNode::from_metadata(meta, Arc::downgrade(parent)));
                    state.push(node.clone());
                    (node, true)
                }
            }
        };

        if node.is_file() {
            node.set_full_path(&meta.path);
            if created && auto_size {
                parent.add_size_traverse(node.size());
            }
        }
        (node, created)
    }

    /// Detach `node` from its parent, subtract its size from every ancestor,
    /// and drop its children.
    ///
    /// Returns `false` if the node has no parent (the root, or a node that
    /// was already removed).
    pub fn remove_node(&self, node: &Arc<FileNode>) -> bool {
        let Some(parent) = node.parent() else {
            return false;
        };
        let removed = parent.lock().remove(node);
        if !removed {
            return false;
        }
        parent.remove_size_traverse(node.size());
        node.lock().clear();
        node.detach();
        true
    }

    /// Replace the size of a file node, propagating the difference upward.
    pub fn set_size(&self, node: &FileNode, size: u64) -> Result<(), TreeError> {
        if node.is_dir() {
            return Err(TreeError::NotAFile(node.name().to_string()));
        }
        node.replace_file_size(size);
        Ok(())
    }

    /// Resolve an absolute path to its node.
    ///
    /// Returns `None` for paths outside the scan root or with any segment
    /// that does not resolve.
    pub fn find(&self, path: &Path) -> Option<Arc<FileNode>> {
        let relative = path.strip_prefix(&self.root_path).ok()?;
        let mut node = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(segment) => {
                    let next = node.child(segment)?;
                    node = next;
                }
                Component::CurDir => continue,
                _ => return None,
            }
        }
        Some(node)
    }

    /// Reconstruct the absolute path of a node by walking up to the root.
    pub fn full_path(&self, node: &FileNode) -> PathBuf {
        if let Some(path) = node.full_path() {
            return path.to_path_buf();
        }
        let mut segments = Vec::new();
        let mut current = node.parent();
        if current.is_some() {
            segments.push(node.os_name().to_os_string());
        }
        while let Some(n) = current {
            let parent = n.parent();
            if parent.is_some() {
                segments.push(n.os_name().to_os_string());
            }
            current = parent;
        }
        let mut path = self.root_path.clone();
        for segment in segments.iter().rev() {
            path.push(segment);
        }
        path
    }

    /// Set `percent_local` of every non-root node to its share of its
    /// parent's size. Must run after all structural mutation finished.
    pub fn compute_local_percentages(&self) {
        compute_local(&self.root);
    }

    /// Set `percent_global` of every non-root node to its share of the root.
    ///
    /// The root size is captured once, before the pass starts.
    pub fn compute_global_percentages(&self) {
        let total = self.root.size();
        compute_global(&self.root, total);
    }

    /// Every file node reachable from the root.
    ///
    /// Takes one node lock at a time, so it is safe to call while other
    /// threads read the tree.
    pub fn enumerate_files(&self) -> Vec<Arc<FileNode>> {
        let mut files = Vec::new();
        let mut stack = vec![self.root.clone()];
        while let Some(node) = stack.pop() {
            if node.is_file() {
                files.push(node);
                continue;
            }
            let state = node.lock();
            stack.extend(state.children().iter().cloned());
        }
        files
    }

    /// Sort the children of every directory in the tree.
    pub fn sort(&self, order: SortOrder) {
        let mut stack = vec![self.root.clone()];
        while let Some(node) = stack.pop() {
            let mut state = node.lock();
            state.sort_by(|a, b| order.compare(a, b));
            stack.extend(state.children().iter().filter(|c| c.is_dir()).cloned());
        }
    }

    /// Drop every node below the root and reset sizes and totals.
    pub fn clear(&self) {
        self.root.lock().clear();
        self.root.reset_size();
        self.files.store(0, Ordering::Relaxed);
        self.folders.store(0, Ordering::Relaxed);
    }
}

fn compute_local(parent: &FileNode) {
    let parent_size = parent.size();
    parent.children().par_iter().for_each(|child| {
        if child.is_dir() {
            compute_local(child);
        }
        child.set_percent_local(percent_of(child.size(), parent_size));
    });
}

fn compute_global(parent: &FileNode, total: u64) {
    parent.children().par_iter().for_each(|child| {
        if child.is_dir() {
            compute_global(child, total);
        }
        child.set_percent_global(percent_of(child.size(), total));
    });
}

/// Derive a display name for the scan root.
fn root_display_name(path: &Path) -> String {
    match path.file_name() {
        Some(name) => name.to_string_lossy().to_string(),
        None => {
            let s = path.to_string_lossy();
            let trimmed = s.trim_end_matches(['\\', '/']);
            if trimmed.is_empty() {
                s.to_string()
            } else {
                trimmed.to_string()
            }
        }
    }
}
