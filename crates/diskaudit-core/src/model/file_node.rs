/// A single node in the shared, concurrently-built file tree.
///
/// Nodes are reference-counted (`Arc<FileNode>`) so walker threads can keep a
/// directory alive while they enumerate it. Ownership flows downward only: a
/// parent owns its children, and each child holds a non-owning `Weak`
/// back-reference that is used for upward size propagation and path
/// reconstruction.
///
/// Sizes and percentages are atomics so they can be updated without taking
/// any lock. The children collection and the hard-link flag live behind the
/// node's own [`Mutex`], which is the only lock a node ever owns.
use crate::platform::metadata::EntryMetadata;
use compact_str::CompactString;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::SystemTime;

/// Lock-protected part of a node: its children and its flags.
#[derive(Debug, Default)]
pub struct NodeState {
    children: Vec<Arc<FileNode>>,
    /// Raw name -> position in `children`. Rebuilt whenever the order changes.
    by_name: HashMap<OsString, usize>,
    /// Set by the hard-link resolver once the node's link group was handled.
    pub is_hard_link: bool,
}

impl NodeState {
    /// Children in their current order.
    #[inline]
    pub fn children(&self) -> &[Arc<FileNode>] {
        &self.children
    }

    /// Look up a direct child by its raw name.
    pub fn child<S: AsRef<OsStr>>(&self, name: S) -> Option<&Arc<FileNode>> {
        self.by_name.get(name.as_ref()).map(|&i| &self.children[i])
    }

    pub(crate) fn push(&mut self, child: Arc<FileNode>) {
        self.by_name.insert(child.os_name.clone(), self.children.len());
        self.children.push(child);
    }

    /// Remove `child` (matched by identity). Returns `false` if it was not present.
    pub(crate) fn remove(&mut self, child: &FileNode) -> bool {
        let Some(pos) = self
            .children
            .iter()
            .position(|c| std::ptr::eq(Arc::as_ptr(c), child))
        else {
            return false;
        };
        self.children.remove(pos);
        self.reindex();
        true
    }

    pub(crate) fn sort_by<F>(&mut self, compare: F)
    where
        F: FnMut(&Arc<FileNode>, &Arc<FileNode>) -> CmpOrdering,
    {
        self.children.sort_by(compare);
        self.reindex();
    }

    pub(crate) fn clear(&mut self) {
        self.children.clear();
        self.by_name.clear();
    }

    fn reindex(&mut self) {
        self.by_name.clear();
        for (i, child) in self.children.iter().enumerate() {
            self.by_name.insert(child.os_name.clone(), i);
        }
    }
}

/// A single file or directory in the tree.
#[derive(Debug)]
pub struct FileNode {
    /// File or directory name only (NOT the full path), lossily decoded for
    /// display.
    name: CompactString,

    /// Name as the host reported it. Children are unique by this key.
    os_name: OsString,

    is_dir: bool,

    /// Symlink, junction or other redirecting entry. Reparse directories are
    /// recorded but never descended into.
    is_reparse: bool,

    modified: Option<SystemTime>,

    /// Absolute path, populated for file nodes only. Used as the lookup key
    /// during hard-link resolution.
    full_path: OnceLock<PathBuf>,

    /// Logical size in bytes. For directories this is the sum of the current
    /// sizes of all direct children once every pending propagation finished.
    size: AtomicU64,

    /// `f32` bits: share of the parent's size (0.0–100.0).
    percent_local: AtomicU32,

    /// `f32` bits: share of the scan root's size (0.0–100.0).
    percent_global: AtomicU32,

    parent: RwLock<Weak<FileNode>>,

    state: Mutex<NodeState>,
}

impl FileNode {
    /// Create a detached node from enumeration metadata.
    ///
    /// Directories always start at size 0; their size is accumulated from
    /// their contents. Reparse files (symlinks) are accounted as 0 bytes.
    pub fn from_metadata(meta: &EntryMetadata, parent: Weak<FileNode>) -> Self {
        let size = if meta.is_dir || meta.is_reparse {
            0
        } else {
            meta.size
        };
        let full_path = OnceLock::new();
        if !meta.is_dir {
            let _ = full_path.set(meta.path.clone());
        }
        Self {
            name: meta.name.clone(),
            os_name: meta.file_name().to_os_string(),
            is_dir: meta.is_dir,
            is_reparse: meta.is_reparse,
            modified: meta.modified,
            full_path,
            size: AtomicU64::new(size),
            percent_local: AtomicU32::new(0),
            percent_global: AtomicU32::new(0),
            parent: RwLock::new(parent),
            state: Mutex::new(NodeState::default()),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw name, exact even when it is not valid UTF-8.
    #[inline]
    pub fn os_name(&self) -> &OsStr {
        &self.os_name
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    #[inline]
    pub fn is_file(&self) -> bool {
        !self.is_dir
    }

    #[inline]
    pub fn is_reparse(&self) -> bool {
        self.is_reparse
    }

    #[inline]
    pub fn last_modified(&self) -> Option<SystemTime> {
        self.modified
    }

    /// Current size in bytes. May still be converging while a scan runs.
    #[inline]
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    #[inline]
    pub fn percent_local(&self) -> f32 {
        f32::from_bits(self.percent_local.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn percent_global(&self) -> f32 {
        f32::from_bits(self.percent_global.load(Ordering::Relaxed))
    }

    #[inline]
    pub(crate) fn set_percent_local(&self, value: f32) {
        self.percent_local.store(value.to_bits(), Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn set_percent_global(&self, value: f32) {
        self.percent_global.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Absolute path of a file node, `None` for directories.
    pub fn full_path(&self) -> Option<&Path> {
        self.full_path.get().map(PathBuf::as_path)
    }

    pub(crate) fn set_full_path(&self, path: &Path) {
        let _ = self.full_path.set(path.to_path_buf());
    }

    /// `true` once the hard-link resolver marked this node's link group.
    pub fn is_hard_link(&self) -> bool {
        self.state.lock().is_hard_link
    }

    /// The parent node, or `None` for the root and for detached nodes.
    pub fn parent(&self) -> Option<Arc<FileNode>> {
        self.parent.read().upgrade()
    }

    pub(crate) fn detach(&self) {
        *self.parent.write() = Weak::new();
    }

    /// Take this node's lock. Guards the children collection and flags.
    ///
    /// Never hold this while locking an ancestor or descendant outside the
    /// tree's own operations.
    pub fn lock(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock()
    }

    /// Non-blocking variant of [`lock`](Self::lock).
    pub fn try_lock(&self) -> Option<MutexGuard<'_, NodeState>> {
        self.state.try_lock()
    }

    /// Snapshot of the children in their current order.
    pub fn children(&self) -> Vec<Arc<FileNode>> {
        self.state.lock().children.clone()
    }

    pub fn child_count(&self) -> usize {
        self.state.lock().children.len()
    }

    /// Direct child with the given raw name.
    pub fn child<S: AsRef<OsStr>>(&self, name: S) -> Option<Arc<FileNode>> {
        self.state.lock().child(name).cloned()
    }

    /// Add `delta` to this node and every ancestor, refreshing each
    /// ancestor's children percentages along the way.
    pub fn add_size_traverse(&self, delta: u64) {
        self.size.fetch_add(delta, Ordering::AcqRel);
        let mut current = self.parent();
        while let Some(node) = current {
            node.size.fetch_add(delta, Ordering::AcqRel);
            node.update_children_percent();
            current = node.parent();
        }
    }

    /// Subtract `delta` from this node and every ancestor.
    pub fn remove_size_traverse(&self, delta: u64) {
        self.size.fetch_sub(delta, Ordering::AcqRel);
        let mut current = self.parent();
        while let Some(node) = current {
            node.size.fetch_sub(delta, Ordering::AcqRel);
            node.update_children_percent();
            current = node.parent();
        }
    }

    /// Replace a file's size and push the difference through the ancestors.
    /// Returns the previous size.
    pub(crate) fn replace_file_size(&self, size: u64) -> u64 {
        let old = self.size.swap(size, Ordering::AcqRel);
        if let Some(parent) = self.parent() {
            match size.cmp(&old) {
                CmpOrdering::Greater => parent.add_size_traverse(size - old),
                CmpOrdering::Less => parent.remove_size_traverse(old - size),
                CmpOrdering::Equal => {}
            }
        }
        old
    }

    pub(crate) fn reset_size(&self) {
        self.size.store(0, Ordering::Release);
    }

    fn update_children_percent(&self) {
        if self.is_file() {
            return;
        }
        let state = self.state.lock();
        let total = self.size();
        for child in &state.children {
            child.set_percent_local(percent_of(child.size(), total));
        }
    }
}

/// `part` as a percentage of `whole`, 0 when `whole` is empty.
#[inline]
pub fn percent_of(part: u64, whole: u64) -> f32 {
    if whole > 0 {
        (part as f64 / whole as f64 * 100.0) as f32
    } else {
        0.0
    }
}
