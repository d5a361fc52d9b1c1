/// Path -> node cache used by the hard-link resolver.
///
/// The cache has two modes behind one interface:
///
/// - **Warm (unfrozen)**: a miss falls back to [`FileTree::find`] and the
///   result, including absence, is memoised. Tolerates incremental discovery.
/// - **Frozen**: an immutable map built by [`LookupCache::warmup`] with
///   `freeze = true`. Lookups are lock-free, and a query for a path the cache
///   was not warmed with returns [`LookupError::NotWarmed`] instead of `None`.
///
/// The frozen contract is strict on purpose: the resolver warms the cache
/// from the same finished tree whose file list it then iterates, so an
/// unknown key means the two have drifted apart and the run must stop rather
/// than silently skip a link group member.
use crate::error::LookupError;
use crate::model::{FileNode, FileTree};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct LookupCache<'t> {
    tree: &'t FileTree,
    warm: RwLock<HashMap<PathBuf, Option<Arc<FileNode>>>>,
    frozen: Option<HashMap<PathBuf, Arc<FileNode>>>,
}

impl<'t> LookupCache<'t> {
    pub fn new(tree: &'t FileTree) -> Self {
        Self {
            tree,
            warm: RwLock::new(HashMap::new()),
            frozen: None,
        }
    }

    /// Populate the cache from every file node of the tree, skipping nodes
    /// without a full path. With `freeze`, switch to the strict read-only
    /// mode.
    pub fn warmup(&mut self, freeze: bool) {
        let files = self.tree.enumerate_files();
        let warm = self.warm.get_mut();
        warm.reserve(files.len());
        for file in files {
            let Some(path) = file.full_path() else {
                continue;
            };
            warm.entry(path.to_path_buf()).or_insert(Some(file.clone()));
        }

        if freeze {
            let frozen = warm
                .drain()
                .filter_map(|(path, node)| node.map(|n| (path, n)))
                .collect();
            self.frozen = Some(frozen);
        }
    }

    #[inline]
    pub fn is_frozen(&self) -> bool {
        self.frozen.is_some()
    }

    /// Number of cached paths (including memoised misses when unfrozen).
    pub fn len(&self) -> usize {
        match &self.frozen {
            Some(frozen) => frozen.len(),
            None => self.warm.read().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up the node for `path`.
    ///
    /// Unfrozen: `Ok(None)` when the tree has no such node. Frozen: an
    /// unknown path is [`LookupError::NotWarmed`].
    pub fn find(&self, path: &Path) -> Result<Option<Arc<FileNode>>, LookupError> {
        if let Some(frozen) = &self.frozen {
            return frozen
                .get(path)
                .cloned()
                .map(Some)
                .ok_or_else(|| LookupError::NotWarmed(path.to_path_buf()));
        }

        if let Some(hit) = self.warm.read().get(path) {
            return Ok(hit.clone());
        }
        let node = self.tree.find(path);
        self.warm
            .write()
            .entry(path.to_path_buf())
            .or_insert_with(|| node.clone());
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::metadata::EntryMetadata;
    use compact_str::CompactString;

    fn entry(parent: &Path, name: &str, is_dir: bool, size: u64) -> EntryMetadata {
        EntryMetadata {
            path: parent.join(name),
            name: CompactString::new(name),
            is_dir,
            is_reparse: false,
            size,
            modified: None,
        }
    }

    fn sample_tree() -> FileTree {
        let tree = FileTree::new(PathBuf::from("/data"), None);
        let root = tree.root().clone();
        let logs = tree.add_or_get_child(&root, &entry(tree.root_path(), "logs", true, 0), false);
        tree.add_or_get_child(&logs, &entry(&tree.root_path().join("logs"), "a.log", false, 10), true);
        tree.add_or_get_child(&root, &entry(tree.root_path(), "b.bin", false, 20), true);
        tree
    }

    #[test]
    fn frozen_cache_returns_warmed_files() {
        let tree = sample_tree();
        let mut cache = LookupCache::new(&tree);
        cache.warmup(true);

        assert!(cache.is_frozen());
        assert_eq!(cache.len(), 2);
        let node = cache.find(Path::new("/data/logs/a.log")).unwrap().unwrap();
        assert_eq!(node.size(), 10);
    }

    #[test]
    fn frozen_cache_rejects_unknown_paths() {
        let tree = sample_tree();
        let mut cache = LookupCache::new(&tree);
        cache.warmup(true);

        // Directories are never warmed, so even an existing node is unknown.
        assert_eq!(
            cache.find(Path::new("/data/logs")).unwrap_err(),
            LookupError::NotWarmed(PathBuf::from("/data/logs"))
        );
        assert!(cache.find(Path::new("/data/nope")).is_err());
    }

    #[test]
    fn unfrozen_cache_falls_back_and_memoises() {
        let tree = sample_tree();
        let mut cache = LookupCache::new(&tree);
        cache.warmup(false);
        assert_eq!(cache.len(), 2);

        let dir = cache.find(Path::new("/data/logs")).unwrap();
        assert!(dir.is_some_and(|d| d.is_dir()));
        assert_eq!(cache.find(Path::new("/data/nope")).unwrap().map(|n| n.size()), None);
        assert_eq!(cache.len(), 4);
    }
}
