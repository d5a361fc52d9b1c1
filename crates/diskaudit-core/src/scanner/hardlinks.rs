/// Hard-link resolver: zeroes duplicate size accounting for linked files.
///
/// Runs after the walk, on the sorted file list, against a frozen
/// [`LookupCache`] warmed from the finished tree. The list is split into
/// contiguous ranges, one per worker: link queries cost about the same for
/// every file, so static partitioning balances well enough.
///
/// For each file with more than one link, every group member inside the scan
/// root is resolved to its node and locked. If no member is flagged yet, all
/// are flagged and every member except the file being processed gets its
/// size set to 0, with the difference pushed up the ancestor chain. A group
/// that is already flagged was handled by an earlier file (on this worker or
/// another), so it is left alone: running the resolver twice changes nothing.
///
/// Group members are locked in sorted path order, so two workers racing on
/// the same group always contend for the first lock instead of deadlocking.
///
/// Which member keeps its size depends on which file of the group a worker
/// reaches first; with several workers that is not necessarily the
/// lexicographically first path.
use super::CancelToken;
use crate::error::AnalysisError;
use crate::lookup::LookupCache;
use crate::model::{FileNode, FileTree};
use crate::platform::links::LinkQuery;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::debug;

/// Totals of one resolver run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HardLinkStats {
    /// Link groups flagged by this run.
    pub groups: u64,
    /// Bytes removed from the tree by zeroing duplicates.
    pub bytes_deduplicated: u64,
    /// Files whose link query failed (treated as unlinked).
    pub query_errors: u64,
}

impl HardLinkStats {
    fn merge(&mut self, other: HardLinkStats) {
        self.groups += other.groups;
        self.bytes_deduplicated += other.bytes_deduplicated;
        self.query_errors += other.query_errors;
    }
}

/// Contiguous range of `len` items handled by worker `index` of `workers`.
///
/// The ranges of all workers cover `0..len` exactly once.
pub fn partition(len: usize, workers: usize, index: usize) -> Range<usize> {
    let workers = workers.max(1);
    (index * len / workers)..((index + 1) * len / workers)
}

/// Deduplicate hard-linked files in `tree`.
///
/// `files` must be the file list produced by the walk that built `tree`.
/// Returns [`AnalysisError::StaleLookup`] if a group member inside the scan
/// root is unknown to the tree.
pub fn resolve_hard_links(
    tree: &FileTree,
    files: &[PathBuf],
    links: &dyn LinkQuery,
    threads: usize,
    cancel: &CancelToken,
) -> Result<HardLinkStats, AnalysisError> {
    let threads = threads.max(1);
    let start = Instant::now();

    let mut cache = LookupCache::new(tree);
    cache.warmup(true);
    let cache = &cache;

    // Stops the other workers once one of them hit a stale lookup.
    let failed = AtomicBool::new(false);
    let failed = &failed;

    let results = thread::scope(|scope| {
        let mut handles = Vec::with_capacity(threads);
        for i in 0..threads {
            let slice = &files[partition(files.len(), threads, i)];
            let handle = thread::Builder::new()
                .name(format!("diskaudit-links-{i}"))
                .spawn_scoped(scope, move || {
                    let result = resolve_slice(tree, cache, slice, links, cancel, failed);
                    if result.is_err() {
                        failed.store(true, Ordering::Relaxed);
                    }
                    result
                })
                .map_err(|source| AnalysisError::Spawn {
                    name: "hard-link",
                    source,
                })?;
            handles.push(handle);
        }
        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .map_err(|_| AnalysisError::WorkerPanicked("hard-link"))
            })
            .collect::<Result<Vec<Result<HardLinkStats, AnalysisError>>, AnalysisError>>()
    })?;

    let mut stats = HardLinkStats::default();
    for result in results {
        stats.merge(result?);
    }

    debug!(
        "Hard-link pass finished in {:?}: {} groups, {} bytes deduplicated, {} query errors",
        start.elapsed(),
        stats.groups,
        stats.bytes_deduplicated,
        stats.query_errors
    );
    Ok(stats)
}

fn resolve_slice(
    tree: &FileTree,
    cache: &LookupCache<'_>,
    files: &[PathBuf],
    links: &dyn LinkQuery,
    cancel: &CancelToken,
    failed: &AtomicBool,
) -> Result<HardLinkStats, AnalysisError> {
    let mut stats = HardLinkStats::default();
    for file in files {
        if cancel.is_cancelled() || failed.load(Ordering::Relaxed) {
            break;
        }
        let group = match links.hard_links(file) {
            Ok(group) => group,
            Err(err) => {
                stats.query_errors += 1;
                debug!("Hard-link query failed for {}: {err}", file.display());
                continue;
            }
        };
        if group.len() < 2 {
            continue;
        }
        if let Some(bytes) = resolve_group(tree, cache, file, group)? {
            stats.groups += 1;
            stats.bytes_deduplicated += bytes;
        }
    }
    Ok(stats)
}

/// Flag and deduplicate one link group. Returns the bytes removed, or `None`
/// when the group was already handled or has no node in the tree.
fn resolve_group(
    tree: &FileTree,
    cache: &LookupCache<'_>,
    owner: &Path,
    mut group: Vec<PathBuf>,
) -> Result<Option<u64>, AnalysisError> {
    group.sort();
    group.dedup();

    let mut nodes: Vec<Arc<FileNode>> = Vec::with_capacity(group.len());
    for link in &group {
        // Names outside the scan root have no node.
        if !link.starts_with(tree.root_path()) {
            continue;
        }
        if let Some(node) = cache.find(link)? {
            nodes.push(node);
        }
    }
    if nodes.is_empty() {
        return Ok(None);
    }

    let mut guards: Vec<_> = nodes.iter().map(|n| n.lock()).collect();
    if guards.iter().any(|g| g.is_hard_link) {
        return Ok(None);
    }

    let mut removed = 0;
    for (node, guard) in nodes.iter().zip(guards.iter_mut()) {
        guard.is_hard_link = true;
        if node.full_path() == Some(owner) {
            continue;
        }
        removed += node.replace_file_size(0);
    }
    Ok(Some(removed))
}
