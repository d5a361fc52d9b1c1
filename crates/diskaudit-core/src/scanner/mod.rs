/// Scanner module: orchestrates one analysis run.
///
/// A run has three phases, separated by full thread joins:
///
/// 1. **Indexing** ([`walker`]): parallel directory walk building the tree
///    and the flat file list.
/// 2. **Hard-link resolution** ([`hardlinks`], optional): zeroes the sizes of
///    duplicate links so totals count shared data once.
/// 3. **Percentages**: local (share of parent) and global (share of root)
///    passes over the finished tree.
///
/// All phases share one [`CancelToken`]. A cancelled run is not an error: the
/// report says [`AnalysisOutcome::Cancelled`] and the tree holds whatever was
/// indexed, with consistent sizes.
///
/// [`analyze`] runs on the calling thread. [`start_analysis`] runs on a
/// background thread and hands out the live tree immediately, so a front-end
/// can render it while it grows.
pub mod hardlinks;
pub mod progress;
pub mod walker;

use crate::error::AnalysisError;
use crate::model::{FileTree, SortOrder};
use crate::platform::links::{system_link_query, LinkQuery};
use crate::platform::metadata::{FsMetadataSource, MetadataSource};
use hardlinks::HardLinkStats;
use progress::{AnalysisProgress, Phase};

use crossbeam_channel::{Receiver, Sender};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Maximum number of progress messages that may queue up in the channel.
///
/// A run sends a handful of messages, so a slow receiver never stalls the
/// analysis thread in practice.
pub const PROGRESS_CHANNEL_CAPACITY: usize = 64;

/// Cooperative cancellation signal shared by every phase of a run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the run to stop as soon as possible.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Tuning knobs of one analysis run.
#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    /// Count hard-linked file data once.
    pub dedup_hard_links: bool,
    /// Walker pool size. 0 is treated as 1.
    pub walker_threads: usize,
    /// Hard-link resolver pool size. 0 is treated as 1.
    pub resolver_threads: usize,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        let cpus = num_cpus::get();
        Self {
            dedup_hard_links: true,
            walker_threads: cpus,
            resolver_threads: cpus,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisOutcome {
    Completed,
    /// Stopped early; the tree is consistent but incomplete.
    Cancelled,
}

/// Wall-clock time spent in each phase. Skipped phases stay at zero.
#[derive(Debug, Default, Clone, Copy)]
pub struct PhaseTimings {
    pub indexing: Duration,
    pub hard_links: Duration,
    pub percentages: Duration,
}

impl PhaseTimings {
    pub fn total(&self) -> Duration {
        self.indexing + self.hard_links + self.percentages
    }
}

/// Result of a finished (or cancelled) run.
#[derive(Debug)]
pub struct AnalysisReport {
    pub tree: Arc<FileTree>,
    /// Every indexed file path, sorted.
    pub files: Vec<PathBuf>,
    pub outcome: AnalysisOutcome,
    /// Directories that could not be enumerated completely.
    pub enumeration_errors: u64,
    pub hard_links: HardLinkStats,
    pub timings: PhaseTimings,
}

/// Create the empty tree for `root`.
///
/// The root is canonicalised so paths reported by the host (hard-link
/// names in particular) share its prefix.
pub fn open_tree(root: &Path) -> Result<FileTree, AnalysisError> {
    let invalid = |source| AnalysisError::InvalidRoot {
        path: root.to_path_buf(),
        source,
    };
    let root_path = std::fs::canonicalize(root).map_err(invalid)?;
    let meta = FsMetadataSource.metadata(&root_path).map_err(invalid)?;
    if !meta.is_dir {
        return Err(AnalysisError::NotADirectory(root_path));
    }
    Ok(FileTree::new(root_path, meta.modified))
}

/// Analyse `root` on the calling thread.
pub fn analyze(
    root: &Path,
    options: &AnalysisOptions,
    cancel: &CancelToken,
) -> Result<AnalysisReport, AnalysisError> {
    let tree = Arc::new(open_tree(root)?);
    analyze_with(tree, &FsMetadataSource, None, options, cancel)
}

/// Analyse into an existing `tree` with an injected metadata source.
///
/// With `links` set to `None`, hard links are queried from the host after
/// the walk.
pub fn analyze_with(
    tree: Arc<FileTree>,
    source: &dyn MetadataSource,
    links: Option<&dyn LinkQuery>,
    options: &AnalysisOptions,
    cancel: &CancelToken,
) -> Result<AnalysisReport, AnalysisError> {
    run(tree, source, links, options, cancel, None)
}

fn run(
    tree: Arc<FileTree>,
    source: &dyn MetadataSource,
    links: Option<&dyn LinkQuery>,
    options: &AnalysisOptions,
    cancel: &CancelToken,
    progress: Option<&Sender<AnalysisProgress>>,
) -> Result<AnalysisReport, AnalysisError> {
    let notify = |msg: AnalysisProgress| {
        if let Some(tx) = progress {
            let _ = tx.send(msg);
        }
    };
    let mut timings = PhaseTimings::default();
    info!("Starting analysis of {}", tree.root_path().display());

    // ── Phase 1: indexing ────────────────────────────────────────
    notify(AnalysisProgress::Phase(Phase::Indexing));
    let start = Instant::now();
    let walked = walker::walk(&tree, source, options.walker_threads, cancel)?;
    timings.indexing = start.elapsed();

    let mut report = AnalysisReport {
        tree: tree.clone(),
        files: walked.files,
        outcome: AnalysisOutcome::Completed,
        enumeration_errors: walked.enumeration_errors,
        hard_links: HardLinkStats::default(),
        timings,
    };
    if walked.cancelled || cancel.is_cancelled() {
        return Ok(cancelled(report, &notify));
    }

    tree.sort(SortOrder::NameAsc);
    report.files.sort();

    // ── Phase 2: hard links ──────────────────────────────────────
    if options.dedup_hard_links {
        notify(AnalysisProgress::Phase(Phase::ResolvingHardLinks));
        let start = Instant::now();
        let host_links;
        let links: Option<&dyn LinkQuery> = match links {
            Some(links) => Some(links),
            None => match system_link_query(tree.root_path(), &report.files, cancel) {
                Ok(query) => {
                    host_links = query;
                    Some(host_links.as_ref())
                }
                Err(err) => {
                    warn!("Hard-link queries unavailable, keeping duplicate sizes: {err}");
                    None
                }
            },
        };
        if let Some(links) = links {
            report.hard_links = hardlinks::resolve_hard_links(
                &tree,
                &report.files,
                links,
                options.resolver_threads,
                cancel,
            )?;
        }
        report.timings.hard_links = start.elapsed();
        if cancel.is_cancelled() {
            return Ok(cancelled(report, &notify));
        }
    }

    // ── Phase 3: percentages ─────────────────────────────────────
    notify(AnalysisProgress::Phase(Phase::Percentages));
    let start = Instant::now();
    tree.compute_local_percentages();
    tree.compute_global_percentages();
    report.timings.percentages = start.elapsed();

    info!(
        "Analysis complete in {:?}: {} files, {} folders, {} bytes",
        report.timings.total(),
        tree.file_count(),
        tree.folder_count(),
        tree.total_size()
    );
    notify(AnalysisProgress::Complete {
        duration: report.timings.total(),
        files: tree.file_count(),
        folders: tree.folder_count(),
        total_size: tree.total_size(),
    });
    Ok(report)
}

fn cancelled(mut report: AnalysisReport, notify: &dyn Fn(AnalysisProgress)) -> AnalysisReport {
    info!("Analysis of {} cancelled", report.tree.root_path().display());
    report.outcome = AnalysisOutcome::Cancelled;
    notify(AnalysisProgress::Cancelled);
    report
}

/// Handle to a running or completed background analysis. Allows
/// cancellation, receiving progress updates and reading the live tree.
pub struct AnalysisHandle {
    /// Receiver for progress updates from the analysis thread.
    pub progress_rx: Receiver<AnalysisProgress>,
    /// Shared tree, populated incrementally while indexing.
    tree: Arc<FileTree>,
    cancel: CancelToken,
    thread: thread::JoinHandle<Result<AnalysisReport, AnalysisError>>,
}

impl AnalysisHandle {
    pub fn tree(&self) -> &Arc<FileTree> {
        &self.tree
    }

    /// Request the analysis to stop as soon as possible.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// A clone of the run's cancellation token, for signal handlers and
    /// other threads that outlive a borrow of the handle.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the analysis thread and return its report.
    pub fn join(self) -> Result<AnalysisReport, AnalysisError> {
        self.thread
            .join()
            .map_err(|_| AnalysisError::WorkerPanicked("analysis"))?
    }
}

/// Start a new analysis of `root` on a background thread.
///
/// The root is validated before the thread starts.
pub fn start_analysis(
    root: &Path,
    options: AnalysisOptions,
) -> Result<AnalysisHandle, AnalysisError> {
    let tree = Arc::new(open_tree(root)?);
    let (progress_tx, progress_rx) =
        crossbeam_channel::bounded::<AnalysisProgress>(PROGRESS_CHANNEL_CAPACITY);
    let cancel = CancelToken::new();

    let thread_tree = tree.clone();
    let thread_cancel = cancel.clone();
    let thread = thread::Builder::new()
        .name("diskaudit-analysis".into())
        .spawn(move || {
            let result = run(
                thread_tree,
                &FsMetadataSource,
                None,
                &options,
                &thread_cancel,
                Some(&progress_tx),
            );
            if let Err(err) = &result {
                let _ = progress_tx.send(AnalysisProgress::Failed(err.to_string()));
            }
            result
        })
        .map_err(|source| AnalysisError::Spawn {
            name: "analysis",
            source,
        })?;

    Ok(AnalysisHandle {
        progress_rx,
        tree,
        cancel,
        thread,
    })
}
