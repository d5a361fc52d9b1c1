/// Parallel directory walker: builds the tree and the flat file list.
///
/// One worker thread per processor pulls directory tasks from a shared
/// `crossbeam-channel` queue. Each worker also keeps a private FIFO queue and
/// drains it first, since work a worker discovered itself is cheapest for it
/// to continue. Newly found subdirectories go to the private queue only while
/// the shared queue has enough work to keep every other worker busy;
/// otherwise they feed the shared queue.
///
/// # Termination
///
/// `pending` counts tasks that are queued (shared or private) or being
/// processed. It is incremented before a task is enqueued and decremented
/// only after the task's own subdirectories were enqueued, so it can reach
/// zero only when no work is left anywhere. A worker whose queues are empty
/// blocks on the shared queue for at most [`IDLE_WAIT`], then re-checks
/// `pending` and the cancellation flag.
///
/// # Lock contention
///
/// Files of one directory are inserted with size propagation deferred; the
/// directory's total is pushed up the ancestor chain once, after its
/// enumeration. File/folder counters are thread-local and flushed to the
/// tree's atomics every [`COUNTER_FLUSH_BATCH`] entries.
use super::CancelToken;
use crate::error::AnalysisError;
use crate::model::{FileNode, FileTree};
use crate::platform::metadata::{EntryMetadata, MetadataSource};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Private-queue capacity: beyond this, discovered work is shared.
pub const LOCAL_QUEUE_THRESHOLD: usize = 16;

/// Shared-queue length below which other workers are considered starving.
pub const STARVATION_THRESHOLD: usize = 16;

/// Thread-local counters are flushed to the tree once they exceed this.
pub const COUNTER_FLUSH_BATCH: u64 = 1_024;

/// Longest time an idle worker blocks before re-checking for termination
/// and cancellation.
pub const IDLE_WAIT: Duration = Duration::from_millis(50);

/// A directory waiting to be enumerated.
struct DirTask {
    meta: EntryMetadata,
    /// `None` for the scan root, whose node already exists.
    parent: Option<Arc<FileNode>>,
}

/// Result of a walk.
#[derive(Debug, Default)]
pub struct WalkOutcome {
    /// Every file path discovered, in no particular order.
    pub files: Vec<PathBuf>,
    /// Directories whose enumeration failed or stopped early.
    pub enumeration_errors: u64,
    pub cancelled: bool,
}

/// Whether a newly discovered directory should stay in the worker's private
/// queue rather than go to the shared one.
///
/// Work is hoarded only while the shared queue already holds more than
/// [`STARVATION_THRESHOLD`] tasks, and never beyond
/// [`LOCAL_QUEUE_THRESHOLD`] private tasks.
#[inline]
pub fn keep_local(local_len: usize, shared_len: usize) -> bool {
    shared_len > STARVATION_THRESHOLD && local_len < LOCAL_QUEUE_THRESHOLD
}

/// Walk the directory tree below `tree.root_path()` with `threads` workers.
///
/// Enumeration failures are logged and counted, never fatal. On
/// cancellation every worker returns at its next check; the tree keeps
/// whatever was inserted, with sizes consistent for what it contains.
pub fn walk(
    tree: &FileTree,
    source: &dyn MetadataSource,
    threads: usize,
    cancel: &CancelToken,
) -> Result<WalkOutcome, AnalysisError> {
    let threads = threads.max(1);
    let start = Instant::now();

    let (shared_tx, shared_rx) = crossbeam_channel::unbounded::<DirTask>();
    let pending = AtomicUsize::new(1);
    let root_task = DirTask {
        meta: EntryMetadata {
            path: tree.root_path().to_path_buf(),
            name: tree.root().name().into(),
            is_dir: true,
            is_reparse: false,
            size: 0,
            modified: tree.root().last_modified(),
        },
        parent: None,
    };
    // Cannot fail: `shared_rx` is alive.
    let _ = shared_tx.send(root_task);

    let results = thread::scope(|scope| {
        let mut handles = Vec::with_capacity(threads);
        for i in 0..threads {
            let worker = Worker::new(tree, source, cancel, &shared_tx, &shared_rx, &pending);
            let handle = thread::Builder::new()
                .name(format!("diskaudit-walker-{i}"))
                .spawn_scoped(scope, move || worker.run())
                .map_err(|source| AnalysisError::Spawn {
                    name: "walker",
                    source,
                })?;
            handles.push(handle);
        }
        handles
            .into_iter()
            .map(|h| h.join().map_err(|_| AnalysisError::WorkerPanicked("walker")))
            .collect::<Result<Vec<WorkerResult>, AnalysisError>>()
    })?;

    let mut outcome = WalkOutcome::default();
    for result in results {
        outcome.files.extend(result.files);
        outcome.enumeration_errors += result.errors;
        outcome.cancelled |= result.cancelled;
    }
    outcome.cancelled |= cancel.is_cancelled();

    debug!(
        "Walk finished in {:?}: {} files, {} folders, {} enumeration errors{}",
        start.elapsed(),
        outcome.files.len(),
        tree.folder_count(),
        outcome.enumeration_errors,
        if outcome.cancelled { " (cancelled)" } else { "" }
    );
    Ok(outcome)
}

struct WorkerResult {
    files: Vec<PathBuf>,
    errors: u64,
    cancelled: bool,
}

enum Next {
    Task(DirTask),
    Idle,
    Done,
}

struct Worker<'a> {
    tree: &'a FileTree,
    source: &'a dyn MetadataSource,
    cancel: &'a CancelToken,
    shared_tx: Sender<DirTask>,
    shared_rx: Receiver<DirTask>,
    pending: &'a AtomicUsize,
    local: VecDeque<DirTask>,
    files: Vec<PathBuf>,
    file_count: u64,
    folder_count: u64,
    errors: u64,
}

impl<'a> Worker<'a> {
    fn new(
        tree: &'a FileTree,
        source: &'a dyn MetadataSource,
        cancel: &'a CancelToken,
        shared_tx: &Sender<DirTask>,
        shared_rx: &Receiver<DirTask>,
        pending: &'a AtomicUsize,
    ) -> Self {
        Self {
            tree,
            source,
            cancel,
            shared_tx: shared_tx.clone(),
            shared_rx: shared_rx.clone(),
            pending,
            local: VecDeque::new(),
            files: Vec::new(),
            file_count: 0,
            folder_count: 0,
            errors: 0,
        }
    }

    fn run(mut self) -> WorkerResult {
        loop {
            if self.cancel.is_cancelled() {
                // Counters are not flushed: the run is abandoned.
                return self.finish(true);
            }
            match self.next_task() {
                Next::Task(task) => {
                    self.process(task);
                    self.pending.fetch_sub(1, Ordering::AcqRel);
                }
                Next::Idle => continue,
                Next::Done => {
                    self.flush_counters();
                    return self.finish(false);
                }
            }
        }
    }

    fn next_task(&mut self) -> Next {
        if let Some(task) = self.local.pop_front() {
            return Next::Task(task);
        }
        if let Ok(task) = self.shared_rx.try_recv() {
            return Next::Task(task);
        }
        if self.pending.load(Ordering::Acquire) == 0 {
            return Next::Done;
        }
        match self.shared_rx.recv_timeout(IDLE_WAIT) {
            Ok(task) => Next::Task(task),
            Err(RecvTimeoutError::Timeout) => Next::Idle,
            // Every worker holds a sender, so this only happens once all
            // workers are gone.
            Err(RecvTimeoutError::Disconnected) => Next::Done,
        }
    }

    fn process(&mut self, task: DirTask) {
        let node = match &task.parent {
            Some(parent) => self.tree.add_or_get_child(parent, &task.meta, false),
            None => self.tree.root().clone(),
        };

        if task.meta.is_reparse {
            trace!("Not descending into reparse point {}", task.meta.path.display());
            return;
        }

        let entries = match self.source.read_dir(&task.meta.path) {
            Ok(entries) => entries,
            Err(err) => {
                self.errors += 1;
                debug!("Cannot enumerate {}: {err}", task.meta.path.display());
                return;
            }
        };

        let mut folder_size: u64 = 0;
        for entry in entries {
            if self.cancel.is_cancelled() {
                break;
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    self.errors += 1;
                    debug!("Enumeration of {} stopped: {err}", task.meta.path.display());
                    break;
                }
            };

            if entry.is_dir {
                self.folder_count += 1;
                self.schedule(DirTask {
                    meta: entry,
                    parent: Some(node.clone()),
                });
            } else {
                let (file, created) = self.tree.insert_child(&node, &entry, false);
                if created {
                    folder_size += file.size();
                    self.file_count += 1;
                    self.files.push(entry.path);
                }
            }
        }

        // Applied even after a failure or cancellation so the ancestors stay
        // consistent with the children that were inserted.
        if folder_size > 0 {
            node.add_size_traverse(folder_size);
        }

        if self.file_count > COUNTER_FLUSH_BATCH {
            self.tree.add_file_count(self.file_count);
            self.file_count = 0;
        }
        if self.folder_count > COUNTER_FLUSH_BATCH {
            self.tree.add_folder_count(self.folder_count);
            self.folder_count = 0;
        }
    }

    fn schedule(&mut self, task: DirTask) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        if keep_local(self.local.len(), self.shared_rx.len()) {
            self.local.push_back(task);
        } else if let Err(err) = self.shared_tx.send(task) {
            self.local.push_back(err.into_inner());
        }
    }

    fn flush_counters(&mut self) {
        self.tree.add_file_count(self.file_count);
        self.tree.add_folder_count(self.folder_count);
        self.file_count = 0;
        self.folder_count = 0;
    }

    fn finish(self, cancelled: bool) -> WorkerResult {
        WorkerResult {
            files: self.files,
            errors: self.errors,
            cancelled,
        }
    }
}
