/// Analysis progress reporting: lightweight messages sent from the analysis
/// thread to whoever holds the [`AnalysisHandle`](super::AnalysisHandle).

use std::time::Duration;

/// Stages of one analysis run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Parallel directory walk building the tree.
    Indexing,
    /// Hard-link deduplication (only when enabled).
    ResolvingHardLinks,
    /// Local and global percentage passes.
    Percentages,
}

/// Progress updates sent from the analysis thread.
///
/// The tree itself is shared through the handle; these messages carry only
/// status and totals.
#[derive(Debug)]
pub enum AnalysisProgress {
    /// A new phase started.
    Phase(Phase),
    /// The run finished; the tree is complete and annotated.
    Complete {
        duration: Duration,
        files: u64,
        folders: u64,
        total_size: u64,
    },
    /// The run was cancelled; the tree is consistent but incomplete.
    Cancelled,
    /// The run stopped on an error.
    Failed(String),
}
