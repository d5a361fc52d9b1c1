/// diskaudit core: concurrent disk-usage indexing, hard-link deduplication
/// and usage percentages.
///
/// This crate contains all analysis logic with zero front-end dependencies.
///
/// # Modules
///
/// - [`model`]: Shared, concurrently-built file tree and formatting helpers.
/// - [`scanner`]: Analysis phases (walk, hard links, percentages) and the
///   background analysis handle.
/// - [`lookup`]: Path to node cache used by the hard-link pass.
/// - [`platform`]: Directory enumeration and hard-link queries per host.
/// - [`report`]: JSON / CSV snapshots of a finished tree.
/// - [`error`]: Error types.
pub mod error;
pub mod lookup;
pub mod model;
pub mod platform;
pub mod report;
pub mod scanner;

pub use error::AnalysisError;
pub use scanner::{analyze, start_analysis, AnalysisOptions, AnalysisReport, CancelToken};
