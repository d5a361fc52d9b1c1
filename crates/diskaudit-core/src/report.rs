/// Serialisable snapshots of a finished tree.
///
/// A [`TreeReport`] copies what a front-end needs out of the live tree, so
/// it can be written as JSON or flattened to CSV without holding any node
/// lock. Depth-limited: entries below `max_depth` are summarised by their
/// directory only.
use crate::model::{FileNode, FileTree};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

/// One node of the report.
#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    pub name: String,
    pub path: PathBuf,
    pub is_dir: bool,
    pub is_hard_link: bool,
    pub size: u64,
    pub percent_local: f32,
    pub percent_global: f32,
    pub last_modified: Option<DateTime<Utc>>,
    /// Omitted for files and for directories cut off by the depth limit.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ReportEntry>,
}

/// Snapshot of a whole tree.
#[derive(Debug, Clone, Serialize)]
pub struct TreeReport {
    pub root: PathBuf,
    pub generated_at: DateTime<Utc>,
    pub total_size: u64,
    pub files: u64,
    pub folders: u64,
    pub entries: Vec<ReportEntry>,
}

/// One row of the flattened CSV export.
#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    path: String,
    kind: &'static str,
    size: u64,
    percent_local: f32,
    percent_global: f32,
    hard_link: bool,
    modified: Option<&'a DateTime<Utc>>,
}

/// A file in the top-N listing.
#[derive(Debug, Clone, Serialize)]
pub struct LargestFile {
    pub path: PathBuf,
    pub size: u64,
    pub percent_global: f32,
}

/// Snapshot the tree's root children, `max_depth` levels deep
/// (`None` for the whole tree).
pub fn build_report(tree: &FileTree, max_depth: Option<usize>) -> TreeReport {
    let entries = tree
        .root()
        .children()
        .iter()
        .map(|child| entry(tree, child, 1, max_depth))
        .collect();
    TreeReport {
        root: tree.root_path().to_path_buf(),
        generated_at: Utc::now(),
        total_size: tree.total_size(),
        files: tree.file_count(),
        folders: tree.folder_count(),
        entries,
    }
}

fn entry(tree: &FileTree, node: &FileNode, depth: usize, max_depth: Option<usize>) -> ReportEntry {
    let children = if node.is_dir() && max_depth.map_or(true, |max| depth < max) {
        node.children()
            .iter()
            .map(|child| entry(tree, child, depth + 1, max_depth))
            .collect()
    } else {
        Vec::new()
    };
    ReportEntry {
        name: node.name().to_string(),
        path: tree.full_path(node),
        is_dir: node.is_dir(),
        is_hard_link: node.is_hard_link(),
        size: node.size(),
        percent_local: node.percent_local(),
        percent_global: node.percent_global(),
        last_modified: node.last_modified().map(DateTime::<Utc>::from),
        children,
    }
}

impl TreeReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Write every entry as one CSV row, depth-first, parents before
    /// their children.
    pub fn write_csv<W: io::Write>(&self, writer: W) -> csv::Result<()> {
        let mut writer = csv::Writer::from_writer(writer);
        let mut stack: Vec<&ReportEntry> = self.entries.iter().rev().collect();
        while let Some(entry) = stack.pop() {
            writer.serialize(CsvRow {
                path: entry.path.display().to_string(),
                kind: if entry.is_dir { "dir" } else { "file" },
                size: entry.size,
                percent_local: entry.percent_local,
                percent_global: entry.percent_global,
                hard_link: entry.is_hard_link,
                modified: entry.last_modified.as_ref(),
            })?;
            stack.extend(entry.children.iter().rev());
        }
        writer.flush()?;
        Ok(())
    }
}

/// The `n` largest files of the tree, largest first.
///
/// `select_nth_unstable_by` brings the top `n` to the front in linear time;
/// only those are then sorted.
pub fn top_files(tree: &FileTree, n: usize) -> Vec<LargestFile> {
    if n == 0 {
        return Vec::new();
    }
    let mut files: Vec<Arc<FileNode>> = tree.enumerate_files();
    let by_size_desc = |a: &Arc<FileNode>, b: &Arc<FileNode>| {
        b.size().cmp(&a.size()).then_with(|| a.name().cmp(b.name()))
    };
    if files.len() > n {
        files.select_nth_unstable_by(n - 1, by_size_desc);
        files.truncate(n);
    }
    files.sort_unstable_by(by_size_desc);

    files
        .iter()
        .map(|node| LargestFile {
            path: tree.full_path(node),
            size: node.size(),
            percent_global: node.percent_global(),
        })
        .collect()
}
