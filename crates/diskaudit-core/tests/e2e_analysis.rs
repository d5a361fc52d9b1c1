/// End-to-end analysis integration tests.
///
/// These run the real walker, hard-link resolver and percentage passes
/// against temporary directories, through both the synchronous `analyze`
/// entry point and the background `start_analysis` handle.
use diskaudit_core::model::{FileNode, FileTree, SortOrder};
use diskaudit_core::platform::links::NoLinks;
use diskaudit_core::platform::metadata::{
    DirEntries, EntryMetadata, FsMetadataSource, MetadataSource,
};
use diskaudit_core::scanner::progress::{AnalysisProgress, Phase};
use diskaudit_core::scanner::{
    analyze, analyze_with, open_tree, start_analysis, AnalysisOptions, AnalysisOutcome,
    CancelToken,
};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

// ── Helpers ──────────────────────────────────────────────────────────────────

fn write_bytes(path: &Path, n: usize) {
    fs::write(path, vec![0u8; n]).unwrap();
}

fn options(threads: usize) -> AnalysisOptions {
    AnalysisOptions {
        dedup_hard_links: true,
        walker_threads: threads,
        resolver_threads: 1,
    }
}

/// Every directory's size equals the sum of its children's sizes.
fn assert_sizes_consistent(node: &FileNode) {
    if node.is_file() {
        return;
    }
    let children = node.children();
    let sum: u64 = children.iter().map(|c| c.size()).sum();
    assert_eq!(node.size(), sum, "directory {} is inconsistent", node.name());
    for child in &children {
        assert_sizes_consistent(child);
    }
}

/// Real filesystem source that cancels `token` when the `limit`-th entry
/// is enumerated, counting entries across every directory.
struct CancelAfterEntries {
    seen: AtomicUsize,
    limit: usize,
    token: CancelToken,
}

impl MetadataSource for CancelAfterEntries {
    fn metadata(&self, path: &Path) -> io::Result<EntryMetadata> {
        FsMetadataSource.metadata(path)
    }

    fn read_dir<'a>(&'a self, dir: &Path) -> io::Result<DirEntries<'a>> {
        let entries = FsMetadataSource.read_dir(dir)?;
        Ok(Box::new(entries.inspect(move |_| {
            if self.seen.fetch_add(1, Ordering::SeqCst) + 1 == self.limit {
                self.token.cancel();
            }
        })))
    }
}

fn node(tree: &FileTree, relative: &str) -> Arc<FileNode> {
    tree.find(&tree.root_path().join(relative))
        .unwrap_or_else(|| panic!("{relative} not in tree"))
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[test]
fn empty_directory_is_a_zero_sized_node() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir(tmp.path().join("empty")).unwrap();

    let report = analyze(tmp.path(), &options(2), &CancelToken::new()).unwrap();
    let tree = &report.tree;

    let empty = node(tree, "empty");
    assert!(empty.is_dir());
    assert_eq!(empty.size(), 0);
    assert_eq!(empty.percent_local(), 0.0);
    assert_eq!(tree.file_count(), 0);
    assert_eq!(tree.folder_count(), 1);
    assert!(report.files.is_empty());
}

#[test]
fn sizes_and_percentages_follow_the_tree() {
    let tmp = TempDir::new().unwrap();
    write_bytes(&tmp.path().join("a.txt"), 100);
    fs::create_dir(tmp.path().join("b")).unwrap();
    write_bytes(&tmp.path().join("b").join("c.txt"), 300);

    let report = analyze(tmp.path(), &options(4), &CancelToken::new()).unwrap();
    let tree = &report.tree;

    assert_eq!(report.outcome, AnalysisOutcome::Completed);
    assert_eq!(tree.total_size(), 400);
    assert_eq!(node(tree, "b").size(), 300);
    assert!((node(tree, "b/c.txt").percent_global() - 75.0).abs() < 0.01);
    assert!((node(tree, "a.txt").percent_global() - 25.0).abs() < 0.01);
    assert!((node(tree, "b/c.txt").percent_local() - 100.0).abs() < 0.01);

    let global_sum: f32 = tree.root().children().iter().map(|c| c.percent_global()).sum();
    assert!((global_sum - 100.0).abs() < 0.01);

    // The file list is sorted and absolute.
    assert_eq!(report.files.len(), 2);
    assert!(report.files.windows(2).all(|w| w[0] <= w[1]));
    assert!(report.files.iter().all(|f| f.starts_with(tree.root_path())));
}

#[cfg(unix)]
#[test]
fn hard_links_are_counted_once() {
    let tmp = TempDir::new().unwrap();
    let x = tmp.path().join("x");
    write_bytes(&x, 500);
    fs::hard_link(&x, tmp.path().join("y")).unwrap();

    let report = analyze(tmp.path(), &options(2), &CancelToken::new()).unwrap();
    let tree = &report.tree;

    let x = node(tree, "x");
    let y = node(tree, "y");
    assert_eq!(x.size(), 500);
    assert_eq!(y.size(), 0);
    assert!(x.is_hard_link());
    assert!(y.is_hard_link());
    assert_eq!(tree.total_size(), 500);
    assert_eq!(report.hard_links.groups, 1);
    assert_eq!(report.hard_links.bytes_deduplicated, 500);
}

#[cfg(unix)]
#[test]
fn keep_hard_links_counts_every_name() {
    let tmp = TempDir::new().unwrap();
    let x = tmp.path().join("x");
    write_bytes(&x, 500);
    fs::hard_link(&x, tmp.path().join("y")).unwrap();

    let options = AnalysisOptions {
        dedup_hard_links: false,
        ..options(2)
    };
    let report = analyze(tmp.path(), &options, &CancelToken::new()).unwrap();

    assert_eq!(report.tree.total_size(), 1000);
    assert!(!node(&report.tree, "y").is_hard_link());
    assert_eq!(report.timings.hard_links, Duration::ZERO);
}

#[cfg(unix)]
#[test]
fn symlinked_directory_is_not_descended() {
    let tmp = TempDir::new().unwrap();
    let real = tmp.path().join("real");
    fs::create_dir(&real).unwrap();
    write_bytes(&real.join("data.bin"), 250);
    std::os::unix::fs::symlink(&real, tmp.path().join("alias")).unwrap();
    std::os::unix::fs::symlink(real.join("data.bin"), tmp.path().join("file-alias")).unwrap();

    let report = analyze(tmp.path(), &options(2), &CancelToken::new()).unwrap();
    let tree = &report.tree;

    let alias = node(tree, "alias");
    assert!(alias.is_dir());
    assert!(alias.is_reparse());
    assert_eq!(alias.child_count(), 0);
    assert_eq!(node(tree, "file-alias").size(), 0);
    assert_eq!(tree.total_size(), 250);
}

#[test]
fn cancelled_analysis_leaves_a_consistent_tree() {
    let tmp = TempDir::new().unwrap();
    for d in 0..60 {
        let dir = tmp.path().join(format!("dir{d:02}"));
        fs::create_dir(&dir).unwrap();
        for s in 0..3 {
            let sub = dir.join(format!("sub{s}"));
            fs::create_dir(&sub).unwrap();
            for f in 0..10 {
                write_bytes(&sub.join(format!("f{f}")), 16);
            }
        }
    }

    let handle = start_analysis(tmp.path(), options(4)).unwrap();
    handle.cancel();
    assert!(handle.is_cancelled());

    let started = Instant::now();
    let report = handle.join().unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));

    let tree = &report.tree;
    assert_sizes_consistent(tree.root());
    // No node lock was left held.
    assert!(tree.root().try_lock().is_some());
    for child in tree.root().children() {
        assert!(child.try_lock().is_some());
    }
    if report.outcome == AnalysisOutcome::Completed {
        assert_eq!(tree.total_size(), 60 * 3 * 10 * 16);
    }
}

#[test]
fn background_analysis_reports_every_phase() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir(tmp.path().join("alpha")).unwrap();
    write_bytes(&tmp.path().join("alpha").join("a.txt"), 100);
    write_bytes(&tmp.path().join("d.zip"), 400);

    let handle = start_analysis(tmp.path(), options(2)).unwrap();
    let live = handle.tree().clone();

    let deadline = Instant::now() + Duration::from_secs(30);
    let mut phases = Vec::new();
    let mut completed = None;
    while completed.is_none() {
        assert!(Instant::now() < deadline, "analysis did not complete");
        match handle.progress_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(AnalysisProgress::Phase(phase)) => phases.push(phase),
            Ok(AnalysisProgress::Complete {
                files, total_size, ..
            }) => completed = Some((files, total_size)),
            Ok(other) => panic!("unexpected progress message {other:?}"),
            Err(_) => {}
        }
    }

    assert_eq!(
        phases,
        [Phase::Indexing, Phase::ResolvingHardLinks, Phase::Percentages]
    );
    assert_eq!(completed, Some((2, 500)));

    let report = handle.join().unwrap();
    assert!(Arc::ptr_eq(&live, &report.tree));
    assert_eq!(live.total_size(), 500);
}

#[test]
fn removal_and_sorting_through_the_public_tree() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir(tmp.path().join("big")).unwrap();
    fs::create_dir(tmp.path().join("small")).unwrap();
    write_bytes(&tmp.path().join("big").join("blob"), 900);
    write_bytes(&tmp.path().join("small").join("note"), 10);
    write_bytes(&tmp.path().join("top.txt"), 90);

    let report = analyze(tmp.path(), &options(2), &CancelToken::new()).unwrap();
    let tree = &report.tree;

    tree.sort(SortOrder::PercentDesc);
    let names: Vec<String> = tree
        .root()
        .children()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    assert_eq!(names, ["big", "small", "top.txt"]);

    let big = node(tree, "big");
    assert!(tree.remove_node(&big));
    assert!(!tree.remove_node(&big));
    assert_eq!(tree.total_size(), 100);
    assert!(tree.find(&tree.root_path().join("big/blob")).is_none());
    assert_sizes_consistent(tree.root());

    // Paths outside the root resolve to nothing.
    assert!(tree.find(Path::new("/definitely/elsewhere")).is_none());
}

#[test]
fn root_must_be_a_directory() {
    let tmp = TempDir::new().unwrap();
    let file = tmp.path().join("plain");
    write_bytes(&file, 1);

    let err = analyze(&file, &options(1), &CancelToken::new()).unwrap_err();
    assert!(matches!(
        err,
        diskaudit_core::AnalysisError::NotADirectory(_)
    ));
}

#[test]
fn cancellation_mid_directory_keeps_partial_sizes_consistent() {
    let tmp = TempDir::new().unwrap();
    for d in 0..10 {
        let dir = tmp.path().join(format!("dir{d}"));
        fs::create_dir(&dir).unwrap();
        for f in 0..5 {
            write_bytes(&dir.join(format!("f{f}")), 10);
        }
    }

    // One walker: the root yields entries 1..=10, then each directory five
    // files. Entry 23 is the third file of the third directory, so that
    // directory stops after two files.
    let token = CancelToken::new();
    let source = CancelAfterEntries {
        seen: AtomicUsize::new(0),
        limit: 23,
        token: token.clone(),
    };
    let tree = Arc::new(open_tree(tmp.path()).unwrap());
    let report = analyze_with(tree, &source, Some(&NoLinks), &options(1), &token).unwrap();
    let tree = &report.tree;

    assert_eq!(report.outcome, AnalysisOutcome::Cancelled);
    assert_eq!(report.files.len(), 12);
    assert_eq!(tree.total_size(), 120);

    let mut sizes: Vec<u64> = tree.root().children().iter().map(|c| c.size()).collect();
    sizes.sort_unstable();
    assert_eq!(sizes, [20, 50, 50]);
    assert_sizes_consistent(tree.root());
    assert!(tree.root().try_lock().is_some());
    for child in tree.root().children() {
        assert!(child.try_lock().is_some());
    }
}

#[cfg(target_os = "linux")]
#[test]
fn names_that_are_not_utf8_are_all_counted() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let tmp = TempDir::new().unwrap();
    let first = tmp.path().join(OsStr::from_bytes(b"a\xff"));
    let second = tmp.path().join(OsStr::from_bytes(b"a\xfe"));
    write_bytes(&first, 100);
    write_bytes(&second, 300);

    let report = analyze(tmp.path(), &options(2), &CancelToken::new()).unwrap();
    let tree = &report.tree;

    assert_eq!(tree.total_size(), 400);
    assert_eq!(tree.file_count(), 2);
    assert_eq!(report.files.len(), 2);
    assert_eq!(tree.root().child_count(), 2);

    let root = tree.root_path();
    let second_node = tree.find(&root.join(OsStr::from_bytes(b"a\xfe"))).unwrap();
    assert_eq!(second_node.size(), 300);
    assert_eq!(tree.find(&root.join(OsStr::from_bytes(b"a\xff"))).unwrap().size(), 100);
}
