//! diskaudit: parallel disk usage analyser.
//!
//! Thin binary entry point. All logic lives in the `diskaudit-core` crate.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use diskaudit_core::model::size::{format_count, format_percent, format_size};
use diskaudit_core::model::{FileNode, SortOrder};
use diskaudit_core::report::{build_report, top_files};
use diskaudit_core::scanner::progress::AnalysisProgress;
use diskaudit_core::scanner::{start_analysis, AnalysisOptions, AnalysisOutcome};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "diskaudit", version, about = "Disk usage report with hard-link aware totals")]
struct Args {
    /// Directory to analyse
    root: PathBuf,
    /// Count every hard link at full size instead of once per file
    #[arg(long)]
    keep_hard_links: bool,
    /// Worker threads per phase (defaults to the number of CPUs)
    #[arg(short, long)]
    threads: Option<usize>,
    /// Order of the children of every directory
    #[arg(long, value_enum, default_value_t = SortArg::PercentDesc)]
    sort: SortArg,
    /// Levels of the tree to print (all when omitted)
    #[arg(short, long)]
    depth: Option<usize>,
    #[arg(short, long, value_enum, default_value_t = Format::Tree)]
    format: Format,
    /// Also list the N largest files
    #[arg(long)]
    top: Option<usize>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SortArg {
    NameAsc,
    NameDesc,
    PercentAsc,
    PercentDesc,
}

impl From<SortArg> for SortOrder {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::NameAsc => SortOrder::NameAsc,
            SortArg::NameDesc => SortOrder::NameDesc,
            SortArg::PercentAsc => SortOrder::PercentAsc,
            SortArg::PercentDesc => SortOrder::PercentDesc,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Tree,
    Json,
    Csv,
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr so reports can be piped.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    let mut options = AnalysisOptions {
        dedup_hard_links: !args.keep_hard_links,
        ..AnalysisOptions::default()
    };
    if let Some(threads) = args.threads {
        options.walker_threads = threads;
        options.resolver_threads = threads;
    }

    let handle = start_analysis(&args.root, options)
        .with_context(|| format!("cannot analyse {}", args.root.display()))?;

    // Ctrl-C stops the run; whatever was indexed so far is still reported.
    let cancel = handle.cancel_token();
    ctrlc::set_handler(move || {
        tracing::warn!("Interrupt received, stopping analysis");
        cancel.cancel();
    })
    .context("failed to set Ctrl-C handler")?;
    for msg in handle.progress_rx.iter() {
        match msg {
            AnalysisProgress::Phase(phase) => tracing::info!("Phase: {phase:?}"),
            AnalysisProgress::Complete { duration, .. } => {
                tracing::info!("Finished in {duration:.2?}");
                break;
            }
            AnalysisProgress::Cancelled | AnalysisProgress::Failed(_) => break,
        }
    }
    let report = handle.join().context("analysis failed")?;
    if report.outcome == AnalysisOutcome::Cancelled {
        tracing::warn!("Analysis was cancelled; totals are incomplete");
    }
    if report.enumeration_errors > 0 {
        tracing::warn!(
            "{} directories could not be read completely",
            report.enumeration_errors
        );
    }

    let tree = &report.tree;
    tree.sort(args.sort.into());

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match args.format {
        Format::Tree => {
            writeln!(
                out,
                "{}  {}  ({} files, {} folders)",
                tree.root_path().display(),
                format_size(tree.total_size()),
                format_count(tree.file_count()),
                format_count(tree.folder_count()),
            )?;
            if report.hard_links.groups > 0 {
                writeln!(
                    out,
                    "hard links: {} groups, {} counted once",
                    format_count(report.hard_links.groups),
                    format_size(report.hard_links.bytes_deduplicated),
                )?;
            }
            print_children(&mut out, tree.root(), 1, args.depth)?;
        }
        Format::Json => {
            let json = build_report(tree, args.depth).to_json()?;
            writeln!(out, "{json}")?;
        }
        Format::Csv => build_report(tree, args.depth).write_csv(&mut out)?,
    }

    if let Some(n) = args.top {
        writeln!(out)?;
        writeln!(out, "Largest files:")?;
        for file in top_files(tree, n) {
            writeln!(
                out,
                "{:>10}  {:>7}  {}",
                format_size(file.size),
                format_percent(file.percent_global),
                file.path.display()
            )?;
        }
    }
    Ok(())
}

fn print_children(
    out: &mut impl Write,
    node: &FileNode,
    depth: usize,
    max_depth: Option<usize>,
) -> io::Result<()> {
    if max_depth.is_some_and(|max| depth > max) {
        return Ok(());
    }
    for child in node.children() {
        let marker = match (child.is_dir(), child.is_hard_link()) {
            (true, _) => "/",
            (false, true) => " [link]",
            (false, false) => "",
        };
        writeln!(
            out,
            "{:indent$}{:>10}  {:>7}  {}{}",
            "",
            format_size(child.size()),
            format_percent(child.percent_local()),
            child.name(),
            marker,
            indent = (depth - 1) * 2,
        )?;
        if child.is_dir() {
            print_children(out, &child, depth + 1, max_depth)?;
        }
    }
    Ok(())
}
