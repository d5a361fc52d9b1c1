/// Directory-entry metadata source.
///
/// The walker only ever asks two things of the host: the attributes of a
/// single path (for the scan root) and the attributes of every immediate
/// entry of a directory, in one enumeration per directory. Both are behind
/// the [`MetadataSource`] trait so tests can inject failures.
use compact_str::CompactString;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Attributes of one directory entry.
#[derive(Debug, Clone)]
pub struct EntryMetadata {
    pub path: PathBuf,
    /// Last path segment.
    pub name: CompactString,
    /// Directories include reparse points that redirect to a directory.
    pub is_dir: bool,
    /// Symlink, junction or mount-point style redirect.
    pub is_reparse: bool,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

impl EntryMetadata {
    /// Raw last path segment, falling back to `name` for paths without one
    /// (a filesystem root).
    pub fn file_name(&self) -> &OsStr {
        self.path
            .file_name()
            .unwrap_or_else(|| OsStr::new(self.name.as_str()))
    }
}

/// Iterator over the entries of one directory.
pub type DirEntries<'a> = Box<dyn Iterator<Item = io::Result<EntryMetadata>> + 'a>;

pub trait MetadataSource: Send + Sync {
    /// Attributes of a single path, without following a final symlink.
    fn metadata(&self, path: &Path) -> io::Result<EntryMetadata>;

    /// Enumerate the immediate entries of `dir`.
    ///
    /// An `Err` from the iterator ends the enumeration of that directory.
    fn read_dir<'a>(&'a self, dir: &Path) -> io::Result<DirEntries<'a>>;
}

/// [`MetadataSource`] backed by `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsMetadataSource;

impl MetadataSource for FsMetadataSource {
    fn metadata(&self, path: &Path) -> io::Result<EntryMetadata> {
        let meta = fs::symlink_metadata(path)?;
        Ok(describe(path.to_path_buf(), entry_name(path), &meta))
    }

    fn read_dir<'a>(&'a self, dir: &Path) -> io::Result<DirEntries<'a>> {
        let entries = fs::read_dir(dir)?;
        Ok(Box::new(entries.map(|entry| {
            let entry = entry?;
            // `DirEntry::metadata` does not traverse symlinks.
            let meta = entry.metadata()?;
            let name = CompactString::new(entry.file_name().to_string_lossy());
            Ok(describe(entry.path(), name, &meta))
        })))
    }
}

fn entry_name(path: &Path) -> CompactString {
    match path.file_name() {
        Some(name) => CompactString::new(name.to_string_lossy()),
        None => CompactString::new(path.to_string_lossy()),
    }
}

fn describe(path: PathBuf, name: CompactString, meta: &fs::Metadata) -> EntryMetadata {
    let is_reparse = is_reparse_point(meta);
    let is_dir = if is_reparse {
        // A redirect counts as a directory when its target is one.
        meta.is_dir() || fs::metadata(&path).map(|m| m.is_dir()).unwrap_or(false)
    } else {
        meta.is_dir()
    };
    EntryMetadata {
        path,
        name,
        is_dir,
        is_reparse,
        size: if is_dir { 0 } else { meta.len() },
        modified: meta.modified().ok(),
    }
}

#[cfg(windows)]
fn is_reparse_point(meta: &fs::Metadata) -> bool {
    use std::os::windows::fs::MetadataExt;
    const FILE_ATTRIBUTE_REPARSE_POINT: u32 = 0x400;
    meta.file_type().is_symlink() || meta.file_attributes() & FILE_ATTRIBUTE_REPARSE_POINT != 0
}

#[cfg(not(windows))]
fn is_reparse_point(meta: &fs::Metadata) -> bool {
    meta.file_type().is_symlink()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_files_and_directories() {
        let tmp = tempfile::TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        let mut f = fs::File::create(tmp.path().join("data.bin")).unwrap();
        f.write_all(&[0u8; 42]).unwrap();

        let source = FsMetadataSource;
        let mut entries: Vec<_> = source
            .read_dir(tmp.path())
            .unwrap()
            .collect::<io::Result<_>>()
            .unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "data.bin");
        assert_eq!(entries[0].size, 42);
        assert!(!entries[0].is_dir);
        assert_eq!(entries[1].name, "sub");
        assert!(entries[1].is_dir);
        assert!(!entries[1].is_reparse);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(FsMetadataSource.read_dir(&tmp.path().join("gone")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directory_is_a_reparse_directory() {
        let tmp = tempfile::TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("target")).unwrap();
        std::os::unix::fs::symlink(tmp.path().join("target"), tmp.path().join("link")).unwrap();

        let meta = FsMetadataSource.metadata(&tmp.path().join("link")).unwrap();
        assert!(meta.is_dir);
        assert!(meta.is_reparse);
        assert_eq!(meta.name, "link");
    }
}
