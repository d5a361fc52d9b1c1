/// Hard-link group queries.
///
/// The resolver asks, for one file path, for every path that shares the
/// same underlying file data (including the path itself). How that is
/// answered depends on the host:
///
/// - **Unix**: there is no "list all names of this inode" call, so
///   [`InodeLinks`] stats the walked file list once (in parallel) and groups
///   every file with `nlink > 1` by `(device, inode)`.
/// - **Windows**: `FindFirstFileNameW` / `FindNextFileNameW` enumerate the
///   link names of a file directly; see `FileNameLinks`. Names may point
///   outside the scan root.
use crate::scanner::CancelToken;
use std::io;
use std::path::{Path, PathBuf};

pub trait LinkQuery: Send + Sync {
    /// Every path sharing `path`'s file data, or an empty list when the file
    /// has a single link.
    fn hard_links(&self, path: &Path) -> io::Result<Vec<PathBuf>>;
}

/// Build the host's link query for an analysis of `root` whose walk
/// produced `files`. Building stops early once `cancel` is set.
pub fn system_link_query(
    root: &Path,
    files: &[PathBuf],
    cancel: &CancelToken,
) -> io::Result<Box<dyn LinkQuery>> {
    #[cfg(unix)]
    {
        let _ = root;
        Ok(Box::new(InodeLinks::build(files, cancel)))
    }
    #[cfg(windows)]
    {
        let _ = (files, cancel);
        Ok(Box::new(FileNameLinks::for_root(root)?))
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = (root, files, cancel);
        Ok(Box::new(NoLinks))
    }
}

/// Link query for hosts without hard-link support: every file is alone.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLinks;

impl LinkQuery for NoLinks {
    fn hard_links(&self, _path: &Path) -> io::Result<Vec<PathBuf>> {
        Ok(Vec::new())
    }
}

#[cfg(unix)]
pub use unix::InodeLinks;

#[cfg(unix)]
mod unix {
    use super::LinkQuery;
    use crate::scanner::CancelToken;
    use rayon::prelude::*;
    use std::collections::HashMap;
    use std::fs;
    use std::io;
    use std::os::unix::fs::MetadataExt;
    use std::path::{Path, PathBuf};
    use tracing::debug;

    type FileId = (u64, u64);

    /// `(device, inode)` index over a file list.
    #[derive(Debug, Default)]
    pub struct InodeLinks {
        groups: HashMap<FileId, Vec<PathBuf>>,
        ids: HashMap<PathBuf, FileId>,
    }

    impl InodeLinks {
        /// Stat every file and keep the ones with more than one link.
        ///
        /// Once `cancel` is set the remaining files are skipped and the
        /// index is left partial.
        pub fn build(files: &[PathBuf], cancel: &CancelToken) -> Self {
            let linked: Vec<(FileId, PathBuf)> = files
                .par_iter()
                .filter_map(|path| {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    let meta = fs::symlink_metadata(path).ok()?;
                    (meta.is_file() && meta.nlink() > 1)
                        .then(|| ((meta.dev(), meta.ino()), path.clone()))
                })
                .collect();

            let mut index = Self::default();
            for (id, path) in linked {
                index.ids.insert(path.clone(), id);
                index.groups.entry(id).or_default().push(path);
            }
            for group in index.groups.values_mut() {
                group.sort();
            }
            debug!(
                "Hard-link index: {} linked files in {} groups",
                index.ids.len(),
                index.groups.len()
            );
            index
        }

        pub fn group_count(&self) -> usize {
            self.groups.len()
        }
    }

    impl LinkQuery for InodeLinks {
        fn hard_links(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
            Ok(self
                .ids
                .get(path)
                .and_then(|id| self.groups.get(id))
                .cloned()
                .unwrap_or_default())
        }
    }
}

#[cfg(windows)]
pub use windows_links::FileNameLinks;

#[cfg(windows)]
mod windows_links {
    use super::LinkQuery;
    use std::io;
    use std::path::{Path, PathBuf};
    use windows::core::{HSTRING, PWSTR};
    use windows::Win32::Storage::FileSystem::{
        FindClose, FindFirstFileNameW, FindNextFileNameW, GetVolumePathNameW,
    };

    /// Longest NTFS path, in UTF-16 units.
    const MAX_PATH_CHARS: usize = 32_768;

    /// Link names via `FindFirstFileNameW`, prefixed with the volume of the
    /// scan root (the API returns volume-relative names).
    #[derive(Debug)]
    pub struct FileNameLinks {
        volume: String,
    }

    impl FileNameLinks {
        pub fn for_root(root: &Path) -> io::Result<Self> {
            let mut buf = vec![0u16; MAX_PATH_CHARS];
            // GetVolumePathNameW also handles volumes mounted on a folder.
            unsafe { GetVolumePathNameW(&HSTRING::from(root), &mut buf) }
                .map_err(io::Error::other)?;
            let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
            let mut volume = String::from_utf16_lossy(&buf[..len]);
            // Canonical roots are verbatim paths; keep link names comparable.
            const VERBATIM: &str = r"\\?\";
            if root.to_string_lossy().starts_with(VERBATIM) && !volume.starts_with(VERBATIM) {
                volume.insert_str(0, VERBATIM);
            }
            // Link names start with a separator.
            if volume.ends_with('\\') {
                volume.pop();
            }
            Ok(Self { volume })
        }
    }

    impl LinkQuery for FileNameLinks {
        fn hard_links(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
            let wide = HSTRING::from(path);
            let mut buf = vec![0u16; MAX_PATH_CHARS];
            let mut len = buf.len() as u32;
            let handle =
                unsafe { FindFirstFileNameW(&wide, 0, &mut len, PWSTR(buf.as_mut_ptr())) }
                    .map_err(io::Error::other)?;

            let mut links = Vec::new();
            loop {
                let end = (len as usize).saturating_sub(1).min(buf.len());
                let name = String::from_utf16_lossy(&buf[..end]);
                let name = name.trim_end_matches('\0');
                links.push(PathBuf::from(format!("{}{}", self.volume, name)));

                buf.fill(0);
                len = buf.len() as u32;
                let next = unsafe { FindNextFileNameW(handle, &mut len, PWSTR(buf.as_mut_ptr())) };
                if next.is_err() {
                    break;
                }
            }
            unsafe {
                let _ = FindClose(handle);
            }

            if links.len() < 2 {
                links.clear();
            }
            Ok(links)
        }
    }
}
