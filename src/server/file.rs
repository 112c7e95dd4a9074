//! Document-root path resolution and read-only file mappings.

use std::fs::{File, Metadata};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use memmap2::Mmap;

/// `S_IROTH`: readable by users outside the owner and group.
const OTHER_READABLE: u32 = 0o004;

/// The part of `stat(2)` the response path cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub mode: u32,
    pub is_dir: bool,
}

impl FileStat {
    pub fn is_other_readable(&self) -> bool {
        self.mode & OTHER_READABLE != 0
    }
}

impl From<&Metadata> for FileStat {
    fn from(meta: &Metadata) -> Self {
        Self {
            size: meta.len(),
            mode: meta.permissions().mode(),
            is_dir: meta.is_dir(),
        }
    }
}

/// Appends a request path to the document root.
///
/// Query strings and fragments are dropped. Returns `None` when the path
/// tries to climb out of the root with a `..` component.
pub fn resolve_path(doc_root: &Path, target: &str) -> Option<PathBuf> {
    let end = target.find(['?', '#']).unwrap_or(target.len());
    let relative = Path::new(target[..end].trim_start_matches('/'));

    let mut resolved = doc_root.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(resolved)
}

/// A file mapped read-only into memory for the lifetime of one response.
///
/// Dropping the value unmaps the file, so every path out of the write cycle
/// releases it exactly once.
#[derive(Debug)]
pub struct MappedFile {
    // Empty files cannot be mapped; they simply have no region
    map: Option<Mmap>,
}

impl MappedFile {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Ok(Self { map: None });
        }
        // SAFETY: the mapping is private and read-only. Another process
        // truncating the file while it is served is not something we can
        // prevent; the kernel then fails the affected reads with SIGBUS, as
        // for any server that maps files.
        let map = unsafe { Mmap::map(&file)? };
        Ok(Self { map: Some(map) })
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
