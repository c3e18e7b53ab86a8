use log::{trace, warn};
use nix::errno::Errno;
use nix::libc;
use nix::sys::mman;
use nix::unistd;
use std::convert::TryFrom;
use std::ffi::c_void;
use std::fmt;
use std::fs::File;
use std::io;
use std::iter;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr::null_mut;

#[cfg(target_os = "linux")]
type MincoreChar = u8;

#[cfg(target_os = "macos")]
type MincoreChar = i8;

/// Number of pages mapped at once. Large files are inspected window by window
/// so that at most one window of address space is in use at a time.
/// e.g. 128MiB on x86_64 (= WINDOW_PAGES * 4096).
pub const WINDOW_PAGES: usize = 32 * 1024;

/// Log target for per-file diagnostics. Kept enabled at `warn` regardless of `RUST_LOG`.
pub const DIAGNOSTICS: &str = "fincore::diagnostics";

#[derive(Debug)]
pub enum Error {
    PageSize,
    Open(io::Error),
    Metadata(io::Error),
    Mmap(nix::Error),
    Mincore(nix::Error),
}

pub type Result<T> = core::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::PageSize => write!(f, "failed to get page size"),
            Error::Open(err) => write!(f, "failed to open: {}", err),
            Error::Metadata(err) => write!(f, "failed to do fstat: {}", err),
            Error::Mmap(err) => write!(f, "failed to do mmap: {}", err.desc()),
            Error::Mincore(err) => write!(f, "failed to do mincore: {}", err.desc()),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Open(err) | Error::Metadata(err) => Some(err),
            Error::Mmap(err) | Error::Mincore(err) => Some(err),
            Error::PageSize => None,
        }
    }
}

/// Retrieve system's page size in bytes.
pub fn page_size() -> Result<usize> {
    match unistd::sysconf(unistd::SysconfVar::PAGE_SIZE) {
        Ok(Some(size)) if size > 0 => Ok(size as usize),
        _ => Err(Error::PageSize),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    /// Directories have no residency to report.
    Ignored,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub path: PathBuf,
    /// Unsigned rather than `off_t`: never negative, and wide enough for any file size.
    pub size: u64,
    /// Zero unless `status` is `Status::Ok`.
    pub resident_pages: u64,
    pub status: Status,
}

impl ScanResult {
    fn new(path: &Path, size: u64, resident_pages: u64, status: Status) -> ScanResult {
        ScanResult {
            path: path.to_path_buf(),
            size,
            resident_pages,
            status,
        }
    }
}

/// A contiguous byte range of a file, mapped and inspected as one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub offset: u64,
    pub len: u64,
}

impl Window {
    /// Pages covered by this window. A trailing partial page counts as a whole one.
    pub fn pages(&self, page_size: usize) -> usize {
        let page_size = page_size as u64;
        ((self.len + page_size - 1) / page_size) as usize
    }
}

/// Splits `[0, file_size)` into consecutive windows of `window_size` bytes.
/// Only the last window may be shorter.
pub fn windows(file_size: u64, window_size: u64) -> impl Iterator<Item = Window> {
    debug_assert!(window_size > 0);

    iter::successors(Some(0u64), move |&offset| offset.checked_add(window_size))
        .take_while(move |&offset| offset < file_size)
        .map(move |offset| Window {
            offset,
            len: window_size.min(file_size - offset),
        })
}

/// A `PROT_NONE` private mapping of one window, unmapped on drop.
struct MappedWindow<'a> {
    path: &'a Path,
    addr: *mut c_void,
    len: usize,
}

impl<'a> MappedWindow<'a> {
    fn map(file: &File, path: &'a Path, window: &Window) -> Result<MappedWindow<'a>> {
        let offset =
            libc::off_t::try_from(window.offset).map_err(|_| Error::Mmap(Errno::EOVERFLOW))?;
        let len = window.len as usize;

        // No access rights: creating the mapping must not fault anything in.
        let addr = unsafe {
            mman::mmap(
                null_mut(),
                len,
                mman::ProtFlags::PROT_NONE,
                mman::MapFlags::MAP_PRIVATE,
                file.as_raw_fd(),
                offset,
            )
        }
        .map_err(Error::Mmap)?;

        Ok(MappedWindow { path, addr, len })
    }

    /// Fills `vec` with one residency flag per page of the window.
    fn mincore(&self, vec: &mut [MincoreChar]) -> Result<()> {
        unsafe { Errno::result(libc::mincore(self.addr, self.len, vec.as_mut_ptr())) }
            .map(drop)
            .map_err(Error::Mincore)
    }
}

impl Drop for MappedWindow<'_> {
    fn drop(&mut self) {
        unsafe {
            if let Err(err) = mman::munmap(self.addr, self.len) {
                warn!(
                    target: DIAGNOSTICS,
                    "{}: failed to do munmap: {}",
                    self.path.display(),
                    err.desc()
                );
            }
        }
    }
}

/// Counts resident pages of files, one window at a time.
///
/// The residency vector is allocated once with room for a full window and
/// reused for every window of every file. A scanner must not be shared
/// between concurrent scans; give each its own.
pub struct Scanner {
    page_size: usize,
    window_pages: usize,
    vec: Box<[MincoreChar]>,
}

impl Scanner {
    pub fn new(page_size: usize) -> Scanner {
        Self::with_window_pages(page_size, WINDOW_PAGES)
    }

    pub fn with_window_pages(page_size: usize, window_pages: usize) -> Scanner {
        let window_pages = window_pages.max(1);

        Scanner {
            page_size,
            window_pages,
            vec: vec![0; window_pages].into_boxed_slice(),
        }
    }

    pub fn window_size(&self) -> u64 {
        self.page_size as u64 * self.window_pages as u64
    }

    /// Scans a single path. Failures are reported here, once per path, and
    /// returned as `Status::Failed` with no page count.
    pub fn scan<P: AsRef<Path>>(&mut self, path: P) -> ScanResult {
        let path = path.as_ref();

        match self.scan_file(path) {
            Ok(result) => result,
            Err(err) => {
                warn!(target: DIAGNOSTICS, "{}: {}", path.display(), err);
                ScanResult::new(path, 0, 0, Status::Failed)
            }
        }
    }

    fn scan_file(&mut self, path: &Path) -> Result<ScanResult> {
        let file = File::open(path).map_err(Error::Open)?;
        let file_meta = file.metadata().map_err(Error::Metadata)?;

        if file_meta.is_dir() {
            return Ok(ScanResult::new(path, file_meta.len(), 0, Status::Ignored));
        }

        let file_len = file_meta.len();
        let resident_pages = self.resident_pages(&file, path, file_len)?;

        Ok(ScanResult::new(path, file_len, resident_pages, Status::Ok))
    }

    fn resident_pages(&mut self, file: &File, path: &Path, file_len: u64) -> Result<u64> {
        let mut resident_pages = 0;

        for window in windows(file_len, self.window_size()) {
            let mapped = MappedWindow::map(file, path, &window)?;
            let vec = &mut self.vec[..window.pages(self.page_size)];
            mapped.mincore(vec)?;

            let count = vec.iter().filter(|&&flag| flag & 0x1 != 0).count() as u64;
            trace!(
                "window offset={} len={} resident={}",
                window.offset,
                window.len,
                count
            );
            resident_pages += count;
        }

        Ok(resident_pages)
    }
}
