//! Backing stores for disk and tape units.
//!
//! A store sits on any seekable byte stream: usually a file, but an
//! in-memory `Cursor` works just as well (and is what most of the
//! tests use).
use std::error;
use std::fmt::{self, Display, Formatter};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, Write};
use std::path::Path;

pub mod disk;
pub mod tape;

pub use disk::DiskImage;
pub use tape::{TapeImage, TapeStatus};

/// A byte stream which can hold a disk or tape image.
pub trait Backing: Read + Write + Seek {}

impl<T: Read + Write + Seek> Backing for T {}

#[derive(Debug)]
pub enum StoreError {
    Io(io::Error),
    /// A tape record's leading and trailing lengths disagree, or the
    /// image ends in the middle of a record.
    BadRecord { position: u64 },
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            StoreError::Io(e) => write!(f, "I/O error on backing store: {e}"),
            StoreError::BadRecord { position } => {
                write!(f, "malformed tape record at byte offset {position}")
            }
        }
    }
}

impl error::Error for StoreError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e),
            StoreError::BadRecord { .. } => None,
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> StoreError {
        StoreError::Io(e)
    }
}

/// Open an image file for a unit.  When `read_only` is set the file
/// is opened without write access.  The file is created if it is
/// missing and writable.
pub fn open_image(path: &Path, read_only: bool) -> io::Result<File> {
    if read_only {
        OpenOptions::new().read(true).open(path)
    } else {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
    }
}
