use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::marker::Send;

use bytes::Bytes;

/// A helper trait that for things that implement `Read`, `Seek`, and `Send`
pub trait SeekableRead: Seek + Read + Send {}
impl<T> SeekableRead for T where T: Seek + Read + Send {}

/// Indicates something that can be *reopened*. Importantly, reopening should be independent
/// with respect to seeks and reads from the original object.
pub trait Reopen: Sized {
    fn reopen(&self) -> io::Result<Self>;
}

/// A local file that remembers its path, so independent handles can be
/// opened onto it (for example, one per thread).
pub struct ReopenableFile {
    pub path: String,
    pub file: File,
}

impl ReopenableFile {
    pub fn open(path: &str) -> io::Result<Self> {
        Ok(ReopenableFile {
            path: path.to_string(),
            file: File::open(path)?,
        })
    }
}

impl Reopen for ReopenableFile {
    fn reopen(&self) -> io::Result<Self> {
        ReopenableFile::open(&self.path)
    }
}

impl Read for ReopenableFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Seek for ReopenableFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

/// In-memory sources share the underlying buffer; only the position is
/// independent.
impl Reopen for Cursor<Bytes> {
    fn reopen(&self) -> io::Result<Self> {
        Ok(Cursor::new(self.get_ref().clone()))
    }
}
