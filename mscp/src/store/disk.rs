//! Disk images: a flat array of 512-byte logical blocks.
use std::io::{self, SeekFrom};

use super::{Backing, StoreError};
use crate::drive::BLOCK_BYTES;

#[derive(Debug)]
pub struct DiskImage<F> {
    inner: F,
}

fn block_offset(lbn: u32) -> u64 {
    u64::from(lbn) * u64::from(BLOCK_BYTES)
}

impl<F: Backing> DiskImage<F> {
    pub fn new(inner: F) -> DiskImage<F> {
        DiskImage { inner }
    }

    /// Fill `buf` starting at block `lbn`.  Bytes beyond the end of
    /// the image read as zero, so a freshly created image behaves
    /// like a formatted, empty disk.
    pub fn read(&mut self, lbn: u32, buf: &mut [u8]) -> Result<(), StoreError> {
        self.inner.seek(SeekFrom::Start(block_offset(lbn)))?;
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        buf[filled..].fill(0);
        Ok(())
    }

    /// Write `data` starting at block `lbn`.  Data which ends part way
    /// through a block is padded with zeros to the block boundary.
    pub fn write(&mut self, lbn: u32, data: &[u8]) -> Result<(), StoreError> {
        self.inner.seek(SeekFrom::Start(block_offset(lbn)))?;
        self.inner.write_all(data)?;
        let block = BLOCK_BYTES as usize;
        let tail = data.len() % block;
        if tail != 0 {
            self.inner.write_all(&vec![0; block - tail])?;
        }
        self.inner.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> F {
        self.inner
    }
}
