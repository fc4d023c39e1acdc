//! The controller's view of the host system bus.
//!
//! All descriptor and packet traffic, and all data transfers, go
//! through a [`Bus`].  Block transfers report how many bytes they
//! failed to move; a nonzero count is a non-existent memory (NXM)
//! error.
use std::ops::Range;

use conv::*;
use tracing::{event, Level};

pub trait Bus {
    /// Copy `buf.len()` bytes starting at host address `address` into
    /// `buf`.  Returns the number of bytes which were not transferred.
    fn read_block(&mut self, address: u32, buf: &mut [u8]) -> usize;

    /// Copy `buf` to host memory at `address`.  Returns the number of
    /// bytes which were not transferred.
    fn write_block(&mut self, address: u32, buf: &[u8]) -> usize;

    /// Request an interrupt through `vector`.
    fn raise_interrupt(&mut self, vector: u16);
}

/// Byte-addressed host memory with programmable faults.
///
/// Addresses beyond the end of memory, or inside a range registered
/// with [`Memory::add_nxm`], are non-existent.  Ranges registered with
/// [`Memory::fail_writes`] can be read but not written.  Interrupts
/// raised by the controller are recorded in order.
#[derive(Debug)]
pub struct Memory {
    bytes: Vec<u8>,
    nxm: Vec<Range<u32>>,
    write_faults: Vec<Range<u32>>,
    interrupts: Vec<u16>,
}

impl Memory {
    #[must_use]
    pub fn new(size: usize) -> Memory {
        Memory {
            bytes: vec![0; size],
            nxm: Vec::new(),
            write_faults: Vec::new(),
            interrupts: Vec::new(),
        }
    }

    pub fn add_nxm(&mut self, range: Range<u32>) {
        self.nxm.push(range);
    }

    pub fn fail_writes(&mut self, range: Range<u32>) {
        self.write_faults.push(range);
    }

    pub fn clear_faults(&mut self) {
        self.nxm.clear();
        self.write_faults.clear();
    }

    /// Interrupt vectors raised so far, oldest first.
    #[must_use]
    pub fn interrupts(&self) -> &[u16] {
        &self.interrupts
    }

    pub fn take_interrupts(&mut self) -> Vec<u16> {
        std::mem::take(&mut self.interrupts)
    }

    fn index(&self, address: u32) -> Option<usize> {
        if self.nxm.iter().any(|r| r.contains(&address)) {
            return None;
        }
        let i = usize::value_from(address).ok()?;
        if i < self.bytes.len() {
            Some(i)
        } else {
            None
        }
    }

    fn writable(&self, address: u32) -> Option<usize> {
        if self.write_faults.iter().any(|r| r.contains(&address)) {
            None
        } else {
            self.index(address)
        }
    }

    /// Read a little-endian 16-bit word, for host-side code.
    #[must_use]
    pub fn read_u16(&self, address: u32) -> Option<u16> {
        let lo = self.bytes.get(self.index(address)?)?;
        let hi = self.bytes.get(self.index(address.wrapping_add(1))?)?;
        Some(u16::from_le_bytes([*lo, *hi]))
    }

    #[must_use]
    pub fn read_u32(&self, address: u32) -> Option<u32> {
        let lo = self.read_u16(address)?;
        let hi = self.read_u16(address.wrapping_add(2))?;
        Some(base::prelude::join_u32(lo, hi))
    }

    /// Write a little-endian 16-bit word, for host-side code.  Host
    /// writes are not subject to the write faults, which model the
    /// controller's bus interface.
    pub fn write_u16(&mut self, address: u32, value: u16) -> bool {
        let bytes = value.to_le_bytes();
        match (self.index(address), self.index(address.wrapping_add(1))) {
            (Some(lo), Some(hi)) => {
                self.bytes[lo] = bytes[0];
                self.bytes[hi] = bytes[1];
                true
            }
            _ => false,
        }
    }

    pub fn write_u32(&mut self, address: u32, value: u32) -> bool {
        let (lo, hi) = base::prelude::split_u32(value);
        self.write_u16(address, lo) && self.write_u16(address.wrapping_add(2), hi)
    }

    /// Host-side bulk load, for example of a buffer the host wants
    /// written to disk.
    pub fn load(&mut self, address: u32, data: &[u8]) -> bool {
        let mut a = address;
        for b in data {
            match self.index(a) {
                Some(i) => self.bytes[i] = *b,
                None => return false,
            }
            a = a.wrapping_add(1);
        }
        true
    }

    #[must_use]
    pub fn dump(&self, address: u32, len: usize) -> Option<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        let mut a = address;
        for _ in 0..len {
            out.push(self.bytes[self.index(a)?]);
            a = a.wrapping_add(1);
        }
        Some(out)
    }
}

impl Bus for Memory {
    fn read_block(&mut self, address: u32, buf: &mut [u8]) -> usize {
        let mut a = address;
        for (done, slot) in buf.iter_mut().enumerate() {
            match self.index(a) {
                Some(i) => *slot = self.bytes[i],
                None => {
                    event!(Level::DEBUG, "bus read NXM at {a:#o}");
                    return buf.len() - done;
                }
            }
            a = a.wrapping_add(1);
        }
        0
    }

    fn write_block(&mut self, address: u32, buf: &[u8]) -> usize {
        let mut a = address;
        for (done, b) in buf.iter().enumerate() {
            match self.writable(a) {
                Some(i) => self.bytes[i] = *b,
                None => {
                    event!(Level::DEBUG, "bus write NXM at {a:#o}");
                    return buf.len() - done;
                }
            }
            a = a.wrapping_add(1);
        }
        0
    }

    fn raise_interrupt(&mut self, vector: u16) {
        event!(Level::TRACE, "interrupt through vector {vector:o}");
        self.interrupts.push(vector);
    }
}

#[test]
fn test_read_stops_at_nxm() {
    let mut mem = Memory::new(64);
    mem.add_nxm(40..48);
    let mut buf = [0u8; 16];
    assert_eq!(mem.read_block(32, &mut buf), 8);
    assert_eq!(mem.read_block(0, &mut buf), 0);
    assert_eq!(mem.read_block(60, &mut buf), 12);
}

#[test]
fn test_write_faults_only_affect_the_bus() {
    let mut mem = Memory::new(64);
    mem.fail_writes(8..12);
    assert_eq!(mem.write_block(8, &[1, 2]), 2);
    assert!(mem.write_u16(8, 0x1234));
    assert_eq!(mem.read_u16(8), Some(0x1234));
    let mut buf = [0u8; 2];
    assert_eq!(mem.read_block(8, &mut buf), 0);
    assert_eq!(buf, [0x34, 0x12]);
}

#[test]
fn test_words_are_little_endian() {
    let mut mem = Memory::new(16);
    assert!(mem.write_u32(4, 0x8000_1234));
    assert_eq!(mem.dump(4, 4), Some(vec![0x34, 0x12, 0x00, 0x80]));
    assert_eq!(mem.read_u32(4), Some(0x8000_1234));
    assert_eq!(mem.read_u32(14), None);
}

#[test]
fn test_interrupts_are_recorded() {
    let mut mem = Memory::new(0);
    mem.raise_interrupt(0o154);
    mem.raise_interrupt(0o154);
    assert_eq!(mem.interrupts(), &[0o154, 0o154]);
    assert_eq!(mem.take_interrupts().len(), 2);
    assert!(mem.interrupts().is_empty());
}
