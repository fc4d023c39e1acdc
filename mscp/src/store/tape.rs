//! Tape images in the simple length-prefixed record format.
//!
//! Each record is a 32-bit little-endian byte count, the data (padded
//! to an even length), and the byte count again.  A count of zero is
//! a tape mark.  `0xFFFFFFFF` marks the end of the recorded medium.
//! A count with the top bit set is a record which was recorded with
//! an error; it reads as a bad record.
use std::error;
use std::fmt::{self, Display, Formatter};
use std::io::{self, SeekFrom};

use super::{Backing, StoreError};

const END_OF_MEDIUM: u32 = 0xFFFF_FFFF;
const ERROR_FLAG: u32 = 0x8000_0000;
const LENGTH_MASK: u32 = 0x00FF_FFFF;
const WORD: u64 = 4;

/// Outcomes of tape motion other than moving over a data record.
#[derive(Debug)]
pub enum TapeStatus {
    TapeMark,
    BeginningOfTape,
    EndOfMedium,
    Error(StoreError),
}

impl Display for TapeStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            TapeStatus::TapeMark => f.write_str("tape mark"),
            TapeStatus::BeginningOfTape => f.write_str("beginning of tape"),
            TapeStatus::EndOfMedium => f.write_str("end of medium"),
            TapeStatus::Error(e) => write!(f, "{e}"),
        }
    }
}

impl error::Error for TapeStatus {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            TapeStatus::Error(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for TapeStatus {
    fn from(e: StoreError) -> TapeStatus {
        TapeStatus::Error(e)
    }
}

impl From<io::Error> for TapeStatus {
    fn from(e: io::Error) -> TapeStatus {
        TapeStatus::Error(StoreError::Io(e))
    }
}

fn padded(len: u32) -> u64 {
    u64::from((len + 1) & !1)
}

#[derive(Debug)]
pub struct TapeImage<F> {
    inner: F,
    position: u64,
}

impl<F: Backing> TapeImage<F> {
    pub fn new(inner: F) -> TapeImage<F> {
        TapeImage { inner, position: 0 }
    }

    /// Byte offset of the tape head within the image.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn at_bot(&self) -> bool {
        self.position == 0
    }

    pub fn rewind(&mut self) {
        self.position = 0;
    }

    fn bad_record(&self, position: u64) -> TapeStatus {
        TapeStatus::Error(StoreError::BadRecord { position })
    }

    /// Read the count word at `at`, or `None` if the image ends first.
    fn read_word(&mut self, at: u64) -> Result<Option<u32>, TapeStatus> {
        self.inner.seek(SeekFrom::Start(at))?;
        let mut buf = [0u8; 4];
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => return Ok(None),
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Some(u32::from_le_bytes(buf)))
    }

    fn read_data(&mut self, at: u64, len: u32) -> Result<Vec<u8>, TapeStatus> {
        self.inner.seek(SeekFrom::Start(at))?;
        let mut data = vec![0u8; len as usize];
        match self.inner.read_exact(&mut data) {
            Ok(()) => Ok(data),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(self.bad_record(at)),
            Err(e) => Err(e.into()),
        }
    }

    fn write_at(&mut self, at: u64, bytes: &[u8]) -> Result<(), TapeStatus> {
        self.inner.seek(SeekFrom::Start(at))?;
        self.inner.write_all(bytes)?;
        Ok(())
    }

    /// Move forward over one object.  Returns the count word and, if
    /// `want_data`, the record contents.
    fn forward(&mut self, want_data: bool) -> Result<(u32, Vec<u8>), TapeStatus> {
        let start = self.position;
        let word = match self.read_word(start)? {
            None | Some(END_OF_MEDIUM) => return Err(TapeStatus::EndOfMedium),
            Some(0) => {
                self.position = start + WORD;
                return Err(TapeStatus::TapeMark);
            }
            Some(w) => w,
        };
        let len = word & LENGTH_MASK;
        let data = if want_data {
            self.read_data(start + WORD, len)?
        } else {
            Vec::new()
        };
        let trailer_at = start + WORD + padded(len);
        if self.read_word(trailer_at)? != Some(word) {
            return Err(self.bad_record(start));
        }
        self.position = trailer_at + WORD;
        if word & ERROR_FLAG != 0 {
            return Err(self.bad_record(start));
        }
        Ok((len, data))
    }

    /// Move backward over one object.
    fn reverse(&mut self, want_data: bool) -> Result<(u32, Vec<u8>), TapeStatus> {
        let end = self.position;
        if end == 0 {
            return Err(TapeStatus::BeginningOfTape);
        }
        if end < WORD {
            return Err(self.bad_record(end));
        }
        let word = match self.read_word(end - WORD)? {
            Some(0) => {
                self.position = end - WORD;
                return Err(TapeStatus::TapeMark);
            }
            Some(END_OF_MEDIUM) | None => return Err(self.bad_record(end - WORD)),
            Some(w) => w,
        };
        let len = word & LENGTH_MASK;
        let span = 2 * WORD + padded(len);
        if end < span {
            return Err(self.bad_record(end - WORD));
        }
        let start = end - span;
        if self.read_word(start)? != Some(word) {
            return Err(self.bad_record(start));
        }
        let data = if want_data {
            self.read_data(start + WORD, len)?
        } else {
            Vec::new()
        };
        self.position = start;
        if word & ERROR_FLAG != 0 {
            return Err(self.bad_record(start));
        }
        Ok((len, data))
    }

    /// Read the next record, moving forward.
    pub fn read_forward(&mut self) -> Result<Vec<u8>, TapeStatus> {
        self.forward(true).map(|(_, data)| data)
    }

    /// Read the previous record, moving backward.  The data is
    /// returned in recorded (forward) order.
    pub fn read_reverse(&mut self) -> Result<Vec<u8>, TapeStatus> {
        self.reverse(true).map(|(_, data)| data)
    }

    /// Space forward over one record, returning its length.
    pub fn space_forward(&mut self) -> Result<u32, TapeStatus> {
        self.forward(false).map(|(len, _)| len)
    }

    /// Space backward over one record, returning its length.
    pub fn space_reverse(&mut self) -> Result<u32, TapeStatus> {
        self.reverse(false).map(|(len, _)| len)
    }

    /// Write a data record at the current position.  Anything beyond
    /// it becomes unreachable.
    pub fn write_record(&mut self, data: &[u8]) -> Result<(), TapeStatus> {
        let len = u32::try_from(data.len())
            .ok()
            .filter(|n| *n <= LENGTH_MASK)
            .ok_or_else(|| self.bad_record(self.position))?;
        let mut bytes = Vec::with_capacity(data.len() + 9);
        bytes.extend_from_slice(&len.to_le_bytes());
        bytes.extend_from_slice(data);
        if len % 2 == 1 {
            bytes.push(0);
        }
        bytes.extend_from_slice(&len.to_le_bytes());
        let at = self.position;
        self.write_at(at, &bytes)?;
        self.position = at + 2 * WORD + padded(len);
        self.erase()
    }

    pub fn write_mark(&mut self) -> Result<(), TapeStatus> {
        let at = self.position;
        self.write_at(at, &0u32.to_le_bytes())?;
        self.position = at + WORD;
        self.erase()
    }

    /// Record end-of-medium at the current position without moving.
    pub fn erase(&mut self) -> Result<(), TapeStatus> {
        let at = self.position;
        self.write_at(at, &END_OF_MEDIUM.to_le_bytes())?;
        self.inner.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> F {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn blank() -> TapeImage<Cursor<Vec<u8>>> {
        TapeImage::new(Cursor::new(Vec::new()))
    }

    #[test]
    fn test_blank_tape_reads_end_of_medium() {
        let mut tape = blank();
        assert!(matches!(tape.read_forward(), Err(TapeStatus::EndOfMedium)));
        assert!(matches!(tape.read_reverse(), Err(TapeStatus::BeginningOfTape)));
    }

    #[test]
    fn test_records_and_marks() {
        let mut tape = blank();
        tape.write_record(b"hello").expect("write should succeed");
        tape.write_mark().expect("write should succeed");
        tape.write_record(&[9; 4]).expect("write should succeed");
        let end = tape.position();
        assert_eq!(end, (4 + 6 + 4) + 4 + (4 + 4 + 4));
        tape.rewind();
        assert_eq!(tape.read_forward().expect("record"), b"hello".to_vec());
        assert!(matches!(tape.read_forward(), Err(TapeStatus::TapeMark)));
        assert_eq!(tape.space_forward().expect("record"), 4);
        assert!(matches!(tape.read_forward(), Err(TapeStatus::EndOfMedium)));
        assert_eq!(tape.position(), end);
    }

    #[test]
    fn test_reverse_motion() {
        let mut tape = blank();
        tape.write_record(b"abc").expect("write should succeed");
        tape.write_mark().expect("write should succeed");
        assert!(matches!(tape.read_reverse(), Err(TapeStatus::TapeMark)));
        assert_eq!(tape.read_reverse().expect("record"), b"abc".to_vec());
        assert!(tape.at_bot());
        assert!(matches!(tape.space_reverse(), Err(TapeStatus::BeginningOfTape)));
    }

    #[test]
    fn test_overwrite_truncates_logically() {
        let mut tape = blank();
        tape.write_record(b"one").expect("write should succeed");
        tape.write_record(b"two").expect("write should succeed");
        tape.rewind();
        tape.write_record(b"new").expect("write should succeed");
        assert!(matches!(tape.read_forward(), Err(TapeStatus::EndOfMedium)));
    }

    #[test]
    fn test_mismatched_trailer_is_bad_record() {
        let mut image = Vec::new();
        image.extend_from_slice(&2u32.to_le_bytes());
        image.extend_from_slice(&[1, 2]);
        image.extend_from_slice(&3u32.to_le_bytes());
        let mut tape = TapeImage::new(Cursor::new(image));
        assert!(matches!(
            tape.read_forward(),
            Err(TapeStatus::Error(StoreError::BadRecord { position: 0 }))
        ));
    }

    #[test]
    fn test_error_flagged_record_moves_but_fails() {
        let mut image = Vec::new();
        let word = ERROR_FLAG | 2;
        image.extend_from_slice(&word.to_le_bytes());
        image.extend_from_slice(&[1, 2]);
        image.extend_from_slice(&word.to_le_bytes());
        let mut tape = TapeImage::new(Cursor::new(image));
        assert!(tape.read_forward().is_err());
        assert_eq!(tape.position(), 10);
    }
}
