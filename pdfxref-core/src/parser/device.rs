//! Seekable byte devices
//!
//! The parser never assumes a file on disk: anything implementing
//! [`InputDevice`] can be parsed. [`StreamDevice`] adapts any
//! `Read + Seek` source and keeps a read-ahead window so that the
//! byte-at-a-time access of the tokenizer stays cheap.

use crate::error::Result;
use std::io::{Read, Seek, SeekFrom};

const READ_AHEAD: usize = 8192;

pub trait InputDevice {
    /// Current absolute position
    fn position(&self) -> u64;

    /// Move the cursor; returns the new absolute position, clamped to the
    /// device bounds.
    fn seek(&mut self, pos: SeekFrom) -> Result<u64>;

    /// Total device length in bytes
    fn len(&self) -> u64;

    /// Next byte without advancing
    fn peek(&mut self) -> Result<Option<u8>>;

    fn read_byte(&mut self) -> Result<Option<u8>>;

    /// Read into `buf`, returning how many bytes were read (0 at EOF)
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn is_eof(&self) -> bool {
        self.position() >= self.len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read up to `len` bytes, fewer only at EOF
    fn read_up_to(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let n = self.read(&mut out[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        out.truncate(filled);
        Ok(out)
    }
}

/// [`InputDevice`] over any seekable reader.
pub struct StreamDevice<R> {
    inner: R,
    len: u64,
    pos: u64,
    window: Vec<u8>,
    window_start: u64,
}

impl<R: Read + Seek> StreamDevice<R> {
    pub fn new(mut inner: R) -> Result<Self> {
        let len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self {
            inner,
            len,
            pos: 0,
            window: Vec::with_capacity(READ_AHEAD),
            window_start: 0,
        })
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn in_window(&self) -> bool {
        self.pos >= self.window_start && self.pos < self.window_start + self.window.len() as u64
    }

    fn fill_window(&mut self) -> Result<()> {
        self.window.clear();
        self.window.resize(READ_AHEAD, 0);
        self.inner.seek(SeekFrom::Start(self.pos))?;
        let mut filled = 0;
        while filled < READ_AHEAD {
            let n = self.inner.read(&mut self.window[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        self.window.truncate(filled);
        self.window_start = self.pos;
        Ok(())
    }
}

impl<R: Read + Seek> InputDevice for StreamDevice<R> {
    fn position(&self) -> u64 {
        self.pos
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::End(delta) => self.len as i128 + delta as i128,
            SeekFrom::Current(delta) => self.pos as i128 + delta as i128,
        };
        self.pos = target.clamp(0, self.len as i128) as u64;
        Ok(self.pos)
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn peek(&mut self) -> Result<Option<u8>> {
        if self.pos >= self.len {
            return Ok(None);
        }
        if !self.in_window() {
            self.fill_window()?;
            if self.window.is_empty() {
                return Ok(None);
            }
        }
        Ok(Some(self.window[(self.pos - self.window_start) as usize]))
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        let byte = self.peek()?;
        if byte.is_some() {
            self.pos += 1;
        }
        Ok(byte)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut copied = 0;
        while copied < buf.len() && self.pos < self.len {
            if !self.in_window() {
                self.fill_window()?;
                if self.window.is_empty() {
                    break;
                }
            }
            let start = (self.pos - self.window_start) as usize;
            let n = (self.window.len() - start).min(buf.len() - copied);
            buf[copied..copied + n].copy_from_slice(&self.window[start..start + n]);
            copied += n;
            self.pos += n as u64;
        }
        Ok(copied)
    }
}
