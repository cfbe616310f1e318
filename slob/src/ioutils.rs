//! Positional byte access and big-endian field readers.
//!
//! All multi-byte integers in a slob archive are big-endian, and all strings
//! are length-prefixed in the archive's declared encoding.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt};
use memmap2::MmapOptions;
use parking_lot::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::{Error, Result};

/// Text encoding declared by an archive header.
///
/// Every archive seen in the wild declares UTF-8; other names are rejected
/// when the header is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TextEncoding {
    Utf8,
}

impl TextEncoding {
    pub(crate) fn from_name(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(TextEncoding::Utf8),
            other => Err(Error::Encoding(format!("unsupported encoding {other:?}"))),
        }
    }

    pub(crate) fn decode(self, data: Vec<u8>) -> Result<String> {
        match self {
            TextEncoding::Utf8 => {
                String::from_utf8(data).map_err(|e| Error::Encoding(e.to_string()))
            }
        }
    }
}

enum Backing {
    Mapped(memmap2::Mmap),
    Seekable(Mutex<File>),
}

/// Read-only byte source for one archive file.
///
/// Memory-maps the file when possible and falls back to a mutex-guarded
/// seekable handle otherwise, so positional reads are safe from any thread.
/// `close` drops the backing; subsequent reads fail with [`Error::Closed`].
pub(crate) struct ByteSource {
    backing: RwLock<Option<Backing>>,
    len: u64,
}

impl ByteSource {
    pub(crate) fn open(path: &Path, memory_map: bool) -> Result<Self> {
        let file = File::open(path).map_err(Error::Io)?;
        let len = file.metadata().map_err(Error::Io)?.len();

        let backing = if memory_map {
            match unsafe { MmapOptions::new().map(&file) } {
                Ok(mmap) => {
                    debug!("memory-mapped {} ({} bytes)", path.display(), len);
                    Backing::Mapped(mmap)
                }
                Err(e) => {
                    debug!("mmap of {} failed ({e}), using seekable reads", path.display());
                    Backing::Seekable(Mutex::new(file))
                }
            }
        } else {
            Backing::Seekable(Mutex::new(file))
        };

        Ok(Self {
            backing: RwLock::new(Some(backing)),
            len,
        })
    }

    pub(crate) fn len(&self) -> u64 {
        self.len
    }

    /// Read up to `buf.len()` bytes at `pos`. Returns 0 at end of source.
    pub(crate) fn read_at(&self, pos: u64, buf: &mut [u8]) -> Result<usize> {
        let guard = self.backing.read();
        let backing = guard.as_ref().ok_or(Error::Closed)?;
        if pos >= self.len {
            return Ok(0);
        }
        let avail = usize::try_from(self.len - pos).unwrap_or(usize::MAX);
        let n = buf.len().min(avail);
        match backing {
            Backing::Mapped(mmap) => {
                let start = pos as usize;
                buf[..n].copy_from_slice(&mmap[start..start + n]);
                Ok(n)
            }
            Backing::Seekable(file) => {
                let mut file = file.lock();
                file.seek(SeekFrom::Start(pos)).map_err(Error::Io)?;
                file.read(&mut buf[..n]).map_err(Error::Io)
            }
        }
    }

    /// Release the file handle. Safe to call more than once.
    pub(crate) fn close(&self) {
        *self.backing.write() = None;
    }
}

/// An `io::Read` cursor over a [`ByteSource`] at a position.
///
/// Short reads at end of source surface as `UnexpectedEof` from `read_exact`,
/// which converts back to [`Error::TruncatedFile`].
pub(crate) struct SourceReader<'a> {
    source: &'a ByteSource,
    pos: u64,
}

impl<'a> SourceReader<'a> {
    pub(crate) fn new(source: &'a ByteSource, pos: u64) -> Self {
        Self { source, pos }
    }

    pub(crate) fn position(&self) -> u64 {
        self.pos
    }
}

impl Read for SourceReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self
            .source
            .read_at(self.pos, buf)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for SourceReader<'_> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::End(d) => self.source.len().checked_add_signed(d),
            SeekFrom::Current(d) => self.pos.checked_add_signed(d),
        };
        match new_pos {
            Some(p) => {
                self.pos = p;
                Ok(p)
            }
            None => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek before start of source",
            )),
        }
    }
}

/// Extension trait for reading slob field encodings from any byte stream.
pub(crate) trait ReadSlobExt: Read {
    /// Read a string with a one-byte length prefix.
    ///
    /// A payload of exactly 255 bytes is truncated at the first NUL; older
    /// writers padded maximum-length strings that way.
    fn read_tiny_text(&mut self, encoding: TextEncoding) -> Result<String> {
        let len = self.read_u8()? as usize;
        let mut data = vec![0u8; len];
        self.read_exact(&mut data)?;
        if len == 255 {
            if let Some(nul) = data.iter().position(|&b| b == 0) {
                data.truncate(nul);
            }
        }
        encoding.decode(data)
    }

    /// Read a string with a two-byte big-endian length prefix.
    fn read_text(&mut self, encoding: TextEncoding) -> Result<String> {
        let len = self.read_u16::<BigEndian>()? as usize;
        let mut data = vec![0u8; len];
        self.read_exact(&mut data)?;
        encoding.decode(data)
    }

    /// Read a 16-byte big-endian UUID.
    fn read_uuid(&mut self) -> Result<Uuid> {
        let mut data = [0u8; 16];
        self.read_exact(&mut data)?;
        Ok(Uuid::from_bytes(data))
    }
}

impl<T: Read> ReadSlobExt for T {}
