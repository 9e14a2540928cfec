//! Backing storage for one database image.
//!
//! A `Store` is the header plus the densely packed record region, backed
//! either by a real file or by an anonymous in-memory buffer (the
//! `:temp:` path and ephemeral mode). Both backings expose the same
//! positioned read/write surface so the handle, cursor, and search code
//! never branch on where the bytes live.
//!
//! The committed record count only moves forward in `commit`, after the
//! caller has both written and synced the new bytes. A failed flush rolls
//! the image length back to the committed boundary so a retry starts
//! from a clean end of file.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::format::{Header, HEADER_LEN};

/// Where the image bytes live. `Closed` is the post-`close` state; the
/// file descriptor is released the moment the variant is replaced.
pub(crate) enum Backing {
    File(File),
    Memory(Vec<u8>),
    Closed,
}

#[cfg(unix)]
fn file_read_exact_at(file: &File, buf: &mut [u8], off: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, off)
}

#[cfg(unix)]
fn file_write_all_at(file: &File, buf: &[u8], off: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, off)
}

#[cfg(windows)]
fn file_read_exact_at(file: &File, mut buf: &mut [u8], mut off: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, off) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "failed to fill whole buffer",
                ))
            }
            Ok(n) => {
                buf = &mut buf[n..];
                off += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(windows)]
fn file_write_all_at(file: &File, mut buf: &[u8], mut off: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, off) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "failed to write whole buffer",
                ))
            }
            Ok(n) => {
                buf = &buf[n..];
                off += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

impl Backing {
    fn read_exact_at(&self, buf: &mut [u8], off: u64) -> Result<()> {
        match self {
            Backing::File(file) => file_read_exact_at(file, buf, off).map_err(|e| {
                if e.kind() == io::ErrorKind::UnexpectedEof {
                    Error::Corrupt("record read past end of file")
                } else {
                    Error::Io(e)
                }
            }),
            Backing::Memory(m) => {
                let off = off as usize;
                let end = off.checked_add(buf.len());
                match end {
                    Some(end) if end <= m.len() => {
                        buf.copy_from_slice(&m[off..end]);
                        Ok(())
                    }
                    _ => Err(Error::Corrupt("record read past end of image")),
                }
            }
            Backing::Closed => Err(Error::Closed),
        }
    }

    fn write_all_at(&mut self, buf: &[u8], off: u64) -> Result<()> {
        match self {
            Backing::File(file) => Ok(file_write_all_at(file, buf, off)?),
            Backing::Memory(m) => {
                let off = off as usize;
                let end = off + buf.len();
                if m.len() < end {
                    m.resize(end, 0);
                }
                m[off..end].copy_from_slice(buf);
                Ok(())
            }
            Backing::Closed => Err(Error::Closed),
        }
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        match self {
            Backing::File(file) => Ok(file.set_len(len)?),
            Backing::Memory(m) => {
                m.truncate(len as usize);
                Ok(())
            }
            Backing::Closed => Err(Error::Closed),
        }
    }

    /// OS-level data sync. Durability boundary for everything written so
    /// far; a no-op for the in-memory backing.
    fn sync(&mut self) -> Result<()> {
        match self {
            Backing::File(file) => Ok(file.sync_data()?),
            Backing::Memory(_) => Ok(()),
            Backing::Closed => Err(Error::Closed),
        }
    }
}

/// One open database image: header, committed record region, backing.
pub(crate) struct Store {
    backing: Backing,
    header: Header,
    rec_len: usize,
    /// Records currently visible in the image. Staged appends live in the
    /// handle's write buffer, never here.
    records: u64,
    /// Trailing bytes truncated away by crash recovery at open time.
    recovered: u64,
}

impl Store {
    /// Open or create a file-backed store.
    ///
    /// A missing or empty file gets a fresh header (writable opens only;
    /// the dimension must then be supplied). An existing file has its
    /// header validated against `dim` when one is given, and any trailing
    /// partial record is truncated away. Read-only opens cannot repair,
    /// so a misaligned read-only file fails with `Corrupt`.
    pub fn open_file(path: &Path, dim: Option<u32>, writable: bool) -> Result<Self> {
        let file = if writable {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(path)?
        } else {
            OpenOptions::new().read(true).open(path)?
        };
        let len = file.metadata()?.len();
        let mut backing = Backing::File(file);

        if len == 0 {
            if !writable {
                return Err(Error::Corrupt("file has no header"));
            }
            let dim = dim.ok_or(Error::Corrupt("empty file has no header to read"))?;
            let header = Header::new(dim);
            backing.write_all_at(&header.to_bytes(), 0)?;
            backing.sync()?;
            debug!("created database {:?} with dim {}", path, dim);
            return Ok(Self {
                backing,
                rec_len: header.record_len(),
                header,
                records: 0,
                recovered: 0,
            });
        }

        if len < HEADER_LEN as u64 {
            return Err(Error::Corrupt("file shorter than header"));
        }
        let mut buf = [0u8; HEADER_LEN];
        backing.read_exact_at(&mut buf, 0)?;
        let header = Header::parse(&buf)?;
        if let Some(requested) = dim {
            if requested != header.dim {
                return Err(Error::DimMismatch {
                    file: header.dim,
                    requested,
                });
            }
        }

        let rec_len = header.record_len() as u64;
        let data = len - HEADER_LEN as u64;
        let recovered = data % rec_len;
        if recovered != 0 {
            if !writable {
                return Err(Error::Corrupt("trailing partial record"));
            }
            backing.set_len(len - recovered)?;
            warn!(
                "recovered from interrupted append: truncated {} trailing bytes from {:?}",
                recovered, path
            );
        }

        Ok(Self {
            backing,
            rec_len: header.record_len(),
            header,
            records: (data - recovered) / rec_len,
            recovered,
        })
    }

    /// Anonymous in-memory store. The image starts as just the header.
    pub fn memory(dim: u32) -> Self {
        let header = Header::new(dim);
        Self {
            backing: Backing::Memory(header.to_bytes().to_vec()),
            rec_len: header.record_len(),
            header,
            records: 0,
            recovered: 0,
        }
    }

    pub fn dim(&self) -> u32 {
        self.header.dim
    }

    pub fn record_len(&self) -> usize {
        self.rec_len
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn recovered(&self) -> u64 {
        self.recovered
    }

    fn record_offset(&self, index: u64) -> u64 {
        HEADER_LEN as u64 + index * self.rec_len as u64
    }

    /// Byte offset one past the last committed record.
    fn committed_end(&self) -> u64 {
        self.record_offset(self.records)
    }

    /// Read `buf.len() / rec_len` whole records starting at `first` into
    /// `buf`. Callers keep `first + n` within the committed count.
    pub fn read_span(&self, first: u64, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len() % self.rec_len, 0);
        self.backing.read_exact_at(buf, self.record_offset(first))
    }

    /// Write staged record bytes at the committed end. Visibility does not
    /// change until `commit`.
    pub fn append_records(&mut self, bytes: &[u8]) -> Result<()> {
        debug_assert_eq!(bytes.len() % self.rec_len, 0);
        let off = self.committed_end();
        self.backing.write_all_at(bytes, off)
    }

    /// Overwrite one committed record in place.
    pub fn overwrite_record(&mut self, index: u64, rec: &[u8]) -> Result<()> {
        debug_assert!(index < self.records);
        debug_assert_eq!(rec.len(), self.rec_len);
        self.backing.write_all_at(rec, self.record_offset(index))
    }

    pub fn sync(&mut self) -> Result<()> {
        self.backing.sync()
    }

    /// Make `n` freshly appended and synced records visible.
    pub fn commit(&mut self, n: u64) {
        self.records += n;
    }

    /// Drop any bytes past the committed boundary after a failed flush.
    pub fn rollback(&mut self) -> Result<()> {
        let end = self.committed_end();
        self.backing.set_len(end)
    }

    /// Release the backing. Further access fails with `Closed`.
    pub fn close(&mut self) {
        self.backing = Backing::Closed;
    }
}
