use std::io;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong when opening, mutating, or scanning a
/// database. I/O failures keep their OS-level cause attached.
#[derive(Debug, Error)]
pub enum Error {
    /// The file exists but does not start with the `EMB1` magic.
    #[error("not an embdb file (bad magic)")]
    HeaderMismatch,

    /// The file carries a format version this build does not understand.
    #[error("unsupported format version {0}")]
    VersionUnsupported(u16),

    /// The header's dimension disagrees with the dimension the caller
    /// asked for.
    #[error("dimension mismatch: file has {file}, caller requested {requested}")]
    DimMismatch { file: u32, requested: u32 },

    /// An id was supplied with the wrong number of bytes.
    #[error("id must be exactly {expected} bytes, got {got}")]
    IdLen { expected: usize, got: usize },

    /// A vector was supplied with the wrong number of bytes for this
    /// database's dimension.
    #[error("vector must be exactly {expected} bytes, got {got}")]
    VecLen { expected: usize, got: usize },

    /// A mutation was attempted on a handle opened in read-only mode.
    #[error("database is read-only")]
    Readonly,

    /// `Cursor::update` was called before any successful `Cursor::read`.
    #[error("cursor has no current record; call read() first")]
    NoCurrent,

    /// The handle was closed; no further operations are accepted.
    #[error("database is closed")]
    Closed,

    /// The record region is inconsistent with the header. Seen when a
    /// read-only open finds a partial trailing record, or when the file
    /// shrinks underneath a scan.
    #[error("database file is corrupt: {0}")]
    Corrupt(&'static str),

    /// An underlying read, write, or sync failed.
    #[error("i/o error")]
    Io(#[from] io::Error),
}
