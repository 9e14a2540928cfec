//! # embdb: single-file embedded vector database
//!
//! A persistent store of fixed-dimension f32 vectors, each paired with an
//! opaque 16-byte id, supporting append, in-place update, sequential
//! scan, and exact top-k similarity search. It embeds as a library; there
//! is no server, no query language, and no network surface.
//!
//! ## On-disk shape
//!
//! ```text
//! [ header (16 B) | id[16] vec[4*dim] | id[16] vec[4*dim] | ... ]
//! ```
//!
//! One file, a fixed header, then tightly packed records in append order.
//! The dense layout means the search scan walks the file sequentially in
//! whole-record blocks, feeding the dot-product kernel straight from the
//! read buffer with no per-record allocation or pointer chasing.
//!
//! ## Staging and the flush boundary
//!
//! `append` copies record bytes into an in-memory write buffer; nothing
//! is visible to cursors or searches until `flush`, which appends the
//! buffer to the file and issues an OS-level data sync before reporting
//! success. A crash between flushes loses at most the staged records; a
//! crash mid-flush leaves a partial trailing record that the next open
//! truncates away.
//!
//! ## Searching
//!
//! Every search is an exact linear scan: each committed record is scored
//! against the query and the best `topk` at or above the threshold come
//! back in descending score order. Scoring runs on the rayon pool block
//! by block; selection stays sequential in file order so results are
//! identical to the single-threaded reference, ties included.
//!
//! ```
//! use embdb::{open, Mode, TEMP_PATH};
//!
//! let db = open(TEMP_PATH, 4, Mode::Append)?;
//! db.append(&[1u8; 16], &[0.1, 0.2, 0.3, 0.4])?;
//! db.append(&[2u8; 16], &[0.4, 0.3, 0.2, 0.1])?;
//! db.flush()?;
//!
//! let hits = db.query(&[0.1, 0.2, 0.3, 0.4], 1)?;
//! assert_eq!(hits[0].id, [1u8; 16]);
//! # Ok::<(), embdb::Error>(())
//! ```

// Global Allocator: mimalloc
//
// Per-thread heaps with size-segregated free lists keep the small
// allocations on the append and search paths contention-free. Declared at
// the crate root so it applies to every allocation in the process.
use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

mod cursor;
mod error;
mod format;
mod search;
mod store;

pub use cursor::Cursor;
pub use error::{Error, Result};
pub use format::{HEADER_LEN, ID_LEN, MAGIC, VERSION};
pub use search::Hit;

use std::io;
use std::path::Path;
use std::str::FromStr;

use log::{debug, warn};
use parking_lot::RwLock;

use store::Store;

/// Sentinel path for an anonymous in-memory database. No file is ever
/// created; the image vanishes when the handle is dropped.
pub const TEMP_PATH: &str = ":temp:";

/// How a database is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// `"r"`: read-only; the file must exist.
    ReadOnly,
    /// `"a+"`: append and read; the file is created if missing.
    Append,
    /// `"a++"`: ephemeral in-memory image, regardless of path.
    Ephemeral,
}

impl Mode {
    pub fn writable(self) -> bool {
        !matches!(self, Mode::ReadOnly)
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "r" => Ok(Mode::ReadOnly),
            "a+" => Ok(Mode::Append),
            "a++" => Ok(Mode::Ephemeral),
            other => Err(invalid_input(format!("unknown open mode {other:?}"))),
        }
    }
}

fn invalid_input(msg: impl Into<String>) -> Error {
    Error::Io(io::Error::new(io::ErrorKind::InvalidInput, msg.into()))
}

/// Open or create a database of dimension `dim` at `path`.
///
/// An existing file must carry the same dimension. The path `:temp:` and
/// `Mode::Ephemeral` both yield an anonymous in-memory database.
pub fn open<P: AsRef<Path>>(path: P, dim: u32, mode: Mode) -> Result<Database> {
    Database::open(path, dim, mode)
}

/// Open an existing database, taking the dimension from its header.
pub fn open_existing<P: AsRef<Path>>(path: P, mode: Mode) -> Result<Database> {
    Database::open_existing(path, mode)
}

pub(crate) struct Inner {
    store: Store,
    /// Staged record bytes, invisible to readers until `flush`.
    wbuf: Vec<u8>,
    staged: u64,
    /// Unsynced in-place updates are pending.
    dirty: bool,
    closed: bool,
}

impl Inner {
    pub(crate) fn require_open(&self) -> Result<&Store> {
        if self.closed {
            Err(Error::Closed)
        } else {
            Ok(&self.store)
        }
    }

    pub(crate) fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Append the staged buffer, sync, then publish. A failure leaves the
    /// buffer intact for a retry and rolls the image back to the
    /// committed boundary.
    fn flush_locked(&mut self) -> Result<()> {
        if self.staged == 0 && !self.dirty {
            return Ok(());
        }
        let staged = self.staged;
        let result = if staged > 0 {
            self.store
                .append_records(&self.wbuf)
                .and_then(|()| self.store.sync())
        } else {
            self.store.sync()
        };
        match result {
            Ok(()) => {
                self.store.commit(staged);
                self.wbuf.clear();
                self.staged = 0;
                self.dirty = false;
                debug!("flushed {staged} records");
                Ok(())
            }
            Err(e) => {
                if let Err(rb) = self.store.rollback() {
                    warn!("rollback after failed flush also failed: {rb}");
                }
                Err(e)
            }
        }
    }
}

/// Handle to one open database file (or in-memory image).
///
/// All state sits behind a `parking_lot::RwLock`: searches and cursor
/// reads share the read lock and run concurrently, while append, flush,
/// and update take the write lock. Dropping the handle closes it,
/// flushing any staged records first.
pub struct Database {
    dim: u32,
    pub(crate) rec_len: usize,
    mode: Mode,
    recovered: u64,
    pub(crate) inner: RwLock<Inner>,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P, dim: u32, mode: Mode) -> Result<Self> {
        if dim == 0 {
            return Err(invalid_input("dimension must be at least 1"));
        }
        let path = path.as_ref();
        let store = if mode == Mode::Ephemeral || path == Path::new(TEMP_PATH) {
            Store::memory(dim)
        } else {
            Store::open_file(path, Some(dim), mode.writable())?
        };
        Ok(Self::from_store(store, mode))
    }

    pub fn open_existing<P: AsRef<Path>>(path: P, mode: Mode) -> Result<Self> {
        let path = path.as_ref();
        if mode == Mode::Ephemeral || path == Path::new(TEMP_PATH) {
            return Err(invalid_input(
                "an in-memory database starts empty; open it with an explicit dimension",
            ));
        }
        let store = Store::open_file(path, None, mode.writable())?;
        Ok(Self::from_store(store, mode))
    }

    fn from_store(store: Store, mode: Mode) -> Self {
        Self {
            dim: store.dim(),
            rec_len: store.record_len(),
            mode,
            recovered: store.recovered(),
            inner: RwLock::new(Inner {
                store,
                wbuf: Vec::new(),
                staged: 0,
                dirty: false,
                closed: false,
            }),
        }
    }

    /// Stage one record. Not visible to readers until `flush`.
    pub fn append(&self, id: &[u8], vec: &[f32]) -> Result<()> {
        self.check_id(id)?;
        if vec.len() != self.dim as usize {
            return Err(Error::VecLen {
                expected: 4 * self.dim as usize,
                got: 4 * vec.len(),
            });
        }
        if !self.mode.writable() {
            return Err(Error::Readonly);
        }
        let mut inner = self.inner.write();
        inner.require_open()?;
        inner.wbuf.extend_from_slice(id);
        for x in vec {
            inner.wbuf.extend_from_slice(&x.to_le_bytes());
        }
        inner.staged += 1;
        Ok(())
    }

    /// Stage one record from raw little-endian vector bytes.
    pub fn append_bytes(&self, id: &[u8], vec: &[u8]) -> Result<()> {
        self.check_id(id)?;
        let expected = 4 * self.dim as usize;
        if vec.len() != expected {
            return Err(Error::VecLen {
                expected,
                got: vec.len(),
            });
        }
        if !self.mode.writable() {
            return Err(Error::Readonly);
        }
        let mut inner = self.inner.write();
        inner.require_open()?;
        inner.wbuf.extend_from_slice(id);
        inner.wbuf.extend_from_slice(vec);
        inner.staged += 1;
        Ok(())
    }

    fn check_id(&self, id: &[u8]) -> Result<()> {
        if id.len() != ID_LEN {
            return Err(Error::IdLen {
                expected: ID_LEN,
                got: id.len(),
            });
        }
        Ok(())
    }

    /// Persist every staged record and any pending in-place updates.
    /// After a successful return the records survive a crash and are
    /// visible to fresh opens, new cursors, and searches.
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.inner.write();
        inner.require_open()?;
        inner.flush_locked()
    }

    /// Scan cursor over the records flushed so far.
    pub fn cursor(&self) -> Result<Cursor<'_>> {
        let inner = self.inner.read();
        let store = inner.require_open()?;
        Ok(Cursor::new(self, store.records()))
    }

    /// Exact top-k scan. With `norm` the scores are cosine similarities
    /// in [-1, 1]; without it, plain dot products. Records scoring below
    /// `threshold` are excluded.
    pub fn search(
        &self,
        query: &[f32],
        topk: usize,
        threshold: f32,
        norm: bool,
    ) -> Result<Vec<Hit>> {
        if query.len() != self.dim as usize {
            return Err(Error::VecLen {
                expected: 4 * self.dim as usize,
                got: 4 * query.len(),
            });
        }
        let inner = self.inner.read();
        let store = inner.require_open()?;
        search::scan_topk(store, query, topk, threshold, norm)
    }

    /// `search` over a raw little-endian query blob.
    pub fn search_bytes(
        &self,
        query: &[u8],
        topk: usize,
        threshold: f32,
        norm: bool,
    ) -> Result<Vec<Hit>> {
        let expected = 4 * self.dim as usize;
        if query.len() != expected {
            return Err(Error::VecLen {
                expected,
                got: query.len(),
            });
        }
        let floats: Vec<f32> = query
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        self.search(&floats, topk, threshold, norm)
    }

    /// Cosine top-k with no threshold. The preferred entry point when the
    /// stored vectors are not pre-normalized.
    pub fn query(&self, query: &[f32], topk: usize) -> Result<Vec<Hit>> {
        self.search(query, topk, f32::NEG_INFINITY, true)
    }

    /// Flush (when writable) and release the file. Idempotent; every
    /// later operation fails with `Closed`.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Ok(());
        }
        if self.mode.writable() {
            inner.flush_locked()?;
        }
        inner.store.close();
        inner.closed = true;
        debug!("closed database");
        Ok(())
    }

    /// Records visible to readers (staged appends excluded).
    pub fn len(&self) -> u64 {
        self.inner.read().store.records()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records staged in the write buffer, awaiting `flush`.
    pub fn staged(&self) -> u64 {
        self.inner.read().staged
    }

    pub fn dim(&self) -> u32 {
        self.dim
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Trailing bytes truncated by crash recovery when this handle was
    /// opened. Zero for a clean file.
    pub fn recovered_bytes(&self) -> u64 {
        self.recovered
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("close during drop failed: {e}");
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
