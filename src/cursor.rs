//! Snapshot linear scan with optional in-place write-back.
//!
//! A cursor's visible length is fixed when it is created: records
//! flushed afterwards are not yielded, and the cursor never sees the
//! handle's staged write buffer. `update` targets the record most
//! recently returned by `read`.

use crate::error::{Error, Result};
use crate::format::ID_LEN;
use crate::Database;

pub struct Cursor<'db> {
    db: &'db Database,
    /// Index of the next record `read` will return.
    next: u64,
    /// Records visible to this cursor, fixed at creation.
    visible: u64,
    /// Record most recently returned by `read`; target of `update`.
    current: Option<u64>,
}

impl<'db> Cursor<'db> {
    pub(crate) fn new(db: &'db Database, visible: u64) -> Self {
        Self {
            db,
            next: 0,
            visible,
            current: None,
        }
    }

    /// Rewind to the first record. Clears the update target.
    pub fn reset(&mut self) {
        self.next = 0;
        self.current = None;
    }

    /// Read the next record, returning owned copies of its id and raw
    /// little-endian vector bytes, or `None` past the snapshot end.
    pub fn read(&mut self) -> Result<Option<([u8; ID_LEN], Vec<u8>)>> {
        let inner = self.db.inner.read();
        let store = inner.require_open()?;
        if self.next >= self.visible {
            return Ok(None);
        }

        let mut rec = vec![0u8; store.record_len()];
        store.read_span(self.next, &mut rec)?;
        let mut id = [0u8; ID_LEN];
        id.copy_from_slice(&rec[..ID_LEN]);
        let vec = rec.split_off(ID_LEN);

        self.current = Some(self.next);
        self.next += 1;
        Ok(Some((id, vec)))
    }

    /// Overwrite the record most recently returned by `read`. With
    /// `flush` the new bytes are synced before returning; otherwise
    /// durability is deferred to the next `flush()` or `close()`.
    pub fn update(&mut self, id: &[u8], vec: &[u8], flush: bool) -> Result<()> {
        if !self.db.mode().writable() {
            return Err(Error::Readonly);
        }
        if id.len() != ID_LEN {
            return Err(Error::IdLen {
                expected: ID_LEN,
                got: id.len(),
            });
        }
        let vec_len = self.db.rec_len - ID_LEN;
        if vec.len() != vec_len {
            return Err(Error::VecLen {
                expected: vec_len,
                got: vec.len(),
            });
        }
        let index = self.current.ok_or(Error::NoCurrent)?;

        let mut inner = self.db.inner.write();
        inner.require_open()?;
        let mut rec = Vec::with_capacity(self.db.rec_len);
        rec.extend_from_slice(id);
        rec.extend_from_slice(vec);
        inner.store_mut().overwrite_record(index, &rec)?;
        if flush {
            inner.store_mut().sync()?;
        } else {
            inner.mark_dirty();
        }
        Ok(())
    }

    /// Release the cursor. Equivalent to dropping it.
    pub fn close(self) {}
}
