//! Exact top-k similarity scan.
//!
//! Records are scored directly from their on-disk little-endian bytes;
//! there is no per-record decode allocation. The scan walks the
//! committed region in fixed-size blocks, scores each block's records on
//! the rayon pool, then folds the scores into a bounded min-heap in file
//! order so the output is identical to a single-threaded scan.
//!
//! With `norm = true` the query is normalized once up front and each
//! record contributes its own L2 norm from the same fused pass that
//! computes the dot product, so the score is the cosine in [-1, 1]. A
//! zero vector on either side scores 0. With `norm = false` the score is
//! the plain dot product.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use rayon::prelude::*;
use serde::Serialize;

use crate::error::Result;
use crate::format::ID_LEN;
use crate::store::Store;

/// Records fetched per scan block. One block of 1536-dim records is
/// ~6 MiB, enough to amortize the positioned read and the rayon dispatch.
const SCAN_BLOCK_RECORDS: usize = 1024;

/// One search match: the record's id bytes and its similarity score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hit {
    pub id: [u8; ID_LEN],
    pub score: f32,
}

/// Compute the L2 norm of a slice.
#[inline]
pub(crate) fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Normalize a slice, returning a new owned Vec<f32>. A zero vector is
/// returned unchanged so it scores 0 against everything.
#[inline]
pub(crate) fn normalize_vec(v: &[f32]) -> Vec<f32> {
    let norm = l2_norm(v);
    let inv = if norm > 1e-10 { 1.0 / norm } else { 1.0 };
    v.iter().map(|x| x * inv).collect()
}

/// Load one little-endian f32 from `bytes` at byte offset `off`.
///
/// # Safety
///
/// `off + 4 <= bytes.len()` must hold at every call site.
#[inline(always)]
unsafe fn f32_le_unchecked(bytes: &[u8], off: usize) -> f32 {
    f32::from_le_bytes([
        *bytes.get_unchecked(off),
        *bytes.get_unchecked(off + 1),
        *bytes.get_unchecked(off + 2),
        *bytes.get_unchecked(off + 3),
    ])
}

/// Dot product of a query against one record row still in its on-disk
/// little-endian form.
///
/// Eight elements per iteration match one 256-bit AVX2 register, and the
/// eight independent accumulators break the serial add dependency so the
/// FMA pipes stay busy. `from_le_bytes` compiles to a plain load on
/// little-endian targets.
#[inline(always)]
fn dot_le(query: &[f32], row: &[u8]) -> f32 {
    debug_assert_eq!(row.len(), query.len() * 4);

    let len = query.len();
    let chunks = len / 8;

    let mut acc0 = 0.0f32;
    let mut acc1 = 0.0f32;
    let mut acc2 = 0.0f32;
    let mut acc3 = 0.0f32;
    let mut acc4 = 0.0f32;
    let mut acc5 = 0.0f32;
    let mut acc6 = 0.0f32;
    let mut acc7 = 0.0f32;

    // SAFETY: for i < chunks, base + 7 < chunks * 8 <= len, so every
    // query index is in bounds and every row offset stays below
    // (base + 7) * 4 + 4 <= len * 4 == row.len().
    unsafe {
        for i in 0..chunks {
            let base = i * 8;
            acc0 += query.get_unchecked(base) * f32_le_unchecked(row, base * 4);
            acc1 += query.get_unchecked(base + 1) * f32_le_unchecked(row, (base + 1) * 4);
            acc2 += query.get_unchecked(base + 2) * f32_le_unchecked(row, (base + 2) * 4);
            acc3 += query.get_unchecked(base + 3) * f32_le_unchecked(row, (base + 3) * 4);
            acc4 += query.get_unchecked(base + 4) * f32_le_unchecked(row, (base + 4) * 4);
            acc5 += query.get_unchecked(base + 5) * f32_le_unchecked(row, (base + 5) * 4);
            acc6 += query.get_unchecked(base + 6) * f32_le_unchecked(row, (base + 6) * 4);
            acc7 += query.get_unchecked(base + 7) * f32_le_unchecked(row, (base + 7) * 4);
        }
    }

    let mut result = acc0 + acc1 + acc2 + acc3 + acc4 + acc5 + acc6 + acc7;

    // Remainder: safe path for trailing elements. Common embedding dims
    // (64, 384, 768, 1536) take zero iterations here.
    for i in chunks * 8..len {
        result += query[i] * f32::from_le_bytes([
            row[i * 4],
            row[i * 4 + 1],
            row[i * 4 + 2],
            row[i * 4 + 3],
        ]);
    }

    result
}

/// Fused dot product and squared norm of the row, one pass over the
/// bytes. Four lanes per accumulator set; two sets in flight.
#[inline(always)]
fn dot_and_sqnorm_le(query: &[f32], row: &[u8]) -> (f32, f32) {
    debug_assert_eq!(row.len(), query.len() * 4);

    let len = query.len();
    let chunks = len / 4;

    let mut d0 = 0.0f32;
    let mut d1 = 0.0f32;
    let mut d2 = 0.0f32;
    let mut d3 = 0.0f32;
    let mut n0 = 0.0f32;
    let mut n1 = 0.0f32;
    let mut n2 = 0.0f32;
    let mut n3 = 0.0f32;

    // SAFETY: for i < chunks, base + 3 < chunks * 4 <= len; the row
    // offsets stay below (base + 3) * 4 + 4 <= len * 4 == row.len().
    unsafe {
        for i in 0..chunks {
            let base = i * 4;
            let v0 = f32_le_unchecked(row, base * 4);
            let v1 = f32_le_unchecked(row, (base + 1) * 4);
            let v2 = f32_le_unchecked(row, (base + 2) * 4);
            let v3 = f32_le_unchecked(row, (base + 3) * 4);
            d0 += query.get_unchecked(base) * v0;
            d1 += query.get_unchecked(base + 1) * v1;
            d2 += query.get_unchecked(base + 2) * v2;
            d3 += query.get_unchecked(base + 3) * v3;
            n0 += v0 * v0;
            n1 += v1 * v1;
            n2 += v2 * v2;
            n3 += v3 * v3;
        }
    }

    let mut dot = d0 + d1 + d2 + d3;
    let mut sqnorm = n0 + n1 + n2 + n3;

    for i in chunks * 4..len {
        let v = f32::from_le_bytes([
            row[i * 4],
            row[i * 4 + 1],
            row[i * 4 + 2],
            row[i * 4 + 3],
        ]);
        dot += query[i] * v;
        sqnorm += v * v;
    }

    (dot, sqnorm)
}

/// Score one record row against a query that is already normalized when
/// `norm` is set.
#[inline]
fn score_row(query: &[f32], row: &[u8], norm: bool) -> f32 {
    if norm {
        let (dot, sqnorm) = dot_and_sqnorm_le(query, row);
        if sqnorm > 0.0 {
            dot / sqnorm.sqrt()
        } else {
            0.0
        }
    } else {
        dot_le(query, row)
    }
}

/// Heap entry. Ordering puts the lowest score first, and among equal
/// scores the latest arrival first, so the heap minimum is always the
/// entry that loses to any strictly better candidate and ties never
/// displace an earlier record.
struct Candidate {
    score: f32,
    index: u64,
    id: [u8; ID_LEN],
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.score.total_cmp(&other.score).is_eq() && self.index == other.index
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.index.cmp(&self.index))
    }
}

/// Bounded min-heap of the best candidates seen so far.
pub(crate) struct TopK {
    heap: BinaryHeap<Reverse<Candidate>>,
    capacity: usize,
    threshold: f32,
}

impl TopK {
    pub fn new(capacity: usize, threshold: f32) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity.min(1024)),
            capacity,
            threshold,
        }
    }

    /// Offer one candidate in file order. Strict `>` against the heap
    /// minimum keeps the earlier record on equal scores.
    pub fn offer(&mut self, index: u64, id: [u8; ID_LEN], score: f32) {
        if self.capacity == 0 || score < self.threshold {
            return;
        }
        if self.heap.len() < self.capacity {
            self.heap.push(Reverse(Candidate { score, index, id }));
        } else if let Some(Reverse(min)) = self.heap.peek() {
            if score > min.score {
                self.heap.pop();
                self.heap.push(Reverse(Candidate { score, index, id }));
            }
        }
    }

    /// Drain into hits sorted descending by score, ties in file order.
    pub fn into_hits(self) -> Vec<Hit> {
        let mut all: Vec<Candidate> = self.heap.into_iter().map(|Reverse(c)| c).collect();
        all.sort_unstable_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.index.cmp(&b.index))
        });
        all.into_iter()
            .map(|c| Hit {
                id: c.id,
                score: c.score,
            })
            .collect()
    }
}

/// Scan every committed record and return the best `topk` at or above
/// `threshold`, best first.
pub(crate) fn scan_topk(
    store: &Store,
    query: &[f32],
    topk: usize,
    threshold: f32,
    norm: bool,
) -> Result<Vec<Hit>> {
    let total = store.records();
    if topk == 0 || total == 0 {
        return Ok(Vec::new());
    }

    let rec_len = store.record_len();
    let prepared;
    let q: &[f32] = if norm {
        prepared = normalize_vec(query);
        &prepared
    } else {
        query
    };

    let mut selector = TopK::new(topk, threshold);
    let block_records = SCAN_BLOCK_RECORDS.min(total as usize);
    let mut block = vec![0u8; block_records * rec_len];
    let mut scores: Vec<f32> = Vec::with_capacity(block_records);

    let mut first = 0u64;
    while first < total {
        let take = block_records.min((total - first) as usize);
        let buf = &mut block[..take * rec_len];
        store.read_span(first, buf)?;

        buf.par_chunks_exact(rec_len)
            .map(|rec| score_row(q, &rec[ID_LEN..], norm))
            .collect_into_vec(&mut scores);

        for (i, &score) in scores.iter().enumerate() {
            let mut id = [0u8; ID_LEN];
            id.copy_from_slice(&buf[i * rec_len..i * rec_len + ID_LEN]);
            selector.offer(first + i as u64, id, score);
        }
        first += take as u64;
    }

    Ok(selector.into_hits())
}
