//! ```bash
//! RUSTFLAGS="-C target-cpu=native" cargo run --example load_test --release
//! ```

use anyhow::Context;
use embdb::{open, Mode};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{fs, time::Instant};

/// OpenAI ada-002 / text-embedding-3-small output dimension
const DIM: usize = 1536;
/// Number of records to generate for the load test
const N_VECS: usize = 10_000;
/// Number of queries to run for verification
const N_QUERIES: usize = 100;
/// Similarity threshold for search
const THRESHOLD: f32 = 0.7;
/// Deterministic seed for reproducibility
const SEED: u64 = 42;

fn random_vector(rng: &mut StdRng, dim: usize) -> Vec<f32> {
    (0..dim).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect()
}

/// Pretty-print a byte count as a human-readable string.
fn fmt_bytes(n: u64) -> String {
    match n {
        b if b < 1024 => format!("{b} B"),
        b if b < 1024 * 1024 => format!("{:.2} KiB", b as f64 / 1024.0),
        b if b < 1024 * 1024 * 1024 => format!("{:.2} MiB", b as f64 / (1024.0 * 1024.0)),
        b => format!("{:.2} GiB", b as f64 / (1024.0 * 1024.0 * 1024.0)),
    }
}

fn divider() {
    println!("{}", "─".repeat(60));
}

fn main() -> anyhow::Result<()> {
    println!("╔══════════════════════════════════════════════════════════╗");
    println!("║          embdb Load Test & Persistence Verifier          ║");
    println!("╚══════════════════════════════════════════════════════════╝");
    println!();

    let db_path = std::env::temp_dir().join("embdb_load_test.emb");
    let _ = fs::remove_file(&db_path);

    // ── Phase 1: Data Generation ─────────────────────────────────────────────
    divider();
    println!("Phase 1 — Generating random vectors");
    println!("  Records:   {N_VECS}");
    println!("  Dimension: {DIM}");
    println!(
        "  Raw data:  {} (uncompressed, f32)",
        fmt_bytes((N_VECS * DIM * 4) as u64)
    );

    let t0 = Instant::now();
    let mut rng = StdRng::seed_from_u64(SEED);
    let vectors: Vec<Vec<f32>> = (0..N_VECS).map(|_| random_vector(&mut rng, DIM)).collect();
    println!("  Generated in {:?}", t0.elapsed());

    // ── Phase 2: Append + Flush ──────────────────────────────────────────────
    divider();
    println!("Phase 2 — Appending and flushing to {}", db_path.display());

    let t0 = Instant::now();
    let db = open(&db_path, DIM as u32, Mode::Append).context("open database")?;
    for (i, v) in vectors.iter().enumerate() {
        db.append(&(i as u128).to_le_bytes(), v)?;
    }
    db.flush()?;
    let insert_duration = t0.elapsed();
    let file_size = fs::metadata(&db_path)?.len();
    println!("  Appended {N_VECS} records in {insert_duration:?}");
    println!(
        "  Throughput: {:.0} records/sec",
        N_VECS as f64 / insert_duration.as_secs_f64()
    );
    println!("  File size: {}", fmt_bytes(file_size));

    // ── Phase 3: Baseline Searches ───────────────────────────────────────────
    divider();
    println!("Phase 3 — Running {N_QUERIES} baseline searches");

    let mut query_rng = StdRng::seed_from_u64(SEED + 1); // different seed from data
    let queries: Vec<Vec<f32>> = (0..N_QUERIES)
        .map(|_| random_vector(&mut query_rng, DIM))
        .collect();

    let t0 = Instant::now();
    let mut baseline_results = Vec::with_capacity(N_QUERIES);
    for q in &queries {
        baseline_results.push(db.search(q, 10, THRESHOLD, true)?);
    }
    let search_duration = t0.elapsed();

    let matched = baseline_results.iter().filter(|r| !r.is_empty()).count();
    println!("  Completed in {:?}", search_duration);
    println!(
        "  Average per query: {:.2} µs",
        search_duration.as_micros() as f64 / N_QUERIES as f64
    );
    println!("  Queries with hits (score > {THRESHOLD}): {matched}/{N_QUERIES}");

    // ── Phase 4: Close + Reopen ──────────────────────────────────────────────
    divider();
    println!("Phase 4 — Closing and reopening from disk");

    db.close()?;
    let t0 = Instant::now();
    let db = open(&db_path, DIM as u32, Mode::Append).context("reopen database")?;
    let open_duration = t0.elapsed();
    println!("  Reopened in {open_duration:?}");
    println!("  Records on disk: {}", db.len());
    println!("  Recovered bytes: {}", db.recovered_bytes());
    anyhow::ensure!(db.len() == N_VECS as u64, "record count changed on reopen");

    // ── Phase 5: Integrity Verification ──────────────────────────────────────
    divider();
    println!("Phase 5 — Verifying search identity after reopen");

    let t0 = Instant::now();
    let mut mismatches = 0usize;
    let mut total_score_delta = 0.0f64;
    for (i, q) in queries.iter().enumerate() {
        let reopened = db.search(q, 10, THRESHOLD, true)?;
        let baseline = &baseline_results[i];
        if reopened.len() != baseline.len() {
            eprintln!(
                "  ✗ Query {i}: hit count mismatch, baseline={}, reopened={}",
                baseline.len(),
                reopened.len()
            );
            mismatches += 1;
            continue;
        }
        for (a, b) in baseline.iter().zip(&reopened) {
            if a.id != b.id {
                eprintln!("  ✗ Query {i}: ID mismatch");
                mismatches += 1;
            } else {
                total_score_delta += (a.score - b.score).abs() as f64;
            }
        }
    }
    let verify_duration = t0.elapsed();

    println!("  Verified in {:?}", verify_duration);
    println!("  Mismatches: {mismatches}/{N_QUERIES}");
    println!(
        "  Avg score delta (floating-point drift): {:.2e}",
        total_score_delta / N_QUERIES as f64
    );

    // ── Phase 6: Self-match spot checks ──────────────────────────────────────
    divider();
    println!("Phase 6 — Self-match spot checks");

    let mut self_misses = 0usize;
    for i in (0..N_VECS).step_by(N_VECS / 16) {
        let hits = db.query(&vectors[i], 1)?;
        let expected = (i as u128).to_le_bytes();
        match hits.first() {
            Some(h) if h.id == expected && (h.score - 1.0).abs() < 1e-5 => {}
            other => {
                eprintln!("  ✗ Record {i}: self-match failed ({other:?})");
                self_misses += 1;
            }
        }
    }
    println!("  Self-match failures: {self_misses}/16");

    // ── Phase 7: Summary ─────────────────────────────────────────────────────
    divider();
    if mismatches == 0 && self_misses == 0 {
        println!("✅ Persistence round-trip: PASSED");
    } else {
        println!("❌ Persistence round-trip: FAILED ({mismatches} mismatches, {self_misses} self-misses)");
    }

    println!();
    println!("Performance Summary");
    println!("──────────────────────────────────────────────────");
    println!(
        "  Append throughput:   {:.0} rec/s",
        N_VECS as f64 / insert_duration.as_secs_f64()
    );
    println!(
        "  Search latency (avg): {:.2} µs/query ({N_VECS} recs, dim={DIM})",
        search_duration.as_micros() as f64 / N_QUERIES as f64
    );
    println!("  On-disk size:        {}", fmt_bytes(file_size));
    println!("──────────────────────────────────────────────────");

    db.close()?;
    let _ = fs::remove_file(&db_path);

    Ok(())
}
