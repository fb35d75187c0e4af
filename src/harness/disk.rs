//! Disk write throughput benchmark used by `File` mode.
//!
//! Writes a set of small files and one large file of ASCII `'0'` bytes and
//! times each group.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;
const WRITE_CHUNK: usize = 64 * 1024;

/// Fractional gigabytes to bytes (`0.000001` is roughly a kilobyte).
pub fn gb_to_bytes(gb: f64) -> u64 {
    if !gb.is_finite() || gb <= 0.0 {
        return 0;
    }
    (gb * BYTES_PER_GB).round() as u64
}

/// Fill `path` with `size` filler bytes, replacing any existing file.
pub fn write_dummy_file(path: &Path, size: u64) -> io::Result<()> {
    let chunk = [b'0'; WRITE_CHUNK];
    let mut out = BufWriter::new(File::create(path)?);
    let mut left = size;
    while left > 0 {
        let n = left.min(WRITE_CHUNK as u64) as usize;
        out.write_all(&chunk[..n])?;
        left -= n as u64;
    }
    out.flush()
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiskBenchmarkOutcome {
    pub small_files: u32,
    pub small_bytes: u64,
    pub small_elapsed: Duration,
    pub large_bytes: u64,
    pub large_elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct DiskBenchmark {
    pub dir: PathBuf,
    pub small_file_count: u32,
    pub small_file_bytes: u64,
    pub large_file_bytes: u64,
}

impl DiskBenchmark {
    pub fn run(&self) -> io::Result<DiskBenchmarkOutcome> {
        std::fs::create_dir_all(&self.dir)?;

        let started = Instant::now();
        for i in 0..self.small_file_count {
            write_dummy_file(&self.dir.join(format!("small-file-{i:03}.txt")), self.small_file_bytes)?;
        }
        let small_elapsed = started.elapsed();
        let small_bytes = self.small_file_bytes * u64::from(self.small_file_count);
        tracing::info!(
            files = self.small_file_count,
            bytes = small_bytes,
            elapsed_ms = small_elapsed.as_millis() as u64,
            "Small files written"
        );

        let started = Instant::now();
        write_dummy_file(&self.dir.join("big-file.txt"), self.large_file_bytes)?;
        let large_elapsed = started.elapsed();
        tracing::info!(
            bytes = self.large_file_bytes,
            elapsed_ms = large_elapsed.as_millis() as u64,
            "Big file written"
        );

        Ok(DiskBenchmarkOutcome {
            small_files: self.small_file_count,
            small_bytes,
            small_elapsed,
            large_bytes: self.large_file_bytes,
            large_elapsed,
        })
    }
}
