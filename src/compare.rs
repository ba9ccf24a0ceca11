//! Content comparison of two files already known to have the same size.
//!
//! The default policy hashes the first [`PARTIAL_HASH_BYTES`] of each file as a
//! cheap rejection test and only streams whole files through BLAKE3 when the
//! prefixes agree. When most size matches are expected to be real duplicates
//! the pre-check is pure overhead, so it can be skipped outright
//! ([`CompareStrategy::FullOnly`]) or dropped once it stops paying for itself
//! ([`CompareStrategy::Adaptive`]).

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use log::{debug, info};
use thiserror::Error;

use crate::cache::DigestCache;

/// Size of the prefix hashed by the pre-check.
pub const PARTIAL_HASH_BYTES: usize = 1024;

/// Partial-hash hits observed before the adaptive strategy may switch.
pub const ADAPTIVE_MIN_SAMPLES: u64 = 64;

const READ_BUFFER_SIZE: usize = 8192;

#[derive(Debug, Error)]
pub enum CompareError {
    #[error("file does not exist: '{}'", .0.display())]
    NotFound(PathBuf),
    #[error("path is a directory: '{}'", .0.display())]
    IsDirectory(PathBuf),
    #[error("failed to read '{}': {error}", path.display())]
    Io { path: PathBuf, error: io::Error },
}

impl CompareError {
    fn io(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |error| CompareError::Io {
            path: path.to_path_buf(),
            error,
        }
    }
}

fn check_comparable(path: &Path) -> Result<(), CompareError> {
    match path.metadata() {
        Ok(metadata) if metadata.is_dir() => Err(CompareError::IsDirectory(path.to_path_buf())),
        Ok(_) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            Err(CompareError::NotFound(path.to_path_buf()))
        }
        Err(err) => Err(CompareError::io(path)(err)),
    }
}

/// BLAKE3 digest of at most the first [`PARTIAL_HASH_BYTES`] of `path`.
pub fn partial_digest(path: &Path) -> Result<blake3::Hash, CompareError> {
    let file = File::open(path).map_err(CompareError::io(path))?;
    let mut prefix = Vec::with_capacity(PARTIAL_HASH_BYTES);
    file.take(PARTIAL_HASH_BYTES as u64)
        .read_to_end(&mut prefix)
        .map_err(CompareError::io(path))?;
    Ok(blake3::hash(&prefix))
}

/// BLAKE3 digest of the whole file, streamed in fixed-size chunks.
pub fn full_digest(path: &Path) -> Result<blake3::Hash, CompareError> {
    let mut file = File::open(path).map_err(CompareError::io(path))?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = [0; READ_BUFFER_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer).map_err(CompareError::io(path))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize())
}

/// Returns whether the two files have identical contents.
///
/// Fails with [`CompareError::NotFound`] or [`CompareError::IsDirectory`]
/// rather than reporting a mismatch when either path is not a readable file.
pub fn files_equal(a: &Path, b: &Path, full_pass_only: bool) -> Result<bool, CompareError> {
    check_comparable(a)?;
    check_comparable(b)?;
    if !full_pass_only && partial_digest(a)? != partial_digest(b)? {
        return Ok(false);
    }
    Ok(full_digest(a)? == full_digest(b)?)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompareStrategy {
    /// Partial-hash pre-check, then full hash.
    Prefilter,
    /// Full hash only.
    FullOnly,
    /// Starts as `Prefilter` and moves to `FullOnly` for the rest of the run once at
    /// least `min_samples` pre-check hits were seen and the fraction of them
    /// confirmed as duplicates reaches `threshold`.
    Adaptive { threshold: f64, min_samples: u64 },
}

/// Pre-check hit counters, for the run summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompareStats {
    pub comparisons: u64,
    pub prefilter_hits: u64,
    pub prefilter_confirmed: u64,
}

/// [`files_equal`] with a strategy and a digest cache shared across a run.
pub struct Comparator {
    strategy: CompareStrategy,
    cache: DigestCache,
    comparisons: AtomicU64,
    prefilter_hits: AtomicU64,
    prefilter_confirmed: AtomicU64,
    switched_to_full: AtomicBool,
}

impl Comparator {
    pub fn new(strategy: CompareStrategy) -> Self {
        Self::with_cache(strategy, DigestCache::in_memory())
    }

    pub fn with_cache(strategy: CompareStrategy, cache: DigestCache) -> Self {
        Self {
            strategy,
            cache,
            comparisons: AtomicU64::new(0),
            prefilter_hits: AtomicU64::new(0),
            prefilter_confirmed: AtomicU64::new(0),
            switched_to_full: AtomicBool::new(false),
        }
    }

    pub fn strategy(&self) -> CompareStrategy {
        self.strategy
    }

    pub fn cache(&self) -> &DigestCache {
        &self.cache
    }

    pub fn full_pass_only(&self) -> bool {
        match self.strategy {
            CompareStrategy::Prefilter => false,
            CompareStrategy::FullOnly => true,
            CompareStrategy::Adaptive { .. } => self.switched_to_full.load(Ordering::Relaxed),
        }
    }

    pub fn stats(&self) -> CompareStats {
        CompareStats {
            comparisons: self.comparisons.load(Ordering::Relaxed),
            prefilter_hits: self.prefilter_hits.load(Ordering::Relaxed),
            prefilter_confirmed: self.prefilter_confirmed.load(Ordering::Relaxed),
        }
    }

    /// Compares using the configured strategy.
    pub fn files_equal(&self, a: &Path, b: &Path) -> Result<bool, CompareError> {
        self.files_equal_with(a, b, self.full_pass_only())
    }

    pub fn files_equal_with(
        &self,
        a: &Path,
        b: &Path,
        full_pass_only: bool,
    ) -> Result<bool, CompareError> {
        check_comparable(a)?;
        check_comparable(b)?;
        self.comparisons.fetch_add(1, Ordering::Relaxed);

        if !full_pass_only {
            if partial_digest(a)? != partial_digest(b)? {
                debug!("Prefix differs: '{}' vs '{}'", a.display(), b.display());
                return Ok(false);
            }
            self.prefilter_hits.fetch_add(1, Ordering::Relaxed);
        }

        let equal = self.cached_full_digest(a)? == self.cached_full_digest(b)?;
        if !full_pass_only && equal {
            self.prefilter_confirmed.fetch_add(1, Ordering::Relaxed);
            self.maybe_switch_to_full();
        }
        Ok(equal)
    }

    fn cached_full_digest(&self, path: &Path) -> Result<blake3::Hash, CompareError> {
        if let Some(hash) = self.cache.get(path) {
            return Ok(hash);
        }
        let hash = full_digest(path)?;
        self.cache.insert(path, hash);
        Ok(hash)
    }

    fn maybe_switch_to_full(&self) {
        let CompareStrategy::Adaptive {
            threshold,
            min_samples,
        } = self.strategy
        else {
            return;
        };
        let hits = self.prefilter_hits.load(Ordering::Relaxed);
        let confirmed = self.prefilter_confirmed.load(Ordering::Relaxed);
        if hits < min_samples || (confirmed as f64 / hits as f64) < threshold {
            return;
        }
        if !self.switched_to_full.swap(true, Ordering::Relaxed) {
            info!(
                "{} of {} pre-check hits were duplicates, switching to full-file hashing",
                confirmed, hits
            );
        }
    }
}
