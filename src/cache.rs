use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use indicatif::{HumanBytes, HumanCount, ProgressBar};
use log::{debug, info, warn};
use zstd::stream::{Encoder, decode_all};

/// Path -> (mtime in nanoseconds, size, hex digest).
type Entries = HashMap<String, (u64, u64, String)>;

/// Full-file digests keyed by path, valid only while size and mtime are unchanged.
///
/// Within a run this stops a source file from being hashed once per candidate.
/// When built with [`DigestCache::load`] the entries are also persisted as
/// zstd-compressed JSON between runs.
pub struct DigestCache {
    cache_file: Option<PathBuf>,
    entries: Mutex<Entries>,
}

fn file_stamp(path: &Path) -> io::Result<(u64, u64)> {
    let metadata = path.metadata()?;
    let mtime = metadata
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0);
    Ok((mtime, metadata.len()))
}

fn cache_key(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

impl DigestCache {
    pub fn in_memory() -> Self {
        Self {
            cache_file: None,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Loads a cache file written by [`DigestCache::save`]. A missing or
    /// unreadable file yields an empty cache that will be written on save.
    pub fn load(cache_file: &Path) -> Self {
        let mut entries = HashMap::new();

        match fs::read(cache_file) {
            Ok(compressed) => {
                info!(
                    "Loading hash cache from '{}' ({})",
                    cache_file.display(),
                    HumanBytes(compressed.len() as u64)
                );
                let spinner = ProgressBar::new_spinner();
                spinner.set_message("Loading hash cache...");
                spinner.enable_steady_tick(std::time::Duration::from_millis(100));

                match decode_all(&compressed[..])
                    .map_err(anyhow::Error::from)
                    .and_then(|bytes| Ok(serde_json::from_slice::<Entries>(&bytes)?))
                {
                    Ok(parsed) => {
                        info!("Hash cache has {} entries", HumanCount(parsed.len() as u64));
                        entries = parsed;
                    }
                    Err(err) => warn!("Failed to parse hash cache, starting fresh: {}", err),
                }
                spinner.finish_and_clear();
            }
            Err(_) => warn!("No hash cache found at '{}', starting fresh", cache_file.display()),
        }

        Self {
            cache_file: Some(cache_file.to_path_buf()),
            entries: Mutex::new(entries),
        }
    }

    pub fn get(&self, path: &Path) -> Option<blake3::Hash> {
        let (mtime, size) = file_stamp(path).ok()?;
        let entries = self.entries.lock().ok()?;
        let (cached_mtime, cached_size, hex) = entries.get(&cache_key(path))?;
        if *cached_mtime != mtime || *cached_size != size {
            debug!("Stale cache entry for '{}'", path.display());
            return None;
        }
        blake3::Hash::from_hex(hex).ok()
    }

    pub fn insert(&self, path: &Path, hash: blake3::Hash) {
        let Ok((mtime, size)) = file_stamp(path) else {
            return;
        };
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(cache_key(path), (mtime, size, hash.to_hex().to_string()));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes the cache back to its file. Does nothing for an in-memory cache.
    pub fn save(&self) -> Result<()> {
        let Some(cache_file) = &self.cache_file else {
            return Ok(());
        };
        info!(
            "Saving {} hashes to '{}'",
            HumanCount(self.len() as u64),
            cache_file.display()
        );

        let content = {
            let entries = self
                .entries
                .lock()
                .map_err(|_| anyhow::anyhow!("Hash cache lock poisoned"))?;
            serde_json::to_vec(&*entries)?
        };
        if let Some(parent) = cache_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create '{}'", parent.display()))?;
        }
        let file = fs::File::create(cache_file)
            .with_context(|| format!("Failed to create hash cache '{}'", cache_file.display()))?;
        let mut encoder = Encoder::new(file, 9)?;
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        if threads > 1 {
            if let Err(err) = encoder.multithread(threads as u32) {
                debug!("Multi-threaded compression unavailable ({}), using one thread", err);
            }
        }
        encoder.write_all(&content)?;
        encoder.finish()?;

        let new_size = fs::metadata(cache_file).map(|m| m.len()).unwrap_or(0);
        info!("Hash cache compressed size: {}", HumanBytes(new_size));
        Ok(())
    }
}
