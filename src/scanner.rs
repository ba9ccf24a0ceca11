//! Directory scanning into path-keyed (source) or size-bucketed (target) indices.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use indicatif::HumanCount;
use log::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::{FilterConfig, SPECIAL_FILE_NAMES, SymlinkPolicy};

/// The observer is notified each time this many files have been examined.
pub const PROGRESS_INTERVAL: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Index keyed by path, used for the tree whose files are looked up.
    SourceIndexed,
    /// Index bucketed by size, used for the tree searched for candidates.
    TargetIndexed,
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanMode::SourceIndexed => f.write_str("source"),
            ScanMode::TargetIndexed => f.write_str("target"),
        }
    }
}

/// Why a file was left out of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Hidden,
    SpecialFile,
    Pattern,
    Symlink,
    ZeroLength,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SkipReason::Hidden => "file is hidden",
            SkipReason::SpecialFile => "file is an OS metadata file",
            SkipReason::Pattern => "extension not in pattern list",
            SkipReason::Symlink => "file is a symbolic link",
            SkipReason::ZeroLength => "file is zero length",
        };
        f.write_str(text)
    }
}

/// Receives scan events. Purely observational: nothing here changes what is accepted.
pub trait ScanObserver: Sync {
    fn progress(&self, _examined: u64) {}
    fn skipped(&self, _path: &Path, _reason: SkipReason) {}
    fn unreadable(&self, _path: &Path, _error: &io::Error) {}
    fn walk_error(&self, _error: &walkdir::Error) {}
}

pub struct NoopObserver;

impl ScanObserver for NoopObserver {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub is_symlink: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetEntry {
    pub path: PathBuf,
    pub size: u64,
    pub is_symlink: bool,
}

/// Path-keyed entries that iterate in scan order.
#[derive(Debug, Clone, Default)]
pub struct SourceEntries {
    entries: Vec<SourceEntry>,
    positions: HashMap<PathBuf, usize>,
}

impl SourceEntries {
    /// Last write wins for a repeated path.
    fn insert(&mut self, entry: SourceEntry) {
        match self.positions.get(&entry.path) {
            Some(&i) => self.entries[i] = entry,
            None => {
                self.positions.insert(entry.path.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    pub fn get(&self, path: &Path) -> Option<&SourceEntry> {
        self.positions.get(path).map(|&i| &self.entries[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone)]
pub enum IndexEntries {
    ByPath(SourceEntries),
    BySize(BTreeMap<u64, Vec<TargetEntry>>),
}

/// The result of scanning one directory tree. Read-only once the scan returns.
#[derive(Debug, Clone)]
pub struct ScanIndex {
    root: PathBuf,
    entries: IndexEntries,
    scanned_count: u64,
    accepted_count: u64,
}

impl ScanIndex {
    pub fn new(root: &Path, mode: ScanMode) -> Self {
        let entries = match mode {
            ScanMode::SourceIndexed => IndexEntries::ByPath(SourceEntries::default()),
            ScanMode::TargetIndexed => IndexEntries::BySize(BTreeMap::new()),
        };
        Self {
            root: root.to_path_buf(),
            entries,
            scanned_count: 0,
            accepted_count: 0,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mode(&self) -> ScanMode {
        match self.entries {
            IndexEntries::ByPath(_) => ScanMode::SourceIndexed,
            IndexEntries::BySize(_) => ScanMode::TargetIndexed,
        }
    }

    /// Files examined, before any filter.
    pub fn scanned_count(&self) -> u64 {
        self.scanned_count
    }

    /// Files that passed every filter.
    pub fn accepted_count(&self) -> u64 {
        self.accepted_count
    }

    pub fn by_path(&self) -> Option<&SourceEntries> {
        match &self.entries {
            IndexEntries::ByPath(entries) => Some(entries),
            IndexEntries::BySize(_) => None,
        }
    }

    pub fn by_size(&self) -> Option<&BTreeMap<u64, Vec<TargetEntry>>> {
        match &self.entries {
            IndexEntries::BySize(buckets) => Some(buckets),
            IndexEntries::ByPath(_) => None,
        }
    }

    /// Target files of exactly `size` bytes; empty when there are none.
    pub fn bucket(&self, size: u64) -> &[TargetEntry] {
        self.by_size()
            .and_then(|buckets| buckets.get(&size))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of distinct files held by the index.
    pub fn len(&self) -> usize {
        match &self.entries {
            IndexEntries::ByPath(entries) => entries.len(),
            IndexEntries::BySize(buckets) => buckets.values().map(Vec::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&mut self, path: PathBuf, name: String, size: u64, is_symlink: bool) {
        self.accepted_count += 1;
        match &mut self.entries {
            IndexEntries::ByPath(entries) => entries.insert(SourceEntry {
                path,
                name,
                size,
                is_symlink,
            }),
            IndexEntries::BySize(buckets) => buckets.entry(size).or_default().push(TargetEntry {
                path,
                size,
                is_symlink,
            }),
        }
    }
}

/// Name-based filters, applied in order: hidden, special file, extension pattern.
pub fn filter_name(filters: &FilterConfig, name: &str) -> Option<SkipReason> {
    if filters.skip_hidden && name.starts_with('.') {
        return Some(SkipReason::Hidden);
    }
    if filters.skip_special_files && SPECIAL_FILE_NAMES.contains(&name) {
        return Some(SkipReason::SpecialFile);
    }
    if filters.limit_to_patterns {
        let extension = Path::new(name)
            .extension()
            .map(|ext| ext.to_string_lossy().to_uppercase());
        match extension {
            Some(ext) if filters.patterns.contains(&ext) => {}
            _ => return Some(SkipReason::Pattern),
        }
    }
    None
}

/// Walks one directory tree and builds its [`ScanIndex`].
#[derive(Debug, Clone)]
pub struct Scanner {
    root: PathBuf,
    filters: FilterConfig,
    mode: ScanMode,
    symlinks: SymlinkPolicy,
    skip_dirs: Vec<PathBuf>,
    excluded_files: Vec<PathBuf>,
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl Scanner {
    pub fn new(root: &Path, filters: FilterConfig, mode: ScanMode) -> Self {
        Self {
            root: root.to_path_buf(),
            filters,
            mode,
            symlinks: SymlinkPolicy::default(),
            skip_dirs: Vec::new(),
            excluded_files: Vec::new(),
            shutdown_flag: None,
        }
    }

    pub fn with_symlinks(mut self, policy: SymlinkPolicy) -> Self {
        self.symlinks = policy;
        self
    }

    /// Directories that are not descended into. Relative entries resolve against the root.
    pub fn with_skip_dirs(mut self, dirs: &[PathBuf]) -> Self {
        self.skip_dirs = dirs
            .iter()
            .map(|dir| {
                if dir.is_absolute() {
                    dir.clone()
                } else {
                    self.root.join(dir)
                }
            })
            .collect();
        self
    }

    /// Files never examined, such as the run's own logs. Compared by exact path.
    pub fn with_excluded_files(mut self, files: &[PathBuf]) -> Self {
        self.excluded_files = files.to_vec();
        self
    }

    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    fn is_skipped_dir(&self, entry: &DirEntry) -> bool {
        let skipped = entry.depth() > 0
            && entry.file_type().is_dir()
            && self.skip_dirs.iter().any(|dir| dir == entry.path());
        if skipped {
            debug!("Skipping directory '{}'", entry.path().display());
        }
        skipped
    }

    /// Regular files and links to non-directories. A dangling link counts as a file.
    fn is_file_like(entry: &DirEntry) -> bool {
        let file_type = entry.file_type();
        if file_type.is_file() {
            return true;
        }
        if file_type.is_symlink() {
            return !fs::metadata(entry.path()).is_ok_and(|m| m.is_dir());
        }
        false
    }

    pub fn scan(&self, observer: &dyn ScanObserver) -> ScanIndex {
        info!("Scanning {} directory '{}'", self.mode, self.root.display());
        let mut index = ScanIndex::new(&self.root, self.mode);

        let walker = WalkDir::new(&self.root)
            .follow_links(self.symlinks == SymlinkPolicy::Follow)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !self.is_skipped_dir(entry));

        for entry in walker {
            if self.is_shutdown_requested() {
                warn!("Scan of '{}' interrupted", self.root.display());
                break;
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Failed to read directory entry: {}", err);
                    observer.walk_error(&err);
                    continue;
                }
            };
            if !Self::is_file_like(&entry) {
                continue;
            }
            if self.excluded_files.iter().any(|file| file == entry.path()) {
                debug!("Ignoring '{}'", entry.path().display());
                continue;
            }

            index.scanned_count += 1;
            if index.scanned_count % PROGRESS_INTERVAL == 0 {
                observer.progress(index.scanned_count);
            }

            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            debug!("Examining '{}'", path.display());

            if let Some(reason) = filter_name(&self.filters, &name) {
                debug!("Skipping '{}': {}", path.display(), reason);
                observer.skipped(path, reason);
                continue;
            }

            let is_symlink = entry.path_is_symlink();
            if is_symlink && self.symlinks == SymlinkPolicy::Skip {
                debug!("Skipping '{}': {}", path.display(), SkipReason::Symlink);
                observer.skipped(path, SkipReason::Symlink);
                continue;
            }

            // Size of the link target, as for any other file.
            let size = match fs::metadata(path) {
                Ok(metadata) => metadata.len(),
                Err(err) => {
                    warn!("Cannot read size of '{}': {}", path.display(), err);
                    observer.unreadable(path, &err);
                    continue;
                }
            };

            if self.filters.skip_zero_length && size < 1 {
                debug!("Skipping '{}': {}", path.display(), SkipReason::ZeroLength);
                observer.skipped(path, SkipReason::ZeroLength);
                continue;
            }

            index.insert(path.to_path_buf(), name, size, is_symlink);
        }

        info!(
            "Scanned {} files in {} directory '{}', {} added",
            HumanCount(index.scanned_count),
            self.mode,
            self.root.display(),
            HumanCount(index.accepted_count)
        );
        index
    }
}

/// Scans `root` with default symlink handling and no pruned directories.
pub fn scan(
    root: &Path,
    filters: &FilterConfig,
    mode: ScanMode,
    observer: &dyn ScanObserver,
) -> ScanIndex {
    Scanner::new(root, filters.clone(), mode).scan(observer)
}
