use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, bail};
use indicatif::{HumanCount, ProgressBar};
use log::{debug, info, warn};

use crate::compare::Comparator;
use crate::scanner::{ScanIndex, SourceEntry, TargetEntry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchEntry {
    pub path: PathBuf,
    pub size: u64,
    pub is_symlink: bool,
}

impl From<&TargetEntry> for MatchEntry {
    fn from(entry: &TargetEntry) -> Self {
        Self {
            path: entry.path.clone(),
            size: entry.size,
            is_symlink: entry.is_symlink,
        }
    }
}

/// A candidate that could not be compared with the source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompareFailure {
    pub path: PathBuf,
    pub cause: String,
}

/// Result for one source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComparisonOutcome {
    pub source_path: PathBuf,
    pub source_size: u64,
    pub source_is_symlink: bool,
    pub matches: Vec<MatchEntry>,
    pub errors: Vec<CompareFailure>,
}

impl ComparisonOutcome {
    fn new(source: &SourceEntry) -> Self {
        Self {
            source_path: source.path.clone(),
            source_size: source.size,
            source_is_symlink: source.is_symlink,
            matches: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn is_duplicate(&self) -> bool {
        !self.matches.is_empty()
    }
}

/// Receives outcomes in source order as they are produced.
pub trait OutcomeSink {
    fn record(&mut self, outcome: &ComparisonOutcome) -> Result<()>;
}

impl OutcomeSink for Vec<ComparisonOutcome> {
    fn record(&mut self, outcome: &ComparisonOutcome) -> Result<()> {
        self.push(outcome.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchSummary {
    pub source_files: usize,
    pub target_files: usize,
    pub outcomes: usize,
    /// Source files left out because an earlier file already listed them as a match.
    pub suppressed: usize,
    pub sources_with_duplicates: usize,
    pub duplicate_matches: usize,
    pub errors: usize,
    pub interrupted: bool,
}

/// Looks up every source file among the same-size target files.
pub struct Matcher<'a> {
    source: &'a ScanIndex,
    target: &'a ScanIndex,
    comparator: &'a Comparator,
    many_dupes_expected: bool,
    progress: ProgressBar,
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl<'a> Matcher<'a> {
    pub fn new(source: &'a ScanIndex, target: &'a ScanIndex, comparator: &'a Comparator) -> Self {
        Self {
            source,
            target,
            comparator,
            many_dupes_expected: false,
            progress: ProgressBar::hidden(),
            shutdown_flag: None,
        }
    }

    /// Forces whole-file hashing for every pair, whatever the comparator's strategy.
    pub fn many_dupes_expected(mut self, expected: bool) -> Self {
        self.many_dupes_expected = expected;
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    fn compare_pair(&self, source: &Path, candidate: &Path) -> Result<bool, String> {
        let result = if self.many_dupes_expected {
            self.comparator.files_equal_with(source, candidate, true)
        } else {
            self.comparator.files_equal(source, candidate)
        };
        result.map_err(|err| err.to_string())
    }

    pub fn run(&self, sink: &mut dyn OutcomeSink) -> Result<MatchSummary> {
        let Some(sources) = self.source.by_path() else {
            bail!("Source index for '{}' is not path-keyed", self.source.root().display());
        };
        if self.target.by_size().is_none() {
            bail!("Target index for '{}' is not size-bucketed", self.target.root().display());
        }

        // Only when both sides are the same tree can A=B later show up again as B=A.
        let same_root = self.source.root() == self.target.root();
        let mut visited: HashSet<PathBuf> = HashSet::new();
        let mut summary = MatchSummary {
            source_files: sources.len(),
            target_files: self.target.len(),
            ..MatchSummary::default()
        };

        info!(
            "Comparing {} source files against {} target files",
            HumanCount(summary.source_files as u64),
            HumanCount(summary.target_files as u64)
        );

        for source in sources.iter() {
            if self.is_shutdown_requested() {
                warn!("Comparison interrupted after {} files", summary.outcomes);
                summary.interrupted = true;
                break;
            }
            self.progress.inc(1);

            if same_root && visited.contains(&source.path) {
                debug!("'{}' already reported as a match, skipping", source.path.display());
                summary.suppressed += 1;
                continue;
            }

            let mut outcome = ComparisonOutcome::new(source);
            for candidate in self.target.bucket(source.size) {
                if candidate.path == source.path {
                    continue;
                }
                match self.compare_pair(&source.path, &candidate.path) {
                    Ok(true) => {
                        debug!(
                            "'{}' duplicates '{}'",
                            source.path.display(),
                            candidate.path.display()
                        );
                        outcome.matches.push(MatchEntry::from(candidate));
                        if same_root {
                            visited.insert(candidate.path.clone());
                        }
                    }
                    Ok(false) => {}
                    Err(cause) => {
                        warn!(
                            "Cannot compare '{}' with '{}': {}",
                            source.path.display(),
                            candidate.path.display(),
                            cause
                        );
                        outcome.errors.push(CompareFailure {
                            path: candidate.path.clone(),
                            cause,
                        });
                    }
                }
            }

            summary.outcomes += 1;
            if outcome.is_duplicate() {
                summary.sources_with_duplicates += 1;
                summary.duplicate_matches += outcome.matches.len();
            }
            summary.errors += outcome.errors.len();
            sink.record(&outcome)?;
        }

        self.progress.finish_and_clear();
        info!(
            "Comparison complete: {} of {} source files have duplicates ({} matches)",
            HumanCount(summary.sources_with_duplicates as u64),
            HumanCount(summary.outcomes as u64),
            HumanCount(summary.duplicate_matches as u64)
        );
        Ok(summary)
    }
}

/// Collects one outcome per evaluated source file, in source order.
pub fn compare(
    source: &ScanIndex,
    target: &ScanIndex,
    comparator: &Comparator,
    many_dupes_expected: bool,
) -> Result<Vec<ComparisonOutcome>> {
    let mut outcomes = Vec::new();
    Matcher::new(source, target, comparator)
        .many_dupes_expected(many_dupes_expected)
        .run(&mut outcomes)?;
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::CompareStrategy;
    use crate::config::FilterConfig;
    use crate::scanner::{NoopObserver, ScanMode, scan};
    use std::fs;
    use tempfile::tempdir;

    fn index(root: &Path, mode: ScanMode) -> ScanIndex {
        scan(root, &FilterConfig::default(), mode, &NoopObserver)
    }

    #[test]
    fn wrong_index_modes_are_rejected() {
        let dir = tempdir().unwrap();
        let source = index(dir.path(), ScanMode::SourceIndexed);
        let comparator = Comparator::new(CompareStrategy::Prefilter);

        assert!(compare(&source, &source, &comparator, false).is_err());
    }

    #[test]
    fn unmatched_size_is_unique() {
        let source_dir = tempdir().unwrap();
        let target_dir = tempdir().unwrap();
        fs::write(source_dir.path().join("a"), b"abc").unwrap();
        fs::write(target_dir.path().join("b"), b"abcd").unwrap();
        let comparator = Comparator::new(CompareStrategy::Prefilter);

        let outcomes = compare(
            &index(source_dir.path(), ScanMode::SourceIndexed),
            &index(target_dir.path(), ScanMode::TargetIndexed),
            &comparator,
            false,
        )
        .unwrap();

        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].is_duplicate());
        assert_eq!(comparator.stats().comparisons, 0);
    }

    #[test]
    fn all_matching_targets_are_recorded() {
        let source_dir = tempdir().unwrap();
        let target_dir = tempdir().unwrap();
        fs::write(source_dir.path().join("a"), b"same").unwrap();
        fs::write(target_dir.path().join("b"), b"same").unwrap();
        fs::write(target_dir.path().join("c"), b"same").unwrap();
        fs::write(target_dir.path().join("d"), b"diff").unwrap();
        let comparator = Comparator::new(CompareStrategy::Prefilter);

        let outcomes = compare(
            &index(source_dir.path(), ScanMode::SourceIndexed),
            &index(target_dir.path(), ScanMode::TargetIndexed),
            &comparator,
            true,
        )
        .unwrap();

        let matched: Vec<_> = outcomes[0].matches.iter().map(|m| m.path.clone()).collect();
        assert_eq!(
            matched,
            vec![target_dir.path().join("b"), target_dir.path().join("c")]
        );
        assert_eq!(comparator.stats().prefilter_hits, 0);
    }

    #[test]
    fn vanished_target_is_recorded_as_error() {
        let source_dir = tempdir().unwrap();
        let target_dir = tempdir().unwrap();
        fs::write(source_dir.path().join("a"), b"same").unwrap();
        fs::write(target_dir.path().join("b"), b"same").unwrap();
        fs::write(target_dir.path().join("c"), b"same").unwrap();
        let source = index(source_dir.path(), ScanMode::SourceIndexed);
        let target = index(target_dir.path(), ScanMode::TargetIndexed);
        fs::remove_file(target_dir.path().join("b")).unwrap();

        let comparator = Comparator::new(CompareStrategy::Prefilter);
        let mut outcomes = Vec::new();
        let summary = Matcher::new(&source, &target, &comparator)
            .run(&mut outcomes)
            .unwrap();

        assert_eq!(summary.errors, 1);
        assert_eq!(outcomes[0].errors[0].path, target_dir.path().join("b"));
        assert_eq!(outcomes[0].matches.len(), 1);
        assert_eq!(summary.sources_with_duplicates, 1);
    }

    #[test]
    fn shutdown_flag_stops_matching() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a"), b"same").unwrap();
        let comparator = Comparator::new(CompareStrategy::Prefilter);
        let source = index(dir.path(), ScanMode::SourceIndexed);
        let target = index(dir.path(), ScanMode::TargetIndexed);

        let mut outcomes = Vec::new();
        let summary = Matcher::new(&source, &target, &comparator)
            .with_shutdown_flag(Arc::new(AtomicBool::new(true)))
            .run(&mut outcomes)
            .unwrap();

        assert!(summary.interrupted);
        assert!(outcomes.is_empty());
    }
}
