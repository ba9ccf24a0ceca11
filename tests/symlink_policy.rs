#![cfg(unix)]

use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use find_file_dups::compare::{Comparator, CompareStrategy};
use find_file_dups::config::{FilterConfig, SymlinkPolicy};
use find_file_dups::matcher::Matcher;
use find_file_dups::report::RunLogs;
use find_file_dups::scanner::{ScanIndex, ScanMode, ScanObserver, Scanner, SkipReason};
use tempfile::tempdir;

#[derive(Default)]
struct Recorder {
    skipped: Mutex<Vec<(PathBuf, SkipReason)>>,
    walk_errors: Mutex<Vec<Option<PathBuf>>>,
}

impl ScanObserver for Recorder {
    fn skipped(&self, path: &Path, reason: SkipReason) {
        self.skipped.lock().unwrap().push((path.to_path_buf(), reason));
    }

    fn walk_error(&self, error: &walkdir::Error) {
        self.walk_errors
            .lock()
            .unwrap()
            .push(error.path().map(Path::to_path_buf));
    }
}

fn scan_with(root: &Path, policy: SymlinkPolicy, mode: ScanMode, observer: &dyn ScanObserver) -> ScanIndex {
    Scanner::new(root, FilterConfig::default(), mode)
        .with_symlinks(policy)
        .scan(observer)
}

#[test]
fn test_skip_policy_leaves_out_symlinked_files() {
    let dir = tempdir().unwrap();
    let real = dir.path().join("real.txt");
    let link = dir.path().join("link.txt");
    fs::write(&real, b"content").unwrap();
    symlink(&real, &link).unwrap();
    let recorder = Recorder::default();

    let index = scan_with(dir.path(), SymlinkPolicy::default(), ScanMode::SourceIndexed, &recorder);

    let entries = index.by_path().unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries.get(&real).is_some());
    assert!(entries.get(&link).is_none());
    assert_eq!(
        recorder.skipped.lock().unwrap().as_slice(),
        &[(link, SkipReason::Symlink)]
    );
}

#[test]
fn test_record_policy_keeps_link_and_flags_it_in_the_log() {
    let source_dir = tempdir().unwrap();
    let target_dir = tempdir().unwrap();
    let log_dir = tempdir().unwrap();
    let real = source_dir.path().join("real.txt");
    let link = source_dir.path().join("link.txt");
    let copy = target_dir.path().join("copy.txt");
    fs::write(&real, b"content").unwrap();
    symlink(&real, &link).unwrap();
    fs::write(&copy, b"content").unwrap();
    let recorder = Recorder::default();

    let source = scan_with(source_dir.path(), SymlinkPolicy::Record, ScanMode::SourceIndexed, &recorder);
    let target = scan_with(target_dir.path(), SymlinkPolicy::Record, ScanMode::TargetIndexed, &recorder);
    assert!(recorder.skipped.lock().unwrap().is_empty());
    let entry = source.by_path().unwrap().get(&link).unwrap();
    assert!(entry.is_symlink);
    assert_eq!(entry.size, 7);

    let log_file = log_dir.path().join("run.log");
    let comparator = Comparator::new(CompareStrategy::Prefilter);
    let mut logs = RunLogs::create(&log_file, true, source_dir.path(), target_dir.path()).unwrap();
    Matcher::new(&source, &target, &comparator)
        .run(&mut logs)
        .unwrap();
    logs.finish().unwrap();

    let log = fs::read_to_string(&log_file).unwrap();
    let expected = format!(
        "RESULT\t\tDUPLICATE\t{}\t7\tTrue\t{}\t7\tFalse\t",
        link.display(),
        copy.display()
    );
    assert!(log.lines().any(|line| line == expected), "{log}");
}

#[test]
fn test_only_follow_policy_descends_symlinked_directories() {
    let outside = tempdir().unwrap();
    let root = tempdir().unwrap();
    fs::write(outside.path().join("far.txt"), b"far away").unwrap();
    fs::write(root.path().join("near.txt"), b"near").unwrap();
    symlink(outside.path(), root.path().join("linked")).unwrap();
    let far = root.path().join("linked").join("far.txt");

    for policy in [SymlinkPolicy::Skip, SymlinkPolicy::Record, SymlinkPolicy::Follow] {
        let index = scan_with(root.path(), policy, ScanMode::SourceIndexed, &Recorder::default());
        let entries = index.by_path().unwrap();

        assert!(entries.get(&root.path().join("near.txt")).is_some());
        assert_eq!(
            entries.get(&far).is_some(),
            policy == SymlinkPolicy::Follow,
            "{policy:?}"
        );
    }
}

#[test]
fn test_symlink_loop_is_a_walk_error_and_scan_continues() {
    let dir = tempdir().unwrap();
    let sub = dir.path().join("sub");
    fs::create_dir(&sub).unwrap();
    fs::write(dir.path().join("a"), b"top").unwrap();
    fs::write(sub.join("b"), b"nested").unwrap();
    symlink("..", sub.join("loop")).unwrap();
    let recorder = Recorder::default();

    let index = scan_with(dir.path(), SymlinkPolicy::Follow, ScanMode::TargetIndexed, &recorder);

    let walk_errors = recorder.walk_errors.lock().unwrap();
    assert_eq!(walk_errors.as_slice(), &[Some(sub.join("loop"))]);
    assert_eq!(index.bucket(3).len(), 1);
    assert_eq!(index.bucket(6).len(), 1);
    assert_eq!(index.len(), 2);
}
