//! Tab-delimited duplicates and errors logs, scan progress, and the run summary.

use std::ffi::OsString;
use std::fmt::Display;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use colored::Colorize;
use indicatif::{HumanCount, MultiProgress, ProgressBar, ProgressStyle};
use log::{error, info, warn};

use crate::compare::CompareStats;
use crate::matcher::{ComparisonOutcome, MatchSummary, OutcomeSink};
use crate::scanner::ScanObserver;
use crate::utils::{format_human_elapsed, local_timestamp};

pub const DUPLICATES_HEADER: &str = "RESULT\t\tSTATUS\tSOURCE PATH\tSOURCE SIZE\tSOURCE IS SYMLINK\t[MATCH PATH\tMATCH SIZE\tMATCH IS SYMLINK\t]...\n";

/// Path of the errors log that accompanies `log_file`.
pub fn errors_log_path(log_file: &Path) -> PathBuf {
    let mut name = OsString::from(log_file.as_os_str());
    name.push(".errors");
    PathBuf::from(name)
}

fn escape_into(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
}

/// A path as one log column: tab, newline and carriage return are escaped,
/// and bytes that are not UTF-8 are written as `\xNN`.
pub fn escape_path(path: &Path) -> String {
    let mut out = String::new();
    for chunk in path.as_os_str().as_encoded_bytes().utf8_chunks() {
        escape_into(&mut out, chunk.valid());
        for byte in chunk.invalid() {
            out.push_str(&format!("\\x{byte:02X}"));
        }
    }
    out
}

fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    escape_into(&mut out, text);
    out
}

fn flag(value: bool) -> &'static str {
    if value { "True" } else { "False" }
}

/// One line of the duplicates log.
pub fn format_outcome(outcome: &ComparisonOutcome) -> String {
    let mut line = format!(
        "RESULT\t\t{}\t{}\t{}\t{}\t",
        if outcome.is_duplicate() { "DUPLICATE" } else { "UNIQUE" },
        escape_path(&outcome.source_path),
        outcome.source_size,
        flag(outcome.source_is_symlink)
    );
    for entry in &outcome.matches {
        line.push_str(&format!(
            "{}\t{}\t{}\t",
            escape_path(&entry.path),
            entry.size,
            flag(entry.is_symlink)
        ));
    }
    line.push('\n');
    line
}

fn open_log(path: &Path, overwrite: bool) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create log directory '{}'", parent.display()))?;
    }
    let mut options = OpenOptions::new();
    options.write(true);
    if overwrite {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }
    options.open(path).map_err(|err| {
        if err.kind() == io::ErrorKind::AlreadyExists {
            anyhow!("Log file already exists and overwriting is disabled: '{}'", path.display())
        } else {
            anyhow!("Cannot create log file '{}': {}", path.display(), err)
        }
    })
}

/// The errors log. Shared by both concurrent scans and the matcher, so writes
/// go through a mutex.
pub struct ErrorLog {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    count: AtomicUsize,
}

impl ErrorLog {
    fn write_line(&self, line: &str) {
        self.count.fetch_add(1, Ordering::Relaxed);
        let result = match self.writer.lock() {
            Ok(mut writer) => writer.write_all(line.as_bytes()),
            Err(_) => Err(io::Error::other("errors log lock poisoned")),
        };
        if let Err(err) = result {
            error!("Failed to write to '{}': {}", self.path.display(), err);
        }
    }

    pub fn scan_error(&self, path: Option<&Path>, cause: &dyn Display) {
        let path = path.map(escape_path).unwrap_or_default();
        self.write_line(&format!(
            "Error scanning\t{}\t{}\n",
            path,
            escape_text(&cause.to_string())
        ));
    }

    pub fn compare_errors(&self, outcome: &ComparisonOutcome) {
        for failure in &outcome.errors {
            self.write_line(&format!(
                "Error comparing\t{}\t{}\t{}\t{}\t\n",
                escape_path(&outcome.source_path),
                outcome.source_size,
                escape_path(&failure.path),
                escape_text(&failure.cause)
            ));
        }
    }

    /// Error lines written so far.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// The duplicates log and its errors log for one run.
pub struct RunLogs {
    duplicates_path: PathBuf,
    duplicates: BufWriter<File>,
    errors: ErrorLog,
}

impl RunLogs {
    /// Creates both files before writing to either, so a failure leaves no
    /// partial output behind.
    pub fn create(
        log_file: &Path,
        overwrite: bool,
        source_root: &Path,
        target_root: &Path,
    ) -> Result<Self> {
        let errors_path = errors_log_path(log_file);
        info!("Creating duplicates log '{}'", log_file.display());
        let duplicates_file = open_log(log_file, overwrite)?;
        let errors_file = match open_log(&errors_path, overwrite) {
            Ok(file) => file,
            Err(err) => {
                drop(duplicates_file);
                let _ = fs::remove_file(log_file);
                return Err(err);
            }
        };

        let mut duplicates = BufWriter::new(duplicates_file);
        duplicates
            .write_all(DUPLICATES_HEADER.as_bytes())
            .with_context(|| format!("Cannot write to '{}'", log_file.display()))?;

        let mut errors = BufWriter::new(errors_file);
        write!(
            errors,
            "ERRORS\t{}\nSource\t{}\nTarget\t{}\n",
            local_timestamp(),
            escape_path(source_root),
            escape_path(target_root)
        )
        .with_context(|| format!("Cannot write to '{}'", errors_path.display()))?;

        Ok(Self {
            duplicates_path: log_file.to_path_buf(),
            duplicates,
            errors: ErrorLog {
                path: errors_path,
                writer: Mutex::new(errors),
                count: AtomicUsize::new(0),
            },
        })
    }

    pub fn errors(&self) -> &ErrorLog {
        &self.errors
    }

    pub fn duplicates_path(&self) -> &Path {
        &self.duplicates_path
    }

    /// Canonical paths of both log files, for excluding them from the scans.
    pub fn canonical_paths(&self) -> Result<Vec<PathBuf>> {
        [self.duplicates_path.as_path(), self.errors.path.as_path()]
            .into_iter()
            .map(|path| {
                path.canonicalize()
                    .with_context(|| format!("Cannot resolve log file '{}'", path.display()))
            })
            .collect()
    }

    /// Flushes both logs and returns the number of error lines written.
    pub fn finish(mut self) -> Result<usize> {
        self.duplicates
            .flush()
            .with_context(|| format!("Cannot write to '{}'", self.duplicates_path.display()))?;
        let count = self.errors.count();
        let mut writer = self
            .errors
            .writer
            .into_inner()
            .map_err(|_| anyhow!("Errors log lock poisoned"))?;
        writer
            .flush()
            .with_context(|| format!("Cannot write to '{}'", self.errors.path.display()))?;
        Ok(count)
    }
}

impl OutcomeSink for RunLogs {
    fn record(&mut self, outcome: &ComparisonOutcome) -> Result<()> {
        self.duplicates
            .write_all(format_outcome(outcome).as_bytes())
            .with_context(|| format!("Cannot write to '{}'", self.duplicates_path.display()))?;
        self.errors.compare_errors(outcome);
        Ok(())
    }
}

/// Spinner plus errors-log forwarding for one scan.
pub struct ScanReporter<'a> {
    label: &'static str,
    errors: &'a ErrorLog,
    spinner: ProgressBar,
}

impl<'a> ScanReporter<'a> {
    pub fn new(label: &'static str, errors: &'a ErrorLog, multi: &MultiProgress) -> Self {
        let spinner = multi.add(ProgressBar::new_spinner());
        spinner.set_message(format!("Scanning {label} files..."));
        spinner.enable_steady_tick(Duration::from_millis(100));
        Self {
            label,
            errors,
            spinner,
        }
    }

    pub fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ScanObserver for ScanReporter<'_> {
    fn progress(&self, examined: u64) {
        self.spinner.set_message(format!(
            "Scanning {} files... {} examined",
            self.label,
            HumanCount(examined)
        ));
    }

    fn unreadable(&self, path: &Path, error: &io::Error) {
        self.errors
            .scan_error(Some(path), &format!("cannot read size: {error}"));
    }

    fn walk_error(&self, error: &walkdir::Error) {
        self.errors.scan_error(error.path(), error);
    }
}

pub fn match_progress_bar(total: u64) -> Result<ProgressBar> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {percent}% ({pos} of {len}) ETA: {eta}")?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

pub struct RunReport<'a> {
    pub source_dir: &'a Path,
    pub target_dir: &'a Path,
    pub summary: &'a MatchSummary,
    pub stats: CompareStats,
    pub error_count: usize,
    pub duplicates_log: &'a Path,
    pub errors_log: &'a Path,
    pub elapsed: Duration,
}

pub fn print_summary(report: &RunReport<'_>) {
    let summary = report.summary;
    if summary.interrupted {
        warn!("Run was interrupted; the logs only cover the files compared so far");
    }
    if summary.sources_with_duplicates == 0 {
        println!("{}", "No duplicate files found!".green());
    } else {
        println!(
            "{}",
            format!(
                "{} source files have {} duplicates in the target",
                HumanCount(summary.sources_with_duplicates as u64),
                HumanCount(summary.duplicate_matches as u64)
            )
            .as_str()
            .yellow()
        );
    }
    if summary.errors > 0 || report.error_count > 0 {
        warn!(
            "{} errors were recorded in '{}'",
            HumanCount(report.error_count as u64),
            report.errors_log.display()
        );
    }

    info!(
        "Source directory: '{}' ({} files)",
        report.source_dir.display(),
        HumanCount(summary.source_files as u64)
    );
    info!(
        "Target directory: '{}' ({} files)",
        report.target_dir.display(),
        HumanCount(summary.target_files as u64)
    );
    info!(
        "Source files with duplicates: {}, total duplicates: {}",
        HumanCount(summary.sources_with_duplicates as u64),
        HumanCount(summary.duplicate_matches as u64)
    );
    info!(
        "Pairs compared: {}, pre-check hits: {}, confirmed: {}",
        HumanCount(report.stats.comparisons),
        HumanCount(report.stats.prefilter_hits),
        HumanCount(report.stats.prefilter_confirmed)
    );
    info!("Duplicates log: '{}'", report.duplicates_log.display());
    info!("Errors log: '{}'", report.errors_log.display());
    info!("Completed in {}", format_human_elapsed(report.elapsed));
}
