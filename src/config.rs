use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::ValueEnum;
use log::{debug, info, warn};
use serde::Deserialize;

use crate::cli::Cli;
use crate::compare::{ADAPTIVE_MIN_SAMPLES, CompareStrategy};
use crate::scanner::{ScanMode, Scanner};

/// Operating system metadata files skipped when `skip_special_files` is set.
pub const SPECIAL_FILE_NAMES: &[&str] = &[".DS_Store", "Thumbs.db", "desktop.ini", "Icon\r"];

/// How symbolic links met during a scan are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SymlinkPolicy {
    /// Leave symlinked files out and never descend into symlinked directories.
    #[default]
    Skip,
    /// Keep symlinked files (flagged in the log) but do not follow directory links.
    Record,
    /// Keep symlinked files and descend into symlinked directories.
    Follow,
}

/// Per-file predicates applied while scanning. Never mutated by the scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterConfig {
    pub skip_hidden: bool,
    pub skip_special_files: bool,
    pub limit_to_patterns: bool,
    /// Uppercase extensions without the leading dot.
    pub patterns: BTreeSet<String>,
    pub skip_zero_length: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            skip_hidden: false,
            skip_special_files: true,
            limit_to_patterns: false,
            patterns: BTreeSet::new(),
            skip_zero_length: true,
        }
    }
}

impl FilterConfig {
    /// Restricts the scan to the given extensions. Accepts `jpg`, `.JPG` or `*.jpg`.
    pub fn with_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.patterns = patterns
            .into_iter()
            .map(|p| normalize_pattern(p.as_ref()))
            .filter(|p| !p.is_empty())
            .collect();
        self.limit_to_patterns = true;
        self
    }
}

fn normalize_pattern(pattern: &str) -> String {
    pattern
        .trim()
        .trim_start_matches('*')
        .trim_start_matches('.')
        .to_uppercase()
}

/// Fully resolved run configuration, built once and passed by reference.
#[derive(Debug, Clone)]
pub struct Config {
    pub source_dir: PathBuf,
    pub target_dir: PathBuf,
    /// Directories below the source root that are not descended into.
    pub source_skip_dirs: Vec<PathBuf>,
    pub target_skip_dirs: Vec<PathBuf>,
    pub filters: FilterConfig,
    pub symlinks: SymlinkPolicy,
    pub many_dupes: bool,
    pub full_pass_threshold: Option<f64>,
    pub log_file: PathBuf,
    pub overwrite_log: bool,
    pub hash_cache: Option<PathBuf>,
    pub threads: Option<usize>,
}

/// Optional TOML file supplying defaults that command line flags override.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub source_dir: Option<PathBuf>,
    pub target_dir: Option<PathBuf>,
    pub source_dirs_to_skip: Vec<PathBuf>,
    pub target_dirs_to_skip: Vec<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub overwrite_log: Option<bool>,
    pub patterns: Vec<String>,
    pub skip_zero_length: Option<bool>,
    pub skip_hidden: Option<bool>,
    pub skip_special_files: Option<bool>,
    pub symlinks: Option<SymlinkPolicy>,
    pub many_dupes: Option<bool>,
    pub full_pass_threshold: Option<f64>,
    pub hash_cache: Option<PathBuf>,
    pub threads: Option<usize>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: '{}'", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid config file: '{}'", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

/// A `--flag` / `--no-flag` pair; `None` when neither was given.
fn switch(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

fn default_log_file() -> PathBuf {
    PathBuf::from(format!("{}.log", env!("CARGO_PKG_NAME")))
}

impl Config {
    /// Merges the command line over the optional config file and resolves paths.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let file = match &cli.config {
            Some(path) => {
                info!("Loading configuration from '{}'", path.display());
                ConfigFile::load(path)?
            }
            None => ConfigFile::default(),
        };
        Self::merge(cli, file)?.resolve()
    }

    /// Flag precedence: command line, then config file, then built-in defaults.
    pub fn merge(cli: &Cli, file: ConfigFile) -> Result<Self> {
        let patterns = if cli.patterns.is_empty() {
            file.patterns
        } else {
            cli.patterns.clone()
        };
        let mut filters = FilterConfig {
            skip_hidden: switch(cli.skip_hidden, cli.no_skip_hidden)
                .or(file.skip_hidden)
                .unwrap_or(false),
            skip_special_files: !cli.keep_special_files && file.skip_special_files.unwrap_or(true),
            skip_zero_length: !cli.keep_zero_length && file.skip_zero_length.unwrap_or(true),
            ..FilterConfig::default()
        };
        if !patterns.is_empty() {
            filters = filters.with_patterns(&patterns);
            if filters.patterns.is_empty() {
                bail!("No usable extensions in pattern list: {:?}", patterns);
            }
        }

        let full_pass_threshold = cli.full_pass_threshold.or(file.full_pass_threshold);
        if let Some(threshold) = full_pass_threshold {
            if !(threshold > 0.0 && threshold <= 1.0) {
                bail!("Full pass threshold must be in (0, 1], got {}", threshold);
            }
        }

        let pick_dirs = |cli_dirs: &Vec<PathBuf>, file_dirs: Vec<PathBuf>| {
            if cli_dirs.is_empty() {
                file_dirs
            } else {
                cli_dirs.clone()
            }
        };

        Ok(Self {
            source_dir: cli
                .source
                .clone()
                .or(file.source_dir)
                .unwrap_or_else(|| PathBuf::from(".")),
            target_dir: cli
                .target
                .clone()
                .or(file.target_dir)
                .unwrap_or_else(|| PathBuf::from(".")),
            source_skip_dirs: pick_dirs(&cli.skip_source, file.source_dirs_to_skip),
            target_skip_dirs: pick_dirs(&cli.skip_target, file.target_dirs_to_skip),
            filters,
            symlinks: cli.symlinks.or(file.symlinks).unwrap_or_default(),
            many_dupes: switch(cli.many_dupes, cli.no_many_dupes)
                .or(file.many_dupes)
                .unwrap_or(false),
            full_pass_threshold,
            log_file: cli
                .log_file
                .clone()
                .or(file.log_file)
                .unwrap_or_else(default_log_file),
            overwrite_log: !cli.no_overwrite && file.overwrite_log.unwrap_or(true),
            hash_cache: cli.hash_cache.clone().or(file.hash_cache),
            threads: cli.threads.or(file.threads),
        })
    }

    /// Canonicalizes both roots and their skip lists, and checks the roots are directories.
    pub fn resolve(mut self) -> Result<Self> {
        self.source_dir = resolve_dir(&self.source_dir, "Source")?;
        self.target_dir = resolve_dir(&self.target_dir, "Target")?;
        self.source_skip_dirs = resolve_skip_dirs(&self.source_dir, &self.source_skip_dirs, "source");
        self.target_skip_dirs = resolve_skip_dirs(&self.target_dir, &self.target_skip_dirs, "target");
        if self.threads == Some(0) {
            bail!("Thread count must be at least 1");
        }
        debug!("Resolved configuration: {:?}", self);
        Ok(self)
    }

    pub fn strategy(&self) -> CompareStrategy {
        if self.many_dupes {
            CompareStrategy::FullOnly
        } else if let Some(threshold) = self.full_pass_threshold {
            CompareStrategy::Adaptive {
                threshold,
                min_samples: ADAPTIVE_MIN_SAMPLES,
            }
        } else {
            CompareStrategy::Prefilter
        }
    }

    /// Builds the scanner for one side of the comparison.
    pub fn scanner(&self, mode: ScanMode) -> Scanner {
        let (root, skip_dirs) = match mode {
            ScanMode::SourceIndexed => (&self.source_dir, &self.source_skip_dirs),
            ScanMode::TargetIndexed => (&self.target_dir, &self.target_skip_dirs),
        };
        Scanner::new(root, self.filters.clone(), mode)
            .with_symlinks(self.symlinks)
            .with_skip_dirs(skip_dirs)
    }
}

fn resolve_dir(path: &Path, label: &str) -> Result<PathBuf> {
    let absolute = path
        .canonicalize()
        .with_context(|| format!("{} directory does not exist: '{}'", label, path.display()))?;
    if !absolute.is_dir() {
        bail!("{} path is not a directory: '{}'", label, absolute.display());
    }
    Ok(absolute)
}

/// Resolves skip entries against the canonical `root` so they compare equal to
/// the paths the walker produces. Unresolvable entries are kept as joined.
fn resolve_skip_dirs(root: &Path, dirs: &[PathBuf], side: &str) -> Vec<PathBuf> {
    dirs.iter()
        .map(|dir| {
            let joined = root.join(dir);
            match joined.canonicalize() {
                Ok(resolved) => {
                    if !resolved.starts_with(root) {
                        warn!(
                            "Skipped {} directory '{}' is outside '{}' and has no effect",
                            side,
                            dir.display(),
                            root.display()
                        );
                    }
                    resolved
                }
                Err(err) => {
                    warn!("Skipped {} directory '{}' not found: {}", side, dir.display(), err);
                    joined
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("find-file-dups").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn patterns_are_normalized_to_uppercase_without_dot() {
        let filters = FilterConfig::default().with_patterns(["jpg", ".Png", "*.tiff", " "]);
        assert!(filters.limit_to_patterns);
        let expected: BTreeSet<String> = ["JPG", "PNG", "TIFF"].iter().map(|s| s.to_string()).collect();
        assert_eq!(filters.patterns, expected);
    }

    #[test]
    fn command_line_overrides_config_file() {
        let file = ConfigFile::parse(
            r#"
            source_dir = "/from/file"
            patterns = ["mp3"]
            skip_hidden = false
            many_dupes = false
            symlinks = "follow"
            "#,
        )
        .unwrap();
        let config = Config::merge(&cli(&["-s", "/from/cli", "-H", "-m", "-p", "wav,flac"]), file).unwrap();

        assert_eq!(config.source_dir, PathBuf::from("/from/cli"));
        assert!(config.filters.skip_hidden);
        assert!(config.many_dupes);
        assert_eq!(config.symlinks, SymlinkPolicy::Follow);
        assert!(config.filters.patterns.contains("WAV"));
        assert!(!config.filters.patterns.contains("MP3"));
        assert_eq!(config.strategy(), CompareStrategy::FullOnly);
    }

    #[test]
    fn defaults_skip_zero_length_and_special_files() {
        let config = Config::merge(&cli(&[]), ConfigFile::default()).unwrap();
        assert!(config.filters.skip_zero_length);
        assert!(config.filters.skip_special_files);
        assert!(!config.filters.limit_to_patterns);
        assert!(config.overwrite_log);
        assert_eq!(config.symlinks, SymlinkPolicy::Skip);
        assert_eq!(config.strategy(), CompareStrategy::Prefilter);
    }

    #[test]
    fn threshold_selects_adaptive_strategy() {
        let config = Config::merge(&cli(&["--full-pass-threshold", "0.8"]), ConfigFile::default()).unwrap();
        assert!(matches!(config.strategy(), CompareStrategy::Adaptive { threshold, .. } if threshold == 0.8));
        assert!(Config::merge(&cli(&["--full-pass-threshold", "1.5"]), ConfigFile::default()).is_err());
    }

    #[test]
    fn no_flags_override_config_file_switches() {
        let text = "skip_hidden = true\nmany_dupes = true\n";

        let config = Config::merge(&cli(&[]), ConfigFile::parse(text).unwrap()).unwrap();
        assert!(config.filters.skip_hidden);
        assert!(config.many_dupes);

        let config = Config::merge(
            &cli(&["--no-skip-hidden", "--no-many-dupes"]),
            ConfigFile::parse(text).unwrap(),
        )
        .unwrap();
        assert!(!config.filters.skip_hidden);
        assert!(!config.many_dupes);
        assert_eq!(config.strategy(), CompareStrategy::Prefilter);
    }

    #[test]
    fn last_of_flag_and_no_flag_wins() {
        let parsed = cli(&["-H", "--no-skip-hidden"]);
        assert!(!parsed.skip_hidden);
        assert!(parsed.no_skip_hidden);
        let config = Config::merge(&cli(&["--no-skip-hidden", "-H"]), ConfigFile::default()).unwrap();
        assert!(config.filters.skip_hidden);
    }

    #[test]
    fn relative_skip_dirs_resolve_against_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("backup")).unwrap();

        let mut config = Config::merge(&cli(&["--skip-source", "backup,missing"]), ConfigFile::default()).unwrap();
        config.source_dir = dir.path().to_path_buf();
        config.target_dir = dir.path().to_path_buf();
        let resolved = config.resolve().unwrap();

        let root = dir.path().canonicalize().unwrap();
        assert_eq!(
            resolved.source_skip_dirs,
            vec![root.join("backup"), root.join("missing")]
        );
        assert!(resolved.target_skip_dirs.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn skip_dir_given_through_symlinked_root_is_pruned() {
        use crate::scanner::NoopObserver;

        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real");
        fs::create_dir_all(real.join("backup")).unwrap();
        fs::create_dir_all(real.join("keep")).unwrap();
        fs::write(real.join("backup").join("b"), b"b").unwrap();
        fs::write(real.join("keep").join("a"), b"a").unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let skip = link.join("backup");
        let mut config = Config::merge(
            &cli(&["--skip-source", skip.to_str().unwrap()]),
            ConfigFile::default(),
        )
        .unwrap();
        config.source_dir = link.clone();
        config.target_dir = link;
        let resolved = config.resolve().unwrap();

        assert_eq!(
            resolved.source_skip_dirs,
            vec![real.canonicalize().unwrap().join("backup")]
        );
        let index = resolved.scanner(ScanMode::SourceIndexed).scan(&NoopObserver);
        assert_eq!(index.scanned_count(), 1);
        let entries = index.by_path().unwrap();
        assert!(entries.iter().all(|e| !e.path.components().any(|c| c.as_os_str() == "backup")));
    }

    #[test]
    fn unknown_config_keys_are_rejected() {
        assert!(ConfigFile::parse("debug_limit = 5").is_err());
    }

    #[test]
    fn resolve_rejects_missing_and_file_roots() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain.txt");
        fs::write(&file, b"data").unwrap();

        let mut config = Config::merge(&cli(&[]), ConfigFile::default()).unwrap();
        config.source_dir = dir.path().join("missing");
        assert!(config.clone().resolve().is_err());

        config.source_dir = file;
        config.target_dir = dir.path().to_path_buf();
        assert!(config.clone().resolve().is_err());

        config.source_dir = dir.path().to_path_buf();
        let resolved = config.resolve().unwrap();
        assert!(resolved.source_dir.is_absolute());
    }
}
