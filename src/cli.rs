use clap::Parser;
use std::path::PathBuf;

use crate::config::SymlinkPolicy;

#[derive(Parser, Debug)]
#[command(name = "find-file-dups")]
#[command(about = "Find files in a source directory that already exist somewhere in a target directory")]
pub struct Cli {
    /// Source directory whose files are looked up in the target (default: current directory)
    #[arg(short, long)]
    pub source: Option<PathBuf>,

    /// Target directory searched for copies of the source files (default: current directory)
    #[arg(short, long)]
    pub target: Option<PathBuf>,

    /// Source sub-directories to leave out, relative to the source root or absolute
    #[arg(long, value_delimiter = ',')]
    pub skip_source: Vec<PathBuf>,

    /// Target sub-directories to leave out, relative to the target root or absolute
    #[arg(long, value_delimiter = ',')]
    pub skip_target: Vec<PathBuf>,

    /// Duplicates log file; errors are written next to it with an `.errors` suffix
    #[arg(short = 'g', long)]
    pub log_file: Option<PathBuf>,

    /// Refuse to replace existing log files
    #[arg(long)]
    pub no_overwrite: bool,

    /// Only consider files with these extensions (comma separated, case-insensitive)
    #[arg(short, long, value_delimiter = ',')]
    pub patterns: Vec<String>,

    /// Include zero length files
    #[arg(long)]
    pub keep_zero_length: bool,

    /// Skip hidden files (names starting with a dot)
    #[arg(short = 'H', long, overrides_with = "no_skip_hidden")]
    pub skip_hidden: bool,

    /// Keep hidden files even if the config file skips them
    #[arg(long, overrides_with = "skip_hidden")]
    pub no_skip_hidden: bool,

    /// Include operating system metadata files such as .DS_Store
    #[arg(long)]
    pub keep_special_files: bool,

    /// How to treat symbolic links (default: skip)
    #[arg(long, value_enum)]
    pub symlinks: Option<SymlinkPolicy>,

    /// Many duplicates expected: skip the partial-hash pre-check and hash whole files
    #[arg(short, long, overrides_with = "no_many_dupes")]
    pub many_dupes: bool,

    /// Keep the partial-hash pre-check even if the config file disables it
    #[arg(long, overrides_with = "many_dupes")]
    pub no_many_dupes: bool,

    /// Switch to whole-file hashing once this fraction of pre-check hits turn out to be duplicates
    #[arg(long)]
    pub full_pass_threshold: Option<f64>,

    /// Persist full-file hashes in this zstd-compressed cache between runs
    #[arg(long)]
    pub hash_cache: Option<PathBuf>,

    /// Number of parallel threads for scanning (default: number of CPU cores)
    #[arg(short = 'j', long)]
    pub threads: Option<usize>,

    /// TOML file with default settings; command line flags take precedence
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Compare two files directly and report whether they match
    #[arg(short = 'c', long, num_args = 2, value_names = ["FILE_A", "FILE_B"])]
    pub compare_two: Option<Vec<PathBuf>>,

    /// Also write debug-level log records to this file
    #[arg(long)]
    pub debug_log: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}
