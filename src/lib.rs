pub mod cache;
pub mod cli;
pub mod compare;
pub mod config;
pub mod matcher;
pub mod report;
pub mod scanner;
pub mod utils;

pub use cache::DigestCache;
pub use cli::Cli;
pub use compare::{CompareError, CompareStrategy, Comparator, files_equal};
pub use config::{Config, FilterConfig, SymlinkPolicy};
pub use matcher::{ComparisonOutcome, MatchEntry, MatchSummary, Matcher, OutcomeSink};
pub use report::RunLogs;
pub use scanner::{ScanIndex, ScanMode, ScanObserver, Scanner, SkipReason, scan};
pub use utils::format_human_elapsed;
