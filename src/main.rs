use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::Parser;
use colored::Colorize;
use indicatif::MultiProgress;
use log::{LevelFilter, debug, info, warn};
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, SharedLogger, TermLogger, TerminalMode, WriteLogger,
};

use find_file_dups::cache::DigestCache;
use find_file_dups::compare::{Comparator, files_equal};
use find_file_dups::report::{self, RunLogs, RunReport, ScanReporter};
use find_file_dups::{Cli, Config, Matcher, ScanMode};

fn init_logging(verbose: bool, debug_log: Option<&Path>) -> Result<()> {
    let level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    let mut builder = ConfigBuilder::new();
    let _ = builder.set_time_offset_to_local();
    let config = builder.build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        config.clone(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];
    if let Some(path) = debug_log {
        let file = File::create(path)
            .with_context(|| format!("Failed to create debug log: '{}'", path.display()))?;
        loggers.push(WriteLogger::new(LevelFilter::Debug, config, file));
    }
    CombinedLogger::init(loggers).context("Failed to initialize logging")
}

fn compare_two(files: &[PathBuf], full_pass_only: bool) -> Result<()> {
    let [a, b] = files else {
        bail!("--compare-two takes exactly two files");
    };
    let equal = files_equal(a, b, full_pass_only)
        .with_context(|| format!("Cannot compare '{}' with '{}'", a.display(), b.display()))?;
    if equal {
        println!("{}", "Files match".green());
    } else {
        println!("{}", "Files do not match".yellow());
    }
    Ok(())
}

fn run(config: &Config, shutdown: Arc<AtomicBool>, start_time: Instant) -> Result<()> {
    let mut logs = RunLogs::create(
        &config.log_file,
        config.overwrite_log,
        &config.source_dir,
        &config.target_dir,
    )?;
    let log_paths = logs.canonical_paths()?;

    let (source, target) = {
        let multi = MultiProgress::new();
        let source_reporter = ScanReporter::new("source", logs.errors(), &multi);
        let target_reporter = ScanReporter::new("target", logs.errors(), &multi);
        let source_scanner = config
            .scanner(ScanMode::SourceIndexed)
            .with_excluded_files(&log_paths)
            .with_shutdown_flag(shutdown.clone());
        let target_scanner = config
            .scanner(ScanMode::TargetIndexed)
            .with_excluded_files(&log_paths)
            .with_shutdown_flag(shutdown.clone());

        let indices = rayon::join(
            || source_scanner.scan(&source_reporter),
            || target_scanner.scan(&target_reporter),
        );
        source_reporter.finish();
        target_reporter.finish();
        indices
    };
    if shutdown.load(Ordering::SeqCst) {
        warn!("Interrupted while scanning, skipping the comparison");
    }

    let cache = match &config.hash_cache {
        Some(path) => DigestCache::load(path),
        None => DigestCache::in_memory(),
    };
    let comparator = Comparator::with_cache(config.strategy(), cache);
    debug!("Comparison strategy: {:?}", comparator.strategy());

    let summary = Matcher::new(&source, &target, &comparator)
        .with_progress(report::match_progress_bar(source.len() as u64)?)
        .with_shutdown_flag(shutdown)
        .run(&mut logs)?;

    if let Err(err) = comparator.cache().save() {
        warn!("Failed to save hash cache: {:#}", err);
    }

    let duplicates_log = logs.duplicates_path().to_path_buf();
    let errors_log = logs.errors().path().to_path_buf();
    let error_count = logs.finish()?;

    report::print_summary(&RunReport {
        source_dir: &config.source_dir,
        target_dir: &config.target_dir,
        summary: &summary,
        stats: comparator.stats(),
        error_count,
        duplicates_log: &duplicates_log,
        errors_log: &errors_log,
        elapsed: start_time.elapsed(),
    });
    Ok(())
}

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.debug_log.as_deref())?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    debug!("Command line arguments: {:?}", cli);

    if let Some(files) = &cli.compare_two {
        return compare_two(files, cli.many_dupes);
    }

    let config = Config::from_cli(&cli)?;
    info!("Source directory: '{}'", config.source_dir.display());
    info!("Target directory: '{}'", config.target_dir.display());

    if let Some(threads) = config.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("Failed to configure thread pool")?;
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = shutdown.clone();
        ctrlc::set_handler(move || {
            flag.store(true, Ordering::SeqCst);
        })
        .context("Failed to install Ctrl+C handler")?;
    }

    run(&config, shutdown, start_time)
}
