use std::sync::Arc;

use anyhow::anyhow;
use clap::Parser;
use tracing::instrument;

mod progress;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "sharecp",
    version,
    about = "Copy large files between network shares without overloading them",
    long_about = "`sharecp` copies a file or a directory tree. Large files going to or from a network share wait in a queue: every transfer leaves a lock file in the share's DMS_LockFiles directory and starts only once the older transfers add up to less than 1000 MB (or the wait times out).

Very large files are copied in chunks through a `<name>.#FilePart#` file. If the copy is interrupted, running the same command again continues where it stopped.

EXAMPLES:
    # Copy to a share mounted at /mnt/proto-7
    sharecp /data/run42.raw /mnt/proto-7/raw/run42.raw --share-root /mnt/proto-7 --progress

    # Copy a directory tree, rerun to resume after an interruption
    sharecp /data/run42 /mnt/proto-7/raw/ --share-root /mnt/proto-7 --summary

    # Give up waiting on an unreliable server after 30 minutes
    sharecp //proto-3/raw/run42.raw /data/run42.raw --slow-host proto-3"
)]
struct Args {
    // Copy options
    /// Overwrite existing files (by default existing targets are skipped)
    #[arg(short, long, help_heading = "Copy options")]
    overwrite: bool,

    /// Exit on first error
    #[arg(short = 'e', long = "fail-early", help_heading = "Copy options")]
    fail_early: bool,

    /// Read source files even while other processes have them open for writing
    #[arg(long, help_heading = "Copy options")]
    ignore_file_locks: bool,

    /// Name recorded in lock files (default: sharecp-<pid>)
    #[arg(long, value_name = "NAME", help_heading = "Copy options")]
    manager: Option<String>,

    // Lock queue
    /// Mount point of a network share, lock files go to <PATH>/DMS_LockFiles (repeatable)
    #[arg(long, value_name = "PATH", help_heading = "Lock queue")]
    share_root: Vec<std::path::PathBuf>,

    /// Server that gets a shorter maximum wait (repeatable)
    #[arg(long, value_name = "HOST", help_heading = "Lock queue")]
    slow_host: Vec<String>,

    /// Use the lock directory of server TO for paths on server FROM (repeatable)
    #[arg(long, value_name = "FROM=TO", value_parser = parse_host_alias, help_heading = "Lock queue")]
    host_alias: Vec<(String, String)>,

    /// Files smaller than this are copied without queueing
    #[arg(
        long,
        default_value = "20MiB",
        value_name = "SIZE",
        help_heading = "Lock queue"
    )]
    min_lock_size: bytesize::ByteSize,

    /// Longest wait in the queue before copying anyway
    ///
    /// Accepts human-readable durations like "90s", "30min", "3h".
    #[arg(
        long,
        default_value = "180min",
        value_name = "DURATION",
        help_heading = "Lock queue"
    )]
    max_wait: humantime::Duration,

    /// Longest wait for shares on a --slow-host
    #[arg(
        long,
        default_value = "30min",
        value_name = "DURATION",
        help_heading = "Lock queue"
    )]
    slow_host_max_wait: humantime::Duration,

    /// Lock files older than this are left over from crashed copies and ignored
    #[arg(
        long,
        default_value = "180min",
        value_name = "DURATION",
        help_heading = "Lock queue"
    )]
    max_lock_age: humantime::Duration,

    // Chunked copy
    /// Files of at least this size are copied in chunks and can be resumed
    #[arg(
        long,
        default_value = "250MiB",
        value_name = "SIZE",
        help_heading = "Chunked copy"
    )]
    resumable_min_size: bytesize::ByteSize,

    /// Size of a single read/write (at least 1MiB)
    #[arg(
        long,
        default_value = "1MiB",
        value_name = "SIZE",
        help_heading = "Chunked copy"
    )]
    chunk_size: bytesize::ByteSize,

    /// Data written between flushes to disk; an interrupted copy loses at most this much
    #[arg(
        long,
        default_value = "25MiB",
        value_name = "SIZE",
        help_heading = "Chunked copy"
    )]
    flush_threshold: bytesize::ByteSize,

    // Progress & output
    /// Show progress
    #[arg(long, help_heading = "Progress & output")]
    progress: bool,

    /// Print summary at the end
    #[arg(long, help_heading = "Progress & output")]
    summary: bool,

    /// Verbose level (implies "summary"): -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    quiet: bool,

    // Advanced settings
    /// Number of worker threads (0 = number of CPU cores)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    // ARGUMENTS
    /// Source file or directory
    #[arg()]
    src: std::path::PathBuf,

    /// Destination path; a trailing slash copies INTO that directory
    #[arg()]
    dst: String,
}

fn parse_host_alias(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((from, to)) if !from.is_empty() && !to.is_empty() => {
            Ok((from.to_string(), to.to_string()))
        }
        _ => Err(format!("expected FROM=TO, got {value:?}")),
    }
}

impl Args {
    fn settings(&self) -> common::Settings {
        common::Settings {
            copy: common::CopyConfig {
                resumable_min_size: self.resumable_min_size.0,
                ignore_file_locks: self.ignore_file_locks,
                fail_early: self.fail_early,
            },
            chunk: common::ChunkConfig {
                chunk_size: self.chunk_size.0,
                flush_threshold: self.flush_threshold.0,
            }
            .normalized(),
            queue: common::QueueConfig {
                min_lock_size: self.min_lock_size.0,
                max_lock_age: *self.max_lock_age,
                wait: throttle::queue::Settings {
                    max_wait: *self.max_wait,
                    slow_host_max_wait: *self.slow_host_max_wait,
                    slow_hosts: self.slow_host.clone(),
                    ..Default::default()
                },
                shares: throttle::share::ShareSettings {
                    share_roots: self.share_root.clone(),
                    host_aliases: self.host_alias.clone(),
                },
            },
        }
    }

    fn destination(&self) -> anyhow::Result<std::path::PathBuf> {
        if !self.dst.ends_with('/') {
            return Ok(std::path::PathBuf::from(&self.dst));
        }
        let name = self
            .src
            .file_name()
            .ok_or_else(|| anyhow!("source {:?} does not have a basename", &self.src))?;
        Ok(std::path::Path::new(&self.dst).join(name))
    }
}

#[instrument]
async fn async_main(args: Args) -> anyhow::Result<common::Summary> {
    let settings = args.settings();
    tracing::debug!("settings: {:?}", &settings);
    let dst = args.destination()?;
    let progress = args.progress.then(|| Arc::new(progress::ProgressNotifier::new()));
    let notifier: Arc<dyn throttle::Notify> = match &progress {
        Some(progress) => {
            let sinks: Vec<Arc<dyn throttle::Notify>> =
                vec![Arc::new(common::TracingNotifier), progress.clone()];
            Arc::new(common::Fanout(sinks))
        }
        None => Arc::new(common::TracingNotifier),
    };
    let manager = args
        .manager
        .clone()
        .unwrap_or_else(|| format!("sharecp-{}", std::process::id()));
    let mut copier = common::Copier::new(settings, Arc::new(throttle::SystemClock), notifier);
    let result = copier.copy(&args.src, &dst, &manager, args.overwrite).await;
    if let Some(progress) = &progress {
        progress.finish();
    }
    match result {
        Ok(summary) => Ok(summary),
        Err(error) => {
            tracing::error!("{}", &error);
            if args.summary {
                return Err(anyhow!("{}\n\n{}", error, &error.summary));
            }
            Err(anyhow!("{}", error))
        }
    }
}

fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();
    let func = {
        let args = args.clone();
        || async_main(args)
    };
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: args.summary,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
    };
    let res = common::run(output, runtime, func);
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
