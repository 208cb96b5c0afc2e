//! Copying large files between network shares without swamping them
//!
//! Builds on [`throttle`] (lock-file queueing) and adds the copying itself.
//!
//! # Copy paths
//!
//! [`copy::Copier::copy_with_lock_coordination`] picks one of three ways to move a file:
//!
//! - **Plain copy** - files below `min_lock_size` (20 MB), or when neither the source nor the
//!   target lives on a share with a `DMS_LockFiles` directory
//! - **Queued copy** - lock files are created on the source and/or target share, the copy waits
//!   for older transfers, then the lock files are removed
//! - **Resumable copy** - files of at least `resumable_min_size` (250 MB) are copied in chunks
//!   through a `.#FilePart#` file (see [`resume`]); an interrupted copy continues where it stopped
//!
//! Queueing and resumable copying are independent: a large file on a local disk is still copied
//! resumably, a medium-sized file on a share is queued but copied in one go.
//!
//! # Existing targets
//!
//! Without `overwrite` an existing target counts as done and is skipped. Rerunning an
//! interrupted tree copy therefore skips finished files and resumes the partially copied one.
//!
//! # Error handling
//!
//! Copy operations return [`copy::Error`], which carries the [`copy::Summary`] of what was done
//! before the failure. Lock file problems never fail a copy; the copy runs uncoordinated instead.

use anyhow::anyhow;

pub mod config;
pub mod copy;
pub mod notify;
pub mod resume;

#[cfg(test)]
pub mod testutils;

pub use config::{ChunkConfig, CopyConfig, OutputConfig, QueueConfig, RuntimeConfig, Settings};
pub use copy::{Copier, Summary};
pub use notify::{Fanout, TracingNotifier};
pub use resume::{CopyOutcome, CopyState, ResumableCopier};

/// Log level used when `RUST_LOG` is not set.
fn default_level(output: &OutputConfig) -> &'static str {
    if output.quiet {
        return "off";
    }
    match output.verbose {
        0 => "error",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn log_filter(output: &OutputConfig) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level(output)))
}

/// Install the log subscriber, build the runtime and run `func` to completion.
///
/// Errors are printed (unless quiet) and turned into `None`, the summary is printed when asked
/// for or when running verbose.
pub fn run<Fut, T, E>(
    output: OutputConfig,
    runtime: RuntimeConfig,
    func: impl FnOnce() -> Fut,
) -> Option<T>
where
    T: std::fmt::Display,
    E: std::fmt::Display,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(&output))
        .with_writer(std::io::stdout)
        .with_target(false)
        .init();
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    let res = builder
        .build()
        .map_err(|err| anyhow!("failed to create runtime: {err}"))
        .map(|runtime| runtime.block_on(func()));
    match res {
        Ok(Ok(summary)) => {
            if output.print_summary || output.verbose > 0 {
                println!("{summary}");
            }
            Some(summary)
        }
        Ok(Err(error)) => {
            if !output.quiet {
                eprintln!("{error}");
            }
            None
        }
        Err(error) => {
            if !output.quiet {
                eprintln!("{error:#}");
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_log_level() {
        let level = |quiet, verbose| {
            default_level(&OutputConfig {
                quiet,
                verbose,
                print_summary: false,
            })
        };
        assert_eq!(level(true, 3), "off");
        assert_eq!(level(false, 0), "error");
        assert_eq!(level(false, 1), "info");
        assert_eq!(level(false, 2), "debug");
        assert_eq!(level(false, 9), "trace");
    }
}
