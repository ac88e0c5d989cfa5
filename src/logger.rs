//! Timestamped logging sink.
//!
//! Wraps the `log` crate with an `env_logger` backend configured to
//! prefix every record with a `%Y-%m-%d %H:%M:%S` timestamp, writing
//! either to a file (append mode) or to stdout. A second pair of
//! macros (`extra_warn!`/`extra_error!`) additionally echoes the
//! record to stdout even when the primary sink is a file, matching
//! the dual-output terminal notices of the original proxy.

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

use env_logger::Builder;
use log::LevelFilter;

/// Set once `init` has pointed the primary sink at a file rather than
/// stdout, so `extra_log!` knows whether to also print to stdout.
static LOGGING_TO_FILE: AtomicBool = AtomicBool::new(false);

/// Initialize the global logger.
///
/// `logfile` of `None` or an empty path logs to stdout. Otherwise the
/// file is opened in append mode; if that fails, falls back to stdout
/// with a warning.
pub fn init(logfile: Option<&str>) {
    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    builder.format(|buf, record| {
        let ts = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        writeln!(buf, "[{}] [{}] {}", ts, record.level(), record.args())
    });

    match logfile {
        Some(path) if !path.is_empty() => match OpenOptions::new().append(true).create(true).open(path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
                LOGGING_TO_FILE.store(true, Ordering::Relaxed);
            }
            Err(e) => {
                eprintln!("failed to open logfile {}: {}, falling back to stdout", path, e);
                LOGGING_TO_FILE.store(false, Ordering::Relaxed);
            }
        },
        _ => {
            LOGGING_TO_FILE.store(false, Ordering::Relaxed);
        }
    }

    // In test binaries `init` may run more than once; ignore the error
    // from a logger that's already set.
    let _ = builder.try_init();
}

/// Whether the primary sink is a file, i.e. whether `extra_log!` needs
/// to additionally print to stdout.
pub fn logging_to_file() -> bool {
    LOGGING_TO_FILE.load(Ordering::Relaxed)
}

/// Log a warning, and if the primary sink is a file, also print it to
/// stdout — used for operator-visible terminal notices.
#[macro_export]
macro_rules! extra_warn {
    ($($arg:tt)*) => {{
        log::warn!($($arg)*);
        if $crate::logger::logging_to_file() {
            println!($($arg)*);
        }
    }};
}

/// Log an error, and if the primary sink is a file, also print it to
/// stdout.
#[macro_export]
macro_rules! extra_error {
    ($($arg:tt)*) => {{
        log::error!($($arg)*);
        if $crate::logger::logging_to_file() {
            println!($($arg)*);
        }
    }};
}
