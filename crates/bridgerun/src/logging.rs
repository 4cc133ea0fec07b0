//! # Logging
//!
//! Stdout belongs to the protocol, so diagnostics never go there. Normally they
//! are written to stderr. In debug mode they are redirected to the side-channel
//! log file, together with an echo of every protocol line (target
//! [`WIRE_TARGET`](crate::link::WIRE_TARGET)).
//!
//! `RUST_LOG` overrides the configured filter.

use std::fs;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::BufWriter;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LinkConfig;
use crate::link::WIRE_TARGET;

const MAX_LOG_SIZE: u64 = 1024 * 1024; // 1MB

fn filter(config: &LinkConfig) -> EnvFilter {
    let base = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    if !config.debug {
        return base;
    }
    match format!("{}=debug", WIRE_TARGET).parse() {
        Ok(directive) => base.add_directive(directive),
        Err(_) => base,
    }
}

/// Installs the global subscriber. The returned guard flushes the log file and
/// must be kept alive until the script ends. A subscriber installed earlier
/// (tests, an embedding program) is left in place.
pub fn init(config: &LinkConfig) -> io::Result<Option<WorkerGuard>> {
    if !config.debug {
        let _ = tracing_subscriber::registry()
            .with(filter(config))
            .with(fmt::layer().with_writer(io::stderr).with_ansi(false))
            .try_init();
        return Ok(None);
    }

    let path = config.log_file.as_path();
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    truncate_if_needed(path)?;

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let (writer, guard) = tracing_appender::non_blocking(BufWriter::new(file));

    let installed = tracing_subscriber::registry()
        .with(filter(config))
        .with(fmt::layer().with_writer(writer).with_ansi(false).with_target(true))
        .try_init()
        .is_ok();
    if installed {
        tracing::info!("debug log: {}", path.display());
    }

    Ok(Some(guard))
}

fn truncate_if_needed(path: &Path) -> io::Result<()> {
    if path.exists() && fs::metadata(path)?.len() > MAX_LOG_SIZE {
        File::create(path)?;
    }
    Ok(())
}
