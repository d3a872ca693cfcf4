use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// `LogKind` represents where the trace goes: `stdout` or a log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogKind {
    /// It logs to console, the default choice.
    Stdout,

    /// It logs to the given file, without colours.
    File(PathBuf),
}

impl From<Option<PathBuf>> for LogKind {
    fn from(path: Option<PathBuf>) -> Self {
        path.map_or(Self::Stdout, Self::File)
    }
}

/// Installs the global subscriber. `RUST_LOG` overrides the default `info`
/// level.
///
/// The returned guard flushes the file writer when dropped, so it has to
/// live until the program ends.
pub fn init_logger(kind: LogKind) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match kind {
        LogKind::Stdout => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            Ok(None)
        }
        LogKind::File(path) => {
            let (dir, name) = split_path(&path)?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Ok(Some(guard))
        }
    }
}

fn split_path(path: &Path) -> anyhow::Result<(&Path, &std::ffi::OsStr)> {
    let name = path
        .file_name()
        .with_context(|| format!("log file {} has no file name", path.display()))?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    Ok((dir, name))
}
