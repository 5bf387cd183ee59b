//! Error type shared by the watcher, the registry and the lifecycle.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to resolve current working directory: {0}")]
    CurrentDir(#[source] io::Error),
    #[error("Failed to resolve {path}: {source}")]
    ResolveDir { path: PathBuf, source: io::Error },
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("Failed to read directory {path}: {source}")]
    ReadDir { path: PathBuf, source: io::Error },
    #[error("Failed to start watcher: {0}")]
    WatchInit(#[source] notify::Error),
    #[error("Failed to add watch for {path}: {source}")]
    WatchRegister {
        path: PathBuf,
        source: notify::Error,
    },
    #[error("Watch failed: {0}")]
    WatchSource(#[source] notify::Error),
    #[error("Watch event queue overflowed, file events were lost")]
    WatchOverflow,
    #[error("Watch event channel closed")]
    WatchClosed,
    #[error("Failed to install signal handler: {0}")]
    Signal(#[source] io::Error),
    #[error("Failed to open {path}: {source}")]
    Open { path: PathBuf, source: io::Error },
    #[error("Not a regular file: {0}")]
    NotAFile(PathBuf),
}

impl Error {
    /// Returns `true` for errors confined to a single file, which never stop
    /// the daemon.
    pub fn is_per_file(&self) -> bool {
        matches!(self, Error::Open { .. } | Error::NotAFile(_))
    }
}
