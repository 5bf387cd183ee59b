//! Turns directory events into registry operations.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};

use futures_util::stream::{Stream, StreamExt};
use tracing::{debug, error, info};

use crate::error::Error;
use crate::events::{DirEvents, FileEvent, FileEventKind};
use crate::registry::TailRegistry;

/// Where a [`WatchDispatcher`] is in its life.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DispatchState {
    /// Constructed, no watch registered yet.
    Idle,
    /// Watch registered, events are being dispatched.
    Watching,
    /// Shutdown requested, tailers are being closed.
    Draining,
    /// Watch dropped and every tailer closed.
    Stopped,
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            DispatchState::Idle => "idle",
            DispatchState::Watching => "watching",
            DispatchState::Draining => "draining",
            DispatchState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Watches one directory and keeps the [`TailRegistry`] in step with it.
///
/// Creations and writes start a tailer for the file (if its name matches the
/// optional filter), removals stop it. A watch failure is fatal and ends
/// [`run`](WatchDispatcher::run) with an error.
pub struct WatchDispatcher {
    target: PathBuf,
    filter: Option<String>,
    registry: TailRegistry,
    events: Option<DirEvents>,
    state: DispatchState,
}

impl WatchDispatcher {
    pub fn new(target: impl Into<PathBuf>, filter: Option<String>, registry: TailRegistry) -> Self {
        WatchDispatcher {
            target: target.into(),
            filter: filter.filter(|filter| !filter.is_empty()),
            registry,
            events: None,
            state: DispatchState::Idle,
        }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    pub fn registry(&self) -> &TailRegistry {
        &self.registry
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    /// Returns `true` if the file name of `path` passes the filter.
    pub fn matches(&self, path: impl AsRef<Path>) -> bool {
        let filter = match &self.filter {
            Some(filter) => filter,
            None => return true,
        };

        path.as_ref()
            .file_name()
            .map(|name| name.to_string_lossy().contains(filter.as_str()))
            .unwrap_or(false)
    }

    /// Applies one event to the registry.
    pub async fn handle_event(&self, event: FileEvent) {
        let FileEvent { path, kind } = event;

        match kind {
            FileEventKind::Created | FileEventKind::Modified => {
                if !self.matches(&path) {
                    debug!(path = %path.display(), "skipping");
                    return;
                }
                self.registry.ensure_tailing(&path).await;
            }
            FileEventKind::Removed => {
                self.registry.stop_tailing(&path).await;
            }
            FileEventKind::Replaced => {
                if !self.matches(&path) {
                    debug!(path = %path.display(), "skipping");
                    return;
                }
                self.registry.replace_tailing(&path).await;
            }
        }
    }

    /// Starts tailing every matching file already in the directory.
    ///
    /// Returns the number of tailers started.
    pub async fn scan_existing(&self) -> Result<usize, Error> {
        let read_dir_err = |source| Error::ReadDir {
            path: self.target.clone(),
            source,
        };

        let mut entries = tokio::fs::read_dir(&self.target)
            .await
            .map_err(read_dir_err)?;
        let mut started = 0;

        while let Some(entry) = entries.next_entry().await.map_err(read_dir_err)? {
            let path = entry.path();
            if !self.matches(&path) {
                continue;
            }
            // Symlinks are left to the registry, which only opens regular files.
            if let Ok(file_type) = entry.file_type().await {
                if !file_type.is_file() && !file_type.is_symlink() {
                    debug!(path = %path.display(), "skipping non-regular file");
                    continue;
                }
            }
            if self.registry.ensure_tailing(&path).await {
                started += 1;
            }
        }

        Ok(started)
    }

    /// Registers the directory watch and, when a filter is set, picks up the
    /// matching files that already exist.
    ///
    /// The watch goes first so that nothing written during the scan is lost;
    /// the registry absorbs the duplicates.
    pub async fn start(&mut self) -> Result<(), Error> {
        if self.state != DispatchState::Idle {
            return Ok(());
        }

        let mut events = DirEvents::new()?;
        events.watch(&self.target)?;
        info!(dir = %self.target.display(), "watch added");
        self.events = Some(events);
        self.state = DispatchState::Watching;

        if self.filter.is_some() {
            let started = self.scan_existing().await?;
            debug!(started, "initial scan done");
        }

        Ok(())
    }

    /// Dispatches events until `shutdown` completes or the watch fails.
    ///
    /// Returns `Ok` once `shutdown` fires, leaving the dispatcher
    /// [`Draining`](DispatchState::Draining). A watch failure, or the watch
    /// going away, is returned as an error.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<(), Error>
    where
        F: Future<Output = ()>,
    {
        match self.events.take() {
            Some(events) => self.run_events(events, shutdown).await,
            None => Ok(()),
        }
    }

    /// Like [`run`](WatchDispatcher::run), but dispatches from `events`
    /// instead of the directory watch.
    ///
    /// The stream ending counts as the watch going away.
    pub async fn run_events<S, F>(&mut self, mut events: S, shutdown: F) -> Result<(), Error>
    where
        S: Stream<Item = Result<FileEvent, Error>> + Unpin,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let res = loop {
            tokio::select! {
                _ = &mut shutdown => break Ok(()),
                event = events.next() => match event {
                    Some(Ok(event)) => self.handle_event(event).await,
                    Some(Err(e)) => break Err(e),
                    None => break Err(Error::WatchClosed),
                },
            }
        };

        if let Err(e) = &res {
            error!("{e}");
        }
        self.state = DispatchState::Draining;

        res
    }

    /// Drops the watch and closes every tailer. Returns how many were closed.
    pub async fn shutdown(&mut self) -> usize {
        self.state = DispatchState::Draining;
        self.events = None;

        let closed = self.registry.stop_all().await;
        self.state = DispatchState::Stopped;
        info!(closed, "all tailers closed");

        closed
    }
}

impl fmt::Debug for WatchDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("WatchDispatcher")
            .field("target", &self.target)
            .field("filter", &self.filter)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
