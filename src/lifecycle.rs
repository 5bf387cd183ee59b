//! Startup, signal handling and orderly shutdown.

use std::future::Future;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::Config;
use crate::dispatch::{DispatchState, WatchDispatcher};
use crate::error::Error;
use crate::output::OutputSink;
use crate::registry::{TailOptions, TailRegistry};

/// Owns everything a running daemon needs: the registry of tailers and the
/// dispatcher feeding it.
#[derive(Debug)]
pub struct Controller {
    dispatcher: WatchDispatcher,
}

impl Controller {
    /// Resolves the configured directory and wires the registry and
    /// dispatcher to `sink`. Nothing is watched until [`run`](Controller::run).
    pub fn new(config: Config, sink: OutputSink) -> Result<Self, Error> {
        let target = resolve_dir(&config.dir)?;

        let options = TailOptions::new(sink)
            .with_style(config.prefix_style)
            .with_poll_interval(config.poll_interval);
        let registry = TailRegistry::new(options);
        let dispatcher = WatchDispatcher::new(target, config.filter, registry);

        Ok(Controller { dispatcher })
    }

    pub fn target(&self) -> &Path {
        self.dispatcher.target()
    }

    pub fn registry(&self) -> &TailRegistry {
        self.dispatcher.registry()
    }

    pub fn state(&self) -> DispatchState {
        self.dispatcher.state()
    }

    /// Registers the directory watch and runs the initial scan. Called by
    /// [`run`](Controller::run) if not called before.
    pub async fn start(&mut self) -> Result<(), Error> {
        if self.dispatcher.state() != DispatchState::Idle {
            return Ok(());
        }

        let options = self.dispatcher.registry().options();
        info!(
            dir = %self.dispatcher.target().display(),
            filter = self.dispatcher.filter().unwrap_or("*"),
            prefix = %options.style,
            "watching"
        );

        self.dispatcher.start().await
    }

    /// Watches the directory until `shutdown` completes, then closes every
    /// tailer.
    ///
    /// Setup failures and watch failures are returned as errors. Tailer tasks
    /// are asked to close but not awaited.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<(), Error>
    where
        F: Future<Output = ()>,
    {
        let res = match self.start().await {
            Ok(()) => self.dispatcher.run(shutdown).await,
            Err(e) => Err(e),
        };

        self.dispatcher.shutdown().await;
        self.dispatcher.registry().options().sink.flush().await.ok();

        res
    }
}

/// Resolves `dir` to an absolute, canonical directory path.
pub fn resolve_dir(dir: impl AsRef<Path>) -> Result<PathBuf, Error> {
    let dir = dir.as_ref();

    let dir = if let Ok(linked_dir) = dir.read_link() {
        match dir.parent() {
            Some(parent) => parent.join(linked_dir),
            None => linked_dir,
        }
    } else {
        dir.to_path_buf()
    };

    let resolved = dir.canonicalize().map_err(|source| Error::ResolveDir {
        path: dir.clone(),
        source,
    })?;

    if !resolved.is_dir() {
        return Err(Error::NotADirectory(resolved));
    }

    Ok(resolved)
}

/// Completes on SIGINT or SIGTERM.
///
/// The handlers are installed before returning, so a signal arriving before
/// the future is first polled is not lost.
#[cfg(unix)]
pub fn shutdown_signal() -> Result<impl Future<Output = ()>, Error> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt()).map_err(Error::Signal)?;
    let mut terminate = signal(SignalKind::terminate()).map_err(Error::Signal)?;

    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => info!("received SIGINT, shutting down"),
            _ = terminate.recv() => info!("received SIGTERM, shutting down"),
        }
    })
}

/// Completes on Ctrl-C.
#[cfg(not(unix))]
pub fn shutdown_signal() -> Result<impl Future<Output = ()>, Error> {
    Ok(async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received Ctrl-C, shutting down"),
            Err(e) => tracing::error!("failed to listen for Ctrl-C: {e}"),
        }
    })
}
