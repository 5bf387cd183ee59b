//! Path to tailer bookkeeping, with at most one active tailer per path.

use std::collections::HashMap;
use std::fmt;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::File;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::output::OutputSink;
use crate::reader::DEFAULT_POLL_INTERVAL;
use crate::tailer::{PrefixStyle, Tailer};

/// Settings every tailer started by a [`TailRegistry`] shares.
#[derive(Clone, Debug)]
pub struct TailOptions {
    pub style: PrefixStyle,
    pub poll_interval: Duration,
    pub sink: OutputSink,
}

impl TailOptions {
    pub fn new(sink: OutputSink) -> Self {
        TailOptions {
            style: PrefixStyle::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            sink,
        }
    }

    pub fn with_style(mut self, style: PrefixStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Maps each tailed path to its [`Tailer`].
///
/// Cloning yields another handle to the same map. Every operation holds the
/// map's lock for its whole duration, including the open in
/// [`ensure_tailing`](TailRegistry::ensure_tailing), so concurrent callers
/// racing on one path start a single tailer. Only regular files are opened.
#[derive(Clone)]
pub struct TailRegistry {
    tailers: Arc<Mutex<HashMap<PathBuf, Entry>>>,
    options: Arc<TailOptions>,
}

struct Entry {
    tailer: Tailer,
    id: FileId,
}

/// Identifies the file behind a path, so that a different file renamed over
/// it can be told apart.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct FileId {
    #[cfg(unix)]
    dev: u64,
    #[cfg(unix)]
    ino: u64,
    #[cfg(not(unix))]
    created: Option<std::time::SystemTime>,
}

impl FileId {
    #[cfg(unix)]
    fn of(metadata: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;

        FileId {
            dev: metadata.dev(),
            ino: metadata.ino(),
        }
    }

    #[cfg(not(unix))]
    fn of(metadata: &Metadata) -> Self {
        FileId {
            created: metadata.created().ok(),
        }
    }
}

impl TailRegistry {
    pub fn new(options: TailOptions) -> Self {
        TailRegistry {
            tailers: Arc::new(Mutex::new(HashMap::new())),
            options: Arc::new(options),
        }
    }

    pub fn options(&self) -> &TailOptions {
        &self.options
    }

    /// Starts tailing `path` unless an active tailer already exists for it.
    ///
    /// Returns `true` if a new tailer was started. Open failures are logged
    /// and leave no entry behind, so a later event can retry. A tailer whose
    /// task already exited (its read failed) is replaced.
    pub async fn ensure_tailing(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let mut tailers = self.tailers.lock().await;

        if let Some(existing) = tailers.get(path) {
            if !existing.tailer.is_finished() {
                return false;
            }
            debug!(path = %path.display(), "replacing finished tailer");
            tailers.remove(path);
        }

        self.attach(&mut tailers, path).await
    }

    /// Makes sure the tailer for `path` follows the file that is there now.
    ///
    /// If `path` is gone its tailer is stopped. If a different file now sits
    /// at `path` the old tailer is stopped and a new one reads the new file
    /// from its first byte. Returns `true` if a new tailer was started.
    pub async fn replace_tailing(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let mut tailers = self.tailers.lock().await;

        let current = match tokio::fs::metadata(path).await {
            Ok(metadata) => FileId::of(&metadata),
            Err(_) => {
                if let Some(entry) = tailers.remove(path) {
                    info!(path = %path.display(), "detaching");
                    entry.tailer.close();
                }
                return false;
            }
        };

        if let Some(existing) = tailers.get(path) {
            if existing.id == current && !existing.tailer.is_finished() {
                return false;
            }
            if let Some(entry) = tailers.remove(path) {
                info!(path = %path.display(), "file replaced, detaching");
                entry.tailer.close();
            }
        }

        self.attach(&mut tailers, path).await
    }

    /// Closes and forgets the tailer for `path`, if any.
    ///
    /// Returns `true` if a tailer was removed.
    pub async fn stop_tailing(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let mut tailers = self.tailers.lock().await;

        match tailers.remove(path) {
            Some(entry) => {
                info!(path = %path.display(), "detaching");
                entry.tailer.close();
                true
            }
            None => false,
        }
    }

    /// Closes every tailer and empties the map. Returns how many were closed.
    ///
    /// Tailer tasks are not awaited; each exits within one poll interval.
    pub async fn stop_all(&self) -> usize {
        let mut tailers = self.tailers.lock().await;
        let count = tailers.len();

        for (_, entry) in tailers.drain() {
            entry.tailer.close();
        }

        count
    }

    pub async fn is_tailing(&self, path: impl AsRef<Path>) -> bool {
        self.tailers.lock().await.contains_key(path.as_ref())
    }

    pub async fn len(&self) -> usize {
        self.tailers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Returns the tailed paths, sorted.
    pub async fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.tailers.lock().await.keys().cloned().collect();
        paths.sort();
        paths
    }

    async fn attach(&self, tailers: &mut HashMap<PathBuf, Entry>, path: &Path) -> bool {
        let (file, id) = match open_regular_file(path).await {
            Ok(opened) => opened,
            Err(e) => {
                warn!("{e}");
                return false;
            }
        };

        info!(path = %path.display(), "attaching");
        let tailer = Tailer::spawn(
            path.to_path_buf(),
            file,
            self.options.style,
            self.options.sink.clone(),
            self.options.poll_interval,
        );
        tailers.insert(path.to_path_buf(), Entry { tailer, id });

        true
    }
}

impl fmt::Debug for TailRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("TailRegistry")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

async fn open_regular_file(path: &Path) -> Result<(File, FileId), Error> {
    let open_err = |source| Error::Open {
        path: path.to_path_buf(),
        source,
    };

    // Opening a FIFO blocks until a writer shows up, so check before opening.
    let metadata = tokio::fs::metadata(path).await.map_err(open_err)?;
    if !metadata.is_file() {
        return Err(Error::NotAFile(path.to_path_buf()));
    }

    let file = File::open(path).await.map_err(open_err)?;

    Ok((file, FileId::of(&metadata)))
}
