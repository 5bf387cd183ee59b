//! Everything related to watching a directory for file creations,
//! modifications and removals.

use std::collections::VecDeque;
use std::fmt::{self, Debug, Formatter};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task;

use futures_util::ready;
use futures_util::stream::{Stream as FuturesStream, StreamExt};
use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::EventKind;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::Error;

/// What happened to a file in the watched directory.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FileEventKind {
    Created,
    Modified,
    Removed,
    /// A rename touched the path. Whatever is there now may be a different
    /// file than before, or nothing at all.
    Replaced,
}

/// A single file change, already reduced from the raw `notify` event.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct FileEvent {
    pub path: PathBuf,
    pub kind: FileEventKind,
}

impl FileEvent {
    pub fn new(path: impl Into<PathBuf>, kind: FileEventKind) -> Self {
        FileEvent {
            path: path.into(),
            kind,
        }
    }

    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self::new(path, FileEventKind::Created)
    }

    pub fn modified(path: impl Into<PathBuf>) -> Self {
        Self::new(path, FileEventKind::Modified)
    }

    pub fn removed(path: impl Into<PathBuf>) -> Self {
        Self::new(path, FileEventKind::Removed)
    }

    pub fn replaced(path: impl Into<PathBuf>) -> Self {
        Self::new(path, FileEventKind::Replaced)
    }
}

/// Watches one directory and can be polled to receive [`FileEvent`]s.
///
/// Internally, `DirEvents` contains a [`notify::Watcher`] from where
/// filesystem events are proxied over a channel. Raw events that say nothing
/// about a file's lines (metadata changes, access, folder creation) are
/// dropped; renames are split into a removal of the old path and a
/// replacement of the new one.
///
/// Watcher failures, including an overflowed event queue, come through as
/// `Err` items and are not recoverable.
///
/// [`notify::Watcher`]: ../notify/trait.Watcher.html
pub struct DirEvents {
    inner: notify::RecommendedWatcher,
    watched_dir: Option<PathBuf>,
    pending: VecDeque<FileEvent>,
    event_stream: mpsc::UnboundedReceiver<Result<notify::Event, notify::Error>>,
}

impl Debug for DirEvents {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("DirEvents")
            .field("watched_dir", &self.watched_dir)
            .field("pending", &self.pending)
            .finish()
    }
}

impl DirEvents {
    /// Constructs a new `DirEvents` instance, not yet watching anything.
    pub fn new() -> Result<Self, Error> {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            // The only way `send` can fail is if the receiver is dropped,
            // which only happens while `DirEvents` itself is dropped.
            let _ = tx.send(res);
        })
        .map_err(Error::WatchInit)?;

        Ok(DirEvents {
            inner,
            watched_dir: None,
            pending: VecDeque::new(),
            event_stream: rx,
        })
    }

    /// Starts watching `dir`, non-recursively.
    pub fn watch(&mut self, dir: impl AsRef<Path>) -> Result<(), Error> {
        let dir = dir.as_ref();

        notify::Watcher::watch(&mut self.inner, dir, notify::RecursiveMode::NonRecursive)
            .map_err(|source| Error::WatchRegister {
                path: dir.to_path_buf(),
                source,
            })?;
        self.watched_dir = Some(dir.to_path_buf());

        Ok(())
    }

    pub fn watched_dir(&self) -> Option<&Path> {
        self.watched_dir.as_deref()
    }

    /// Waits for the next file event.
    ///
    /// Returns `Err` if the watcher reported a failure, and `None` if the
    /// watcher went away.
    pub async fn next_event(&mut self) -> Option<Result<FileEvent, Error>> {
        self.next().await
    }
}

/// Reduces a raw `notify` event to the file events it implies.
///
/// An event asking for a rescan means the backend dropped events, which is
/// reported as [`Error::WatchOverflow`].
pub fn file_events(event: notify::Event) -> Result<Vec<FileEvent>, Error> {
    if event.need_rescan() {
        return Err(Error::WatchOverflow);
    }

    let notify::Event { kind, paths, .. } = event;

    let events = match kind {
        EventKind::Create(create_kind) => {
            // kqueue and Windows report `Any` for file creation, so let the
            // registry sort out directories.
            if matches!(create_kind, CreateKind::Folder) {
                Vec::new()
            } else {
                paths.into_iter().map(FileEvent::created).collect()
            }
        }

        EventKind::Modify(ModifyKind::Name(rename)) => match rename {
            RenameMode::From => paths.into_iter().map(FileEvent::removed).collect(),
            RenameMode::Both => {
                let mut paths = paths.into_iter();
                let mut events = Vec::with_capacity(2);
                if let Some(from) = paths.next() {
                    events.push(FileEvent::removed(from));
                }
                events.extend(paths.map(FileEvent::replaced));
                events
            }
            // The destination may land on a tailed path, and with `Any` the
            // side of the rename is unknown. The dispatcher checks the disk.
            _ => paths.into_iter().map(FileEvent::replaced).collect(),
        },

        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any) => {
            paths.into_iter().map(FileEvent::modified).collect()
        }

        EventKind::Remove(_) => paths.into_iter().map(FileEvent::removed).collect(),

        // Ignored events that don't warrant touching any tailer
        _ => Vec::new(),
    };

    Ok(events)
}

impl FuturesStream for DirEvents {
    type Item = Result<FileEvent, Error>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(event) = this.pending.pop_front() {
                return task::Poll::Ready(Some(Ok(event)));
            }

            match ready!(this.event_stream.poll_recv(cx)) {
                None => return task::Poll::Ready(None),
                Some(Err(e)) => return task::Poll::Ready(Some(Err(Error::WatchSource(e)))),
                Some(Ok(event)) => {
                    trace!(?event, "raw watch event");
                    match file_events(event) {
                        Ok(events) => this.pending.extend(events),
                        Err(e) => return task::Poll::Ready(Some(Err(e))),
                    }
                }
            }
        }
    }
}
