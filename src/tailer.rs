//! One tailing task per file, and the prefix it tags its lines with.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::stream::StreamExt;
use tokio::fs::File;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::output::OutputSink;
use crate::reader::{CloseHandle, LineReader};

/// Separator written between a prefix and the line it tags.
pub const PREFIX_SEPARATOR: &str = "| ";

/// How each output line is tagged with its source.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum PrefixStyle {
    /// Lines are written untouched.
    None,
    /// The file's base name, e.g. `ns_pod_container-0.log| `.
    #[default]
    Filename,
    /// The base name up to its first underscore, e.g. `ns| `. Files without
    /// an underscore get no prefix.
    FirstSegment,
}

impl PrefixStyle {
    /// Maps a `FS_PREFIX` style value. Unrecognised values fall back to
    /// [`PrefixStyle::Filename`].
    pub fn from_env_value(value: &str) -> Self {
        match value.trim() {
            "0" | "none" => PrefixStyle::None,
            "k8s" => PrefixStyle::FirstSegment,
            _ => PrefixStyle::Filename,
        }
    }

    /// Computes the prefix for lines read from `path`.
    pub fn prefix_for(self, path: impl AsRef<Path>) -> String {
        let base = match path.as_ref().file_name() {
            Some(name) => name.to_string_lossy(),
            None => return String::new(),
        };

        match self {
            PrefixStyle::None => String::new(),
            PrefixStyle::Filename => format!("{base}{PREFIX_SEPARATOR}"),
            PrefixStyle::FirstSegment => base
                .split_once('_')
                .map(|(segment, _)| format!("{segment}{PREFIX_SEPARATOR}"))
                .unwrap_or_default(),
        }
    }
}

impl fmt::Display for PrefixStyle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            PrefixStyle::None => "none",
            PrefixStyle::Filename => "filename",
            PrefixStyle::FirstSegment => "k8s",
        };
        f.write_str(name)
    }
}

/// A running tail of one file.
///
/// The spawned task owns the file handle through its [`LineReader`], and
/// writes every line it reads to the shared [`OutputSink`]. Dropping a
/// `Tailer` does not stop the task; call [`close`](Tailer::close).
pub struct Tailer {
    path: PathBuf,
    prefix: String,
    close: CloseHandle,
    task: JoinHandle<()>,
}

impl Tailer {
    /// Spawns the tailing task for an already opened `file`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        path: PathBuf,
        file: File,
        style: PrefixStyle,
        sink: OutputSink,
        poll_interval: Duration,
    ) -> Self {
        let prefix = style.prefix_for(&path);
        let close = CloseHandle::new();
        let lines = LineReader::with_poll_interval(file, close.clone(), poll_interval);

        let task = tokio::spawn(stream_lines(
            path.clone(),
            lines,
            prefix.clone(),
            close.clone(),
            sink,
        ));

        Tailer {
            path,
            prefix,
            close,
            task,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Asks the task to stop. The file handle is released once the task
    /// notices, which takes at most one poll interval. Idempotent.
    pub fn close(&self) {
        self.close.close();
    }

    pub fn is_closed(&self) -> bool {
        self.close.is_closed()
    }

    /// Returns `true` once the task has exited, either after `close` or
    /// because reading the file failed.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the task to exit.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!(path = %self.path.display(), "tailer task failed: {e}");
        }
    }
}

impl fmt::Debug for Tailer {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("Tailer")
            .field("path", &self.path)
            .field("prefix", &self.prefix)
            .field("closed", &self.is_closed())
            .field("finished", &self.is_finished())
            .finish()
    }
}

async fn stream_lines(
    path: PathBuf,
    mut lines: LineReader,
    prefix: String,
    close: CloseHandle,
    sink: OutputSink,
) {
    while let Some(res) = lines.next().await {
        let line = match res {
            Ok(line) => line,
            Err(e) => {
                warn!(path = %path.display(), "read failed, stopping tail: {e}");
                break;
            }
        };

        if close.is_closed() {
            break;
        }

        // A lost line must not end the stream.
        if let Err(e) = sink.write_line(&prefix, &line).await {
            warn!(path = %path.display(), "failed to write line: {e}");
        }
    }

    debug!(path = %path.display(), "tailer finished");
}
