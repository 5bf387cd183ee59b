//! The single output every tailer writes its lines to.

use std::fmt;
use std::io;
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Process-wide line sink shared by all tailers.
///
/// Each [`write_line`] call formats the prefixed line into one buffer and
/// writes it while holding the sink's lock, so lines from concurrent tailers
/// never interleave mid-line. Calls from different tailers are otherwise
/// unordered.
///
/// [`write_line`]: OutputSink::write_line
#[derive(Clone)]
pub struct OutputSink {
    inner: Arc<Mutex<BoxedWriter>>,
}

impl OutputSink {
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        OutputSink {
            inner: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }

    /// Writes `prefix`, `line` and a trailing newline as one unit.
    pub async fn write_line(&self, prefix: &str, line: &str) -> io::Result<()> {
        let mut buf = String::with_capacity(prefix.len() + line.len() + 1);
        buf.push_str(prefix);
        buf.push_str(line);
        buf.push('\n');

        let mut writer = self.inner.lock().await;
        writer.write_all(buf.as_bytes()).await?;
        writer.flush().await
    }

    pub async fn flush(&self) -> io::Result<()> {
        self.inner.lock().await.flush().await
    }
}

impl fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("OutputSink").finish_non_exhaustive()
    }
}
