//! Everything related to reading lines out of a single growing file.

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task;
use std::time::Duration;

use futures_util::ready;
use futures_util::stream::{Stream as FuturesStream, StreamExt};
use pin_project_lite::pin_project;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, BufReader};
use tokio::time::{self, Sleep};

/// How long a reader waits at end of file before looking for more data.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shared flag used to close a [`LineReader`] from another task.
///
/// Cloning yields a handle to the same flag. Closing is idempotent.
#[derive(Clone, Debug, Default)]
pub struct CloseHandle {
    closed: Arc<AtomicBool>,
}

impl CloseHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the reader closed. Its next read attempt ends the line stream.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

pin_project! {
/// Incremental line reader over one open file.
///
/// `LineReader` implements [`futures::Stream`], yielding each complete line
/// with its `\n` (and a preceding `\r`, if any) stripped. Reaching the current
/// end of the file does not end the stream: the reader sleeps for the poll
/// interval and looks again, so lines appended later are picked up. Bytes
/// after the last newline are held back until the rest of the line arrives.
///
/// The stream ends when its [`CloseHandle`] is closed, or after yielding the
/// first I/O error. Once ended it never yields again; tailing the same path
/// requires a new reader over a fresh open.
///
/// [`futures::Stream`]: https://docs.rs/futures/0.3/futures/stream/trait.Stream.html
pub struct LineReader {
    #[pin]
    reader: BufReader<File>,
    stall: Option<Pin<Box<Sleep>>>,
    partial: Vec<u8>,
    poll_interval: Duration,
    close: CloseHandle,
    done: bool,
}
}

impl LineReader {
    pub fn new(file: File, close: CloseHandle) -> Self {
        Self::with_poll_interval(file, close, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(file: File, close: CloseHandle, poll_interval: Duration) -> Self {
        LineReader {
            reader: BufReader::new(file),
            stall: None,
            partial: Vec::new(),
            poll_interval,
            close,
            done: false,
        }
    }

    /// Returns the next complete line, waiting for one to be written if
    /// necessary.
    ///
    /// `Ok(None)` means the reader was closed; an `Err` is returned once for a
    /// failed read, after which the reader yields `Ok(None)`.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        self.next().await.transpose()
    }

    #[cfg(test)]
    fn pending(&self) -> &[u8] {
        &self.partial
    }
}

impl fmt::Debug for LineReader {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("LineReader")
            .field("pending", &self.partial.len())
            .field("poll_interval", &self.poll_interval)
            .field("closed", &self.close.is_closed())
            .field("done", &self.done)
            .finish()
    }
}

fn decode_line(mut raw: Vec<u8>) -> String {
    if raw.last() == Some(&b'\n') {
        raw.pop();
        if raw.last() == Some(&b'\r') {
            raw.pop();
        }
    }

    match String::from_utf8(raw) {
        Ok(line) => line,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

impl FuturesStream for LineReader {
    type Item = io::Result<String>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if *this.done {
                return task::Poll::Ready(None);
            }
            if this.close.is_closed() {
                *this.done = true;
                return task::Poll::Ready(None);
            }

            if let Some(stall) = this.stall.as_mut() {
                ready!(stall.as_mut().poll(cx));
                *this.stall = None;
                continue;
            }

            let (consumed, complete) = {
                let available = match ready!(this.reader.as_mut().poll_fill_buf(cx)) {
                    Ok(buf) => buf,
                    Err(e) => {
                        *this.done = true;
                        return task::Poll::Ready(Some(Err(e)));
                    }
                };

                if available.is_empty() {
                    // Current end of file, come back after the poll interval.
                    (0, None)
                } else if let Some(pos) = available.iter().position(|b| *b == b'\n') {
                    this.partial.extend_from_slice(&available[..=pos]);
                    (pos + 1, Some(true))
                } else {
                    this.partial.extend_from_slice(available);
                    (available.len(), Some(false))
                }
            };

            match complete {
                None => {
                    *this.stall = Some(Box::pin(time::sleep(*this.poll_interval)));
                }
                Some(found_newline) => {
                    this.reader.as_mut().consume(consumed);
                    if found_newline {
                        let raw = std::mem::take(this.partial);
                        return task::Poll::Ready(Some(Ok(decode_line(raw))));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio::time::timeout;

    const SHORT_POLL: Duration = Duration::from_millis(10);

    async fn open_reader(path: &std::path::Path) -> (LineReader, CloseHandle) {
        let close = CloseHandle::new();
        let file = File::open(path).await.unwrap();
        let reader = LineReader::with_poll_interval(file, close.clone(), SHORT_POLL);
        (reader, close)
    }

    #[test]
    fn test_decode_line() {
        assert_eq!(decode_line(b"foo\n".to_vec()), "foo");
        assert_eq!(decode_line(b"foo\r\n".to_vec()), "foo");
        assert_eq!(decode_line(b"\n".to_vec()), "");
        assert_eq!(decode_line(b"a\rb\n".to_vec()), "a\rb");
        assert_eq!(decode_line(b"bad \xff\n".to_vec()), "bad \u{fffd}");
    }

    #[test]
    fn test_close_handle_idempotent() {
        let close = CloseHandle::new();
        let other = close.clone();
        assert!(!other.is_closed());

        close.close();
        close.close();
        assert!(other.is_closed());
    }

    #[tokio::test]
    async fn test_reads_existing_lines_in_order() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let path = tmp_dir.path().join("app.log");
        std::fs::write(&path, b"one\ntwo\nthree\n").unwrap();

        let (mut reader, _close) = open_reader(&path).await;

        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("one"));
        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("two"));
        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("three"));
    }

    #[tokio::test]
    async fn test_eof_waits_for_more_data() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let path = tmp_dir.path().join("app.log");
        let mut writer = std::fs::File::create(&path).unwrap();

        let (mut reader, _close) = open_reader(&path).await;

        // Nothing written yet, so the reader must still be waiting.
        assert!(timeout(Duration::from_millis(50), reader.next_line())
            .await
            .is_err());

        writer.write_all(b"late\n").unwrap();
        writer.flush().unwrap();

        let line = timeout(Duration::from_secs(2), reader.next_line())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line.as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn test_partial_line_held_back() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let path = tmp_dir.path().join("app.log");
        let mut writer = std::fs::File::create(&path).unwrap();
        writer.write_all(b"foo ").unwrap();
        writer.flush().unwrap();

        let (mut reader, _close) = open_reader(&path).await;

        assert!(timeout(Duration::from_millis(50), reader.next_line())
            .await
            .is_err());
        assert_eq!(reader.pending(), b"foo ");

        writer.write_all(b"bar\n").unwrap();
        writer.flush().unwrap();

        let line = timeout(Duration::from_secs(2), reader.next_line())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line.as_deref(), Some("foo bar"));
        assert!(reader.pending().is_empty());
    }

    #[tokio::test]
    async fn test_many_appends_and_long_line() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let path = tmp_dir.path().join("busy.log");
        let mut writer = std::fs::File::create(&path).unwrap();

        // Longer than the reader's buffer, so it spans several fills.
        let long_line = "x".repeat(20_000);
        let mut expected: Vec<String> = (0..3000).map(|i| format!("line {i}")).collect();
        expected.insert(1500, long_line);

        let (mut reader, _close) = open_reader(&path).await;

        let collect = async {
            let mut seen = Vec::with_capacity(expected.len());
            while seen.len() < expected.len() {
                match reader.next_line().await.unwrap() {
                    Some(line) => seen.push(line),
                    None => break,
                }
            }
            seen
        };

        let write = async {
            let mut body = Vec::new();
            for line in &expected {
                body.extend_from_slice(line.as_bytes());
                body.push(b'\n');
            }
            // Cut mid-line so the reader stalls on partial data between appends.
            for chunk in body.chunks(7919) {
                writer.write_all(chunk).unwrap();
                writer.flush().unwrap();
                time::sleep(Duration::from_millis(5)).await;
            }
        };

        let (seen, ()) = timeout(Duration::from_secs(10), async { tokio::join!(collect, write) })
            .await
            .unwrap();
        assert_eq!(seen, expected);

        // Nothing duplicated after the last line.
        assert!(timeout(Duration::from_millis(50), reader.next_line())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_close_ends_stream() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let path = tmp_dir.path().join("app.log");
        std::fs::write(&path, b"").unwrap();

        let (mut reader, close) = open_reader(&path).await;

        let closer = tokio::spawn(async move {
            time::sleep(Duration::from_millis(30)).await;
            close.close();
        });

        let res = timeout(Duration::from_secs(2), reader.next_line())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(res, None);
        closer.await.unwrap();

        // Ended streams stay ended.
        assert_eq!(reader.next_line().await.unwrap(), None);
    }
}
