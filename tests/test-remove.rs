use fstail::{Config, Controller, OutputSink, TailRegistry};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tempfile::tempdir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;
use tokio::time;

const TIMEOUT_2_SEC: Duration = Duration::from_millis(2000);

async fn wait_until_tailing(registry: &TailRegistry, path: &Path, tailing: bool) {
    time::timeout(TIMEOUT_2_SEC, async {
        while registry.is_tailing(path).await != tailing {
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
pub async fn test_remove_then_recreate() {
    let logdir = tempdir().unwrap();
    let logdir_path = logdir.path().canonicalize().unwrap();
    let logfile = logdir_path.join("app.log");

    let (writer, reader) = tokio::io::duplex(4096);
    let config = Config::new(&logdir_path).with_poll_interval(Duration::from_millis(10));
    let mut controller = Controller::new(config, OutputSink::new(writer)).unwrap();
    controller.start().await.unwrap();
    let registry = controller.registry().clone();

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        controller
            .run(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    let mut old_file = std::fs::File::create(&logfile).unwrap();
    old_file.write_all(b"before\n").unwrap();
    old_file.flush().unwrap();

    let mut lines = BufReader::new(reader).lines();
    let line = time::timeout(TIMEOUT_2_SEC, lines.next_line())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(line.as_deref(), Some("app.log| before"));

    std::fs::remove_file(&logfile).unwrap();
    wait_until_tailing(&registry, &logfile, false).await;

    // Still writable through the old handle, but nobody is listening anymore.
    old_file.write_all(b"after removal\n").unwrap();
    old_file.flush().unwrap();
    assert!(time::timeout(Duration::from_millis(200), lines.next_line())
        .await
        .is_err());

    // A new file at the same path is read from its first byte.
    std::fs::write(&logfile, b"fresh\n").unwrap();
    let line = time::timeout(TIMEOUT_2_SEC, lines.next_line())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(line.as_deref(), Some("app.log| fresh"));
    assert!(registry.is_tailing(&logfile).await);

    shutdown_tx.send(()).unwrap();
    time::timeout(TIMEOUT_2_SEC, handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[cfg(unix)]
#[tokio::test]
pub async fn test_rename_away_stops_tail() {
    let logdir = tempdir().unwrap();
    let logdir_path = logdir.path().canonicalize().unwrap();
    let logfile = logdir_path.join("rotating.log");
    let rotated = logdir_path.join("archived.1");

    let (writer, reader) = tokio::io::duplex(4096);
    let config = Config::new(&logdir_path)
        .with_filter("rotating.log")
        .with_poll_interval(Duration::from_millis(10));
    let mut controller = Controller::new(config, OutputSink::new(writer)).unwrap();
    controller.start().await.unwrap();
    let registry = controller.registry().clone();

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        controller
            .run(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    std::fs::write(&logfile, b"one\n").unwrap();
    let mut lines = BufReader::new(reader).lines();
    let line = time::timeout(TIMEOUT_2_SEC, lines.next_line())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(line.as_deref(), Some("rotating.log| one"));

    std::fs::rename(&logfile, &rotated).unwrap();
    wait_until_tailing(&registry, &logfile, false).await;

    std::fs::write(&logfile, b"two\n").unwrap();
    let line = time::timeout(TIMEOUT_2_SEC, lines.next_line())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(line.as_deref(), Some("rotating.log| two"));

    shutdown_tx.send(()).unwrap();
    time::timeout(TIMEOUT_2_SEC, handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[cfg(unix)]
#[tokio::test]
pub async fn test_rename_over_tailed_file() {
    let logdir = tempdir().unwrap();
    let logdir_path = logdir.path().canonicalize().unwrap();
    let logfile = logdir_path.join("app.log");
    let staged = logdir_path.join("app.tmp");

    let (writer, reader) = tokio::io::duplex(4096);
    let config = Config::new(&logdir_path)
        .with_filter("app.log")
        .with_poll_interval(Duration::from_millis(10));
    let mut controller = Controller::new(config, OutputSink::new(writer)).unwrap();
    controller.start().await.unwrap();

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        controller
            .run(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    std::fs::write(&logfile, b"old\n").unwrap();
    let mut lines = BufReader::new(reader).lines();
    let line = time::timeout(TIMEOUT_2_SEC, lines.next_line())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(line.as_deref(), Some("app.log| old"));

    // Atomic replace: the new file is written aside, then moved over the old.
    std::fs::write(&staged, b"new content\n").unwrap();
    std::fs::rename(&staged, &logfile).unwrap();
    let line = time::timeout(TIMEOUT_2_SEC, lines.next_line())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(line.as_deref(), Some("app.log| new content"));

    let mut new_file = std::fs::OpenOptions::new()
        .append(true)
        .open(&logfile)
        .unwrap();
    new_file.write_all(b"appended\n").unwrap();
    new_file.flush().unwrap();
    let line = time::timeout(TIMEOUT_2_SEC, lines.next_line())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(line.as_deref(), Some("app.log| appended"));

    // The replacement is tailed once, not once per rename event.
    assert!(time::timeout(Duration::from_millis(200), lines.next_line())
        .await
        .is_err());

    shutdown_tx.send(()).unwrap();
    time::timeout(TIMEOUT_2_SEC, handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
