//! A daemon library for tailing every file in a directory, multiplexed onto a
//! single output.
//!
//! Files are picked up as they are created or first written to, each one gets
//! its own tailing task, and their lines are written to a shared
//! [`OutputSink`] optionally tagged with a prefix naming the source file.
//! Removing a file stops its tail.
//!
//! ## Example
//!
//! ```no_run
//! use fstail::{shutdown_signal, Config, Controller, OutputSink, PrefixStyle};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), fstail::Error> {
//!     // Tail only files whose name contains "error", tagged with the part of
//!     // the name before the first underscore.
//!     let config = Config::new("/var/log/containers")
//!         .with_filter("error")
//!         .with_prefix_style(PrefixStyle::FirstSegment);
//!
//!     let mut controller = Controller::new(config, OutputSink::stdout())?;
//!     controller.run(shutdown_signal()?).await
//! }
//! ```
//!
//! ## Caveats
//!
//! A file truncated in place keeps being read from its old offset; nothing is
//! emitted for it until it grows past that point again. Rotate by renaming or
//! removing instead.

mod config;
mod dispatch;
mod error;
mod events;
mod lifecycle;
pub mod logging;
mod output;
mod reader;
mod registry;
mod tailer;

pub use config::{Args, Config};
pub use dispatch::{DispatchState, WatchDispatcher};
pub use error::Error;
pub use events::{file_events, DirEvents, FileEvent, FileEventKind};
pub use lifecycle::{resolve_dir, shutdown_signal, Controller};
pub use output::OutputSink;
pub use reader::{CloseHandle, LineReader, DEFAULT_POLL_INTERVAL};
pub use registry::{TailOptions, TailRegistry};
pub use tailer::{PrefixStyle, Tailer, PREFIX_SEPARATOR};

#[cfg(doctest)]
doc_comment::doctest!("../README.md");
