//! Command line arguments and the runtime configuration derived from them.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::error::Error;
use crate::reader::DEFAULT_POLL_INTERVAL;
use crate::tailer::PrefixStyle;

const AFTER_HELP: &str = "\
Examples:

  # Work in the current directory
  fstail

  # Work in /var/log/actuated
  fstail /var/log/actuated

  # Work in /var/log/actuated and only tail files named like \"server-error\"
  fstail /var/log/actuated server-error

  # Disable prefix printing
  FS_PREFIX=0 fstail

  # Prefix each line with the pod name taken from the file name
  FS_PREFIX=k8s fstail /var/log/containers
";

/// Tail every file in a directory, multiplexed onto standard output.
#[derive(Debug, Parser)]
#[command(name = "fstail", version, after_help = AFTER_HELP)]
pub struct Args {
    /// Directory to watch [default: current directory]
    pub dir: Option<PathBuf>,

    /// Only tail files whose name contains this string
    #[arg(value_name = "MATCH")]
    pub filter: Option<String>,

    /// Line prefix: "0" or "none" disables it, "k8s" uses the text before the
    /// first underscore of the file name, anything else the whole file name
    #[arg(long, env = "FS_PREFIX", value_name = "STYLE")]
    pub prefix: Option<String>,

    /// How long to wait at end of file before polling for more data
    #[arg(long, env = "FS_POLL_INTERVAL_MS", value_name = "MS", default_value_t = 100)]
    pub poll_interval_ms: u64,

    /// Log filter for diagnostics on stderr; RUST_LOG takes precedence
    #[arg(long, env = "FS_LOG", value_name = "FILTER", default_value = "info")]
    pub log_level: String,
}

/// Everything the daemon needs to run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// Directory to watch, as given; resolved at startup.
    pub dir: PathBuf,
    /// Substring a file name must contain to be tailed.
    pub filter: Option<String>,
    pub prefix_style: PrefixStyle,
    pub poll_interval: Duration,
}

impl Config {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Config {
            dir: dir.into(),
            filter: None,
            prefix_style: PrefixStyle::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_prefix_style(mut self, prefix_style: PrefixStyle) -> Self {
        self.prefix_style = prefix_style;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Builds the configuration from parsed arguments, falling back to the
    /// current directory when none was given.
    pub fn from_args(args: &Args) -> Result<Self, Error> {
        let dir = match &args.dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().map_err(Error::CurrentDir)?,
        };

        Ok(Config {
            dir,
            filter: args.filter.clone().filter(|filter| !filter.is_empty()),
            prefix_style: args
                .prefix
                .as_deref()
                .map(PrefixStyle::from_env_value)
                .unwrap_or_default(),
            poll_interval: Duration::from_millis(args.poll_interval_ms.max(1)),
        })
    }
}
