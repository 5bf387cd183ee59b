use clap::Parser;
use tracing::error;

use fstail::{shutdown_signal, Args, Config, Controller, Error, OutputSink};

async fn run(args: Args) -> Result<(), Error> {
    let config = Config::from_args(&args)?;
    let shutdown = shutdown_signal()?;

    let mut controller = Controller::new(config, OutputSink::stdout())?;
    controller.run(shutdown).await
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    fstail::logging::init(&args.log_level);

    if let Err(e) = run(args).await {
        error!("{e}");
        eprintln!("fstail: {e}");
        std::process::exit(1);
    }
}
