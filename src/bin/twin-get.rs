//! Ask a twin for its state and show everything it publishes meanwhile.

use clap::Parser;
use color_eyre::Result;
use twinprobe::addressing::Target;
use twinprobe::cli::{self, CommonArgs};
use twinprobe::correlator::Command;

#[derive(Debug, Parser)]
#[command(name = "twin-get", about = "Request the state of a single twin")]
struct Args {
    /// Device id, e.g. pico1
    device: String,

    #[command(flatten)]
    common: CommonArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    cli::setup(&args.common)?;

    cli::run(&args.common, |_| {
        Ok(Command::state_get(Target::device(&args.device)?))
    })
    .await
}
