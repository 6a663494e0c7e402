//! Ping one twin: publishes `{"id": n}` to `TNG/<device>/TPC/PING` and
//! listens for its pong and lifecycle messages.

use clap::Parser;
use color_eyre::Result;
use twinprobe::addressing::Target;
use twinprobe::cli::{self, CommonArgs};
use twinprobe::correlator::{Command, PingSequence};

#[derive(Debug, Parser)]
#[command(name = "twin-ping", about = "Ping a single twin and wait for its pong")]
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
        let target = Target::device(&args.device)?;
        Ok(Command::ping(target, PingSequence::global().next_id()))
    })
    .await
}
