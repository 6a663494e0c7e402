//! Ping every twin through `GRP/ALL/TPC/PING` and list who answered.

use clap::Parser;
use color_eyre::Result;
use twinprobe::addressing::Target;
use twinprobe::cli::{self, CommonArgs};
use twinprobe::correlator::{Command, PingSequence};

#[derive(Debug, Parser)]
#[command(name = "twin-ping-all", about = "Ping the ALL group and collect every pong")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    cli::setup(&args.common)?;

    cli::run(&args.common, |_| {
        Ok(Command::ping(Target::all(), PingSequence::global().next_id()))
    })
    .await
}
