//! Broadcast an LED-on request to a group and watch the whole fleet react.

use clap::Parser;
use color_eyre::Result;
use twinprobe::addressing::{Target, LED_GROUP};
use twinprobe::cli::{self, CommonArgs};
use twinprobe::correlator::Command;

#[derive(Debug, Parser)]
#[command(name = "twin-grp-on", about = "Switch on every twin in a group")]
struct Args {
    /// Group id
    #[arg(default_value = LED_GROUP)]
    group: String,

    #[command(flatten)]
    common: CommonArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    cli::setup(&args.common)?;

    cli::run(&args.common, |config| {
        Ok(Command::group_on(
            Target::group(&args.group)?,
            &config.bus.client_id,
        ))
    })
    .await
}
