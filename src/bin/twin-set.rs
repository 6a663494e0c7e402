//! Switch a twin on or off via `TNG/<device>/STATE/SET`.

use clap::{Parser, ValueEnum};
use color_eyre::Result;
use twinprobe::addressing::Target;
use twinprobe::cli::{self, CommonArgs};
use twinprobe::correlator::Command;

#[derive(Debug, Clone, Copy, ValueEnum)]
#[value(rename_all = "UPPER")]
enum Switch {
    On,
    Off,
}

#[derive(Debug, Parser)]
#[command(name = "twin-set", about = "Set the on state of a single twin")]
struct Args {
    /// Device id, e.g. pico1
    device: String,

    /// Desired state
    #[arg(value_enum, ignore_case = true)]
    state: Switch,

    #[command(flatten)]
    common: CommonArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    cli::setup(&args.common)?;

    let on = matches!(args.state, Switch::On);
    cli::run(&args.common, |_| {
        Ok(Command::state_set(Target::device(&args.device)?, on))
    })
    .await
}
