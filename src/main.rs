use clap::Parser;
use log::{debug, warn};

mod args;
mod pollmc;

use crate::args::{Args, Command};

fn main() {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
    debug!("args: {:?}", args);

    let res = pollmc::read_config(&args.config).and_then(|config| match &args.command {
        Command::Aggregate(a) => pollmc::run_aggregation(a, &config),
        Command::Simulate(s) => pollmc::run_simulation(s, &config),
    });

    if let Err(e) = res {
        warn!("Error occured {:?}", e);
        eprintln!("An error occured: {}", e);
        std::process::exit(1);
    }
}
