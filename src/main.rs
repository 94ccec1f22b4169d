mod args;
mod extract;

use clap::Parser;
use log::{debug, warn};
use snafu::ErrorCompat;

fn main() {
    let args = args::Args::parse();

    let mut logger = env_logger::Builder::from_default_env();
    if args.verbose {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();
    debug!("args: {:?}", args);

    if let Err(e) = extract::run(&args) {
        warn!("Error occured {:?}", e);
        eprintln!("An error occured: {}", e);
        if let Some(bt) = ErrorCompat::backtrace(&*e) {
            eprintln!("trace: {}", bt);
        }
        std::process::exit(1);
    }
}
