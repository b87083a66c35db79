use clap::Parser;
use log::{debug, LevelFilter};

mod analysis;
mod args;

use crate::args::Args;

fn main() {
    let args = Args::parse();

    let mut builder = env_logger::Builder::from_default_env();
    if args.verbose {
        builder.filter_level(LevelFilter::Debug);
    }
    builder.init();
    debug!("args: {:?}", args);

    if let Err(e) = analysis::run_analysis_job(&args) {
        analysis::report_error(&e);
        std::process::exit(1);
    }
}
