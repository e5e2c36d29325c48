use std::error::Error;

use clap::Parser;

use bigbed::utils::cli::bigbedinfo::{bigbedinfo, BigBedInfoArgs};

fn main() -> Result<(), Box<dyn Error>> {
    let args = BigBedInfoArgs::parse();
    bigbedinfo(args)
}
