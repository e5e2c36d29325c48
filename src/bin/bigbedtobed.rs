use std::error::Error;

use clap::Parser;

use bigbed::utils::cli::bigbedtobed::{bigbedtobed, BigBedToBedArgs};

fn main() -> Result<(), Box<dyn Error>> {
    let args = BigBedToBedArgs::parse();
    bigbedtobed(args)
}
