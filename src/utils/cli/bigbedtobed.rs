use std::error::Error;
use std::fs::File;
use std::io::{self, Write};

use clap::Parser;

use crate::{BigBedRead, ChromInfo};

#[derive(Clone, Debug, PartialEq, Parser)]
#[command(
    name = "bigbedtobed",
    about = "Converts an input bigBed to a bed.",
    long_about = None,
)]
pub struct BigBedToBedArgs {
    /// the bigbed to convert to a bed
    pub big_bed: String,

    /// the path of the bed to output to
    pub bed: String,

    /// If set, restrict output to given chromosome
    #[arg(long)]
    pub chrom: Option<String>,

    /// If set, restrict output to features ending at or after it (1-based)
    #[arg(long)]
    pub first: Option<u32>,

    /// If set, restrict output to features starting at or before it (1-based)
    #[arg(long)]
    pub last: Option<u32>,
}

pub fn bigbedtobed(args: BigBedToBedArgs) -> Result<(), Box<dyn Error>> {
    let mut bigbed = BigBedRead::open_file(&args.big_bed)?;
    let bed = File::create(&args.bed)?;

    if (args.first.is_some() || args.last.is_some()) && args.chrom.is_none() {
        eprintln!("Cannot specify --first or --last without specifying --chrom.");
        return Ok(());
    }

    let chroms: Vec<ChromInfo> = match &args.chrom {
        Some(arg_chrom) => {
            let all = bigbed.chroms()?;
            let Some(chrom) = all.into_iter().find(|c| c.name == *arg_chrom) else {
                eprintln!("{arg_chrom} not found in file.");
                return Ok(());
            };
            vec![chrom]
        }
        None => bigbed.chroms()?,
    };

    let mut writer = io::BufWriter::with_capacity(32 * 1000, bed);
    for chrom in chroms {
        let first = args.first.unwrap_or(1);
        let last = args.last.unwrap_or(chrom.length);
        for raw_val in bigbed.get_interval(&chrom.name, first, last)? {
            let val = raw_val?;
            writeln!(writer, "{}", val)?;
        }
    }

    Ok(())
}
