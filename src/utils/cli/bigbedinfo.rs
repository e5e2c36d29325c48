use std::error::Error;

use clap::Parser;

use crate::utils::file::SeekableRead;
use crate::BigBedRead;

#[derive(Clone, Debug, Parser, PartialEq)]
#[command(
    name = "bigbedinfo",
    about = "Gets information about a bigBed.",
    long_about = None,
)]
pub struct BigBedInfoArgs {
    /// The bigbed to get info for.
    pub bigbed: String,

    /// If set, will print out the list of chromosomes in the bigBed and their sizes.
    #[arg(long)]
    #[arg(default_value_t = false)]
    pub chroms: bool,

    /// If set, will print out the list of all zoom levels.
    #[arg(long)]
    #[arg(default_value_t = false)]
    pub zooms: bool,

    /// If set, will print out the autosql spec.
    #[arg(long)]
    #[arg(default_value_t = false)]
    pub autosql: bool,
}

pub fn bigbedinfo(args: BigBedInfoArgs) -> Result<(), Box<dyn Error>> {
    let mut bigbed = BigBedRead::open_file(&args.bigbed)?;
    print_info(&mut bigbed, &args)
}

fn print_info<R: SeekableRead>(
    bigbed: &mut BigBedRead<R>,
    args: &BigBedInfoArgs,
) -> Result<(), Box<dyn Error>> {
    let header = bigbed.info().header;
    println!("version: {}", header.version);
    println!("fieldCount: {}", header.field_count);
    println!(
        "isCompressed: {}",
        if header.is_compressed() { "yes" } else { "no" }
    );
    println!("itemCount: {}", bigbed.item_count()?);
    println!(
        "primaryDataSize: {}",
        num_with_commas(header.primary_data_size())
    );
    let first_zoom_start = bigbed.info().zoom_headers.first().map(|z| z.data_offset);
    if let Some(first_zoom_start) = first_zoom_start {
        println!(
            "primaryIndexSize: {}",
            num_with_commas(first_zoom_start - header.full_index_offset)
        );
    }
    println!("zoomLevels: {}", bigbed.info().zoom_headers.len());
    if args.zooms {
        for zoom in bigbed.info().zoom_headers.iter() {
            println!(
                "\t{}\t{}",
                zoom.reduction_level,
                zoom.index_offset - zoom.data_offset
            );
        }
    }
    let chrom_list = bigbed.chroms()?;
    println!("chromCount: {}", chrom_list.len());
    if args.chroms {
        for chrom in chrom_list.iter() {
            println!("\t{} {} {}", chrom.name, chrom.id, chrom.length);
        }
    }
    if args.autosql {
        let autosql = bigbed.autosql()?;
        if autosql.is_empty() {
            println!("as:  n/a");
        } else {
            println!("as:");
            print!("{}", autosql);
        }
    }
    let summary = bigbed.summary()?;
    println!("basesCovered: {}", num_with_commas(summary.bases_covered));
    if summary.bases_covered > 0 {
        println!(
            "meanDepth: {:.6}",
            summary.sum / summary.bases_covered as f64
        );
        println!("minDepth: {:.6}", summary.min_val);
        println!("maxDepth: {:.6}", summary.max_val);
        let var = (summary.sum_squares
            - (summary.sum * summary.sum) / summary.bases_covered as f64)
            / (summary.bases_covered as f64 - 1.0);
        println!("std of depth: {:.6}", var.sqrt());
    }

    Ok(())
}

fn num_with_commas(num: u64) -> String {
    let digits = num.to_string();
    let mut formatted = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            formatted.push(',');
        }
        formatted.push(c);
    }
    formatted
}

#[cfg(test)]
mod tests {
    use super::num_with_commas;

    #[test]
    fn test_num_with_commas() {
        assert_eq!("0", num_with_commas(0));
        assert_eq!("987", num_with_commas(987));
        assert_eq!("1,000", num_with_commas(1000));
        assert_eq!("12,987", num_with_commas(12987));
        assert_eq!("4,023,987", num_with_commas(4023987));
        assert_eq!("9,000,123,987", num_with_commas(9000123987));
    }
}
