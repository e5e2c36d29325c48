pub(crate) mod bbiread;
pub(crate) mod bbiwrite;
pub(crate) mod bigbedread;
pub(crate) mod bigbedwrite;

pub(crate) const BIGWIG_MAGIC: u32 = 0x888F_FC26;
pub(crate) const BIGBED_MAGIC: u32 = 0x8789_F2EB;

pub(crate) const CIR_TREE_MAGIC: u32 = 0x2468_ACE0;
pub(crate) const CHROM_TREE_MAGIC: u32 = 0x78CA_8C91;

/// Info on a specific zoom level in a bigBed file
///
/// Zoom data is carried by the format but this library only surfaces the
/// headers; it neither reads zoom records nor computes zoom levels on write.
#[derive(Copy, Clone, Debug)]
pub struct ZoomHeader {
    pub reduction_level: u32,
    pub data_offset: u64,
    pub index_offset: u64,
}

/// The whole-file summary statistics stored next to the header.
///
/// Files produced by [`BigBedWrite`](crate::BigBedWrite) leave these zeroed.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Summary {
    pub bases_covered: u64,
    pub min_val: f64,
    pub max_val: f64,
    pub sum: f64,
    pub sum_squares: f64,
}

pub use bbiread::*;
pub use bbiwrite::*;
pub use bigbedread::*;
pub use bigbedwrite::*;
