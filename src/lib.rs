/*!
Bigbed provides reading and writing of the bigBed file format: a
self-indexed binary container of bed features that supports retrieving the
features overlapping a region without scanning the whole file.

The original file format specification is defined in this paper:
<https://doi.org/10.1093/bioinformatics/btq351>

## Reading

The entrypoint to reading is [`BigBedRead::open`], which takes any type that
implements both [`Read`][std::io::Read] and [`Seek`][std::io::Seek], or
[`BigBedRead::open_file`], which takes a path and opens a `File`. Opening
validates the file header; the embedded chromosome and interval indexes are
validated lazily when first used.

Once a [`BigBedRead`] has been constructed, header info is available through
[`BigBedRead::info`], and the main data through
[`BigBedRead::get_interval`], which returns a lazy `Iterator` of the
[`BedRecord`][bed::record::BedRecord]s overlapping a region given in
1-based inclusive coordinates. Chromosome names resolve through the on-disk
B+-tree ([`BigBedRead::resolve`]), and candidate data blocks are pruned
through the on-disk R-tree, so queries touch only the blocks that can
overlap.

## Writing

A [`BigBedWrite`] writes a complete file in one call to
[`BigBedWrite::write`] from a start-sorted slice of records, building both
tree indexes and back-patching the header; the output stream must be
seekable. Zoom levels, the total summary, and autoSql are read when present
but not produced; those regions are written zeroed.
*/

mod bbi;
pub mod bed;
pub mod utils;

pub use bbi::*;
