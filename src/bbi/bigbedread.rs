use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::vec;

use bytes::{Buf, BytesMut};

use crate::bbi::bbiread::{
    lookup_chrom, read_block_data, read_chrom_tree_block, read_chrom_tree_header,
    read_cir_tree_header, read_info, search_cir_tree, BBIFileInfo, BBIReadError, BigBedOpenError,
    Block, ChromBTreeInfo, ChromInfo, CirTreeInfo,
};
use crate::bbi::Summary;
use crate::bed::record::{next_record, BedRecord};
use crate::utils::file::SeekableRead;

/// The struct used to read a bigBed file
///
/// The reader owns its underlying stream together with the scratch buffers
/// used while answering queries, so a single reader serves one query at a
/// time; open independent readers for independent iteration.
pub struct BigBedRead<R> {
    info: BBIFileInfo,
    read: R,
    file_len: u64,
    chrom_tree: Option<ChromBTreeInfo>,
    cir_tree: Option<CirTreeInfo>,
    key_scratch: Vec<u8>,
    node_scratch: Vec<u8>,
    raw_scratch: Vec<u8>,
    block_scratch: Vec<u8>,
}

impl<R> BigBedRead<R> {
    /// Gets basic info about the bigBed file
    pub fn info(&self) -> &BBIFileInfo {
        &self.info
    }
}

impl BigBedRead<BufReader<File>> {
    /// Opens the bigBed file at `path`.
    pub fn open_file(path: impl AsRef<Path>) -> Result<Self, BigBedOpenError> {
        let file = File::open(path)?;
        BigBedRead::open(BufReader::new(file))
    }
}

impl<R: SeekableRead> BigBedRead<R> {
    /// Opens a bigBed from any type that implements both `Read` and `Seek`.
    ///
    /// The file header and zoom headers are validated here; the two tree
    /// indexes are validated on first use.
    pub fn open(mut read: R) -> Result<Self, BigBedOpenError> {
        let file_len = read.seek(SeekFrom::End(0))?;
        read.seek(SeekFrom::Start(0))?;
        let info = read_info(&mut read)?;
        let uncompress_buf_size = info.header.uncompress_buf_size as usize;
        Ok(BigBedRead {
            info,
            read,
            file_len,
            chrom_tree: None,
            cir_tree: None,
            key_scratch: Vec::new(),
            node_scratch: Vec::new(),
            raw_scratch: Vec::new(),
            block_scratch: vec![0; uncompress_buf_size],
        })
    }

    fn ensure_chrom_tree(&mut self) -> Result<ChromBTreeInfo, BBIReadError> {
        if let Some(tree) = self.chrom_tree {
            return Ok(tree);
        }
        let tree = read_chrom_tree_header(&mut self.read, self.info.header.chromosome_tree_offset)?;
        self.key_scratch.reserve(tree.key_size as usize);
        self.node_scratch
            .reserve(4 + (tree.key_size as usize + 8) * tree.block_size as usize);
        self.chrom_tree = Some(tree);
        Ok(tree)
    }

    fn ensure_cir_tree(&mut self) -> Result<CirTreeInfo, BBIReadError> {
        if let Some(tree) = self.cir_tree {
            return Ok(tree);
        }
        let tree = read_cir_tree_header(&mut self.read, self.info.header.full_index_offset)?;
        self.cir_tree = Some(tree);
        Ok(tree)
    }

    /// Resolves a chromosome name to its id and size via the chromosome
    /// index.
    pub fn resolve(&mut self, chrom_name: &str) -> Result<ChromInfo, BBIReadError> {
        let tree = self.ensure_chrom_tree()?;
        let found = lookup_chrom(
            &mut self.read,
            &tree,
            self.file_len,
            chrom_name,
            &mut self.key_scratch,
            &mut self.node_scratch,
        )?;
        match found {
            Some((id, length)) => Ok(ChromInfo {
                name: chrom_name.to_owned(),
                id,
                length,
            }),
            None => Err(BBIReadError::ChromosomeNotFound(chrom_name.to_owned())),
        }
    }

    /// Returns every chromosome in the file, in id order.
    pub fn chroms(&mut self) -> Result<Vec<ChromInfo>, BBIReadError> {
        let tree = self.ensure_chrom_tree()?;
        let mut chroms = Vec::with_capacity(tree.item_count as usize);
        read_chrom_tree_block(&mut self.read, tree.root_offset, tree.key_size, &mut chroms)?;
        Ok(chroms)
    }

    /// The total number of bed records stored in the file.
    pub fn item_count(&mut self) -> Result<u64, BBIReadError> {
        self.read
            .seek(SeekFrom::Start(self.info.header.full_data_offset))?;
        let mut data = BytesMut::zeroed(8);
        self.read.read_exact(&mut data)?;
        Ok(data.get_u64_le())
    }

    /// The whole-file summary statistics.
    pub fn summary(&mut self) -> Result<Summary, BBIReadError> {
        let offset = self.info.header.total_summary_offset;
        if offset == 0 {
            return Ok(Summary::default());
        }
        self.read.seek(SeekFrom::Start(offset))?;
        let mut data = BytesMut::zeroed(40);
        self.read.read_exact(&mut data)?;
        Ok(Summary {
            bases_covered: data.get_u64_le(),
            min_val: data.get_f64_le(),
            max_val: data.get_f64_le(),
            sum: data.get_f64_le(),
            sum_squares: data.get_f64_le(),
        })
    }

    /// The autoSql schema stored in the file, or an empty string when the
    /// file carries none. The schema is surfaced as-is, not interpreted.
    pub fn autosql(&mut self) -> Result<String, BBIReadError> {
        let offset = self.info.header.auto_sql_offset;
        if offset == 0 {
            return Ok(String::new());
        }
        self.read.seek(SeekFrom::Start(offset))?;
        let mut out = Vec::new();
        let mut chunk = [0u8; 512];
        'read: loop {
            let n = self.read.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            for &b in &chunk[..n] {
                if b == b'\0' {
                    break 'read;
                }
                out.push(b);
            }
        }
        String::from_utf8(out)
            .map_err(|_| BBIReadError::InvalidFile("autosql is not valid utf-8".to_owned()))
    }

    /// Returns a lazy iterator over the records overlapping
    /// `[first, last]` (1-based inclusive) on `chrom_name`.
    ///
    /// Records come out in block traversal order, not genomic order; sort
    /// afterwards if order matters. An unknown name is an error.
    pub fn get_interval(
        &mut self,
        chrom_name: &str,
        first: u32,
        last: u32,
    ) -> Result<BigBedIntervalIter<'_, R>, BBIReadError> {
        let chrom = self.resolve(chrom_name)?;
        // 0-based half-open for the index math
        let start = first.saturating_sub(1);
        let end = last;
        let cir = self.ensure_cir_tree()?;
        let blocks = search_cir_tree(&mut self.read, &cir, self.file_len, chrom.id, start, end)?;
        Ok(BigBedIntervalIter {
            chrom,
            start,
            end,
            blocks: blocks.into_iter(),
            block_len: 0,
            pos: 0,
            in_block: false,
            reader: self,
        })
    }

    fn load_block(&mut self, block: &Block) -> Result<usize, BBIReadError> {
        read_block_data(
            &mut self.read,
            self.file_len,
            self.info.header.uncompress_buf_size as usize,
            block,
            &mut self.raw_scratch,
            &mut self.block_scratch,
        )
    }
}

/// A lazy iterator over the bed records overlapping one query region.
///
/// Borrows its parent reader (and the reader's block buffer) for the
/// duration of the query.
pub struct BigBedIntervalIter<'a, R: SeekableRead> {
    reader: &'a mut BigBedRead<R>,
    chrom: ChromInfo,
    start: u32,
    end: u32,
    blocks: vec::IntoIter<Block>,
    block_len: usize,
    pos: usize,
    in_block: bool,
}

impl<'a, R: SeekableRead> Iterator for BigBedIntervalIter<'a, R> {
    type Item = Result<BedRecord, BBIReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.in_block {
                let data = &self.reader.block_scratch[..self.block_len];
                match next_record(data, &mut self.pos) {
                    None => {
                        self.in_block = false;
                    }
                    Some(Err(e)) => {
                        // A grammar violation ends this block's iteration
                        self.in_block = false;
                        return Some(Err(e.into()));
                    }
                    Some(Ok(raw)) => {
                        let keep = raw.chrom_id == self.chrom.id
                            && raw.start < self.end
                            && raw.end > self.start;
                        if keep {
                            return Some(Ok(raw.into_record(&self.chrom.name)));
                        }
                    }
                }
            } else {
                let block = self.blocks.next()?;
                match self.reader.load_block(&block) {
                    Ok(len) => {
                        self.block_len = len;
                        self.pos = 0;
                        self.in_block = true;
                    }
                    Err(e) => return Some(Err(e)),
                }
            }
        }
    }
}
