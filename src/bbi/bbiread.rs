use std::collections::VecDeque;
use std::io::{self, Read, Seek, SeekFrom};

use bytes::{Buf, BytesMut};
use libdeflater::Decompressor;
use thiserror::Error;

use crate::bbi::{BIGBED_MAGIC, BIGWIG_MAGIC, CHROM_TREE_MAGIC, CIR_TREE_MAGIC, ZoomHeader};
use crate::bed::record::RecordError;
use crate::utils::file::SeekableRead;

/// A (possibly compressed) file region holding bed records.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Block {
    pub(crate) offset: u64,
    pub(crate) size: u64,
}

impl Block {
    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Header info for a bigBed file
///
/// Note that info on internal properties like file offsets are not public.
/// Reading data is available through higher-level functions.
#[derive(Copy, Clone, Debug)]
pub struct BBIHeader {
    pub version: u16,
    pub field_count: u16,
    pub defined_field_count: u16,

    pub(crate) zoom_levels: u16,
    pub(crate) chromosome_tree_offset: u64,
    pub(crate) full_data_offset: u64,
    pub(crate) full_index_offset: u64,
    pub(crate) auto_sql_offset: u64,
    pub(crate) total_summary_offset: u64,
    pub(crate) uncompress_buf_size: u32,
}

impl BBIHeader {
    pub fn is_compressed(&self) -> bool {
        self.uncompress_buf_size > 0
    }

    pub fn primary_data_size(&self) -> u64 {
        self.full_index_offset - self.full_data_offset
    }
}

/// Info on a bigBed file
#[derive(Clone, Debug)]
pub struct BBIFileInfo {
    /// Header info
    pub header: BBIHeader,
    /// Info on zooms in the file
    pub zoom_headers: Vec<ZoomHeader>,
}

/// Information on a chromosome in a bigBed file
#[derive(Clone, Debug)]
pub struct ChromInfo {
    pub name: String,
    pub length: u32,
    pub id: u32,
}

impl PartialEq for ChromInfo {
    fn eq(&self, other: &ChromInfo) -> bool {
        self.name == other.name
    }
}

/// Possible errors encountered when opening a bigBed file to read
#[derive(Error, Debug)]
pub enum BigBedOpenError {
    #[error("invalid magic (likely not a bigBed file)")]
    InvalidMagic,
    #[error("unsupported bigBed version {0}; only version 3 and newer can be read")]
    UnsupportedVersion(u16),
    #[error("unexpected end of file")]
    UnexpectedEof,
    #[error("error occurred: {0}")]
    IoError(io::Error),
}

impl From<io::Error> for BigBedOpenError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            BigBedOpenError::UnexpectedEof
        } else {
            BigBedOpenError::IoError(e)
        }
    }
}

/// Possible errors encountered when reading data from a bigBed file
#[derive(Error, Debug)]
pub enum BBIReadError {
    #[error("the passed chromosome ({0}) was not found in the file")]
    ChromosomeNotFound(String),
    #[error("invalid magic")]
    InvalidMagic,
    #[error("corrupt index: {0}")]
    CorruptIndex(String),
    #[error("error parsing bed record: {0}")]
    MalformedRecord(#[from] RecordError),
    #[error("unexpected end of file")]
    UnexpectedEof,
    #[error("the file was invalid: {0}")]
    InvalidFile(String),
    #[error("error occurred: {0}")]
    IoError(io::Error),
}

impl From<io::Error> for BBIReadError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            BBIReadError::UnexpectedEof
        } else {
            BBIReadError::IoError(e)
        }
    }
}

pub(crate) fn read_info<R: SeekableRead>(file: &mut R) -> Result<BBIFileInfo, BigBedOpenError> {
    let mut header_data = BytesMut::zeroed(64);
    file.read_exact(&mut header_data)?;

    let magic = header_data.get_u32_le();
    match magic {
        BIGBED_MAGIC => {}
        // A bigWig carries the same layout but different payloads
        BIGWIG_MAGIC => return Err(BigBedOpenError::InvalidMagic),
        _ => return Err(BigBedOpenError::InvalidMagic),
    }

    let version = header_data.get_u16_le();
    let zoom_levels = header_data.get_u16_le();
    let chromosome_tree_offset = header_data.get_u64_le();
    let full_data_offset = header_data.get_u64_le();
    let full_index_offset = header_data.get_u64_le();
    let field_count = header_data.get_u16_le();
    let defined_field_count = header_data.get_u16_le();
    let auto_sql_offset = header_data.get_u64_le();
    let total_summary_offset = header_data.get_u64_le();
    let uncompress_buf_size = header_data.get_u32_le();
    let _reserved = header_data.get_u64_le();

    if version < 3 {
        return Err(BigBedOpenError::UnsupportedVersion(version));
    }

    let header = BBIHeader {
        version,
        zoom_levels,
        chromosome_tree_offset,
        full_data_offset,
        full_index_offset,
        field_count,
        defined_field_count,
        auto_sql_offset,
        total_summary_offset,
        uncompress_buf_size,
    };

    let zoom_headers = read_zoom_headers(file, &header)?;

    Ok(BBIFileInfo {
        header,
        zoom_headers,
    })
}

fn read_zoom_headers<R: SeekableRead>(
    file: &mut R,
    header: &BBIHeader,
) -> io::Result<Vec<ZoomHeader>> {
    let mut header_data = BytesMut::zeroed((header.zoom_levels as usize) * 24);
    file.read_exact(&mut header_data)?;

    let mut zoom_headers = vec![];
    for _ in 0..header.zoom_levels {
        let reduction_level = header_data.get_u32_le();
        let _reserved = header_data.get_u32_le();
        let data_offset = header_data.get_u64_le();
        let index_offset = header_data.get_u64_le();

        zoom_headers.push(ZoomHeader {
            reduction_level,
            data_offset,
            index_offset,
        });
    }

    Ok(zoom_headers)
}

/// The header of the on-disk chromosome B+-tree. Read on the first name
/// lookup and cached by the reader.
#[derive(Copy, Clone, Debug)]
pub(crate) struct ChromBTreeInfo {
    pub(crate) root_offset: u64,
    pub(crate) block_size: u32,
    pub(crate) key_size: u32,
    pub(crate) item_count: u64,
}

pub(crate) fn read_chrom_tree_header<R: SeekableRead>(
    file: &mut R,
    at: u64,
) -> Result<ChromBTreeInfo, BBIReadError> {
    file.seek(SeekFrom::Start(at))?;
    let mut header_data = BytesMut::zeroed(32);
    file.read_exact(&mut header_data)?;

    let magic = header_data.get_u32_le();
    if magic != CHROM_TREE_MAGIC {
        return Err(BBIReadError::InvalidMagic);
    }

    let block_size = header_data.get_u32_le();
    let key_size = header_data.get_u32_le();
    let val_size = header_data.get_u32_le();
    let item_count = header_data.get_u64_le();
    let _reserved = header_data.get_u64_le();

    if val_size != 8 {
        return Err(BBIReadError::CorruptIndex(format!(
            "chromosome index val_size is {} (expected 8)",
            val_size
        )));
    }

    Ok(ChromBTreeInfo {
        root_offset: at + 32,
        block_size,
        key_size,
        item_count,
    })
}

const MAX_TREE_DEPTH: usize = 64;

/// Resolves `chrom_name` to `(chrom_id, chrom_size)` by walking the B+-tree.
///
/// Every node carries exactly `block_size` slots, zero-padded past the live
/// `count`. Separator keys in internal nodes are the first key of the child's
/// subtree, so descent picks the last child whose separator is at or before
/// the query; equality is only checked at the leaf.
pub(crate) fn lookup_chrom<R: SeekableRead>(
    file: &mut R,
    tree: &ChromBTreeInfo,
    file_len: u64,
    chrom_name: &str,
    key_scratch: &mut Vec<u8>,
    node_scratch: &mut Vec<u8>,
) -> Result<Option<(u32, u32)>, BBIReadError> {
    let key_size = tree.key_size as usize;
    if chrom_name.len() > key_size {
        return Ok(None);
    }
    key_scratch.clear();
    key_scratch.extend_from_slice(chrom_name.as_bytes());
    key_scratch.resize(key_size, 0);

    let block_size = tree.block_size as usize;
    let entry_size = key_size + 8;
    let node_size = 4 + entry_size * block_size;

    let mut offset = tree.root_offset;
    for _ in 0..MAX_TREE_DEPTH {
        if offset
            .checked_add(node_size as u64)
            .map_or(true, |end| end > file_len)
        {
            return Err(BBIReadError::CorruptIndex(format!(
                "chromosome index node at {} extends past the end of the file",
                offset
            )));
        }
        file.seek(SeekFrom::Start(offset))?;
        node_scratch.resize(node_size, 0);
        file.read_exact(node_scratch)?;

        let is_leaf = node_scratch[0];
        if is_leaf > 1 {
            return Err(BBIReadError::CorruptIndex(format!(
                "unexpected chromosome index node type {}",
                is_leaf
            )));
        }
        let count = u16::from_le_bytes([node_scratch[2], node_scratch[3]]) as usize;
        if count > block_size {
            return Err(BBIReadError::CorruptIndex(format!(
                "chromosome index node count {} exceeds the fan-out {}",
                count, block_size
            )));
        }

        let entries = &node_scratch[4..];
        let key_at = |i: usize| &entries[i * entry_size..i * entry_size + key_size];

        // Lower bound over the live slots: first key at or after the query.
        let mut lo = 0usize;
        let mut hi = count;
        while lo < hi {
            let mid = (lo + hi) / 2;
            if key_at(mid) < key_scratch.as_slice() {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }

        if is_leaf == 1 {
            if lo >= count || key_at(lo) != key_scratch.as_slice() {
                return Ok(None);
            }
            let val = &entries[lo * entry_size + key_size..(lo + 1) * entry_size];
            let chrom_id = u32::from_le_bytes(val[0..4].try_into().unwrap());
            let chrom_size = u32::from_le_bytes(val[4..8].try_into().unwrap());
            return Ok(Some((chrom_id, chrom_size)));
        }

        let child = if lo < count && key_at(lo) == key_scratch.as_slice() {
            lo
        } else if lo == 0 {
            return Ok(None);
        } else {
            lo - 1
        };
        let val = &entries[child * entry_size + key_size..(child + 1) * entry_size];
        offset = u64::from_le_bytes(val.try_into().unwrap());
    }
    Err(BBIReadError::CorruptIndex(
        "chromosome index is deeper than any writer produces (possible cycle)".to_string(),
    ))
}

/// Collects every chromosome by an in-order traversal of the B+-tree.
pub(crate) fn read_chrom_tree_block<R: SeekableRead>(
    f: &mut R,
    at: u64,
    key_size: u32,
    chroms: &mut Vec<ChromInfo>,
) -> Result<(), BBIReadError> {
    f.seek(SeekFrom::Start(at))?;
    let mut header_data = BytesMut::zeroed(4);
    f.read_exact(&mut header_data)?;

    let isleaf = header_data.get_u8();
    let _reserved = header_data.get_u8();
    let count = header_data.get_u16_le();

    let mut bytes = BytesMut::zeroed((key_size as usize + 8) * (count as usize));
    f.read_exact(&mut bytes)?;

    if isleaf == 1 {
        for _ in 0..count {
            let key_string = match std::str::from_utf8(&bytes.as_ref()[0..(key_size as usize)]) {
                Ok(s) => s.trim_end_matches(char::from(0)).to_owned(),
                Err(_) => {
                    return Err(BBIReadError::InvalidFile(
                        "chromosome name is not valid utf-8".to_owned(),
                    ))
                }
            };
            bytes.advance(key_size as usize);

            let chrom_id = bytes.get_u32_le();
            let chrom_size = bytes.get_u32_le();
            chroms.push(ChromInfo {
                name: key_string,
                id: chrom_id,
                length: chrom_size,
            });
        }
    } else {
        // First, go through and get child blocks
        let mut children: Vec<u64> = Vec::with_capacity(count as usize);
        for _ in 0..count {
            bytes.advance(key_size as usize);
            children.push(bytes.get_u64_le());
        }
        // Then go through each child block
        for child in children {
            read_chrom_tree_block(f, child, key_size, chroms)?;
        }
    }
    Ok(())
}

/// The header of the on-disk interval R-tree. Read on the first query and
/// cached by the reader.
#[derive(Copy, Clone, Debug)]
pub(crate) struct CirTreeInfo {
    pub(crate) root_offset: u64,
    pub(crate) block_size: u32,
    pub(crate) item_count: u64,
}

pub(crate) fn read_cir_tree_header<R: SeekableRead>(
    file: &mut R,
    at: u64,
) -> Result<CirTreeInfo, BBIReadError> {
    file.seek(SeekFrom::Start(at))?;
    let mut header_data = BytesMut::zeroed(48);
    file.read_exact(&mut header_data)?;

    let magic = header_data.get_u32_le();
    if magic != CIR_TREE_MAGIC {
        return Err(BBIReadError::InvalidMagic);
    }

    let block_size = header_data.get_u32_le();
    let item_count = header_data.get_u64_le();
    let _start_chrom_idx = header_data.get_u32_le();
    let _start_base = header_data.get_u32_le();
    let _end_chrom_idx = header_data.get_u32_le();
    let _end_base = header_data.get_u32_le();
    let _end_file_offset = header_data.get_u64_le();
    let _item_per_slot = header_data.get_u32_le();
    let _reserved = header_data.get_u32_le();

    Ok(CirTreeInfo {
        root_offset: at + 48,
        block_size,
        item_count,
    })
}

#[inline]
fn compare_position(chrom1: u32, chrom1_base: u32, chrom2: u32, chrom2_base: u32) -> i8 {
    if chrom1 < chrom2 {
        -1
    } else if chrom1 > chrom2 {
        1
    } else if chrom1_base < chrom2_base {
        -1
    } else if chrom1_base > chrom2_base {
        1
    } else {
        0
    }
}

/// Tests a query against a bounding box; the query end and box end are both
/// the last included position on their chromosomes.
#[inline]
fn overlaps(
    chromq: u32,
    chromq_start: u32,
    chromq_end: u32,
    chromb1: u32,
    chromb1_start: u32,
    chromb2: u32,
    chromb2_end: u32,
) -> bool {
    compare_position(chromq, chromq_start, chromb2, chromb2_end) <= 0
        && compare_position(chromq, chromq_end, chromb1, chromb1_start) >= 0
}

/// Walks the R-tree and returns, in traversal order, the data blocks whose
/// bounding box overlaps `[start, end)` on `chrom_ix`.
pub(crate) fn search_cir_tree<R: SeekableRead>(
    file: &mut R,
    tree: &CirTreeInfo,
    file_len: u64,
    chrom_ix: u32,
    start: u32,
    end: u32,
) -> Result<Vec<Block>, BBIReadError> {
    let mut blocks = vec![];
    if end <= start {
        return Ok(blocks);
    }
    // Box coordinates are compared inclusively
    let qend = end - 1;

    let node_limit = tree.item_count.saturating_mul(2).saturating_add(64);
    let mut visited: u64 = 0;

    let mut remaining_childblocks = VecDeque::with_capacity(64);
    remaining_childblocks.push_front(tree.root_offset);
    while let Some(node_offset) = remaining_childblocks.pop_front() {
        visited += 1;
        if visited > node_limit {
            return Err(BBIReadError::CorruptIndex(
                "interval index holds more nodes than its item count allows".to_string(),
            ));
        }
        if node_offset >= file_len {
            return Err(BBIReadError::CorruptIndex(format!(
                "interval index node at {} is outside the file",
                node_offset
            )));
        }
        file.seek(SeekFrom::Start(node_offset))?;
        let mut header_data = BytesMut::zeroed(4);
        file.read_exact(&mut header_data)?;

        let isleaf = header_data.get_u8();
        let _reserved = header_data.get_u8();
        let count = header_data.get_u16_le();
        if isleaf > 1 {
            return Err(BBIReadError::CorruptIndex(format!(
                "unexpected interval index node type {}",
                isleaf
            )));
        }
        if u32::from(count) > tree.block_size {
            return Err(BBIReadError::CorruptIndex(format!(
                "interval index node count {} exceeds the fan-out {}",
                count, tree.block_size
            )));
        }

        if isleaf == 1 {
            let mut bytes = BytesMut::zeroed((count as usize) * 32);
            file.read_exact(&mut bytes)?;
            for _ in 0..count {
                let start_chrom_ix = bytes.get_u32_le();
                let start_base = bytes.get_u32_le();
                let end_chrom_ix = bytes.get_u32_le();
                let end_base = bytes.get_u32_le();
                let data_offset = bytes.get_u64_le();
                let data_size = bytes.get_u64_le();
                let block_overlaps = overlaps(
                    chrom_ix,
                    start,
                    qend,
                    start_chrom_ix,
                    start_base,
                    end_chrom_ix,
                    end_base,
                );
                if block_overlaps {
                    if data_offset
                        .checked_add(data_size)
                        .map_or(true, |end| end > file_len)
                    {
                        return Err(BBIReadError::CorruptIndex(format!(
                            "data block at {} extends past the end of the file",
                            data_offset
                        )));
                    }
                    blocks.push(Block {
                        offset: data_offset,
                        size: data_size,
                    });
                }
            }
        } else {
            let mut bytes = BytesMut::zeroed((count as usize) * 24);
            file.read_exact(&mut bytes)?;
            let mut new_childblocks = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let start_chrom_ix = bytes.get_u32_le();
                let start_base = bytes.get_u32_le();
                let end_chrom_ix = bytes.get_u32_le();
                let end_base = bytes.get_u32_le();
                let child_offset = bytes.get_u64_le();
                let block_overlaps = overlaps(
                    chrom_ix,
                    start,
                    qend,
                    start_chrom_ix,
                    start_base,
                    end_chrom_ix,
                    end_base,
                );
                if block_overlaps {
                    new_childblocks.push(child_offset);
                }
            }
            // Depth-first, in declared child order
            for child in new_childblocks.into_iter().rev() {
                remaining_childblocks.push_front(child);
            }
        }
    }

    Ok(blocks)
}

/// Reads the data (uncompressed, if applicable) for a block into
/// `block_scratch`, returning the number of valid bytes.
pub(crate) fn read_block_data<R: SeekableRead>(
    file: &mut R,
    file_len: u64,
    uncompress_buf_size: usize,
    block: &Block,
    raw_scratch: &mut Vec<u8>,
    block_scratch: &mut Vec<u8>,
) -> Result<usize, BBIReadError> {
    if block
        .offset
        .checked_add(block.size)
        .map_or(true, |end| end > file_len)
    {
        return Err(BBIReadError::CorruptIndex(format!(
            "data block at {} extends past the end of the file",
            block.offset
        )));
    }
    file.seek(SeekFrom::Start(block.offset))?;

    if uncompress_buf_size == 0 {
        block_scratch.resize(block.size as usize, 0);
        file.read_exact(block_scratch)?;
        Ok(block.size as usize)
    } else {
        raw_scratch.resize(block.size as usize, 0);
        file.read_exact(raw_scratch)?;
        block_scratch.resize(uncompress_buf_size, 0);
        let mut decompressor = Decompressor::new();
        let decompressed = decompressor
            .zlib_decompress(raw_scratch, block_scratch)
            .map_err(|e| {
                BBIReadError::InvalidFile(format!(
                    "failed to decompress block at {}: {}",
                    block.offset, e
                ))
            })?;
        Ok(decompressed)
    }
}
