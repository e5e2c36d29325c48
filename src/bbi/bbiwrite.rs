use std::cmp;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, WriteBytesExt};
use thiserror::Error;

use crate::bbi::{CHROM_TREE_MAGIC, CIR_TREE_MAGIC};
use crate::utils::file::Tell;

/// The default fan-out of both on-disk tree indexes
pub const DEFAULT_BLOCK_SIZE: u32 = 256;
/// The default number of records packed into one data block
pub const DEFAULT_ITEMS_PER_SLOT: u32 = 512;

/// Options for writing a bigBed file
#[derive(Copy, Clone, Debug)]
pub struct BBIWriteOptions {
    pub compress: bool,
    pub items_per_slot: u32,
    pub block_size: u32,
}

impl Default for BBIWriteOptions {
    fn default() -> Self {
        BBIWriteOptions {
            compress: true,
            items_per_slot: DEFAULT_ITEMS_PER_SLOT,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

/// Possible errors encountered when writing a bigBed file
#[derive(Error, Debug)]
pub enum BBIWriteError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("error occurred: {0}")]
    IoError(#[from] io::Error),
}

/// One written data block and its bounding box in `(chrom_id, base)` space.
/// `end` is the largest feature end in the block, not the last feature's.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Section {
    pub(crate) chrom: u32,
    pub(crate) start: u32,
    pub(crate) end: u32,
    pub(crate) offset: u64,
    pub(crate) size: u64,
}

#[derive(Debug)]
pub(crate) struct RTreeNode {
    start_chrom_idx: u32,
    start_base: u32,
    end_chrom_idx: u32,
    end_base: u32,
    children: RTreeChildren,
}

#[derive(Debug)]
pub(crate) enum RTreeChildren {
    DataSections(Vec<Section>),
    Nodes(Vec<RTreeNode>),
}

const MAX_ZOOM_LEVELS: usize = 10;

pub(crate) fn write_blank_headers<W: Write + Seek>(file: &mut BufWriter<W>) -> io::Result<()> {
    file.seek(SeekFrom::Start(0))?;
    // Common header
    file.write_all(&[0; 64])?;
    // Zoom levels
    file.write_all(&[0; MAX_ZOOM_LEVELS * 24])?;

    Ok(())
}

/// Back-patches the file header and data count, then appends the trailing
/// magic. The zoom slots and total summary stay zeroed; this writer does
/// not produce them.
#[allow(clippy::too_many_arguments)]
pub(crate) fn write_info<W: Write + Seek>(
    file: &mut BufWriter<W>,
    magic: u32,
    chrom_index_start: u64,
    full_data_offset: u64,
    index_start: u64,
    field_count: u16,
    defined_field_count: u16,
    total_summary_offset: u64,
    uncompress_buf_size: u32,
    data_count: u64,
) -> io::Result<()> {
    file.seek(SeekFrom::Start(0))?;
    file.write_u32::<LittleEndian>(magic)?;
    file.write_u16::<LittleEndian>(4)?; // version
    file.write_u16::<LittleEndian>(0)?; // zoom levels
    file.write_u64::<LittleEndian>(chrom_index_start)?;
    file.write_u64::<LittleEndian>(full_data_offset)?;
    file.write_u64::<LittleEndian>(index_start)?;
    file.write_u16::<LittleEndian>(field_count)?;
    file.write_u16::<LittleEndian>(defined_field_count)?;
    file.write_u64::<LittleEndian>(0)?; // autoSql offset (none)
    file.write_u64::<LittleEndian>(total_summary_offset)?;
    file.write_u32::<LittleEndian>(uncompress_buf_size)?;
    file.write_u64::<LittleEndian>(0)?; // reserved

    debug_assert!(file.tell()? == 64);

    file.seek(SeekFrom::Start(full_data_offset))?;
    file.write_u64::<LittleEndian>(data_count)?;

    file.seek(SeekFrom::End(0))?;
    file.write_u32::<LittleEndian>(magic)?;

    Ok(())
}

/// Writes the chromosome B+-tree over `chroms` (sorted by name; the index
/// of each entry is its chromosome id).
///
/// Levels are laid out root first, then down to the leaves; every node is
/// padded to the full fan-out with zeroed slots, so node offsets follow
/// from arithmetic alone. Internal separators are the first key of the
/// child's subtree.
pub(crate) fn write_chrom_tree<W: Write + Seek>(
    file: &mut BufWriter<W>,
    chroms: &[(String, u32)],
    block_size: u32,
) -> io::Result<()> {
    let item_count = chroms.len() as u64;
    let key_size = chroms.iter().map(|c| c.0.len() as u32).fold(0, u32::max);
    let mut tree_block_size =
        cmp::min(cmp::min(block_size as u64, item_count), u16::MAX as u64) as u32;
    if item_count >= 2 {
        tree_block_size = cmp::max(tree_block_size, 2);
    }

    let tree_offset = file.tell()?;
    file.write_u32::<LittleEndian>(CHROM_TREE_MAGIC)?;
    file.write_u32::<LittleEndian>(tree_block_size)?;
    file.write_u32::<LittleEndian>(key_size)?;
    file.write_u32::<LittleEndian>(8)?; // size of id (u32) + size (u32)
    file.write_u64::<LittleEndian>(item_count)?;
    file.write_u64::<LittleEndian>(0)?; // reserved

    if item_count == 0 {
        // A single empty leaf keeps the index well formed
        file.write_u8(1)?;
        file.write_u8(0)?;
        file.write_u16::<LittleEndian>(0)?;
        return Ok(());
    }

    let bs = tree_block_size as u64;
    let entry_size = key_size as u64 + 8;
    let node_size = 4 + entry_size * bs;

    // Levels needed for a single root to cover every chromosome
    let mut levels = 1u32;
    let mut capacity = bs;
    while capacity < item_count {
        capacity *= bs;
        levels += 1;
    }

    // Nodes per level; level 0 is the leaves, where one slot is one item
    let mut nodes_at = vec![0u64; levels as usize];
    for level in 0..levels {
        let node_span = bs.pow(level + 1);
        nodes_at[level as usize] = (item_count + node_span - 1) / node_span;
    }

    let nodes_start = tree_offset + 32;
    let level_start = |level: u32| -> u64 {
        // Levels closer to the root are written first
        let preceding: u64 = ((level + 1)..levels).map(|l| nodes_at[l as usize]).sum();
        nodes_start + preceding * node_size
    };

    let mut key_buf = vec![0u8; key_size as usize];
    let zero_entry = vec![0u8; entry_size as usize];

    for level in (1..levels).rev() {
        let slot_span = bs.pow(level); // items covered by one slot
        let node_span = slot_span * bs; // items covered by one node
        let child_start = level_start(level - 1);
        for node in 0..nodes_at[level as usize] {
            let node_first = node * node_span;
            let live = cmp::min(bs, (item_count - node_first + slot_span - 1) / slot_span);
            file.write_u8(0)?;
            file.write_u8(0)?;
            file.write_u16::<LittleEndian>(live as u16)?;
            for slot in 0..bs {
                let child = node * bs + slot;
                let item = child * slot_span;
                if item < item_count {
                    let name = chroms[item as usize].0.as_bytes();
                    key_buf.fill(0);
                    key_buf[..name.len()].copy_from_slice(name);
                    file.write_all(&key_buf)?;
                    file.write_u64::<LittleEndian>(child_start + child * node_size)?;
                } else {
                    file.write_all(&zero_entry)?;
                }
            }
        }
    }

    for node in 0..nodes_at[0] {
        let node_first = node * bs;
        let live = cmp::min(bs, item_count - node_first);
        file.write_u8(1)?;
        file.write_u8(0)?;
        file.write_u16::<LittleEndian>(live as u16)?;
        for slot in 0..bs {
            let item = node_first + slot;
            if item < item_count {
                let (name, size) = &chroms[item as usize];
                key_buf.fill(0);
                key_buf[..name.len()].copy_from_slice(name.as_bytes());
                file.write_all(&key_buf)?;
                file.write_u32::<LittleEndian>(item as u32)?;
                file.write_u32::<LittleEndian>(*size)?;
            } else {
                file.write_all(&zero_entry)?;
            }
        }
    }

    Ok(())
}

fn max_position(a: (u32, u32), b: (u32, u32)) -> (u32, u32) {
    if b.0 > a.0 || (b.0 == a.0 && b.1 > a.1) {
        b
    } else {
        a
    }
}

/// The enclosing bounding box of a child list, as `(start, end)` positions.
/// The start comes from the first child (inputs arrive position-sorted);
/// the end must be folded, since an early feature can outreach later ones.
fn node_bounds(children: &RTreeChildren) -> ((u32, u32), (u32, u32)) {
    match children {
        RTreeChildren::DataSections(sections) => match sections.first() {
            None => ((0, 0), (0, 0)),
            Some(first) => {
                let start = (first.chrom, first.start);
                let end = sections
                    .iter()
                    .fold((first.chrom, first.end), |acc, s| {
                        max_position(acc, (s.chrom, s.end))
                    });
                (start, end)
            }
        },
        RTreeChildren::Nodes(nodes) => match nodes.first() {
            None => ((0, 0), (0, 0)),
            Some(first) => {
                let start = (first.start_chrom_idx, first.start_base);
                let end = nodes
                    .iter()
                    .fold((first.end_chrom_idx, first.end_base), |acc, n| {
                        max_position(acc, (n.end_chrom_idx, n.end_base))
                    });
                (start, end)
            }
        },
    }
}

/// Packs the written sections into an in-memory R-tree, bottom-up: chunks
/// of `block_size` sections form the leaves, then chunks of nodes form each
/// higher level until a single root remains.
pub(crate) fn get_rtreeindex<S>(
    sections_stream: S,
    options: BBIWriteOptions,
) -> (RTreeChildren, usize, u64)
where
    S: Iterator<Item = Section>,
{
    use itertools::Itertools;

    let block_size = options.block_size as usize;
    let mut total_sections: u64 = 0;

    let chunks = sections_stream
        .inspect(|_| total_sections += 1)
        .chunks(block_size);
    let mut current_nodes: Vec<RTreeChildren> = chunks
        .into_iter()
        .map(|chunk| RTreeChildren::DataSections(chunk.collect()))
        .collect();
    let mut levels = 0;
    let nodes: RTreeChildren = loop {
        if current_nodes.len() <= 1 {
            break current_nodes
                .pop()
                .unwrap_or(RTreeChildren::DataSections(vec![]));
        }
        levels += 1;
        let chunks = current_nodes.into_iter().chunks(block_size);
        current_nodes = chunks
            .into_iter()
            .map(|chunk| {
                RTreeChildren::Nodes(
                    chunk
                        .map(|c| {
                            let ((start_chrom_idx, start_base), (end_chrom_idx, end_base)) =
                                node_bounds(&c);
                            RTreeNode {
                                start_chrom_idx,
                                start_base,
                                end_chrom_idx,
                                end_base,
                                children: c,
                            }
                        })
                        .collect(),
                )
            })
            .collect()
    };

    (nodes, levels, total_sections)
}

const NODEHEADER_SIZE: u64 = 1 + 1 + 2;
const NON_LEAFNODE_SIZE: u64 = 4 + 4 + 4 + 4 + 8;
const LEAFNODE_SIZE: u64 = 4 + 4 + 4 + 4 + 8 + 8;

fn calculate_offsets(index_offsets: &mut Vec<u64>, nodes: &RTreeChildren, level: usize) {
    match nodes {
        RTreeChildren::DataSections(_) => (),
        RTreeChildren::Nodes(children) => {
            index_offsets[level - 1] += NODEHEADER_SIZE;
            for child in children {
                index_offsets[level - 1] += NON_LEAFNODE_SIZE;
                calculate_offsets(index_offsets, &child.children, level - 1);
            }
        }
    }
}

fn write_tree<W: Write>(
    file: &mut W,
    nodes: &RTreeChildren,
    curr_level: usize,
    dest_level: usize,
    childnode_offset: u64,
    options: BBIWriteOptions,
) -> io::Result<u64> {
    let non_leafnode_full_block_size: u64 =
        NODEHEADER_SIZE + NON_LEAFNODE_SIZE * u64::from(options.block_size);
    let leafnode_full_block_size: u64 =
        NODEHEADER_SIZE + LEAFNODE_SIZE * u64::from(options.block_size);
    debug_assert!(curr_level >= dest_level);
    if curr_level != dest_level {
        let mut next_offset_offset = 0;
        match nodes {
            RTreeChildren::DataSections(_) => {
                unreachable!("only nodes are expected above the leaf level")
            }
            RTreeChildren::Nodes(children) => {
                for child in children {
                    let size = write_tree(
                        file,
                        &child.children,
                        curr_level - 1,
                        dest_level,
                        childnode_offset + next_offset_offset,
                        options,
                    )?;
                    next_offset_offset += size;
                }
            }
        }
        return Ok(next_offset_offset);
    }

    match &nodes {
        RTreeChildren::DataSections(sections) => {
            file.write_u8(1)?;
            file.write_u8(0)?;
            file.write_u16::<LittleEndian>(sections.len() as u16)?;
            for section in sections {
                file.write_u32::<LittleEndian>(section.chrom)?;
                file.write_u32::<LittleEndian>(section.start)?;
                file.write_u32::<LittleEndian>(section.chrom)?;
                file.write_u32::<LittleEndian>(section.end)?;
                file.write_u64::<LittleEndian>(section.offset)?;
                file.write_u64::<LittleEndian>(section.size)?;
            }
            Ok(4 + sections.len() as u64 * 32)
        }
        RTreeChildren::Nodes(children) => {
            file.write_u8(0)?;
            file.write_u8(0)?;
            file.write_u16::<LittleEndian>(children.len() as u16)?;
            let full_size = if (curr_level - 1) > 0 {
                non_leafnode_full_block_size
            } else {
                leafnode_full_block_size
            };
            for (idx, child) in children.iter().enumerate() {
                let child_offset: u64 = childnode_offset + idx as u64 * full_size;
                file.write_u32::<LittleEndian>(child.start_chrom_idx)?;
                file.write_u32::<LittleEndian>(child.start_base)?;
                file.write_u32::<LittleEndian>(child.end_chrom_idx)?;
                file.write_u32::<LittleEndian>(child.end_base)?;
                file.write_u64::<LittleEndian>(child_offset)?;
            }
            Ok(children.len() as u64 * full_size)
        }
    }
}

pub(crate) fn write_rtreeindex<W: Write + Seek>(
    file: &mut BufWriter<W>,
    nodes: RTreeChildren,
    levels: usize,
    section_count: u64,
    options: BBIWriteOptions,
) -> io::Result<()> {
    let mut index_offsets: Vec<u64> = vec![0u64; levels];

    calculate_offsets(&mut index_offsets, &nodes, levels);

    let ((start_chrom_idx, start_base), (end_chrom_idx, end_base)) = node_bounds(&nodes);

    let end_of_data = file.tell()?;
    file.write_u32::<LittleEndian>(CIR_TREE_MAGIC)?;
    file.write_u32::<LittleEndian>(options.block_size)?;
    file.write_u64::<LittleEndian>(section_count)?;
    file.write_u32::<LittleEndian>(start_chrom_idx)?;
    file.write_u32::<LittleEndian>(start_base)?;
    file.write_u32::<LittleEndian>(end_chrom_idx)?;
    file.write_u32::<LittleEndian>(end_base)?;
    file.write_u64::<LittleEndian>(end_of_data)?;
    file.write_u32::<LittleEndian>(options.items_per_slot)?;
    file.write_u32::<LittleEndian>(0)?;

    let mut next_offset = file.tell()?;
    for level in (0..=levels).rev() {
        if level > 0 {
            next_offset += index_offsets[level - 1];
        }
        write_tree(file, &nodes, levels, level, next_offset, options)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(chrom: u32, start: u32, end: u32) -> Section {
        Section {
            chrom,
            start,
            end,
            offset: 0,
            size: 0,
        }
    }

    #[test]
    fn rtree_levels_grow_with_sections() {
        let options = BBIWriteOptions {
            block_size: 2,
            ..Default::default()
        };
        let sections: Vec<Section> = (0..5).map(|i| section(0, i * 10, i * 10 + 5)).collect();
        let (nodes, levels, total) = get_rtreeindex(sections.into_iter(), options);
        assert_eq!(total, 5);
        assert_eq!(levels, 2);
        assert!(matches!(nodes, RTreeChildren::Nodes(_)));
    }

    #[test]
    fn rtree_bounds_take_the_largest_end() {
        let options = BBIWriteOptions {
            block_size: 2,
            ..Default::default()
        };
        // The first section reaches past everything that follows
        let sections = vec![section(0, 0, 10_000), section(0, 5, 20), section(0, 9, 40)];
        let (nodes, _, _) = get_rtreeindex(sections.into_iter(), options);
        let ((_, start), (_, end)) = node_bounds(&nodes);
        assert_eq!(start, 0);
        assert_eq!(end, 10_000);
    }

    #[test]
    fn rtree_bounds_span_chromosomes() {
        let options = BBIWriteOptions {
            block_size: 2,
            ..Default::default()
        };
        let sections = vec![section(0, 100, 10_000), section(1, 0, 50), section(2, 5, 40)];
        let (nodes, _, _) = get_rtreeindex(sections.into_iter(), options);
        let ((start_chrom, start), (end_chrom, end)) = node_bounds(&nodes);
        assert_eq!((start_chrom, start), (0, 100));
        assert_eq!((end_chrom, end), (2, 40));
    }

    #[test]
    fn empty_input_builds_an_empty_leaf() {
        let (nodes, levels, total) = get_rtreeindex(std::iter::empty(), Default::default());
        assert_eq!(levels, 0);
        assert_eq!(total, 0);
        match nodes {
            RTreeChildren::DataSections(s) => assert!(s.is_empty()),
            RTreeChildren::Nodes(_) => panic!("expected an empty leaf"),
        }
    }
}
