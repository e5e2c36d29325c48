use std::cmp::{self, Ordering};
use std::collections::{BTreeMap, HashMap};
use std::io::{self, BufWriter, Seek, Write};

use byteorder::{LittleEndian, WriteBytesExt};
use libdeflater::{CompressionLvl, Compressor};

use crate::bbi::bbiwrite::{
    get_rtreeindex, write_blank_headers, write_chrom_tree, write_info, write_rtreeindex,
    BBIWriteError, BBIWriteOptions, Section,
};
use crate::bbi::BIGBED_MAGIC;
use crate::bed::record::BedRecord;
use crate::utils::file::Tell;

/// The struct used to write a bigBed file
pub struct BigBedWrite {
    pub options: BBIWriteOptions,
}

impl Default for BigBedWrite {
    fn default() -> Self {
        BigBedWrite::new()
    }
}

/// The data block currently being filled.
struct OpenSection {
    chrom: u32,
    count: u32,
    start: u32,
    end: u32,
}

impl BigBedWrite {
    pub fn new() -> BigBedWrite {
        BigBedWrite {
            options: BBIWriteOptions::default(),
        }
    }

    /// Writes `records` as a complete bigBed file to `out`.
    ///
    /// `records` must be sorted by chromosome name (byte order) and then by
    /// start; `sort -k1,1 -k2,2n` produces this order. `chrom_sizes` may
    /// list sizes for any chromosome; a chromosome without an entry gets the
    /// largest end seen in its records, and an entry without records is
    /// still included in the chromosome index. The stream is written in two
    /// passes: the data, then the header patched in place, so `out` must be
    /// seekable.
    pub fn write<W: Write + Seek>(
        &self,
        out: W,
        records: &[BedRecord],
        chrom_sizes: &HashMap<String, u32>,
    ) -> Result<(), BBIWriteError> {
        let options = self.options;
        if options.block_size < 2 || options.block_size > u16::MAX as u32 {
            return Err(BBIWriteError::InvalidInput(format!(
                "block_size must be between 2 and 65535, got {}",
                options.block_size
            )));
        }
        if options.items_per_slot == 0 {
            return Err(BBIWriteError::InvalidInput(
                "items_per_slot must be nonzero".to_string(),
            ));
        }

        // Every chromosome named in `chrom_sizes` or seen in the records;
        // sizes default to the largest end observed.
        let mut sizes: BTreeMap<&str, u32> = BTreeMap::new();
        for (name, size) in chrom_sizes {
            sizes.insert(name.as_str(), *size);
        }
        let mut max_ends: BTreeMap<&str, u32> = BTreeMap::new();
        let mut prev: Option<&BedRecord> = None;
        for rec in records {
            if rec.first == 0 {
                return Err(BBIWriteError::InvalidInput(format!(
                    "invalid bed record on {}: coordinates are 1-based",
                    rec.chrom
                )));
            }
            if rec.last < rec.first {
                return Err(BBIWriteError::InvalidInput(format!(
                    "invalid bed record on {}: {} > {}",
                    rec.chrom, rec.first, rec.last
                )));
            }
            if let Some(prev) = prev {
                let chrom_order = prev.chrom.as_str().cmp(rec.chrom.as_str());
                if chrom_order == Ordering::Greater
                    || (chrom_order == Ordering::Equal && prev.first > rec.first)
                {
                    return Err(BBIWriteError::InvalidInput(format!(
                        "input is not sorted at {}:{}-{}; sort by chromosome then start first",
                        rec.chrom, rec.first, rec.last
                    )));
                }
            }
            let max_end = max_ends.entry(rec.chrom.as_str()).or_insert(0);
            *max_end = cmp::max(*max_end, rec.last);
            prev = Some(rec);
        }
        for (name, end) in &max_ends {
            sizes.entry(name).or_insert(*end);
        }
        let chrom_list: Vec<(String, u32)> = sizes
            .iter()
            .map(|(name, size)| (name.to_string(), *size))
            .collect();
        let chrom_ids: HashMap<&str, u32> = chrom_list
            .iter()
            .enumerate()
            .map(|(id, (name, _))| (name.as_str(), id as u32))
            .collect();

        let mut file = BufWriter::new(out);

        write_blank_headers(&mut file)?;
        let total_summary_offset = file.tell()?;
        file.write_all(&[0; 40])?;

        let chrom_index_start = file.tell()?;
        write_chrom_tree(&mut file, &chrom_list, options.block_size)?;

        let full_data_offset = file.tell()?;
        // Record count, patched once everything is written
        file.write_u64::<LittleEndian>(0)?;

        let mut sections: Vec<Section> = Vec::new();
        let mut uncompress_buf_size: usize = 0;
        let mut max_rest_fields: usize = 0;

        let mut bytes: Vec<u8> = Vec::new();
        let mut rest = String::new();
        let mut current: Option<OpenSection> = None;

        for rec in records {
            let chrom_id = chrom_ids[rec.chrom.as_str()];
            let chrom_size = sizes[rec.chrom.as_str()];
            let start = rec.first - 1;
            let end = rec.last;
            if start >= chrom_size {
                return Err(BBIWriteError::InvalidInput(format!(
                    "invalid bed record: `{}` begins past the end of chromosome {} ({})",
                    rec.first, rec.chrom, chrom_size
                )));
            }

            let fields = rec
                .optional_field_count()
                .map_err(BBIWriteError::InvalidInput)?;
            max_rest_fields = cmp::max(max_rest_fields, fields);

            // Flush when the open block is full or the chromosome changes;
            // records are never split across blocks.
            let full = matches!(
                &current,
                Some(open) if open.chrom != chrom_id || open.count == options.items_per_slot
            );
            if full {
                if let Some(open) = current.take() {
                    flush_section(
                        &mut file,
                        options.compress,
                        &mut bytes,
                        open,
                        &mut sections,
                        &mut uncompress_buf_size,
                    )?;
                }
            }

            bytes.write_u32::<LittleEndian>(chrom_id)?;
            bytes.write_u32::<LittleEndian>(start)?;
            bytes.write_u32::<LittleEndian>(end)?;
            rest.clear();
            rec.append_rest(&mut rest, fields);
            bytes.extend_from_slice(rest.as_bytes());
            bytes.push(b'\0');

            match &mut current {
                Some(open) => {
                    open.count += 1;
                    open.end = cmp::max(open.end, end);
                }
                None => {
                    current = Some(OpenSection {
                        chrom: chrom_id,
                        count: 1,
                        start,
                        end,
                    })
                }
            }
        }
        if let Some(open) = current.take() {
            flush_section(
                &mut file,
                options.compress,
                &mut bytes,
                open,
                &mut sections,
                &mut uncompress_buf_size,
            )?;
        }

        let index_start = file.tell()?;
        let (nodes, levels, total_sections) = get_rtreeindex(sections.into_iter(), options);
        write_rtreeindex(&mut file, nodes, levels, total_sections, options)?;

        let field_count = (3 + max_rest_fields) as u16;
        write_info(
            &mut file,
            BIGBED_MAGIC,
            chrom_index_start,
            full_data_offset,
            index_start,
            field_count,
            field_count,
            total_summary_offset,
            uncompress_buf_size as u32,
            records.len() as u64,
        )?;
        file.flush()?;

        Ok(())
    }
}

/// Writes out the buffered block, raw or deflated, and records its bounding
/// box.
fn flush_section<W: Write + Seek>(
    file: &mut BufWriter<W>,
    compress: bool,
    bytes: &mut Vec<u8>,
    open: OpenSection,
    sections: &mut Vec<Section>,
    uncompress_buf_size: &mut usize,
) -> io::Result<()> {
    let offset = file.tell()?;
    let size = if compress {
        let mut compressor = Compressor::new(CompressionLvl::default());
        let max_sz = compressor.zlib_compress_bound(bytes.len());
        let mut compressed_data = vec![0; max_sz];
        let actual_sz = compressor
            .zlib_compress(bytes, &mut compressed_data)
            .map_err(|e| {
                io::Error::new(
                    io::ErrorKind::Other,
                    format!("failed to compress block: {:?}", e),
                )
            })?;
        compressed_data.truncate(actual_sz);
        file.write_all(&compressed_data)?;
        *uncompress_buf_size = cmp::max(*uncompress_buf_size, bytes.len());
        compressed_data.len() as u64
    } else {
        file.write_all(bytes)?;
        bytes.len() as u64
    };
    sections.push(Section {
        chrom: open.chrom,
        start: open.start,
        end: open.end,
        offset,
        size,
    });
    bytes.clear();
    Ok(())
}
