//! The external bed interval type and the record grammar used inside
//! bigBed data blocks.
//!
//! Inside a data block, a record is a 12-byte binary prefix (chromosome id,
//! start, end) followed by the familiar tab-separated bed columns and a
//! terminating NUL. The optional columns are positional: a present column
//! implies every earlier one is present too.

use std::fmt::{self, Write};

use thiserror::Error;

/// Strand of a bed feature.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Strand {
    /// `+`
    Forward,
    /// `-`
    Reverse,
    /// `.`
    Unstranded,
    /// `?`
    Unknown,
}

impl Strand {
    pub fn as_char(&self) -> char {
        match self {
            Strand::Forward => '+',
            Strand::Reverse => '-',
            Strand::Unstranded => '.',
            Strand::Unknown => '?',
        }
    }

    fn from_char(c: char) -> Option<Strand> {
        match c {
            '+' => Some(Strand::Forward),
            '-' => Some(Strand::Reverse),
            '.' => Some(Strand::Unstranded),
            '?' => Some(Strand::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_char(self.as_char())
    }
}

/// Errors encountered while decoding a record from a data block.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("record truncated before its terminating NUL")]
    Truncated,
    #[error("optional fields are not valid UTF-8")]
    InvalidUtf8,
    #[error("invalid {field}: `{value}`")]
    InvalidField { field: &'static str, value: String },
}

fn invalid(field: &'static str, value: &str) -> RecordError {
    RecordError::InvalidField {
        field,
        value: value.to_string(),
    }
}

const OPTIONAL_FIELDS: [&str; 9] = [
    "name",
    "score",
    "strand",
    "thickStart",
    "thickEnd",
    "itemRgb",
    "blockCount",
    "blockSizes",
    "blockStarts",
];

/// A single bed feature.
///
/// `first` and `last` are 1-based inclusive; on disk the feature is stored
/// 0-based half-open. `thick_first`/`thick_last` follow the same convention.
/// The remaining columns carry the standard bed12 meanings and are not
/// semantically validated.
#[derive(Clone, Debug, PartialEq)]
pub struct BedRecord {
    pub chrom: String,
    /// First base of the feature, 1-based inclusive.
    pub first: u32,
    /// Last base of the feature, 1-based inclusive.
    pub last: u32,
    pub name: Option<String>,
    pub score: Option<u32>,
    pub strand: Option<Strand>,
    pub thick_first: Option<u32>,
    pub thick_last: Option<u32>,
    pub item_rgb: Option<(u8, u8, u8)>,
    pub block_count: Option<u32>,
    pub block_sizes: Option<Vec<u32>>,
    pub block_starts: Option<Vec<u32>>,
}

impl BedRecord {
    /// Creates a record with no optional columns set.
    pub fn new(chrom: impl Into<String>, first: u32, last: u32) -> BedRecord {
        BedRecord {
            chrom: chrom.into(),
            first,
            last,
            name: None,
            score: None,
            strand: None,
            thick_first: None,
            thick_last: None,
            item_rgb: None,
            block_count: None,
            block_sizes: None,
            block_starts: None,
        }
    }

    fn present(&self) -> [bool; 9] {
        [
            self.name.is_some(),
            self.score.is_some(),
            self.strand.is_some(),
            self.thick_first.is_some(),
            self.thick_last.is_some(),
            self.item_rgb.is_some(),
            self.block_count.is_some(),
            self.block_sizes.is_some(),
            self.block_starts.is_some(),
        ]
    }

    /// Length of the contiguous prefix of set optional columns.
    pub(crate) fn contiguous_fields(&self) -> usize {
        self.present().iter().take_while(|&&p| p).count()
    }

    /// Number of optional columns to serialize, verifying that the set
    /// columns form a positional prefix.
    pub(crate) fn optional_field_count(&self) -> Result<usize, String> {
        let present = self.present();
        let n = present.iter().rposition(|&p| p).map_or(0, |i| i + 1);
        for i in 0..n {
            if !present[i] {
                return Err(format!(
                    "{} is set but {} is not; optional bed columns are positional",
                    OPTIONAL_FIELDS[n - 1],
                    OPTIONAL_FIELDS[i]
                ));
            }
        }
        Ok(n)
    }

    /// Appends the first `n` optional columns, each preceded by a tab.
    /// Callers pass an `n` no larger than the contiguous set prefix.
    pub(crate) fn append_rest(&self, out: &mut String, n: usize) {
        for i in 0..n {
            out.push('\t');
            match i {
                0 => out.push_str(self.name.as_deref().unwrap_or("")),
                1 => {
                    if let Some(score) = self.score {
                        let _ = write!(out, "{}", score);
                    }
                }
                2 => {
                    if let Some(strand) = self.strand {
                        out.push(strand.as_char());
                    }
                }
                3 => {
                    if let Some(thick_first) = self.thick_first {
                        let _ = write!(out, "{}", thick_first.saturating_sub(1));
                    }
                }
                4 => {
                    if let Some(thick_last) = self.thick_last {
                        let _ = write!(out, "{}", thick_last);
                    }
                }
                5 => {
                    if let Some((r, g, b)) = self.item_rgb {
                        let _ = write!(out, "{},{},{}", r, g, b);
                    }
                }
                6 => {
                    if let Some(block_count) = self.block_count {
                        let _ = write!(out, "{}", block_count);
                    }
                }
                7 => {
                    if let Some(sizes) = &self.block_sizes {
                        append_list(out, sizes);
                    }
                }
                8 => {
                    if let Some(starts) = &self.block_starts {
                        append_list(out, starts);
                    }
                }
                _ => unreachable!(),
            }
        }
    }
}

impl fmt::Display for BedRecord {
    /// Formats the record as a bed text line (0-based half-open, the bed
    /// text convention).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}",
            self.chrom,
            self.first.saturating_sub(1),
            self.last
        )?;
        let mut rest = String::new();
        self.append_rest(&mut rest, self.contiguous_fields());
        f.write_str(&rest)
    }
}

fn append_list(out: &mut String, values: &[u32]) {
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let _ = write!(out, "{}", v);
    }
}

/// One record decoded from a data block, still carrying its on-disk
/// chromosome id and 0-based half-open coordinates.
#[derive(Clone, Debug)]
pub(crate) struct RawBedRecord {
    pub(crate) chrom_id: u32,
    pub(crate) start: u32,
    pub(crate) end: u32,
    pub(crate) name: Option<String>,
    pub(crate) score: Option<u32>,
    pub(crate) strand: Option<Strand>,
    pub(crate) thick_first: Option<u32>,
    pub(crate) thick_last: Option<u32>,
    pub(crate) item_rgb: Option<(u8, u8, u8)>,
    pub(crate) block_count: Option<u32>,
    pub(crate) block_sizes: Option<Vec<u32>>,
    pub(crate) block_starts: Option<Vec<u32>>,
}

impl RawBedRecord {
    pub(crate) fn into_record(self, chrom: &str) -> BedRecord {
        BedRecord {
            chrom: chrom.to_owned(),
            first: self.start + 1,
            last: self.end,
            name: self.name,
            score: self.score,
            strand: self.strand,
            thick_first: self.thick_first,
            thick_last: self.thick_last,
            item_rgb: self.item_rgb,
            block_count: self.block_count,
            block_sizes: self.block_sizes,
            block_starts: self.block_starts,
        }
    }
}

/// Decodes the record starting at `*pos`, advancing past it on success.
/// Returns `None` once the buffer is exhausted.
pub(crate) fn next_record(data: &[u8], pos: &mut usize) -> Option<Result<RawBedRecord, RecordError>> {
    if *pos >= data.len() {
        return None;
    }
    Some(parse_record(data, pos))
}

fn parse_record(data: &[u8], pos: &mut usize) -> Result<RawBedRecord, RecordError> {
    let buf = &data[*pos..];
    if buf.len() < 13 {
        return Err(RecordError::Truncated);
    }
    let chrom_id = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    let start = u32::from_le_bytes(buf[4..8].try_into().unwrap());
    let end = u32::from_le_bytes(buf[8..12].try_into().unwrap());

    let tail = &buf[12..];
    let nul = tail
        .iter()
        .position(|&b| b == b'\0')
        .ok_or(RecordError::Truncated)?;
    let rest = std::str::from_utf8(&tail[..nul]).map_err(|_| RecordError::InvalidUtf8)?;

    let mut rec = RawBedRecord {
        chrom_id,
        start,
        end,
        name: None,
        score: None,
        strand: None,
        thick_first: None,
        thick_last: None,
        item_rgb: None,
        block_count: None,
        block_sizes: None,
        block_starts: None,
    };
    if !rest.is_empty() {
        for (i, field) in rest.split('\t').enumerate() {
            match i {
                0 => rec.name = Some(parse_name(field)?),
                1 => rec.score = Some(parse_u32(field, "score")?),
                2 => rec.strand = Some(parse_strand(field)?),
                // thickStart/thickEnd are 0-based half-open in the text, like
                // the record coordinates themselves
                3 => {
                    rec.thick_first = Some(
                        parse_u32(field, "thickStart")?
                            .checked_add(1)
                            .ok_or_else(|| invalid("thickStart", field))?,
                    )
                }
                4 => rec.thick_last = Some(parse_u32(field, "thickEnd")?),
                5 => rec.item_rgb = Some(parse_rgb(field)?),
                6 => rec.block_count = Some(parse_u32(field, "blockCount")?),
                7 => rec.block_sizes = Some(parse_u32_list(field, "blockSizes")?),
                8 => rec.block_starts = Some(parse_u32_list(field, "blockStarts")?),
                _ => return Err(invalid("record", rest)),
            }
        }
    }

    *pos += 12 + nul + 1;
    Ok(rec)
}

fn parse_u32(s: &str, field: &'static str) -> Result<u32, RecordError> {
    s.trim().parse().map_err(|_| invalid(field, s))
}

// A name is any printable ASCII run, possibly empty
fn parse_name(s: &str) -> Result<String, RecordError> {
    if s.bytes().all(|b| (0x20..=0x7e).contains(&b)) {
        Ok(s.to_string())
    } else {
        Err(invalid("name", s))
    }
}

fn parse_strand(s: &str) -> Result<Strand, RecordError> {
    let mut chars = s.trim().chars();
    match (chars.next().and_then(Strand::from_char), chars.next()) {
        (Some(strand), None) => Ok(strand),
        _ => Err(invalid("strand", s)),
    }
}

fn parse_rgb(s: &str) -> Result<(u8, u8, u8), RecordError> {
    let comp = |p: &str| p.trim().parse::<u8>().map_err(|_| invalid("itemRgb", s));
    let parts: Vec<&str> = s.split(',').collect();
    match parts.as_slice() {
        // A single value is a gray level
        [gray] => {
            let g = comp(gray)?;
            Ok((g, g, g))
        }
        [r, g, b] => Ok((comp(r)?, comp(g)?, comp(b)?)),
        _ => Err(invalid("itemRgb", s)),
    }
}

fn parse_u32_list(s: &str, field: &'static str) -> Result<Vec<u32>, RecordError> {
    let parts: Vec<&str> = s.split(',').collect();
    let mut out = Vec::new();
    for (i, part) in parts.iter().enumerate() {
        let part = part.trim();
        if part.is_empty() {
            // Only a trailing comma is conventional in bed block lists; an
            // empty segment anywhere else is a grammar violation
            if i == parts.len() - 1 && i > 0 {
                continue;
            }
            return Err(invalid(field, s));
        }
        out.push(part.parse().map_err(|_| invalid(field, s))?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_bytes(chrom_id: u32, start: u32, end: u32, rest: &str) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&chrom_id.to_le_bytes());
        bytes.extend_from_slice(&start.to_le_bytes());
        bytes.extend_from_slice(&end.to_le_bytes());
        bytes.extend_from_slice(rest.as_bytes());
        bytes.push(b'\0');
        bytes
    }

    #[test]
    fn parses_prefix_only() {
        let data = block_bytes(3, 9, 20, "");
        let mut pos = 0;
        let rec = next_record(&data, &mut pos).unwrap().unwrap();
        assert_eq!(rec.chrom_id, 3);
        assert_eq!(rec.start, 9);
        assert_eq!(rec.end, 20);
        assert_eq!(rec.name, None);
        assert_eq!(pos, data.len());
        assert!(next_record(&data, &mut pos).is_none());
    }

    #[test]
    fn parses_all_fields() {
        let data = block_bytes(0, 9, 20, "exon\t900\t-\t11\t18\t255,128,0\t2\t3,4,\t0,7");
        let mut pos = 0;
        let rec = next_record(&data, &mut pos).unwrap().unwrap();
        assert_eq!(rec.name.as_deref(), Some("exon"));
        assert_eq!(rec.score, Some(900));
        assert_eq!(rec.strand, Some(Strand::Reverse));
        assert_eq!(rec.thick_first, Some(12));
        assert_eq!(rec.thick_last, Some(18));
        assert_eq!(rec.item_rgb, Some((255, 128, 0)));
        assert_eq!(rec.block_count, Some(2));
        assert_eq!(rec.block_sizes, Some(vec![3, 4]));
        assert_eq!(rec.block_starts, Some(vec![0, 7]));
    }

    #[test]
    fn gray_item_rgb_expands() {
        let data = block_bytes(0, 0, 5, "x\t0\t.\t0\t5\t128");
        let mut pos = 0;
        let rec = next_record(&data, &mut pos).unwrap().unwrap();
        assert_eq!(rec.item_rgb, Some((128, 128, 128)));
    }

    #[test]
    fn item_rgb_allows_spaces_around_commas() {
        let data = block_bytes(0, 0, 5, "x\t0\t.\t0\t5\t255, 128 ,0");
        let mut pos = 0;
        let rec = next_record(&data, &mut pos).unwrap().unwrap();
        assert_eq!(rec.item_rgb, Some((255, 128, 0)));
    }

    #[test]
    fn rejects_non_printable_name() {
        let data = block_bytes(0, 0, 5, "a\x07b");
        let mut pos = 0;
        let err = next_record(&data, &mut pos).unwrap().unwrap_err();
        assert!(matches!(err, RecordError::InvalidField { field: "name", .. }));
    }

    #[test]
    fn rejects_thick_start_at_u32_max() {
        let data = block_bytes(0, 0, 5, "x\t0\t.\t4294967295");
        let mut pos = 0;
        let err = next_record(&data, &mut pos).unwrap().unwrap_err();
        assert!(matches!(
            err,
            RecordError::InvalidField {
                field: "thickStart",
                ..
            }
        ));
    }

    #[test]
    fn rejects_interior_empty_list_segments() {
        // A trailing comma is tolerated; embedded or leading empties are not
        for rest in [
            "x\t0\t.\t0\t5\t0\t2\t1,,3\t0,4",
            "x\t0\t.\t0\t5\t0\t2\t1,3\t,0,4",
        ] {
            let data = block_bytes(0, 0, 5, rest);
            let mut pos = 0;
            assert!(next_record(&data, &mut pos).unwrap().is_err(), "{}", rest);
        }
    }

    #[test]
    fn rejects_bad_strand() {
        let data = block_bytes(0, 0, 5, "x\t0\tx");
        let mut pos = 0;
        let err = next_record(&data, &mut pos).unwrap().unwrap_err();
        assert!(matches!(err, RecordError::InvalidField { field: "strand", .. }));
    }

    #[test]
    fn rejects_trailing_fields() {
        let data = block_bytes(0, 0, 5, "x\t0\t.\t0\t5\t0\t1\t5\t0\textra");
        let mut pos = 0;
        assert!(next_record(&data, &mut pos).unwrap().is_err());
    }

    #[test]
    fn rejects_missing_terminator() {
        let mut data = block_bytes(0, 0, 5, "x");
        data.pop();
        let mut pos = 0;
        let err = next_record(&data, &mut pos).unwrap().unwrap_err();
        assert!(matches!(err, RecordError::Truncated));
    }

    #[test]
    fn two_records_in_sequence() {
        let mut data = block_bytes(0, 0, 5, "a");
        data.extend_from_slice(&block_bytes(0, 5, 9, "b"));
        let mut pos = 0;
        let a = next_record(&data, &mut pos).unwrap().unwrap();
        let b = next_record(&data, &mut pos).unwrap().unwrap();
        assert_eq!(a.name.as_deref(), Some("a"));
        assert_eq!(b.name.as_deref(), Some("b"));
        assert!(next_record(&data, &mut pos).is_none());
    }

    #[test]
    fn serialization_round_trips() {
        let mut rec = BedRecord::new("chr7", 10, 20);
        rec.name = Some("feature".to_string());
        rec.score = Some(17);
        rec.strand = Some(Strand::Forward);
        rec.thick_first = Some(12);
        rec.thick_last = Some(19);
        rec.item_rgb = Some((1, 2, 3));

        let n = rec.optional_field_count().unwrap();
        assert_eq!(n, 6);
        let mut rest = String::new();
        rec.append_rest(&mut rest, n);
        assert_eq!(rest, "\tfeature\t17\t+\t11\t19\t1,2,3");

        let data = block_bytes(4, rec.first - 1, rec.last, &rest[1..]);
        let mut pos = 0;
        let parsed = next_record(&data, &mut pos).unwrap().unwrap();
        assert_eq!(parsed.into_record("chr7"), rec);
    }

    #[test]
    fn positional_gap_is_rejected() {
        let mut rec = BedRecord::new("chr1", 1, 2);
        rec.strand = Some(Strand::Forward);
        assert!(rec.optional_field_count().is_err());

        rec.name = Some(String::new());
        rec.score = Some(0);
        assert_eq!(rec.optional_field_count().unwrap(), 3);
    }
}
