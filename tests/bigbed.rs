use std::collections::HashMap;
use std::io::Cursor;

use bigbed::bed::record::{BedRecord, Strand};
use bigbed::{BBIReadError, BBIWriteOptions, BigBedOpenError, BigBedRead, BigBedWrite};

fn rec(chrom: &str, first: u32, last: u32) -> BedRecord {
    BedRecord::new(chrom, first, last)
}

fn write_with(
    records: &[BedRecord],
    chrom_sizes: &HashMap<String, u32>,
    options: BBIWriteOptions,
) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    let writer = BigBedWrite { options };
    writer
        .write(&mut out, records, chrom_sizes)
        .expect("write failed");
    out.into_inner()
}

fn write_default(records: &[BedRecord]) -> Vec<u8> {
    write_with(records, &HashMap::new(), BBIWriteOptions::default())
}

fn collect(
    reader: &mut BigBedRead<Cursor<Vec<u8>>>,
    chrom: &str,
    first: u32,
    last: u32,
) -> Vec<BedRecord> {
    reader
        .get_interval(chrom, first, last)
        .expect("query failed")
        .collect::<Result<Vec<_>, _>>()
        .expect("iteration failed")
}

#[test]
fn single_interval_round_trip() {
    let mut record = rec("chr1", 10, 20);
    record.name = Some("feat".to_string());
    record.score = Some(0);
    record.strand = Some(Strand::Forward);

    let buf = write_default(&[record.clone()]);
    let mut reader = BigBedRead::open(Cursor::new(buf)).unwrap();

    let chrom = reader.resolve("chr1").unwrap();
    assert_eq!(chrom.id, 0);
    assert_eq!(chrom.length, 20);

    assert_eq!(collect(&mut reader, "chr1", 1, 100), vec![record]);
    assert_eq!(collect(&mut reader, "chr1", 21, 100), vec![]);
    assert_eq!(collect(&mut reader, "chr1", 1, 9), vec![]);

    let err = reader.get_interval("chr2", 1, 100).err().unwrap();
    assert!(matches!(err, BBIReadError::ChromosomeNotFound(name) if name == "chr2"));
}

#[test]
fn overlapping_intervals_filter_exactly() {
    let a = rec("chr1", 1, 10);
    let b = rec("chr1", 5, 15);
    let buf = write_default(&[a.clone(), b.clone()]);
    let mut reader = BigBedRead::open(Cursor::new(buf)).unwrap();

    assert_eq!(collect(&mut reader, "chr1", 6, 7), vec![a.clone(), b.clone()]);
    assert_eq!(collect(&mut reader, "chr1", 11, 15), vec![b.clone()]);
    assert_eq!(collect(&mut reader, "chr1", 1, 4), vec![a]);
}

#[test]
fn chromosome_ids_follow_name_order() {
    // Lexicographic order differs from the numeric one
    let records = vec![rec("chr1", 1, 5), rec("chr10", 2, 6), rec("chr2", 3, 7)];
    let buf = write_default(&records);
    let mut reader = BigBedRead::open(Cursor::new(buf)).unwrap();

    assert_eq!(reader.resolve("chr1").unwrap().id, 0);
    assert_eq!(reader.resolve("chr10").unwrap().id, 1);
    assert_eq!(reader.resolve("chr2").unwrap().id, 2);

    // Lookup results do not depend on query order
    assert_eq!(reader.resolve("chr10").unwrap().id, 1);
    assert!(reader.resolve("chr3").is_err());

    assert_eq!(collect(&mut reader, "chr10", 1, 100), records[1..2].to_vec());
    assert_eq!(collect(&mut reader, "chr2", 1, 100), records[2..3].to_vec());

    let chroms = reader.chroms().unwrap();
    let names: Vec<&str> = chroms.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["chr1", "chr10", "chr2"]);
}

#[test]
fn point_query_over_many_blocks() {
    let records: Vec<BedRecord> = (0..10_000u32)
        .map(|i| rec("chr1", i * 10 + 1, i * 10 + 10))
        .collect();
    let buf = write_with(
        &records,
        &HashMap::new(),
        BBIWriteOptions {
            items_per_slot: 512,
            block_size: 256,
            ..Default::default()
        },
    );
    let mut reader = BigBedRead::open(Cursor::new(buf)).unwrap();

    // A point in the middle hits exactly one record
    assert_eq!(collect(&mut reader, "chr1", 50_001, 50_001), vec![records[5_000].clone()]);

    // The whole chromosome comes back complete and start-sorted
    let all = collect(&mut reader, "chr1", 1, 100_000);
    assert_eq!(all, records);

    assert_eq!(reader.item_count().unwrap(), 10_000);
}

#[test]
fn all_optional_fields_round_trip() {
    let mut record = rec("chr3", 100, 200);
    record.name = Some("tx1".to_string());
    record.score = Some(1000);
    record.strand = Some(Strand::Reverse);
    record.thick_first = Some(120);
    record.thick_last = Some(180);
    record.item_rgb = Some((255, 128, 0));
    record.block_count = Some(2);
    record.block_sizes = Some(vec![10, 20]);
    record.block_starts = Some(vec![0, 80]);

    let buf = write_default(&[record.clone()]);
    let mut reader = BigBedRead::open(Cursor::new(buf)).unwrap();
    assert_eq!(collect(&mut reader, "chr3", 1, 1000), vec![record]);
    assert_eq!(reader.info().header.field_count, 12);
}

#[test]
fn invalid_magic_is_rejected() {
    let mut buf = write_default(&[rec("chr1", 1, 10)]);
    buf[0..4].fill(0);
    let err = BigBedRead::open(Cursor::new(buf)).err().unwrap();
    assert!(matches!(err, BigBedOpenError::InvalidMagic));
}

#[test]
fn chrom_tree_magic_checked_on_first_lookup() {
    let buf = write_default(&[rec("chr1", 1, 10)]);
    // The chromosome index begins right after the reserved header, zoom,
    // and summary regions
    let chrom_tree_offset = 64 + 10 * 24 + 40;
    let mut corrupted = buf.clone();
    corrupted[chrom_tree_offset..chrom_tree_offset + 4].fill(0);

    let mut reader = BigBedRead::open(Cursor::new(corrupted)).unwrap();
    let err = reader.resolve("chr1").err().unwrap();
    assert!(matches!(err, BBIReadError::InvalidMagic));
}

#[test]
fn old_versions_are_rejected() {
    let mut buf = write_default(&[rec("chr1", 1, 10)]);
    buf[4..6].copy_from_slice(&2u16.to_le_bytes());
    let err = BigBedRead::open(Cursor::new(buf)).err().unwrap();
    assert!(matches!(err, BigBedOpenError::UnsupportedVersion(2)));
}

#[test]
fn uncompressed_files_round_trip() {
    let records = vec![rec("chr1", 1, 10), rec("chr1", 5, 15)];
    let buf = write_with(
        &records,
        &HashMap::new(),
        BBIWriteOptions {
            compress: false,
            ..Default::default()
        },
    );
    // uncompress_buf_size doubles as the compression flag
    let flag = u32::from_le_bytes(buf[52..56].try_into().unwrap());
    assert_eq!(flag, 0);

    let mut reader = BigBedRead::open(Cursor::new(buf)).unwrap();
    assert_eq!(collect(&mut reader, "chr1", 1, 100), records);

    let compressed = write_default(&records);
    let flag = u32::from_le_bytes(compressed[52..56].try_into().unwrap());
    assert!(flag > 0);
}

#[test]
fn empty_input_produces_a_wellformed_file() {
    let buf = write_default(&[]);
    let mut reader = BigBedRead::open(Cursor::new(buf)).unwrap();
    assert_eq!(reader.item_count().unwrap(), 0);
    assert!(reader.chroms().unwrap().is_empty());
    let err = reader.resolve("chr1").err().unwrap();
    assert!(matches!(err, BBIReadError::ChromosomeNotFound(_)));
}

#[test]
fn chrom_sizes_without_records_still_resolve() {
    let mut chrom_sizes = HashMap::new();
    chrom_sizes.insert("chrM".to_string(), 16_571);
    chrom_sizes.insert("chr1".to_string(), 1_000);
    let records = vec![rec("chr1", 1, 10)];
    let buf = write_with(&records, &chrom_sizes, BBIWriteOptions::default());
    let mut reader = BigBedRead::open(Cursor::new(buf)).unwrap();

    let chrm = reader.resolve("chrM").unwrap();
    assert_eq!(chrm.length, 16_571);
    assert_eq!(chrm.id, 1);
    assert_eq!(collect(&mut reader, "chrM", 1, 16_571), vec![]);
    assert_eq!(collect(&mut reader, "chr1", 1, 1_000), records);
}

#[test]
fn deep_chromosome_tree_resolves_every_name() {
    // A tiny fan-out forces several B+-tree levels, and querying names that
    // fall strictly between internal separators exercises the descent rule.
    let names: Vec<String> = (0..60).step_by(2).map(|i| format!("c{:03}", i)).collect();
    let records: Vec<BedRecord> = names.iter().map(|n| rec(n, 1, 50)).collect();
    let buf = write_with(
        &records,
        &HashMap::new(),
        BBIWriteOptions {
            block_size: 4,
            ..Default::default()
        },
    );
    let mut reader = BigBedRead::open(Cursor::new(buf)).unwrap();

    for (id, name) in names.iter().enumerate() {
        let chrom = reader.resolve(name).unwrap();
        assert_eq!(chrom.id, id as u32, "wrong id for {}", name);
        assert_eq!(collect(&mut reader, name, 1, 50).len(), 1);
    }
    // Absent names: before the first key, between separators, after the
    // last key, and longer than the key width
    for absent in ["a999", "c001", "c013", "c031", "c999", "zzz", "c0130"] {
        assert!(
            matches!(
                reader.resolve(absent),
                Err(BBIReadError::ChromosomeNotFound(_))
            ),
            "{} should be absent",
            absent
        );
    }
}

#[test]
fn blocks_with_a_long_early_feature_are_not_pruned() {
    // The long feature lands in the first block; its block's bounding box
    // must still cover the far end so a late query finds it.
    let mut records = vec![rec("chr1", 1, 100_000)];
    records.extend((0..94u32).map(|i| rec("chr1", i * 10 + 2, i * 10 + 8)));
    records.sort_by_key(|r| r.first);
    let buf = write_with(
        &records,
        &HashMap::new(),
        BBIWriteOptions {
            items_per_slot: 10,
            block_size: 4,
            ..Default::default()
        },
    );
    let mut reader = BigBedRead::open(Cursor::new(buf)).unwrap();

    let hits = collect(&mut reader, "chr1", 99_500, 99_600);
    assert_eq!(hits, vec![rec("chr1", 1, 100_000)]);

    let all = collect(&mut reader, "chr1", 1, 100_000);
    assert_eq!(all.len(), records.len());
}

#[test]
fn identical_input_writes_identical_bytes() {
    let records = vec![rec("chr1", 1, 10), rec("chr1", 5, 15), rec("chr2", 2, 4)];
    let first = write_default(&records);
    let second = write_default(&records);
    assert_eq!(first, second);
}

#[test]
fn unsorted_input_is_rejected() {
    let unsorted_starts = vec![rec("chr1", 5, 10), rec("chr1", 1, 3)];
    assert!(BigBedWrite::new()
        .write(
            &mut Cursor::new(Vec::new()),
            &unsorted_starts,
            &HashMap::new()
        )
        .is_err());

    let unsorted_chroms = vec![rec("chrB", 1, 3), rec("chrA", 1, 3)];
    assert!(BigBedWrite::new()
        .write(
            &mut Cursor::new(Vec::new()),
            &unsorted_chroms,
            &HashMap::new()
        )
        .is_err());

    let zero_based = vec![rec("chr1", 0, 3)];
    assert!(BigBedWrite::new()
        .write(&mut Cursor::new(Vec::new()), &zero_based, &HashMap::new())
        .is_err());
}

#[test]
fn positional_field_gap_is_rejected_by_the_writer() {
    let mut record = rec("chr1", 1, 10);
    record.strand = Some(Strand::Forward); // but no name/score
    assert!(BigBedWrite::new()
        .write(&mut Cursor::new(Vec::new()), &[record], &HashMap::new())
        .is_err());
}

#[test]
fn malformed_block_record_surfaces_and_ends_the_block() {
    let mut record = rec("chr1", 1, 10);
    record.name = Some("n".to_string());
    record.score = Some(5);
    record.strand = Some(Strand::Forward);
    let mut buf = write_with(
        &[record],
        &HashMap::new(),
        BBIWriteOptions {
            compress: false,
            ..Default::default()
        },
    );

    // Corrupt the strand character inside the (uncompressed) data block
    let needle = b"n\t5\t+";
    let at = buf
        .windows(needle.len())
        .position(|w| w == needle)
        .expect("record text not found");
    buf[at + 4] = b'x';

    let mut reader = BigBedRead::open(Cursor::new(buf)).unwrap();
    let results: Vec<_> = reader.get_interval("chr1", 1, 100).unwrap().collect();
    assert_eq!(results.len(), 1);
    assert!(matches!(results[0], Err(BBIReadError::MalformedRecord(_))));
}

#[test]
fn summary_and_autosql_read_as_placeholders() {
    let buf = write_default(&[rec("chr1", 1, 10)]);
    let mut reader = BigBedRead::open(Cursor::new(buf)).unwrap();
    let summary = reader.summary().unwrap();
    assert_eq!(summary.bases_covered, 0);
    assert_eq!(reader.autosql().unwrap(), "");
    assert!(reader.info().zoom_headers.is_empty());
}

#[test]
fn trailing_magic_is_written() {
    let buf = write_default(&[rec("chr1", 1, 10)]);
    let tail = u32::from_le_bytes(buf[buf.len() - 4..].try_into().unwrap());
    assert_eq!(tail, 0x8789_F2EB);
}
