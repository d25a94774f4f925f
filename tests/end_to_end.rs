use std::io::Write;

use exhume_journal::csv_export::{CsvExporter, CSV_COLUMNS};
use exhume_journal::image::{ImageFormat, ImageReader};
use exhume_journal::summary::JournalMode;
use exhume_journal::{analyze, AnalyzeOptions};

const BLOCK: usize = 4096;
const JBD2_MAGIC: u32 = 0xC03B_3998;

fn journal_header(block_type: u32, sequence: u32) -> [u8; 12] {
    let mut raw = [0u8; 12];
    raw[0..4].copy_from_slice(&JBD2_MAGIC.to_be_bytes());
    raw[4..8].copy_from_slice(&block_type.to_be_bytes());
    raw[8..12].copy_from_slice(&sequence.to_be_bytes());
    raw
}

fn descriptor_block(sequence: u32, fs_blocks: &[u32]) -> Vec<u8> {
    let mut block = vec![0u8; BLOCK];
    block[0..12].copy_from_slice(&journal_header(1, sequence));
    let mut pos = 12;
    for &fs_block in fs_blocks {
        block[pos..pos + 4].copy_from_slice(&fs_block.to_be_bytes());
        block[pos + 4..pos + 8].copy_from_slice(&0u32.to_be_bytes());
        pos += 8;
    }
    block
}

fn commit_block(sequence: u32) -> Vec<u8> {
    let mut block = vec![0u8; BLOCK];
    block[0..12].copy_from_slice(&journal_header(2, sequence));
    block
}

fn directory_payload(entries: &[(u32, u8, &[u8])]) -> Vec<u8> {
    let mut block = Vec::new();
    let mut push = |inode: u32, rec_len: u16, ftype: u8, name: &[u8]| {
        block.extend_from_slice(&inode.to_le_bytes());
        block.extend_from_slice(&rec_len.to_le_bytes());
        block.push(name.len() as u8);
        block.push(ftype);
        block.extend_from_slice(name);
        block.extend(std::iter::repeat(0u8).take(rec_len as usize - 8 - name.len()));
    };
    push(2, 12, 2, b".");
    push(2, 12, 2, b"..");
    for &(inode, ftype, name) in entries {
        let rec_len = ((8 + name.len() + 7) & !7) as u16;
        push(inode, rec_len, ftype, name);
    }
    block.resize(BLOCK, 0);
    block
}

/// A minimal EXT image whose journal inode (inode 8) points directly at the
/// given journal blocks: superblock at 1024, group descriptor table in
/// block 1, inode table in block 2, journal starting at block 4.
fn build_image(journal_blocks: &[Vec<u8>]) -> Vec<u8> {
    let mut image = vec![0u8; 4 * BLOCK];

    let sb = 1024;
    image[sb + 0x18..sb + 0x1C].copy_from_slice(&2u32.to_le_bytes()); // 4 KiB blocks
    image[sb + 0x28..sb + 0x2C].copy_from_slice(&128u32.to_le_bytes()); // inodes per group
    image[sb + 0x38..sb + 0x3A].copy_from_slice(&0xEF53u16.to_le_bytes()); // magic
    image[sb + 0x58..sb + 0x5A].copy_from_slice(&128u16.to_le_bytes()); // inode size
    image[sb + 0x5C..sb + 0x60].copy_from_slice(&0x0004u32.to_le_bytes()); // HAS_JOURNAL

    // First group descriptor: inode table at block 2.
    image[BLOCK + 8..BLOCK + 12].copy_from_slice(&2u32.to_le_bytes());

    // Journal inode: regular file, direct pointer to block 4.
    let inode = 2 * BLOCK + 7 * 128;
    image[inode..inode + 2].copy_from_slice(&0x8180u16.to_le_bytes());
    image[inode + 0x04..inode + 0x08]
        .copy_from_slice(&((journal_blocks.len() * BLOCK) as u32).to_le_bytes());
    image[inode + 0x1A..inode + 0x1C].copy_from_slice(&1u16.to_le_bytes());
    image[inode + 0x28..inode + 0x2C].copy_from_slice(&4u32.to_le_bytes());

    for block in journal_blocks {
        image.extend_from_slice(block);
    }
    image
}

fn write_image(content: &[u8]) -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("evidence.dd");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content).unwrap();
    (dir, path.to_string_lossy().to_string())
}

#[test]
fn minimal_journal_produces_three_records() {
    let image = build_image(&[
        descriptor_block(100, &[42]),
        vec![0u8; BLOCK],
        commit_block(100),
    ]);
    let (_dir, path) = write_image(&image);

    let mut reader = ImageReader::open(&path, ImageFormat::Auto).unwrap();
    let report = analyze(&mut reader, &AnalyzeOptions::default()).unwrap();

    assert_eq!(report.records.len(), 3);
    let kinds: Vec<_> = report
        .records
        .iter()
        .map(|r| r.block_class.as_str())
        .collect();
    assert_eq!(kinds, vec!["descriptor", "commit", "data"]);
    assert!(report.records.iter().all(|r| r.sequence == 100));
    assert!(report.records.iter().all(|r| r.relative_time == "T+0"));

    let data = &report.records[2];
    assert_eq!(data.fs_block_num, 42);
    assert_eq!(data.file_type, "file_data");
    assert_eq!(data.operation_type, "file_data_update");

    assert_eq!(report.summary.transactions_opened, 1);
    assert_eq!(report.summary.transactions_closed, 1);
    // A lone file-data block outnumbers half the descriptors.
    assert_eq!(report.summary.journal_mode, JournalMode::Journal);
}

#[test]
fn csv_round_trips_the_record_stream() {
    let image = build_image(&[
        descriptor_block(7, &[13]),
        directory_payload(&[(12, 1, b"readme.txt")]),
        commit_block(7),
    ]);
    let (dir, path) = write_image(&image);

    let mut reader = ImageReader::open(&path, ImageFormat::Raw).unwrap();
    let report = analyze(&mut reader, &AnalyzeOptions::default()).unwrap();

    let csv_path = dir.path().join("out.csv");
    CsvExporter::export(&report.records, csv_path.to_str().unwrap(), true).unwrap();

    let mut rdr = csv::Reader::from_path(&csv_path).unwrap();
    assert_eq!(
        rdr.headers().unwrap().iter().collect::<Vec<_>>(),
        CSV_COLUMNS.to_vec()
    );
    let rows: Vec<csv::StringRecord> = rdr.records().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), 3);

    let data_row = rows
        .iter()
        .find(|row| &row[2] == "data")
        .expect("data row present");
    assert_eq!(&data_row[4], "file_created");
    assert_eq!(&data_row[13], "readme.txt");
    assert_eq!(&data_row[16], "/readme.txt");
}

#[test]
fn partition_offset_shifts_are_transparent() {
    let journal = [
        descriptor_block(5, &[9]),
        directory_payload(&[(30, 2, b"logs")]),
        commit_block(5),
    ];
    let baseline_image = build_image(&journal);

    const SHIFT: usize = 16 * 512; // 16 sectors
    let mut shifted_image = vec![0xEEu8; SHIFT];
    shifted_image.extend_from_slice(&baseline_image);

    let (_dir_a, path_a) = write_image(&baseline_image);
    let (_dir_b, path_b) = write_image(&shifted_image);

    let mut reader_a = ImageReader::open(&path_a, ImageFormat::Raw).unwrap();
    let report_a = analyze(&mut reader_a, &AnalyzeOptions::default()).unwrap();

    let mut reader_b = ImageReader::open(&path_b, ImageFormat::Raw).unwrap();
    reader_b.set_partition_offset(SHIFT as i64);
    let report_b = analyze(&mut reader_b, &AnalyzeOptions::default()).unwrap();

    let csv_a = tempfile::NamedTempFile::with_suffix(".csv").unwrap();
    let csv_b = tempfile::NamedTempFile::with_suffix(".csv").unwrap();
    CsvExporter::export(&report_a.records, csv_a.path().to_str().unwrap(), true).unwrap();
    CsvExporter::export(&report_b.records, csv_b.path().to_str().unwrap(), true).unwrap();

    let bytes_a = std::fs::read(csv_a.path()).unwrap();
    let bytes_b = std::fs::read(csv_b.path()).unwrap();
    assert_eq!(bytes_a, bytes_b);
}

#[test]
fn sequence_window_is_inclusive() {
    let image = build_image(&[
        descriptor_block(10, &[1]),
        vec![0u8; BLOCK],
        commit_block(10),
        descriptor_block(11, &[2]),
        vec![0u8; BLOCK],
        commit_block(11),
        descriptor_block(12, &[3]),
        vec![0u8; BLOCK],
        commit_block(12),
    ]);
    let (_dir, path) = write_image(&image);

    let mut reader = ImageReader::open(&path, ImageFormat::Raw).unwrap();
    let options = AnalyzeOptions {
        start_seq: Some(11),
        end_seq: Some(11),
        ..Default::default()
    };
    let report = analyze(&mut reader, &options).unwrap();
    assert!(!report.records.is_empty());
    assert!(report.records.iter().all(|r| r.sequence == 11));
}

#[test]
fn manual_journal_offset_bypasses_discovery() {
    // No EXT superblock at all: just journal blocks at a known offset.
    let mut image = vec![0u8; 2 * BLOCK];
    image.extend_from_slice(&descriptor_block(3, &[5]));
    image.extend_from_slice(&vec![0u8; BLOCK]);
    image.extend_from_slice(&commit_block(3));
    let (_dir, path) = write_image(&image);

    let mut reader = ImageReader::open(&path, ImageFormat::Raw).unwrap();
    let options = AnalyzeOptions {
        journal_offset: Some(2 * BLOCK as u64),
        journal_size: Some(3 * BLOCK as u64),
        ..Default::default()
    };
    let report = analyze(&mut reader, &options).unwrap();
    assert_eq!(report.records.len(), 3);

    // Discovery without the manual offset must fail on this image.
    let mut reader = ImageReader::open(&path, ImageFormat::Raw).unwrap();
    assert!(analyze(&mut reader, &AnalyzeOptions::default()).is_err());
}

#[test]
fn inode_table_payload_is_decoded() {
    let mut inode_block = Vec::new();
    for (mode, links) in [(0x81A4u16, 1u16), (0x41EDu16, 2u16)] {
        let mut raw = vec![0u8; 128];
        raw[0x00..0x02].copy_from_slice(&mode.to_le_bytes());
        raw[0x04..0x08].copy_from_slice(&512u32.to_le_bytes());
        raw[0x1A..0x1C].copy_from_slice(&links.to_le_bytes());
        inode_block.extend_from_slice(&raw);
    }
    inode_block.resize(BLOCK, 0);

    let image = build_image(&[
        descriptor_block(20, &[77]),
        inode_block,
        commit_block(20),
    ]);
    let (_dir, path) = write_image(&image);

    let mut reader = ImageReader::open(&path, ImageFormat::Raw).unwrap();
    let report = analyze(&mut reader, &AnalyzeOptions::default()).unwrap();

    let data = report
        .records
        .iter()
        .find(|r| r.block_class.as_str() == "data")
        .unwrap();
    assert_eq!(data.operation_type, "inode_batch_update");
    assert_eq!(data.file_type, "regular_file");
    assert_eq!(data.inode_number, 1);
    assert_eq!(data.file_size, 512);
    assert_eq!(report.summary.inode_table_blocks, 1);
    assert_eq!(report.summary.journal_mode, JournalMode::Ordered);
}
