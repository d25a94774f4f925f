use log::{debug, info, warn};
use serde::Serialize;

use crate::classify::{self, InodeStateMap};
use crate::dirtree::DirectoryTreeBuilder;
use crate::error::Result;
use crate::image::ImageReader;
use crate::journal::{
    block_fingerprint, parse_descriptor_tags, DescriptorTag, JournalBlockHeader, JournalBlockType,
    JOURNAL_BLOCK_SIZE, JOURNAL_HEADER_SIZE,
};
use crate::locator::JournalLocation;
use crate::record::{relative_time, BlockClass, TransactionRecord};

/// Sequence-number window applied while scanning.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScanOptions {
    pub start_seq: Option<u32>,
    pub end_seq: Option<u32>,
}

/// Scan-level diagnostics surfaced at the end of a run. Decode errors are
/// local skips, so they are counted here rather than propagated.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct ScanStats {
    pub blocks_scanned: usize,
    pub valid_headers: usize,
    pub read_failures: usize,
    pub data_read_failures: usize,
    pub strings_extracted: usize,
}

/// Pending descriptor batch: a transaction is open until its commit block
/// arrives.
struct PendingTransaction {
    sequence: u32,
    descriptor_offset: u64,
    tags: Vec<DescriptorTag>,
}

/// Streams 4 KiB blocks across the located journal range and frames them
/// into transactions. Working memory is two journal blocks: the block under
/// the cursor and, while flushing a commit, one prefetched data block.
pub struct JournalScanner<'a> {
    reader: &'a mut ImageReader,
    location: JournalLocation,
    tree: DirectoryTreeBuilder,
    inode_state: InodeStateMap,
    stats: ScanStats,
}

impl<'a> JournalScanner<'a> {
    pub fn new(reader: &'a mut ImageReader, location: JournalLocation) -> Self {
        JournalScanner {
            reader,
            location,
            tree: DirectoryTreeBuilder::new(),
            inode_state: InodeStateMap::new(),
            stats: ScanStats::default(),
        }
    }

    pub fn stats(&self) -> ScanStats {
        self.stats
    }

    pub fn tree(&self) -> &DirectoryTreeBuilder {
        &self.tree
    }

    pub fn into_tree(self) -> DirectoryTreeBuilder {
        self.tree
    }

    /// Walk the journal range and emit one record per interpreted block.
    /// Relative times are assigned in a final pass once the base sequence
    /// of the run is known.
    pub fn scan(&mut self, options: &ScanOptions) -> Result<Vec<TransactionRecord>> {
        let mut records: Vec<TransactionRecord> = Vec::new();
        let mut pending: Option<PendingTransaction> = None;

        let start = self.location.byte_offset;
        let end = start.saturating_add(self.location.byte_length);
        info!(
            "Parsing journal at offset {} with size {} bytes",
            start, self.location.byte_length
        );

        let mut offset = start;
        'blocks: while offset < end {
            self.stats.blocks_scanned += 1;
            let block = match self.reader.read_at(offset, JOURNAL_BLOCK_SIZE) {
                Ok(block) => block,
                Err(e) => {
                    debug!("Skipping unreadable journal block at {}: {}", offset, e);
                    self.stats.read_failures += 1;
                    offset += JOURNAL_BLOCK_SIZE as u64;
                    continue;
                }
            };

            let header = match JournalBlockHeader::from_bytes(&block) {
                Some(header) => header,
                None => {
                    offset += JOURNAL_BLOCK_SIZE as u64;
                    continue;
                }
            };
            self.stats.valid_headers += 1;

            if let Some(start_seq) = options.start_seq {
                if header.sequence < start_seq {
                    offset += JOURNAL_BLOCK_SIZE as u64;
                    continue;
                }
            }
            if let Some(end_seq) = options.end_seq {
                if header.sequence > end_seq {
                    debug!(
                        "Sequence {} above end filter {}, stopping scan",
                        header.sequence, end_seq
                    );
                    break 'blocks;
                }
            }

            match header.block_type {
                JournalBlockType::Descriptor => {
                    let tags = parse_descriptor_tags(&block[JOURNAL_HEADER_SIZE..]);
                    if pending.is_some() {
                        debug!(
                            "Descriptor seq {} supersedes an uncommitted batch",
                            header.sequence
                        );
                    }
                    records.push(TransactionRecord::control(
                        header.sequence,
                        BlockClass::Descriptor,
                        "transaction_start",
                        "transaction",
                        tags.len() * 8,
                        block_fingerprint(&block),
                    ));
                    pending = Some(PendingTransaction {
                        sequence: header.sequence,
                        descriptor_offset: offset,
                        tags,
                    });
                }

                JournalBlockType::Commit => {
                    records.push(TransactionRecord::control(
                        header.sequence,
                        BlockClass::Commit,
                        "transaction_end",
                        "transaction",
                        0,
                        block_fingerprint(&block),
                    ));
                    match pending.take() {
                        Some(batch) if batch.sequence == header.sequence => {
                            self.flush_committed(&batch, end, &mut records);
                        }
                        Some(batch) => {
                            warn!(
                                "Commit seq {} does not match open descriptor seq {}; \
                                 dropping {} data blocks",
                                header.sequence,
                                batch.sequence,
                                batch.tags.len()
                            );
                        }
                        None => {}
                    }
                }

                JournalBlockType::Revocation => {
                    records.push(TransactionRecord::control(
                        header.sequence,
                        BlockClass::Revocation,
                        "block_revocation",
                        "revocation",
                        JOURNAL_BLOCK_SIZE - JOURNAL_HEADER_SIZE,
                        block_fingerprint(&block),
                    ));
                }

                JournalBlockType::SuperblockV1 | JournalBlockType::SuperblockV2 => {
                    records.push(TransactionRecord::control(
                        header.sequence,
                        BlockClass::Superblock,
                        "journal_superblock",
                        "superblock",
                        JOURNAL_BLOCK_SIZE - JOURNAL_HEADER_SIZE,
                        block_fingerprint(&block),
                    ));
                }

                JournalBlockType::Unknown(raw) => {
                    debug!("Unknown journal block type {} at offset {}", raw, offset);
                }
            }

            offset += JOURNAL_BLOCK_SIZE as u64;
        }

        assign_relative_times(&mut records);
        info!(
            "Scanned {} blocks, {} valid headers, emitted {} records",
            self.stats.blocks_scanned,
            self.stats.valid_headers,
            records.len()
        );
        Ok(records)
    }

    /// Emit the data records of a committed transaction. Data blocks sit at
    /// `descriptor_offset + (1 + i) * 4096` for tag index `i`; deriving them
    /// from the commit offset would be off by the descriptor's own slot.
    fn flush_committed(
        &mut self,
        batch: &PendingTransaction,
        journal_end: u64,
        records: &mut Vec<TransactionRecord>,
    ) {
        for (index, tag) in batch.tags.iter().enumerate() {
            let data_offset =
                batch.descriptor_offset + (JOURNAL_BLOCK_SIZE as u64) * (1 + index as u64);

            let data_block = if data_offset + JOURNAL_BLOCK_SIZE as u64 <= journal_end {
                self.reader.read_at(data_offset, JOURNAL_BLOCK_SIZE).ok()
            } else {
                None
            };

            let mut record = match &data_block {
                Some(block) => TransactionRecord::data(
                    batch.sequence,
                    tag.fs_block_num as u64,
                    block_fingerprint(block),
                ),
                None => {
                    self.stats.data_read_failures += 1;
                    TransactionRecord::data(batch.sequence, tag.fs_block_num as u64, String::new())
                }
            };

            if let Some(block) = &data_block {
                let report = classify::classify_data_block(
                    block,
                    tag.fs_block_num as u64,
                    &mut self.tree,
                    &mut self.inode_state,
                );
                self.stats.strings_extracted += report.strings_found;
                if let Some(class) = report.content_class {
                    record.content_class = class;
                }
                record.operation_type = report.operation_type;
                record.file_type = report.file_type;
                record.file_size = report.file_size;
                record.inode_number = report.inode_number;
                record.affected_inode = report.affected_inode;
                record.link_count = report.link_count;
                record.filename = report.filename;
                record.parent_dir_inode = report.parent_dir_inode;
                record.change_type = report.change_type;
                record.file_path = report.file_path;
                record.full_path = report.full_path;
            }

            records.push(record);
        }
    }
}

/// Stamp every record with its distance from the smallest sequence seen.
fn assign_relative_times(records: &mut [TransactionRecord]) {
    let base = match records.iter().map(|r| r.sequence).min() {
        Some(base) => base,
        None => return,
    };
    for record in records.iter_mut() {
        record.relative_time = relative_time(record.sequence, base);
    }
}
