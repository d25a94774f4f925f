pub mod classify;
pub mod csv_export;
pub mod direntry;
pub mod dirtree;
pub mod error;
pub mod image;
pub mod inode;
pub mod journal;
pub mod locator;
pub mod record;
pub mod scanner;
pub mod summary;
pub mod superblock;

use log::{info, warn};

use crate::error::Result;
use crate::image::ImageReader;
use crate::journal::JOURNAL_BLOCK_SIZE;
use crate::locator::JournalLocator;
use crate::record::TransactionRecord;
use crate::scanner::{JournalScanner, ScanOptions, ScanStats};
use crate::summary::ForensicSummary;

/// Everything the CLI needs to drive one analysis pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnalyzeOptions {
    pub journal_offset: Option<u64>,
    pub journal_size: Option<u64>,
    pub start_seq: Option<u32>,
    pub end_seq: Option<u32>,
}

/// Result of a full journal walk: the record stream plus the roll-up.
#[derive(Debug)]
pub struct AnalysisReport {
    pub records: Vec<TransactionRecord>,
    pub summary: ForensicSummary,
    pub stats: ScanStats,
}

/// Locate the journal inside `reader`'s partition, decode its transactions
/// and roll the record stream up into a forensic summary.
pub fn analyze(reader: &mut ImageReader, options: &AnalyzeOptions) -> Result<AnalysisReport> {
    let location = JournalLocator::new(reader)
        .locate(options.journal_offset, options.journal_size)?;

    let estimated = location.byte_length / (JOURNAL_BLOCK_SIZE as u64 * 10);
    info!(
        "Journal spans {} bytes (~{} transactions at 10 blocks each)",
        location.byte_length, estimated
    );

    let scan_options = ScanOptions {
        start_seq: options.start_seq,
        end_seq: options.end_seq,
    };
    let mut scanner = JournalScanner::new(reader, location);
    let records = scanner.scan(&scan_options)?;
    if records.is_empty() {
        warn!("No journal transactions found");
    }

    let stats = scanner.stats();
    let summary = ForensicSummary::from_records(
        &records,
        stats.strings_extracted,
        scanner.tree().node_count(),
    );

    Ok(AnalysisReport {
        records,
        summary,
        stats,
    })
}
