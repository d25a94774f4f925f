use std::path::Path;

use log::{info, warn};

use crate::error::Result;
use crate::record::TransactionRecord;

/// Column order of the timeline CSV. Field escaping and file I/O are the
/// `csv` crate's job; this module only fixes the layout.
pub const CSV_COLUMNS: [&str; 17] = [
    "relative_time",
    "transaction_seq",
    "block_type",
    "fs_block_num",
    "operation_type",
    "affected_inode",
    "file_path",
    "data_size",
    "checksum",
    "file_type",
    "file_size",
    "inode_number",
    "link_count",
    "filename",
    "parent_dir_inode",
    "change_type",
    "full_path",
];

pub struct CsvExporter;

impl CsvExporter {
    /// Write all records to `output_path`, creating or overwriting it.
    /// Returns the number of data rows written.
    pub fn export(
        records: &[TransactionRecord],
        output_path: &str,
        include_header: bool,
    ) -> Result<usize> {
        if !has_csv_extension(output_path) {
            warn!("Output file '{}' does not have a .csv extension", output_path);
        }

        let mut writer = csv::Writer::from_path(output_path)?;
        if include_header {
            writer.write_record(CSV_COLUMNS)?;
        }

        for record in records {
            writer.write_record(row_fields(record))?;
        }
        writer.flush().map_err(csv::Error::from)?;

        info!(
            "Exported {} journal records to {}",
            records.len(),
            output_path
        );
        Ok(records.len())
    }
}

fn row_fields(record: &TransactionRecord) -> [String; 17] {
    [
        record.relative_time.clone(),
        record.sequence.to_string(),
        record.block_class.as_str().to_string(),
        record.fs_block_num.to_string(),
        record.operation_type.clone(),
        record.affected_inode.to_string(),
        record.file_path.clone(),
        record.data_size.to_string(),
        record.checksum.clone(),
        record.file_type.clone(),
        record.file_size.to_string(),
        record.inode_number.to_string(),
        record.link_count.to_string(),
        record.filename.clone(),
        record.parent_dir_inode.to_string(),
        record.change_type.clone(),
        record.full_path.clone(),
    ]
}

fn has_csv_extension(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("csv"))
        .unwrap_or(false)
}
