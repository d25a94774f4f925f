use serde::Serialize;

use crate::journal::JOURNAL_BLOCK_SIZE;

/// Journal block class a record was emitted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockClass {
    Descriptor,
    Data,
    Commit,
    Revocation,
    Superblock,
}

impl BlockClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockClass::Descriptor => "descriptor",
            BlockClass::Data => "data",
            BlockClass::Commit => "commit",
            BlockClass::Revocation => "revocation",
            BlockClass::Superblock => "superblock",
        }
    }
}

/// Heuristic content class of a journaled data block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentClass {
    InodeTable,
    Directory,
    Metadata,
    FileData,
    Unknown,
}

impl ContentClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentClass::InodeTable => "inode_table",
            ContentClass::Directory => "directory",
            ContentClass::Metadata => "metadata",
            ContentClass::FileData => "file_data",
            ContentClass::Unknown => "unknown",
        }
    }
}

/// One row of the timeline CSV.
///
/// `relative_time` stays empty during the scan and is assigned in one pass
/// once the smallest sequence number of the run is known; nothing else is
/// mutated after emission.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionRecord {
    pub relative_time: String,
    pub sequence: u32,
    pub block_class: BlockClass,
    pub content_class: ContentClass,
    pub fs_block_num: u64,
    pub operation_type: String,
    pub affected_inode: u32,
    pub file_path: String,
    pub data_size: usize,
    pub checksum: String,
    pub file_type: String,
    pub file_size: u64,
    pub inode_number: u32,
    pub link_count: u16,
    pub filename: String,
    pub parent_dir_inode: u32,
    pub change_type: String,
    pub full_path: String,
}

impl TransactionRecord {
    /// Template for a control-block record (descriptor, commit, revocation,
    /// journal superblock).
    pub fn control(
        sequence: u32,
        block_class: BlockClass,
        operation_type: &str,
        file_type: &str,
        data_size: usize,
        checksum: String,
    ) -> Self {
        TransactionRecord {
            relative_time: String::new(),
            sequence,
            block_class,
            content_class: ContentClass::Unknown,
            fs_block_num: 0,
            operation_type: operation_type.to_string(),
            affected_inode: 0,
            file_path: String::new(),
            data_size,
            checksum,
            file_type: file_type.to_string(),
            file_size: 0,
            inode_number: 0,
            link_count: 0,
            filename: String::new(),
            parent_dir_inode: 0,
            change_type: String::new(),
            full_path: String::new(),
        }
    }

    /// Template for a data-block record; the classifier fills in the rest.
    pub fn data(sequence: u32, fs_block_num: u64, checksum: String) -> Self {
        TransactionRecord {
            relative_time: String::new(),
            sequence,
            block_class: BlockClass::Data,
            content_class: ContentClass::Unknown,
            fs_block_num,
            operation_type: "filesystem_update".to_string(),
            affected_inode: 0,
            file_path: String::new(),
            data_size: JOURNAL_BLOCK_SIZE,
            checksum,
            file_type: "unknown".to_string(),
            file_size: 0,
            inode_number: 0,
            link_count: 0,
            filename: String::new(),
            parent_dir_inode: 0,
            change_type: String::new(),
            full_path: String::new(),
        }
    }
}

/// Format the signed distance from the run's base sequence, e.g. `T+3`.
pub fn relative_time(sequence: u32, base: u32) -> String {
    let delta = sequence as i64 - base as i64;
    if delta < 0 {
        format!("T{}", delta)
    } else {
        format!("T+{}", delta)
    }
}
