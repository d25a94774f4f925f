use std::collections::HashMap;

use log::debug;

use crate::direntry::{self, DirEntry, BINARY_NAME};
use crate::dirtree::DirectoryTreeBuilder;
use crate::inode::{mode_to_string, InodeRecord, EXT4_INODE_RECORD_SIZE};
use crate::record::ContentClass;

/// Inode numbers a directory entry can plausibly carry.
const MAX_PLAUSIBLE_INODE: u32 = 0x00FF_FFFF;
/// Word values below this look like block numbers to the metadata heuristic.
const MAX_PLAUSIBLE_WORD: u32 = 0x00FF_FFFF;

const MIN_STRING_LEN: usize = 3;
const MAX_STRINGS_PER_BLOCK: usize = 20;
const MAX_SAMPLE_STRINGS: usize = 3;
const MAX_SAMPLE_BYTES: usize = 200;

/// Links/dtime snapshot of inode slots already seen in this scan, used to
/// refine directory-entry operations.
pub type InodeStateMap = HashMap<u32, (u16, u32)>;

/// What the classifier learned about one journaled data block; the scanner
/// merges this into the pending `TransactionRecord`.
#[derive(Debug, Default)]
pub struct DataBlockReport {
    pub content_class: Option<ContentClass>,
    pub operation_type: String,
    pub file_type: String,
    pub file_size: u64,
    pub inode_number: u32,
    pub affected_inode: u32,
    pub link_count: u16,
    pub filename: String,
    pub parent_dir_inode: u32,
    pub change_type: String,
    pub file_path: String,
    pub full_path: String,
    pub strings_found: usize,
}

/// Heuristic identification of a journaled data block, in fixed order:
/// inode table, then directory, then metadata, then file data.
pub fn identify(data: &[u8]) -> ContentClass {
    if data.len() < 16 {
        return ContentClass::Unknown;
    }

    if count_valid_inode_slots(data) >= 2 {
        return ContentClass::InodeTable;
    }

    if looks_like_directory(data) {
        return ContentClass::Directory;
    }

    let plausible_words = count_plausible_words(data);
    if plausible_words > data.len() / 16 {
        return ContentClass::Metadata;
    }

    ContentClass::FileData
}

fn count_valid_inode_slots(data: &[u8]) -> usize {
    data.chunks_exact(EXT4_INODE_RECORD_SIZE)
        .filter(|chunk| InodeRecord::from_bytes(chunk).is_valid())
        .count()
}

fn looks_like_directory(data: &[u8]) -> bool {
    let inode = u32::from_le_bytes(data[0..4].try_into().unwrap());
    let rec_len = u16::from_le_bytes(data[4..6].try_into().unwrap()) as usize;
    let name_len = data[6] as usize;
    inode > 0 && inode < MAX_PLAUSIBLE_INODE && (8..=4096).contains(&rec_len) && name_len >= 1
}

fn count_plausible_words(data: &[u8]) -> usize {
    data.chunks_exact(4)
        .map(|chunk| u32::from_le_bytes(chunk.try_into().unwrap()))
        .filter(|&word| word != 0 && word < MAX_PLAUSIBLE_WORD)
        .count()
}

/// Decode the in-use inode slots of an inode-table block. Slot numbering is
/// journal-local (1-based position in the block): the journal copy alone
/// cannot recover block-group-absolute inode numbers.
pub fn decode_inode_table(data: &[u8]) -> Vec<(u32, InodeRecord)> {
    data.chunks_exact(EXT4_INODE_RECORD_SIZE)
        .enumerate()
        .filter_map(|(slot, chunk)| {
            let record = InodeRecord::from_bytes(chunk);
            if record.is_valid() {
                Some((slot as u32 + 1, record))
            } else {
                None
            }
        })
        .collect()
}

/// Classify one data block and extract its records, feeding every directory
/// observation into the namespace builder.
pub fn classify_data_block(
    data: &[u8],
    fs_block_num: u64,
    tree: &mut DirectoryTreeBuilder,
    inode_state: &mut InodeStateMap,
) -> DataBlockReport {
    let mut report = DataBlockReport::default();
    let class = identify(data);
    report.content_class = Some(class);

    match class {
        ContentClass::InodeTable => decode_inodes_into(data, tree, inode_state, &mut report),
        ContentClass::Directory => decode_directory_into(data, tree, inode_state, &mut report),
        ContentClass::Metadata => {
            report.operation_type = "metadata_update".to_string();
            report.file_type = "metadata".to_string();
            report.full_path = format!("/metadata_block_{}", fs_block_num);
        }
        ContentClass::FileData => analyze_file_data_into(data, &mut report),
        ContentClass::Unknown => {
            report.operation_type = "filesystem_update".to_string();
            report.file_type = "unknown".to_string();
        }
    }

    report
}

fn decode_inodes_into(
    data: &[u8],
    tree: &mut DirectoryTreeBuilder,
    inode_state: &mut InodeStateMap,
    report: &mut DataBlockReport,
) {
    let inodes = decode_inode_table(data);
    debug!("inode-table block: {} in-use slots", inodes.len());

    for (number, record) in &inodes {
        debug!(
            "  slot {}: {} links={} size={}",
            number,
            mode_to_string(record.mode()),
            record.i_links_count,
            record.size()
        );
        inode_state.insert(*number, (record.i_links_count, record.i_dtime));
        tree.add_inode_info(*number, record);
    }

    report.operation_type = if inodes.len() > 1 {
        "inode_batch_update".to_string()
    } else {
        "inode_update".to_string()
    };

    if let Some((number, first)) = inodes.first() {
        report.file_type = first.file_type().to_string();
        report.file_size = first.size();
        report.inode_number = *number;
        report.affected_inode = *number;
        report.link_count = first.i_links_count;
        report.full_path = tree.build_full_path(*number);
    }
}

fn decode_directory_into(
    data: &[u8],
    tree: &mut DirectoryTreeBuilder,
    inode_state: &InodeStateMap,
    report: &mut DataBlockReport,
) {
    let entries = direntry::walk_entries(data);

    // The self entry names the directory that owns this block.
    let parent_inode = entries
        .iter()
        .find(|e| e.name == ".")
        .map(|e| e.inode)
        .unwrap_or(0);

    report.operation_type = "directory_update".to_string();
    report.file_type = "directory".to_string();
    report.parent_dir_inode = parent_inode;

    let mut first_reported = false;
    for entry in &entries {
        if entry.is_dot_entry() {
            continue;
        }
        if parent_inode != 0 && entry.inode != 0 {
            tree.add_entry(parent_inode, entry.inode, &entry.name, entry.is_directory());
        }
        if !first_reported {
            first_reported = true;
            report.operation_type = entry_operation(entry, inode_state).to_string();
            report.change_type = entry_change_type(&entry.name).to_string();
            report.filename = entry.name.clone();
            report.affected_inode = entry.inode;
            report.full_path = entry_full_path(entry, parent_inode, tree);
        }
    }
}

fn entry_full_path(entry: &DirEntry, parent_inode: u32, tree: &mut DirectoryTreeBuilder) -> String {
    if entry.inode != 0 && parent_inode != 0 {
        return tree.build_full_path(entry.inode);
    }
    // Deleted or context-free entries hang off the parent's path.
    let parent_path = if parent_inode != 0 {
        tree.build_full_path(parent_inode)
    } else {
        String::new()
    };
    if parent_path == "/" {
        format!("/{}", entry.name)
    } else {
        format!("{}/{}", parent_path, entry.name)
    }
}

/// Without a time series to diff against, a live entry defaults to a
/// creation; inode snapshots seen earlier in the scan refine that.
fn entry_operation(entry: &DirEntry, inode_state: &InodeStateMap) -> &'static str {
    if entry.inode == 0 {
        return "file_deleted";
    }
    if let Some(&(links, dtime)) = inode_state.get(&entry.inode) {
        if dtime != 0 {
            return "file_deleted";
        }
        if links > 1 && !entry.is_directory() {
            return "hard_link_created";
        }
    }
    if entry.is_directory() {
        "directory_created"
    } else {
        "file_created"
    }
}

fn entry_change_type(name: &str) -> &'static str {
    if name == BINARY_NAME {
        "unknown"
    } else if name.ends_with('~') || name.contains(".tmp") {
        "modified_entry"
    } else {
        "new_entry"
    }
}

fn analyze_file_data_into(data: &[u8], report: &mut DataBlockReport) {
    let strings = extract_strings(data);
    report.strings_found = strings.len();
    report.operation_type = "file_data_update".to_string();
    report.file_type = classify_strings(&strings).to_string();

    if !strings.is_empty() {
        let mut sample = String::from("STRINGS: ");
        sample.push_str(
            &strings
                .iter()
                .take(MAX_SAMPLE_STRINGS)
                .cloned()
                .collect::<Vec<_>>()
                .join(" | "),
        );
        sample.truncate(MAX_SAMPLE_BYTES);
        report.file_path = sample;
    }
}

/// Runs of printable ASCII, at least three bytes long, capped per block.
pub fn extract_strings(data: &[u8]) -> Vec<String> {
    let mut strings = Vec::new();
    let mut run: Vec<u8> = Vec::new();

    for &byte in data {
        if (0x20..=0x7E).contains(&byte) {
            run.push(byte);
        } else {
            if run.len() >= MIN_STRING_LEN {
                strings.push(String::from_utf8_lossy(&run).to_string());
                if strings.len() >= MAX_STRINGS_PER_BLOCK {
                    return strings;
                }
            }
            run.clear();
        }
    }
    if run.len() >= MIN_STRING_LEN && strings.len() < MAX_STRINGS_PER_BLOCK {
        strings.push(String::from_utf8_lossy(&run).to_string());
    }
    strings
}

/// Keyword refinement of a file-data block, checked in fixed order.
pub fn classify_strings(strings: &[String]) -> &'static str {
    if strings.is_empty() {
        return "file_data";
    }
    if strings
        .iter()
        .any(|s| s.contains(".txt") || s.contains(".log") || s.contains(".md"))
    {
        return "text_file";
    }
    if strings.iter().any(|s| {
        s.contains(".conf") || s.contains(".cfg") || s.contains(".ini") || s.contains("config")
    }) || strings.iter().any(|s| s.contains('='))
    {
        return "config_file";
    }
    if strings.iter().any(|s| {
        let lower = s.to_ascii_lowercase();
        lower.contains("error")
            || lower.contains("warning")
            || lower.contains("info")
            || lower.contains("debug")
            || lower.contains(':')
    }) {
        return "log_file";
    }
    "file_data"
}
