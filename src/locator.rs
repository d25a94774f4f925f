use log::{debug, info, warn};
use serde::Serialize;

use crate::error::{AnalyzerError, Result};
use crate::image::ImageReader;
use crate::inode::InodeRecord;
use crate::journal::{
    JournalBlockHeader, JournalSuperblock, DEFAULT_JOURNAL_SIZE, JOURNAL_BLOCK_SIZE,
    JOURNAL_HEADER_SIZE,
};
use crate::superblock::ExtSuperblock;

/// The journal file is filesystem inode #8.
const JOURNAL_INODE_NUM: u64 = 8;
const SUPERBLOCK_OFFSET: u64 = 1024;
const SUPERBLOCK_SIZE: usize = 1024;
const GROUP_DESC_SIZE: usize = 32;

/// Where the journal lives inside the partition, in bytes.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct JournalLocation {
    pub byte_offset: u64,
    pub byte_length: u64,
    pub valid: bool,
}

/// Derives the journal's byte range from the EXT superblock and journal
/// inode, falling back to a magic search over common offsets.
pub struct JournalLocator<'a> {
    reader: &'a mut ImageReader,
}

impl<'a> JournalLocator<'a> {
    pub fn new(reader: &'a mut ImageReader) -> Self {
        JournalLocator { reader }
    }

    /// Locate the journal. A manual offset bypasses discovery but is still
    /// validated by magic check.
    pub fn locate(
        &mut self,
        manual_offset: Option<u64>,
        manual_size: Option<u64>,
    ) -> Result<JournalLocation> {
        if let Some(offset) = manual_offset {
            if !self.journal_magic_at(offset) {
                return Err(AnalyzerError::JournalNotFound(format!(
                    "no journal magic at manual offset {}",
                    offset
                )));
            }
            let byte_length = match manual_size {
                Some(size) if size > 0 => size,
                _ => self.probe_length(offset),
            };
            info!("Using manual journal offset {} ({} bytes)", offset, byte_length);
            return Ok(JournalLocation {
                byte_offset: offset,
                byte_length,
                valid: true,
            });
        }

        let location = self.discover()?;
        Ok(match manual_size {
            Some(size) if size > 0 => JournalLocation {
                byte_length: size,
                ..location
            },
            _ => location,
        })
    }

    fn discover(&mut self) -> Result<JournalLocation> {
        let raw = self.reader.read_at(SUPERBLOCK_OFFSET, SUPERBLOCK_SIZE)?;
        let superblock = ExtSuperblock::from_bytes(&raw)?;
        let block_size = superblock.block_size();

        if !superblock.has_journal() {
            return Err(AnalyzerError::JournalNotFound(
                "filesystem has no journal feature (EXT2?)".to_string(),
            ));
        }
        info!(
            "Found EXT filesystem with block size {} bytes{}",
            block_size,
            match superblock.volume_name().as_str() {
                "" => String::new(),
                name => format!(" (volume '{}')", name),
            }
        );

        match self.journal_from_inode(&superblock) {
            Ok(location) => Ok(location),
            Err(e) => {
                warn!("Journal not found at expected location ({}), searching...", e);
                self.fallback_search(block_size)
            }
        }
    }

    /// Resolve the journal inode through the first group descriptor and take
    /// its first data block.
    fn journal_from_inode(&mut self, superblock: &ExtSuperblock) -> Result<JournalLocation> {
        let block_size = superblock.block_size();

        // The group descriptor table starts one block after the superblock's
        // block.
        let group_desc_offset = (superblock.first_data_block() + 1) * block_size;
        let group_desc = self.reader.read_at(group_desc_offset, GROUP_DESC_SIZE)?;
        let inode_table_block =
            u32::from_le_bytes(group_desc[8..12].try_into().unwrap()) as u64;
        debug!(
            "Group descriptor at {}: inode table at block {}",
            group_desc_offset, inode_table_block
        );

        let inode_size = superblock.inode_size();
        let journal_inode_offset =
            inode_table_block * block_size + (JOURNAL_INODE_NUM - 1) * inode_size as u64;
        let raw_inode = self
            .reader
            .read_at(journal_inode_offset, inode_size.max(128))?;
        let journal_inode = InodeRecord::from_bytes(&raw_inode);
        debug!(
            "Journal inode flags {:#x} ({})",
            journal_inode.flag(),
            if journal_inode.uses_extents() {
                "extents"
            } else {
                "direct blocks"
            }
        );

        let journal_block = journal_inode.first_block().ok_or_else(|| {
            AnalyzerError::JournalNotFound("journal inode has no data blocks".to_string())
        })?;
        let byte_offset = journal_block * block_size;

        if !self.journal_magic_at(byte_offset) {
            return Err(AnalyzerError::JournalNotFound(format!(
                "no journal magic at block {} (offset {})",
                journal_block, byte_offset
            )));
        }

        let byte_length = if journal_inode.size() > 0 {
            journal_inode.size()
        } else {
            self.probe_length(byte_offset)
        };

        info!("Found journal at offset {} ({} bytes)", byte_offset, byte_length);
        Ok(JournalLocation {
            byte_offset,
            byte_length,
            valid: true,
        })
    }

    /// Magic-check a fixed set of common journal offsets.
    fn fallback_search(&mut self, block_size: u64) -> Result<JournalLocation> {
        let candidates = [
            32_768,
            65_536,
            131_072,
            262_144,
            524_288,
            1_048_576,
            10 * block_size,
            100 * block_size,
        ];
        for &offset in &candidates {
            if self.journal_magic_at(offset) {
                let byte_length = self.probe_length(offset);
                info!("Found journal at offset {} ({} bytes)", offset, byte_length);
                return Ok(JournalLocation {
                    byte_offset: offset,
                    byte_length,
                    valid: true,
                });
            }
        }
        Err(AnalyzerError::JournalNotFound(
            "no journal magic at any candidate offset".to_string(),
        ))
    }

    fn journal_magic_at(&mut self, offset: u64) -> bool {
        match self.reader.read_at(offset, JOURNAL_HEADER_SIZE) {
            Ok(header) => JournalBlockHeader::from_bytes(&header).is_some(),
            Err(e) => {
                debug!("Cannot read journal header at offset {}: {}", offset, e);
                false
            }
        }
    }

    /// Size the journal from its superblock; 128 MiB when the probe fails.
    fn probe_length(&mut self, journal_offset: u64) -> u64 {
        let probed = self
            .reader
            .read_at(journal_offset, JOURNAL_BLOCK_SIZE)
            .ok()
            .and_then(|block| JournalSuperblock::from_block(&block))
            .map(|sb| sb.byte_length());
        match probed {
            Some(length) => length,
            None => {
                debug!(
                    "Journal superblock probe at {} failed, assuming {} bytes",
                    journal_offset, DEFAULT_JOURNAL_SIZE
                );
                DEFAULT_JOURNAL_SIZE
            }
        }
    }
}
