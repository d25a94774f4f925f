/// Reference: https://www.kernel.org/doc/html/v4.19/filesystems/ext4/ondisk/index.html#super-block
use serde_json::{json, Value};
use std::convert::TryInto;

use crate::error::{AnalyzerError, Result};

const EXT_MAGIC: u16 = 0xEF53;
pub const EXT3_FEATURE_COMPAT_HAS_JOURNAL: u32 = 0x0004;
pub const EXT4_FEATURE_INCOMPAT_JOURNAL_DEV: u32 = 0x0008;

/// The subset of the on-disk superblock the journal locator depends on.
#[derive(Debug)]
pub struct ExtSuperblock {
    pub s_inodes_count: u32,
    pub s_blocks_count_lo: u32,
    pub s_first_data_block: u32,
    pub s_log_block_size: u32,
    pub s_blocks_per_group: u32,
    pub s_inodes_per_group: u32,
    pub s_magic: u16,
    pub s_state: u16,
    pub s_inode_size: u16,
    pub s_feature_compat: u32,
    pub s_feature_incompat: u32,
    pub s_feature_ro_compat: u32,
    pub s_volume_name: [u8; 16],
}

impl ExtSuperblock {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 0x400 {
            return Err(AnalyzerError::InvalidFilesystem(
                "not enough bytes to parse superblock".to_string(),
            ));
        }
        let le_u16 = |offset: usize| -> u16 {
            u16::from_le_bytes(data[offset..offset + 2].try_into().unwrap())
        };
        let le_u32 = |offset: usize| -> u32 {
            u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap())
        };

        let s_magic = le_u16(0x38);
        if s_magic != EXT_MAGIC {
            return Err(AnalyzerError::InvalidFilesystem(format!(
                "bad superblock magic 0x{:04x} (expected 0x{:04x})",
                s_magic, EXT_MAGIC
            )));
        }

        let s_log_block_size = le_u32(0x18);
        // 1024 << log must land inside {1024 .. 65536}.
        if s_log_block_size > 6 {
            return Err(AnalyzerError::InvalidFilesystem(format!(
                "implausible log_block_size {}",
                s_log_block_size
            )));
        }

        Ok(ExtSuperblock {
            s_inodes_count: le_u32(0x00),
            s_blocks_count_lo: le_u32(0x04),
            s_first_data_block: le_u32(0x14),
            s_log_block_size,
            s_blocks_per_group: le_u32(0x20),
            s_inodes_per_group: le_u32(0x28),
            s_magic,
            s_state: le_u16(0x3A),
            s_inode_size: le_u16(0x58),
            s_feature_compat: le_u32(0x5C),
            s_feature_incompat: le_u32(0x60),
            s_feature_ro_compat: le_u32(0x64),
            s_volume_name: data[0x78..0x88].try_into().unwrap(),
        })
    }

    pub fn block_size(&self) -> u64 {
        1024u64 << self.s_log_block_size
    }

    /// Inode record size; revision-0 filesystems store 0 here and mean 128.
    pub fn inode_size(&self) -> usize {
        if self.s_inode_size == 0 {
            128
        } else {
            self.s_inode_size as usize
        }
    }

    pub fn first_data_block(&self) -> u64 {
        self.s_first_data_block as u64
    }

    pub fn has_journal(&self) -> bool {
        (self.s_feature_compat & EXT3_FEATURE_COMPAT_HAS_JOURNAL) != 0
            || (self.s_feature_incompat & EXT4_FEATURE_INCOMPAT_JOURNAL_DEV) != 0
    }

    pub fn volume_name(&self) -> String {
        let end = self
            .s_volume_name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.s_volume_name.len());
        String::from_utf8_lossy(&self.s_volume_name[..end]).to_string()
    }

    pub fn to_json(&self) -> Value {
        json!({
            "inodes_count": self.s_inodes_count,
            "blocks_count": self.s_blocks_count_lo,
            "first_data_block": self.s_first_data_block,
            "log_block_size": self.s_log_block_size,
            "block_size": self.block_size(),
            "inodes_per_group": self.s_inodes_per_group,
            "inode_size": self.inode_size(),
            "magic": format!("0x{:04x}", self.s_magic),
            "feature_compat": format!("0x{:08x}", self.s_feature_compat),
            "feature_incompat": format!("0x{:08x}", self.s_feature_incompat),
            "feature_ro_compat": format!("0x{:08x}", self.s_feature_ro_compat),
            "volume_name": self.volume_name(),
            "has_journal": self.has_journal(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal superblock buffer: 4 KiB blocks, journal feature set.
    fn sample_superblock() -> Vec<u8> {
        let mut sb = vec![0u8; 0x400];
        sb[0x00..0x04].copy_from_slice(&128u32.to_le_bytes()); // inodes_count
        sb[0x04..0x08].copy_from_slice(&1024u32.to_le_bytes()); // blocks_count
        sb[0x18..0x1C].copy_from_slice(&2u32.to_le_bytes()); // log_block_size -> 4096
        sb[0x28..0x2C].copy_from_slice(&128u32.to_le_bytes()); // inodes_per_group
        sb[0x38..0x3A].copy_from_slice(&0xEF53u16.to_le_bytes()); // magic
        sb[0x58..0x5A].copy_from_slice(&128u16.to_le_bytes()); // inode_size
        sb[0x5C..0x60].copy_from_slice(&EXT3_FEATURE_COMPAT_HAS_JOURNAL.to_le_bytes());
        sb
    }

    #[test]
    fn parses_sample() {
        let sb = ExtSuperblock::from_bytes(&sample_superblock()).unwrap();
        assert_eq!(sb.block_size(), 4096);
        assert_eq!(sb.inode_size(), 128);
        assert!(sb.has_journal());
        assert_eq!(sb.first_data_block(), 0);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut raw = sample_superblock();
        raw[0x38] = 0x00;
        assert!(ExtSuperblock::from_bytes(&raw).is_err());
    }

    #[test]
    fn rejects_implausible_block_size() {
        let mut raw = sample_superblock();
        raw[0x18..0x1C].copy_from_slice(&7u32.to_le_bytes());
        assert!(ExtSuperblock::from_bytes(&raw).is_err());
    }

    #[test]
    fn zero_inode_size_defaults_to_128() {
        let mut raw = sample_superblock();
        raw[0x58..0x5A].copy_from_slice(&0u16.to_le_bytes());
        let sb = ExtSuperblock::from_bytes(&raw).unwrap();
        assert_eq!(sb.inode_size(), 128);
    }

    #[test]
    fn journal_dev_feature_counts_as_journal() {
        let mut raw = sample_superblock();
        raw[0x5C..0x60].copy_from_slice(&0u32.to_le_bytes());
        raw[0x60..0x64].copy_from_slice(&EXT4_FEATURE_INCOMPAT_JOURNAL_DEV.to_le_bytes());
        let sb = ExtSuperblock::from_bytes(&raw).unwrap();
        assert!(sb.has_journal());
    }
}
