/// Reference: https://www.kernel.org/doc/html/latest/filesystems/ext4/index.html
use chrono::{TimeZone, Utc};
use serde::Serialize;
use serde_json::{json, Value};

pub const EXT4_INODE_RECORD_SIZE: usize = 128;
pub const EXT4_EXTENTS_FL: u32 = 0x0008_0000;
const EXTENT_MAGIC: u16 = 0xF30A;

/// One EXT inode as observed inside a journaled inode-table block.
///
/// Journaled inode tables are walked at the classic 128-byte stride, so only
/// the classic field region is decoded here; the extended (256-byte) tail is
/// not visible from the journal copy.
#[derive(Debug, Clone, Serialize)]
pub struct InodeRecord {
    pub i_mode: u16,
    pub i_uid: u16,
    pub i_size_lo: u32,
    pub i_atime: u32,
    pub i_ctime: u32,
    pub i_mtime: u32,
    pub i_dtime: u32,
    pub i_atime_h: String,
    pub i_ctime_h: String,
    pub i_mtime_h: String,
    pub i_dtime_h: String,
    pub i_gid: u16,
    pub i_links_count: u16,
    pub i_blocks_lo: u32,
    pub i_flags: u32,
    pub i_block: [u32; 15],
    pub i_generation: u32,
    pub i_size_high: u32,
    pub l_i_uid_high: u16,
    pub l_i_gid_high: u16,
}

/// Convert an ext-mode (includes file-type bits) into the familiar
/// 10-character string used by `ls -l`, e.g. "-rw-r--r--".
pub fn mode_to_string(mode: u16) -> String {
    const S_IFMT: u16 = 0o170000;
    const S_IFSOCK: u16 = 0o140000;
    const S_IFLNK: u16 = 0o120000;
    const S_IFREG: u16 = 0o100000;
    const S_IFBLK: u16 = 0o060000;
    const S_IFDIR: u16 = 0o040000;
    const S_IFCHR: u16 = 0o020000;
    const S_IFIFO: u16 = 0o010000;

    let file_ch = match mode & S_IFMT {
        S_IFSOCK => 's',
        S_IFLNK => 'l',
        S_IFREG => '-',
        S_IFBLK => 'b',
        S_IFDIR => 'd',
        S_IFCHR => 'c',
        S_IFIFO => 'p',
        _ => '?',
    };

    let mut buf = [b'-'; 9];
    for (i, bit) in [0o400, 0o200, 0o100, 0o040, 0o020, 0o010, 0o004, 0o002, 0o001]
        .iter()
        .enumerate()
    {
        if mode & bit != 0 {
            buf[i] = match i % 3 {
                0 => b'r',
                1 => b'w',
                _ => b'x',
            };
        }
    }

    let mut s = String::with_capacity(10);
    s.push(file_ch);
    s.push_str(std::str::from_utf8(&buf).unwrap());
    s
}

/// Map the mode's file-type bits onto the timeline vocabulary.
pub fn file_type_str(mode: u16) -> &'static str {
    match mode & 0xF000 {
        0x8000 => "regular_file",
        0x4000 => "directory",
        0xA000 => "symlink",
        0x2000 => "char_device",
        0x6000 => "block_device",
        0x1000 => "fifo",
        0xC000 => "socket",
        _ => "unknown",
    }
}

impl InodeRecord {
    /// Decode one 128-byte inode record. `data` must hold at least 128 bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        let le_u16 = |offset: usize| -> u16 {
            u16::from_le_bytes(data[offset..offset + 2].try_into().unwrap())
        };
        let le_u32 = |offset: usize| -> u32 {
            u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap())
        };

        let format_time = |seconds: u32| {
            if seconds == 0 {
                String::new()
            } else {
                Utc.timestamp_opt(seconds as i64, 0)
                    .single()
                    .map(|dt| dt.to_rfc3339())
                    .unwrap_or_default()
            }
        };

        let i_atime = le_u32(0x08);
        let i_ctime = le_u32(0x0C);
        let i_mtime = le_u32(0x10);
        let i_dtime = le_u32(0x14);

        let mut i_block = [0u32; 15];
        for (i, slot) in i_block.iter_mut().enumerate() {
            *slot = le_u32(0x28 + i * 4);
        }

        InodeRecord {
            i_mode: le_u16(0x00),
            i_uid: le_u16(0x02),
            i_size_lo: le_u32(0x04),
            i_atime,
            i_ctime,
            i_mtime,
            i_dtime,
            i_atime_h: format_time(i_atime),
            i_ctime_h: format_time(i_ctime),
            i_mtime_h: format_time(i_mtime),
            i_dtime_h: format_time(i_dtime),
            i_gid: le_u16(0x18),
            i_links_count: le_u16(0x1A),
            i_blocks_lo: le_u32(0x1C),
            i_flags: le_u32(0x20),
            i_block,
            i_generation: le_u32(0x64),
            i_size_high: le_u32(0x6C),
            l_i_uid_high: le_u16(0x78),
            l_i_gid_high: le_u16(0x7A),
        }
    }

    /// A journaled inode slot counts as in-use when the mode is set and the
    /// link count is at least one.
    pub fn is_valid(&self) -> bool {
        self.i_mode != 0 && self.i_links_count >= 1
    }

    pub fn size(&self) -> u64 {
        ((self.i_size_high as u64) << 32) | (self.i_size_lo as u64)
    }

    pub fn mode(&self) -> u16 {
        self.i_mode
    }

    pub fn flag(&self) -> u32 {
        self.i_flags
    }

    pub fn uid(&self) -> u32 {
        ((self.l_i_uid_high as u32) << 16) | (self.i_uid as u32)
    }

    pub fn gid(&self) -> u32 {
        ((self.l_i_gid_high as u32) << 16) | (self.i_gid as u32)
    }

    pub fn is_dir(&self) -> bool {
        (self.i_mode & 0o170000) == 0o040000
    }

    pub fn is_regular_file(&self) -> bool {
        (self.i_mode & 0o170000) == 0o100000
    }

    pub fn file_type(&self) -> &'static str {
        file_type_str(self.i_mode)
    }

    pub fn uses_extents(&self) -> bool {
        (self.i_flags & EXT4_EXTENTS_FL) != 0
    }

    /// First data block of this inode.
    ///
    /// When the extent flag is set, the i_block area holds a 12-byte extent
    /// header followed by extent entries: `ee_start_hi` at entry offset 6 and
    /// `ee_start_lo` at entry offset 8 of the first entry. Without extents the
    /// first direct pointer is returned.
    pub fn first_block(&self) -> Option<u64> {
        if !self.uses_extents() {
            let direct = self.i_block[0] as u64;
            return if direct != 0 { Some(direct) } else { None };
        }

        let raw = self.i_block_bytes();
        let eh_magic = u16::from_le_bytes(raw[0..2].try_into().unwrap());
        let eh_entries = u16::from_le_bytes(raw[2..4].try_into().unwrap());
        if eh_magic != EXTENT_MAGIC || eh_entries == 0 {
            return None;
        }
        // First ext4_extent entry starts right after the 12-byte header.
        let entry = &raw[12..24];
        let ee_start_hi = u16::from_le_bytes(entry[6..8].try_into().unwrap()) as u64;
        let ee_start_lo = u32::from_le_bytes(entry[8..12].try_into().unwrap()) as u64;
        let start = (ee_start_hi << 32) | ee_start_lo;
        if start != 0 {
            Some(start)
        } else {
            None
        }
    }

    /// The raw 60-byte i_block region (pointers or extent tree).
    pub fn i_block_bytes(&self) -> [u8; 60] {
        let mut raw = [0u8; 60];
        for (i, blk) in self.i_block.iter().enumerate() {
            raw[i * 4..i * 4 + 4].copy_from_slice(&blk.to_le_bytes());
        }
        raw
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({}))
    }
}
