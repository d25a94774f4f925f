use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use exhume_body::ewf::EWF;
use log::{debug, info, warn};

use crate::error::{AnalyzerError, Result};

/// Upper bound for a single read request. The analyzer never needs more than
/// one filesystem block at a time; anything larger is a caller bug.
pub const MAX_READ_BYTES: usize = 1024 * 1024;

/// Requested image format. `Auto` dispatches on the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Auto,
    Raw,
    Ewf,
}

impl ImageFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "auto" => Some(ImageFormat::Auto),
            "raw" => Some(ImageFormat::Raw),
            "ewf" => Some(ImageFormat::Ewf),
            _ => None,
        }
    }
}

enum Backend {
    Raw(File),
    Ewf(Box<EWF>),
}

impl Backend {
    fn description(&self) -> &'static str {
        match self {
            Backend::Raw(_) => "Raw disk image",
            Backend::Ewf(_) => "Expert Witness Compression Format",
        }
    }
}

/// Random-access byte reader over a raw or EWF evidence file.
///
/// Every address handed to `read_at` is a partition-relative offset; the
/// configured partition offset is added before the backend is touched. The
/// reader is single-owner and all backend calls are serialized through
/// `&mut self` (the EWF handle is not reentrant).
pub struct ImageReader {
    path: String,
    backend: Backend,
    partition_offset: u64,
}

impl ImageReader {
    pub fn open(path: &str, hint: ImageFormat) -> Result<Self> {
        let format = match hint {
            ImageFormat::Auto => detect_format(path),
            other => other,
        };

        let backend = match format {
            ImageFormat::Ewf => {
                let evidence = EWF::new(path).map_err(|message| AnalyzerError::ImageOpen {
                    path: path.to_string(),
                    reason: message,
                })?;
                Backend::Ewf(Box::new(evidence))
            }
            _ => {
                let file = File::open(path).map_err(|e| AnalyzerError::ImageOpen {
                    path: path.to_string(),
                    reason: e.to_string(),
                })?;
                Backend::Raw(file)
            }
        };

        info!("Opened {} as {}", path, backend.description());
        Ok(ImageReader {
            path: path.to_string(),
            backend,
            partition_offset: 0,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Negative offsets are coerced to 0; the analyzer keeps going.
    pub fn set_partition_offset(&mut self, offset: i64) {
        if offset < 0 {
            warn!("Negative partition offset ({}) ignored", offset);
            self.partition_offset = 0;
        } else {
            self.partition_offset = offset as u64;
        }
    }

    pub fn partition_offset(&self) -> u64 {
        self.partition_offset
    }

    /// Read exactly `len` bytes at the partition-relative address `addr`.
    /// Short reads are failures, never silently truncated.
    pub fn read_at(&mut self, addr: u64, len: usize) -> Result<Vec<u8>> {
        if len == 0 || len > MAX_READ_BYTES {
            return Err(AnalyzerError::Read {
                offset: addr,
                len,
                reason: "invalid read length".to_string(),
            });
        }
        let adjusted = addr
            .checked_add(self.partition_offset)
            .ok_or_else(|| AnalyzerError::Read {
                offset: addr,
                len,
                reason: "address overflow".to_string(),
            })?;

        debug!("read_at addr={:#x} adjusted={:#x} len={}", addr, adjusted, len);
        match &mut self.backend {
            Backend::Raw(file) => read_exact_at(file, adjusted, len),
            Backend::Ewf(evidence) => read_exact_at(evidence.as_mut(), adjusted, len),
        }
        .map_err(|e| AnalyzerError::Read {
            offset: adjusted,
            len,
            reason: e.to_string(),
        })
    }
}

fn read_exact_at<T: Read + Seek>(src: &mut T, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
    src.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; len];
    src.read_exact(&mut buf)?;
    Ok(buf)
}

fn detect_format(path: &str) -> ImageFormat {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("e01") | Some("ex01") | Some("l01") => ImageFormat::Ewf,
        Some("dd") | Some("img") | Some("raw") => ImageFormat::Raw,
        _ => ImageFormat::Raw,
    }
}
