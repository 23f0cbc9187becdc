//! PDF Header Parser
//!
//! Locates the `%PDF-x.y` magic according to ISO 32000-1 Section 7.5.2.
//! Producers sometimes emit garbage before the magic; its length is the
//! "magic offset" every recorded byte offset in the file is shifted by.

use super::device::InputDevice;
use crate::error::{PdfError, Result};
use std::fmt;
use std::io::SeekFrom;

const MAGIC: &[u8] = b"%PDF-";
const VERSION_LEN: usize = 3;

/// PDF Version information
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum PdfVersion {
    V1_0,
    V1_1,
    V1_2,
    V1_3,
    V1_4,
    V1_5,
    V1_6,
    #[default]
    V1_7,
    V2_0,
}

impl PdfVersion {
    /// Parse a version string such as `1.7`
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "1.0" => PdfVersion::V1_0,
            "1.1" => PdfVersion::V1_1,
            "1.2" => PdfVersion::V1_2,
            "1.3" => PdfVersion::V1_3,
            "1.4" => PdfVersion::V1_4,
            "1.5" => PdfVersion::V1_5,
            "1.6" => PdfVersion::V1_6,
            "1.7" => PdfVersion::V1_7,
            "2.0" => PdfVersion::V2_0,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PdfVersion::V1_0 => "1.0",
            PdfVersion::V1_1 => "1.1",
            PdfVersion::V1_2 => "1.2",
            PdfVersion::V1_3 => "1.3",
            PdfVersion::V1_4 => "1.4",
            PdfVersion::V1_5 => "1.5",
            PdfVersion::V1_6 => "1.6",
            PdfVersion::V1_7 => "1.7",
            PdfVersion::V2_0 => "2.0",
        }
    }
}

impl fmt::Display for PdfVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// PDF Header information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdfHeader {
    pub version: PdfVersion,
    /// Number of bytes preceding `%PDF-`
    pub magic_offset: u64,
}

impl PdfHeader {
    /// Scan forward from the start of the device for the magic word and
    /// read the version that follows it.
    pub fn detect(device: &mut dyn InputDevice) -> Result<Self> {
        device.seek(SeekFrom::Start(0))?;

        let mut matched = 0;
        loop {
            let ch = device.read_byte()?.ok_or(PdfError::InvalidHeader)?;
            if ch == MAGIC[matched] {
                matched += 1;
                if matched == MAGIC.len() {
                    break;
                }
            } else {
                matched = usize::from(ch == MAGIC[0]);
            }
        }

        let version_bytes = device.read_up_to(VERSION_LEN)?;
        if version_bytes.len() != VERSION_LEN {
            return Err(PdfError::InvalidHeader);
        }
        let magic_offset = device.position() - (MAGIC.len() + VERSION_LEN) as u64;

        let version = std::str::from_utf8(&version_bytes)
            .ok()
            .and_then(PdfVersion::parse)
            .ok_or(PdfError::InvalidHeader)?;

        Ok(Self {
            version,
            magic_offset,
        })
    }
}
