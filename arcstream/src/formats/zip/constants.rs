use std::fmt;

pub const LOCAL_FILE_HEADER_SIG: u32 = 0x0403_4b50;
pub const CENTRAL_FILE_HEADER_SIG: u32 = 0x0201_4b50;
pub const END_OF_CENTRAL_DIR_SIG: u32 = 0x0605_4b50;
pub const ZIP64_END_OF_CENTRAL_DIR_SIG: u32 = 0x0606_4b50;
pub const ZIP64_LOCATOR_SIG: u32 = 0x0706_4b50;
pub const ARCHIVE_EXTRA_DATA_SIG: u32 = 0x0806_4b50;
/// Also the marker at the start of a split archive's first segment.
pub const DATA_DESCRIPTOR_SIG: u32 = 0x0807_4b50;
/// "PK00": archive that was prepared for splitting but fits one segment.
pub const SINGLE_SEGMENT_SIG: u32 = 0x3030_4b50;

/// Fixed part of a local file header after its signature.
pub const LOCAL_HEADER_FIXED_LEN: usize = 26;

/// Sizes at or above this value live in the Zip64 extra field.
pub const ZIP64_MAGIC: u32 = 0xffff_ffff;
pub const ZIP64_MAGIC_SHORT: u16 = 0xffff;

pub mod flags {
    pub const ENCRYPTED: u16 = 1 << 0;
    pub const DATA_DESCRIPTOR: u16 = 1 << 3;
    pub const STRONG_ENCRYPTION: u16 = 1 << 6;
    pub const UTF8_NAMES: u16 = 1 << 11;
}

pub mod extra_ids {
    pub const ZIP64: u16 = 0x0001;
    pub const EXTENDED_TIMESTAMP: u16 = 0x5455;
    pub const UNICODE_PATH: u16 = 0x7075;
}

/// Version needed to extract / made by, as `major * 10 + minor`.
pub const VERSION_STORED: u16 = 10;
pub const VERSION_DEFLATED: u16 = 20;
pub const PLATFORM_UNIX: u16 = 3;

/// Compression method field of a ZIP entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZipMethod {
    Stored,
    #[default]
    Deflated,
    Deflate64,
    Other(u16),
}

impl ZipMethod {
    pub fn from_code(code: u16) -> Self {
        match code {
            0 => ZipMethod::Stored,
            8 => ZipMethod::Deflated,
            9 => ZipMethod::Deflate64,
            other => ZipMethod::Other(other),
        }
    }

    pub fn code(self) -> u16 {
        match self {
            ZipMethod::Stored => 0,
            ZipMethod::Deflated => 8,
            ZipMethod::Deflate64 => 9,
            ZipMethod::Other(code) => code,
        }
    }

    /// Methods this crate decodes.
    pub fn is_supported(self) -> bool {
        !matches!(self, ZipMethod::Other(_))
    }
}

impl fmt::Display for ZipMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.code() {
            0 => "stored",
            1 => "shrunk",
            2..=5 => "reduced",
            6 => "imploded",
            8 => "deflated",
            9 => "deflate64",
            10 => "PKWARE implode",
            12 => "bzip2",
            14 => "LZMA",
            93 => "zstd",
            95 => "XZ",
            96 => "JPEG",
            97 => "WavPack",
            98 => "PPMd",
            99 => "AES encrypted",
            code => return write!(f, "method {}", code),
        };
        f.write_str(name)
    }
}
