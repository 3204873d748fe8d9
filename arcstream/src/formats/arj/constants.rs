pub const ARJ_MAGIC: [u8; 2] = [0x60, 0xEA];
/// Largest basic header ARJ itself ever writes.
pub const MAX_BASIC_HEADER_SIZE: u16 = 2600;

/// Size of the fixed part of a main header, size byte included.
pub const MAIN_FIRST_HEADER_BASE: u8 = 30;
/// Main headers from this size on carry the protection factor and flags2.
pub const MAIN_FIRST_HEADER_WITH_PROTECTION: u8 = 34;
pub const LOCAL_FIRST_HEADER_BASE: u8 = 30;
pub const LOCAL_FIRST_HEADER_WITH_EXT_POSITION: u8 = 34;
pub const LOCAL_FIRST_HEADER_WITH_TIMES: u8 = 46;

pub mod main_flags {
    pub const GARBLED: u8 = 0x01;
    pub const OLD_SECURED_NEW_ANSI_PAGE: u8 = 0x02;
    pub const VOLUME: u8 = 0x04;
    pub const ARJPROT: u8 = 0x08;
    pub const PATHSYM: u8 = 0x10;
    pub const BACKUP: u8 = 0x20;
    pub const SECURED: u8 = 0x40;
    pub const ALTNAME: u8 = 0x80;
}

pub mod local_flags {
    pub const GARBLED: u8 = 0x01;
    pub const VOLUME: u8 = 0x04;
    pub const EXTFILE: u8 = 0x08;
    pub const PATHSYM: u8 = 0x10;
    pub const BACKUP: u8 = 0x20;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Stored,
    /// Methods 1-4, LZ77 + Huffman variants.
    Compressed(u8),
    NoDataNoCrc,
    NoData,
    Unknown(u8),
}

impl From<u8> for Method {
    fn from(v: u8) -> Self {
        match v {
            0 => Method::Stored,
            1..=4 => Method::Compressed(v),
            8 => Method::NoDataNoCrc,
            9 => Method::NoData,
            other => Method::Unknown(other),
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Stored => write!(f, "0 (stored)"),
            Method::Compressed(m) => write!(f, "{} (compressed)", m),
            Method::NoDataNoCrc => write!(f, "8 (no data, no CRC)"),
            Method::NoData => write!(f, "9 (no data)"),
            Method::Unknown(m) => write!(f, "{}", m),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Binary,
    SevenBitText,
    CommentHeader,
    Directory,
    VolumeLabel,
    ChapterLabel,
    Unknown(u8),
}

impl From<u8> for FileType {
    fn from(v: u8) -> Self {
        match v {
            0 => FileType::Binary,
            1 => FileType::SevenBitText,
            2 => FileType::CommentHeader,
            3 => FileType::Directory,
            4 => FileType::VolumeLabel,
            5 => FileType::ChapterLabel,
            other => FileType::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOs {
    MsDos,
    Primos,
    Unix,
    Amiga,
    MacOs,
    Os2,
    AppleGs,
    AtariSt,
    Next,
    VaxVms,
    Win95,
    Win32,
    Unknown(u8),
}

impl From<u8> for HostOs {
    fn from(v: u8) -> Self {
        match v {
            0 => HostOs::MsDos,
            1 => HostOs::Primos,
            2 => HostOs::Unix,
            3 => HostOs::Amiga,
            4 => HostOs::MacOs,
            5 => HostOs::Os2,
            6 => HostOs::AppleGs,
            7 => HostOs::AtariSt,
            8 => HostOs::Next,
            9 => HostOs::VaxVms,
            10 => HostOs::Win95,
            11 => HostOs::Win32,
            other => HostOs::Unknown(other),
        }
    }
}

impl HostOs {
    /// Hosts whose timestamps are Unix seconds and whose mode is a POSIX mode.
    pub fn is_unix_like(self) -> bool {
        matches!(self, HostOs::Unix | HostOs::Next)
    }
}
