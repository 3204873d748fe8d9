//! Extra fields: a sequence of (u16 id, u16 length, data) records after the
//! file name.

use log::warn;

use crate::core::bytes::HeaderCursor;
use crate::error::Result;
use crate::formats::zip::constants::extra_ids;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtraField {
    /// Sizes that did not fit the 32-bit header fields. The local header
    /// variant lists the uncompressed size first.
    Zip64 {
        size: Option<u64>,
        compressed_size: Option<u64>,
    },
    /// Info-ZIP "UT" field, only the modification time is kept.
    ExtendedTimestamp { modified: Option<i64> },
    /// Info-ZIP "up" field: UTF-8 name tied to the CRC-32 of the raw name.
    UnicodePath { name_crc: u32, name: String },
    Unknown { id: u16, data: Vec<u8> },
}

fn parse_field(id: u16, data: &[u8], offset: u64) -> Result<ExtraField> {
    let mut cursor = HeaderCursor::new(data, offset);
    let field = match id {
        extra_ids::ZIP64 => {
            let size = if cursor.remaining() >= 8 { Some(cursor.u64()?) } else { None };
            let compressed_size = if cursor.remaining() >= 8 { Some(cursor.u64()?) } else { None };
            ExtraField::Zip64 {
                size,
                compressed_size,
            }
        }
        extra_ids::EXTENDED_TIMESTAMP => {
            let flags = cursor.u8()?;
            let modified = if flags & 1 != 0 && cursor.remaining() >= 4 {
                Some(cursor.u32()? as i32 as i64)
            } else {
                None
            };
            ExtraField::ExtendedTimestamp { modified }
        }
        extra_ids::UNICODE_PATH if data.len() > 5 && data[0] == 1 => {
            cursor.u8()?;
            let name_crc = cursor.u32()?;
            let name = String::from_utf8_lossy(cursor.take(cursor.remaining())?).into_owned();
            ExtraField::UnicodePath { name_crc, name }
        }
        _ => ExtraField::Unknown {
            id,
            data: data.to_vec(),
        },
    };
    Ok(field)
}

/// Parse the extra block of a header that starts at `offset`. Malformed
/// trailing data is kept as an unknown field rather than failing the entry.
pub fn parse_extra_fields(data: &[u8], offset: u64) -> Vec<ExtraField> {
    let mut fields = Vec::new();
    let mut pos = 0usize;
    while pos < data.len() {
        let rest = &data[pos..];
        let field_offset = offset + pos as u64;
        if rest.len() < 4 {
            warn!("Ignoring {} stray bytes in extra field at offset {}", rest.len(), field_offset);
            break;
        }
        let id = u16::from_le_bytes([rest[0], rest[1]]);
        let len = u16::from_le_bytes([rest[2], rest[3]]) as usize;
        if rest.len() < 4 + len {
            warn!("Extra field {:#06x} at offset {} runs past the extra block", id, field_offset);
            fields.push(ExtraField::Unknown {
                id,
                data: rest[4..].to_vec(),
            });
            break;
        }
        let body = &rest[4..4 + len];
        match parse_field(id, body, field_offset + 4) {
            Ok(field) => fields.push(field),
            Err(e) => {
                warn!("Unparseable extra field {:#06x}: {}", id, e);
                fields.push(ExtraField::Unknown { id, data: body.to_vec() });
            }
        }
        pos += 4 + len;
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(id: u16, body: &[u8]) -> Vec<u8> {
        let mut out = id.to_le_bytes().to_vec();
        out.extend((body.len() as u16).to_le_bytes());
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn known_fields() {
        let mut zip64 = 5_000_000_000u64.to_le_bytes().to_vec();
        zip64.extend(4_000_000_000u64.to_le_bytes());
        let mut unicode = vec![1];
        unicode.extend(0xdead_beefu32.to_le_bytes());
        unicode.extend("ünï".as_bytes());

        let mut data = field(extra_ids::ZIP64, &zip64);
        data.extend(field(extra_ids::EXTENDED_TIMESTAMP, &[1, 0x00, 0xf1, 0x53, 0x65]));
        data.extend(field(extra_ids::UNICODE_PATH, &unicode));
        data.extend(field(0xcafe, b"xx"));

        let fields = parse_extra_fields(&data, 30);
        assert_eq!(
            fields,
            vec![
                ExtraField::Zip64 {
                    size: Some(5_000_000_000),
                    compressed_size: Some(4_000_000_000)
                },
                ExtraField::ExtendedTimestamp {
                    modified: Some(0x6553_f100)
                },
                ExtraField::UnicodePath {
                    name_crc: 0xdead_beef,
                    name: "ünï".into()
                },
                ExtraField::Unknown {
                    id: 0xcafe,
                    data: b"xx".to_vec()
                },
            ]
        );
    }

    #[test]
    fn truncated_field_is_kept() {
        let mut data = field(0x1234, b"abcdef");
        data.truncate(7);
        let fields = parse_extra_fields(&data, 0);
        assert_eq!(
            fields,
            vec![ExtraField::Unknown {
                id: 0x1234,
                data: b"abc".to_vec()
            }]
        );
    }
}
