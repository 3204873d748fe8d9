//! Byte-exact name/comment decoding.
//!
//! Legacy formats store names in a code page fixed by the format (CP437 for
//! ARJ and non-UTF-8 ZIP entries), never in whatever the host happens to use.

/// Character sets understood by the header codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    Cp437,
    Utf8,
    Latin1,
}

// Code points for bytes 0x80..=0xFF; the lower half maps to ASCII.
const CP437_HIGH: [char; 128] = [
    '\u{00C7}', '\u{00FC}', '\u{00E9}', '\u{00E2}', '\u{00E4}', '\u{00E0}', '\u{00E5}', '\u{00E7}',
    '\u{00EA}', '\u{00EB}', '\u{00E8}', '\u{00EF}', '\u{00EE}', '\u{00EC}', '\u{00C4}', '\u{00C5}',
    '\u{00C9}', '\u{00E6}', '\u{00C6}', '\u{00F4}', '\u{00F6}', '\u{00F2}', '\u{00FB}', '\u{00F9}',
    '\u{00FF}', '\u{00D6}', '\u{00DC}', '\u{00A2}', '\u{00A3}', '\u{00A5}', '\u{20A7}', '\u{0192}',
    '\u{00E1}', '\u{00ED}', '\u{00F3}', '\u{00FA}', '\u{00F1}', '\u{00D1}', '\u{00AA}', '\u{00BA}',
    '\u{00BF}', '\u{2310}', '\u{00AC}', '\u{00BD}', '\u{00BC}', '\u{00A1}', '\u{00AB}', '\u{00BB}',
    '\u{2591}', '\u{2592}', '\u{2593}', '\u{2502}', '\u{2524}', '\u{2561}', '\u{2562}', '\u{2556}',
    '\u{2555}', '\u{2563}', '\u{2551}', '\u{2557}', '\u{255D}', '\u{255C}', '\u{255B}', '\u{2510}',
    '\u{2514}', '\u{2534}', '\u{252C}', '\u{251C}', '\u{2500}', '\u{253C}', '\u{255E}', '\u{255F}',
    '\u{255A}', '\u{2554}', '\u{2569}', '\u{2566}', '\u{2560}', '\u{2550}', '\u{256C}', '\u{2567}',
    '\u{2568}', '\u{2564}', '\u{2565}', '\u{2559}', '\u{2558}', '\u{2552}', '\u{2553}', '\u{256B}',
    '\u{256A}', '\u{2518}', '\u{250C}', '\u{2588}', '\u{2584}', '\u{258C}', '\u{2590}', '\u{2580}',
    '\u{03B1}', '\u{00DF}', '\u{0393}', '\u{03C0}', '\u{03A3}', '\u{03C3}', '\u{00B5}', '\u{03C4}',
    '\u{03A6}', '\u{0398}', '\u{03A9}', '\u{03B4}', '\u{221E}', '\u{03C6}', '\u{03B5}', '\u{2229}',
    '\u{2261}', '\u{00B1}', '\u{2265}', '\u{2264}', '\u{2320}', '\u{2321}', '\u{00F7}', '\u{2248}',
    '\u{00B0}', '\u{2219}', '\u{00B7}', '\u{221A}', '\u{207F}', '\u{00B2}', '\u{25A0}', '\u{00A0}',
];

impl Charset {
    /// Decode `bytes` in this charset. Invalid UTF-8 sequences are replaced
    /// rather than rejected, names are metadata and never drive control flow.
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            Charset::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Charset::Latin1 => bytes.iter().map(|&b| b as char).collect(),
            Charset::Cp437 => bytes
                .iter()
                .map(|&b| {
                    if b < 0x80 {
                        b as char
                    } else {
                        CP437_HIGH[(b - 0x80) as usize]
                    }
                })
                .collect(),
        }
    }

    /// Decode up to (not including) the first NUL byte.
    pub fn decode_cstr(self, bytes: &[u8]) -> String {
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        self.decode(&bytes[..end])
    }

    /// Encode `text`, used by writers and test fixtures. Characters without a
    /// mapping become `?`.
    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            Charset::Utf8 => text.as_bytes().to_vec(),
            Charset::Latin1 => text
                .chars()
                .map(|c| if (c as u32) < 0x100 { c as u8 } else { b'?' })
                .collect(),
            Charset::Cp437 => text
                .chars()
                .map(|c| {
                    if c.is_ascii() {
                        c as u8
                    } else {
                        CP437_HIGH
                            .iter()
                            .position(|&m| m == c)
                            .map(|i| 0x80 + i as u8)
                            .unwrap_or(b'?')
                    }
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cp437_high_half() {
        assert_eq!(Charset::Cp437.decode(&[0x80, 0x81, 0xE1, 0xFF]), "\u{C7}\u{FC}\u{DF}\u{A0}");
        assert_eq!(Charset::Cp437.encode("\u{C7}a\u{263A}"), vec![0x80, b'a', b'?']);
    }

    #[test]
    fn cstr_stops_at_nul() {
        assert_eq!(Charset::Cp437.decode_cstr(b"name.txt\0garbage"), "name.txt");
        assert_eq!(Charset::Utf8.decode_cstr(b"no-nul"), "no-nul");
    }

    #[test]
    fn latin1_is_identity_on_code_points() {
        assert_eq!(Charset::Latin1.decode(&[0xE9]), "\u{E9}");
        assert_eq!(Charset::Latin1.encode("\u{E9}"), vec![0xE9]);
    }
}
