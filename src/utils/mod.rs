mod byte_cursor;
mod time;

pub(crate) use byte_cursor::ByteCursor;
pub(crate) use time::{datetime_from_filetime, format_utc, systime_from_bytes};

/// Decodes UTF-16LE bytes into a `String`, trimming trailing NUL code units.
///
/// Invalid code units become U+FFFD rather than failing the surrounding
/// record, which matters when carving dirty samples.
pub(crate) fn utf16le_to_string(bytes: &[u8]) -> String {
    let mut units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    while units.last() == Some(&0) {
        units.pop();
    }

    std::char::decode_utf16(units)
        .map(|r| r.unwrap_or(std::char::REPLACEMENT_CHARACTER))
        .collect()
}

/// Splits a UTF-16LE buffer on NUL code units, decoding each non-empty segment.
pub(crate) fn utf16le_split_on_nul(bytes: &[u8]) -> Vec<String> {
    let mut out = Vec::new();
    let mut segment: Vec<u16> = Vec::new();

    for pair in bytes.chunks_exact(2) {
        let unit = u16::from_le_bytes([pair[0], pair[1]]);
        if unit == 0 {
            if !segment.is_empty() {
                out.push(
                    std::char::decode_utf16(segment.drain(..))
                        .map(|r| r.unwrap_or(std::char::REPLACEMENT_CHARACTER))
                        .collect(),
                );
            }
            continue;
        }
        segment.push(unit);
    }

    if !segment.is_empty() {
        out.push(
            std::char::decode_utf16(segment)
                .map(|r| r.unwrap_or(std::char::REPLACEMENT_CHARACTER))
                .collect(),
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16le(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
    }

    #[test]
    fn test_utf16_round_trip_trims_trailing_nuls() {
        let mut bytes = utf16le("SystemRoot");
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        assert_eq!(utf16le_to_string(&bytes), "SystemRoot");
    }

    #[test]
    fn test_utf16_invalid_surrogate_is_replaced() {
        // Lone high surrogate
        let bytes = [0x00, 0xd8, 0x41, 0x00];
        assert_eq!(utf16le_to_string(&bytes), "\u{fffd}A");
    }

    #[test]
    fn test_split_on_nul() {
        let mut bytes = utf16le("first");
        bytes.extend_from_slice(&[0, 0]);
        bytes.extend(utf16le("second"));
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        assert_eq!(utf16le_split_on_nul(&bytes), vec!["first", "second"]);
    }
}
