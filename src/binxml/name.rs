use crate::err::DeserializationResult;
use crate::utils::ByteCursor;

/// Reads an interned name record at the cursor.
///
/// Layout: `prev_string_offset:u32` (hash chain pointer, unused at decode
/// time), `hash:u16`, `char_count:u16`, then `char_count + 1` UTF-16LE code
/// units, NUL-terminated. Trailing NULs are trimmed from the decoded string.
pub(crate) fn read_name(cursor: &mut ByteCursor<'_>) -> DeserializationResult<String> {
    let _prev_string_offset = cursor.u32_named("name.prev_string_offset")?;
    let _hash = cursor.u16_named("name.hash")?;
    cursor.len_prefixed_utf16_string(true, "name.string")
}

#[cfg(test)]
pub(crate) fn encode_name(s: &str) -> Vec<u8> {
    let units: Vec<u16> = s.encode_utf16().collect();
    let mut out = Vec::with_capacity(10 + units.len() * 2);
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&(units.len() as u16).to_le_bytes());
    for unit in units {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out.extend_from_slice(&0u16.to_le_bytes());
    out
}
