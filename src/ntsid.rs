use std::fmt::{self, Debug, Display, Write};

use crate::err::DeserializationResult;
use crate::utils::ByteCursor;

/// A Windows NT security identifier.
///
/// On disk: `revision:u8, sub_authority_count:u8, authority:[6]u8` (big-endian
/// 48-bit number) followed by `sub_authority_count` little-endian u32 values.
#[derive(PartialOrd, PartialEq, Eq, Clone, Hash)]
pub struct Sid {
    revision: u8,
    authority: [u8; 6],
    sub_authorities: Vec<u32>,
}

impl Sid {
    pub(crate) fn from_cursor(cursor: &mut ByteCursor<'_>) -> DeserializationResult<Sid> {
        let revision = cursor.u8_named("sid.revision")?;
        let sub_authority_count = cursor.u8_named("sid.sub_authority_count")?;
        let authority = cursor.array::<6>("sid.authority")?;

        let mut sub_authorities = Vec::with_capacity(usize::from(sub_authority_count));
        for _ in 0..sub_authority_count {
            sub_authorities.push(cursor.u32_named("sid.sub_authority")?);
        }

        Ok(Sid {
            revision,
            authority,
            sub_authorities,
        })
    }

    fn authority_value(&self) -> u64 {
        self.authority
            .iter()
            .fold(0_u64, |acc, byte| (acc << 8) + u64::from(*byte))
    }
}

impl Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut repr = String::new();
        write!(repr, "S-{}-{}", self.revision, self.authority_value())
            .expect("writing to a String cannot fail");
        for sub in &self.sub_authorities {
            write!(repr, "-{sub}").expect("writing to a String cannot fail");
        }
        f.write_str(&repr)
    }
}

impl Debug for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_known_sid_display() {
        // S-1-5-18 (LocalSystem)
        let bytes = [
            0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x05, 0x12, 0x00, 0x00, 0x00,
        ];
        let mut cursor = ByteCursor::new(&bytes);
        let sid = Sid::from_cursor(&mut cursor).unwrap();
        assert_eq!(sid.to_string(), "S-1-5-18");
        assert_eq!(cursor.pos(), 12);
    }

    #[test]
    fn test_domain_sid_display() {
        let mut bytes = vec![0x01, 0x05, 0x00, 0x00, 0x00, 0x00, 0x00, 0x05];
        for sub in [21u32, 1111, 2222, 3333, 500] {
            bytes.extend_from_slice(&sub.to_le_bytes());
        }
        let mut cursor = ByteCursor::new(&bytes);
        let sid = Sid::from_cursor(&mut cursor).unwrap();
        assert_eq!(sid.to_string(), "S-1-5-21-1111-2222-3333-500");
    }

    #[test]
    fn test_truncated_sid_errors() {
        let bytes = [0x01, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x05, 0x12];
        let mut cursor = ByteCursor::new(&bytes);
        assert!(Sid::from_cursor(&mut cursor).is_err());
    }
}
