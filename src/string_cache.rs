use std::collections::HashMap;

use crate::binxml::name;
use crate::err::DeserializationResult;
use crate::utils::ByteCursor;
use crate::ChunkOffset;

/// Interned names of a chunk, keyed by their chunk-relative offset.
///
/// Only the bucket heads are parsed here; names chained behind a head (or
/// absent from the table entirely) resolve through a direct offset parse at
/// reference time.
#[derive(Debug, Default)]
pub struct StringCache(HashMap<ChunkOffset, String>);

impl StringCache {
    pub(crate) fn populate(data: &[u8], offsets: &[ChunkOffset]) -> DeserializationResult<Self> {
        let mut cache = HashMap::new();

        for &offset in offsets.iter().filter(|&&offset| offset > 0) {
            let mut cursor = ByteCursor::with_pos(data, offset as usize)?;
            cache.insert(offset, name::read_name(&mut cursor)?);
        }

        Ok(StringCache(cache))
    }

    pub fn get(&self, offset: ChunkOffset) -> Option<&str> {
        self.0.get(&offset).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binxml::name::encode_name;

    #[test]
    fn test_populate_skips_empty_buckets() {
        let mut data = vec![0u8; 64];
        let record = encode_name("Provider");
        data.extend_from_slice(&record);

        let cache = StringCache::populate(&data, &[0, 0, 64, 0]).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(64), Some("Provider"));
        assert_eq!(cache.get(4), None);
    }
}
