use std::collections::HashMap;
use std::rc::Rc;

use log::{trace, warn};

use crate::binxml::deserializer::ChunkCtx;
use crate::binxml::model::BinXmlTemplateDefinition;
use crate::binxml::tokens::{peek_next_template_offset, read_template_definition_data};
use crate::err::DeserializationResult;
use crate::utils::ByteCursor;
use crate::ChunkOffset;

/// Parsed template definitions of a chunk, keyed by their data offset.
///
/// Each table bucket heads a list of definitions chained through
/// `next_template_offset`; the whole chain is parsed so instances referencing
/// a chained definition hit the cache. Definitions are shared within the
/// chunk via `Rc`, which keeps chunks independent of each other and chunk
/// decoding lock-free.
#[derive(Debug, Default)]
pub struct TemplateCache(HashMap<ChunkOffset, Rc<BinXmlTemplateDefinition>>);

impl TemplateCache {
    pub(crate) fn populate(
        data: &[u8],
        offsets: &[ChunkOffset],
        carve_mode: bool,
    ) -> DeserializationResult<Self> {
        let mut cache: HashMap<ChunkOffset, Rc<BinXmlTemplateDefinition>> = HashMap::new();
        let ctx = ChunkCtx::empty();

        for &offset in offsets.iter().filter(|&&offset| offset > 0) {
            let mut table_offset = offset;

            loop {
                if cache.contains_key(&table_offset) {
                    break;
                }

                let definition = ByteCursor::with_pos(data, table_offset as usize)
                    .and_then(|mut cursor| {
                        let next = peek_next_template_offset(&cursor)?;
                        let definition = read_template_definition_data(&mut cursor, &ctx)?;
                        Ok((next, definition))
                    });

                let (next_template_offset, definition) = match definition {
                    Ok(parsed) => parsed,
                    Err(err) if carve_mode => {
                        warn!("Skipping broken template at offset {table_offset}: {err}");
                        break;
                    }
                    Err(err) => return Err(err),
                };

                cache.insert(table_offset, Rc::new(definition));

                trace!("Next template will be at {next_template_offset}");

                if next_template_offset == 0 || next_template_offset == table_offset {
                    break;
                }
                table_offset = next_template_offset;
            }
        }

        Ok(TemplateCache(cache))
    }

    pub(crate) fn get(&self, offset: ChunkOffset) -> Option<&Rc<BinXmlTemplateDefinition>> {
        self.0.get(&offset)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
