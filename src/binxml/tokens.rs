use std::rc::Rc;

use log::{trace, warn};

use crate::binxml::deserializer::{parse_element, read_element_list, ChunkCtx};
use crate::binxml::model::{
    BinXmlAttribute, BinXmlFragmentHeader, BinXmlOpenStartElement, BinXmlTemplate,
    BinXmlTemplateDefinition, SubstitutionDescriptor,
};
use crate::binxml::name;
use crate::binxml::value_variant::BinXmlValue;
use crate::err::{DeserializationError, DeserializationResult};
use crate::guid::Guid;
use crate::utils::ByteCursor;

pub(crate) const TOKEN_EOF: u8 = 0x00;
pub(crate) const TOKEN_OPEN_START_ELEMENT: u8 = 0x01;
pub(crate) const TOKEN_OPEN_START_ELEMENT_WITH_ATTRS: u8 = 0x41;
pub(crate) const TOKEN_CLOSE_START_ELEMENT: u8 = 0x02;
pub(crate) const TOKEN_CLOSE_EMPTY_ELEMENT: u8 = 0x03;
pub(crate) const TOKEN_END_ELEMENT: u8 = 0x04;
pub(crate) const TOKEN_VALUE: u8 = 0x05;
pub(crate) const TOKEN_VALUE_WITH_MORE: u8 = 0x45;
pub(crate) const TOKEN_ATTRIBUTE_LAST: u8 = 0x06;
pub(crate) const TOKEN_ATTRIBUTE: u8 = 0x46;
pub(crate) const TOKEN_CHAR_ENTITY_REF: u8 = 0x08;
pub(crate) const TOKEN_CHAR_ENTITY_REF_WITH_MORE: u8 = 0x48;
pub(crate) const TOKEN_ENTITY_REF: u8 = 0x09;
pub(crate) const TOKEN_ENTITY_REF_WITH_MORE: u8 = 0x49;
pub(crate) const TOKEN_TEMPLATE_INSTANCE: u8 = 0x0c;
pub(crate) const TOKEN_NORMAL_SUBSTITUTION: u8 = 0x0d;
pub(crate) const TOKEN_OPTIONAL_SUBSTITUTION: u8 = 0x0e;
pub(crate) const TOKEN_FRAGMENT_HEADER: u8 = 0x0f;

const STRING_VALUE_TYPE: u8 = 0x01;

/// Substitution arrays are bounded by the chunk size.
const MAX_SUBSTITUTIONS: i32 = 0x10000;

/// The 24 bytes of a template definition preceding its fragment header
/// (`next_template_offset`, GUID and `data_size`).
const TEMPLATE_DEFINITION_HEADER_SIZE: usize = 24;

/// Resolves a name reference at the cursor.
///
/// If the offset points at the position right after it, the name record is
/// stored inline and parsed in place. Otherwise the name lives elsewhere in
/// the chunk: either it is already interned in the string cache, or the
/// cursor follows the offset and restores afterwards. Comparing the offset
/// against the cursor also means a name pointing at its own position can
/// never loop.
fn read_name_ref(cursor: &mut ByteCursor<'_>, ctx: &ChunkCtx<'_>) -> DeserializationResult<String> {
    let name_offset = cursor.u32_named("name_offset")?;

    if u64::from(name_offset) == cursor.position() {
        return name::read_name(cursor);
    }

    if let Some(cache) = ctx.strings {
        if let Some(cached) = cache.get(name_offset) {
            return Ok(cached.to_string());
        }
    }

    let backup = cursor.pos();
    cursor.set_pos(name_offset as usize, "far name")?;
    let parsed = name::read_name(cursor)?;
    cursor.set_pos(backup, "far name restore")?;
    Ok(parsed)
}

pub(crate) fn read_open_start_element(
    cursor: &mut ByteCursor<'_>,
    ctx: &ChunkCtx<'_>,
    has_attributes: bool,
    in_template: bool,
) -> DeserializationResult<BinXmlOpenStartElement> {
    trace!(
        "Offset `0x{:08x}` - OpenStartElement<has_attributes={}>",
        cursor.position(),
        has_attributes
    );

    let _token = cursor.u8_named("open start element token")?;

    // The dependency identifier is only present when the element start is
    // part of a template definition.
    if in_template {
        let _dependency_identifier = cursor.u16_named("dependency_identifier")?;
    }

    let _data_size = cursor.u32_named("element data size")?;
    let name = read_name_ref(cursor, ctx)?;

    let attributes = if has_attributes {
        let _attribute_list_size = cursor.u32_named("attribute list size")?;
        read_attribute_list(cursor, ctx)?
    } else {
        Vec::new()
    };

    // Peek the close token by reading and rewinding one byte, so the
    // surrounding element-list loop sees it as its own element.
    let close_token = cursor.u8_named("element close token")?;
    if close_token != TOKEN_CLOSE_START_ELEMENT && close_token != TOKEN_CLOSE_EMPTY_ELEMENT {
        return Err(DeserializationError::InvalidToken {
            value: close_token,
            offset: cursor.position() - 1,
        });
    }
    cursor.rewind(1, "element close token")?;

    Ok(BinXmlOpenStartElement { name, attributes })
}

fn read_attribute_list(
    cursor: &mut ByteCursor<'_>,
    ctx: &ChunkCtx<'_>,
) -> DeserializationResult<Vec<BinXmlAttribute>> {
    let mut attributes = Vec::new();
    loop {
        let token = cursor.u8_named("attribute token")?;
        if token != TOKEN_ATTRIBUTE && token != TOKEN_ATTRIBUTE_LAST {
            return Err(DeserializationError::InvalidToken {
                value: token,
                offset: cursor.position() - 1,
            });
        }

        let name = read_name_ref(cursor, ctx)?;
        let data = parse_element(cursor, ctx, false)?;
        attributes.push(BinXmlAttribute {
            name,
            data: Box::new(data),
        });

        // 0x06 marks the last attribute of the list.
        if token == TOKEN_ATTRIBUTE_LAST {
            return Ok(attributes);
        }
    }
}

/// Inline text content: `{token, type:u8 (must be string), count:u16, utf16}`.
pub(crate) fn read_value_text(cursor: &mut ByteCursor<'_>) -> DeserializationResult<String> {
    let _token = cursor.u8_named("value text token")?;
    let value_type = cursor.u8_named("value text type")?;
    if value_type != STRING_VALUE_TYPE {
        return Err(DeserializationError::UnexpectedValueType {
            expected: STRING_VALUE_TYPE,
            found: value_type,
            offset: cursor.position() - 1,
        });
    }

    let chars = cursor.u16_named("value text length")? as usize;
    cursor.utf16_by_size(chars * 2, "value text")
}

pub(crate) fn read_char_entity_ref(cursor: &mut ByteCursor<'_>) -> DeserializationResult<u16> {
    let _token = cursor.u8_named("char entity ref token")?;
    cursor.u16_named("char entity ref value")
}

/// An entity reference by name; the name record resolves like element names.
pub(crate) fn read_entity_ref(
    cursor: &mut ByteCursor<'_>,
    ctx: &ChunkCtx<'_>,
) -> DeserializationResult<String> {
    let _token = cursor.u8_named("entity ref token")?;
    read_name_ref(cursor, ctx)
}

pub(crate) fn read_substitution_descriptor(
    cursor: &mut ByteCursor<'_>,
) -> DeserializationResult<SubstitutionDescriptor> {
    let _token = cursor.u8_named("substitution token")?;
    let substitution_index = cursor.u16_named("substitution index")?;
    let value_type = cursor.u8_named("substitution value type")?;
    Ok(SubstitutionDescriptor {
        substitution_index,
        value_type,
    })
}

pub(crate) fn read_fragment_header(
    cursor: &mut ByteCursor<'_>,
) -> DeserializationResult<BinXmlFragmentHeader> {
    trace!("Offset `0x{:08x}` - FragmentHeader", cursor.position());
    let token = cursor.u8_named("fragment header token")?;
    if token != TOKEN_FRAGMENT_HEADER {
        return Err(DeserializationError::InvalidToken {
            value: token,
            offset: cursor.position() - 1,
        });
    }
    let major_version = cursor.u8_named("fragment header major version")?;
    let minor_version = cursor.u8_named("fragment header minor version")?;
    let flags = cursor.u8_named("fragment header flags")?;
    Ok(BinXmlFragmentHeader {
        major_version,
        minor_version,
        flags,
    })
}

/// Parses a template instance: the definition reference and the substitution
/// value array.
///
/// The definition may already be cached for this chunk. When it is, and its
/// body happens to be inlined right here (the first occurrence), the cursor
/// skips over it so the substitution array follows.
pub(crate) fn read_template_instance(
    cursor: &mut ByteCursor<'_>,
    ctx: &ChunkCtx<'_>,
) -> DeserializationResult<BinXmlTemplate> {
    trace!("TemplateInstance at {}", cursor.position());

    let _token = cursor.u8_named("template instance token")?;
    let _unknown = cursor.u8_named("template instance unknown")?;
    let _template_id = cursor.u32_named("template id")?;
    let data_offset = cursor.u32_named("template definition data offset")?;

    let cached = ctx.templates.and_then(|cache| cache.get(data_offset)).cloned();

    let definition = match cached {
        Some(definition) => {
            if cursor.position() == u64::from(data_offset) {
                trace!(
                    "Skipping {} bytes of an already cached template",
                    definition.data_size
                );
                cursor.advance(
                    TEMPLATE_DEFINITION_HEADER_SIZE + definition.data_size as usize,
                    "cached template definition",
                )?;
            }
            definition
        }
        None => {
            let backup = cursor.pos();
            let needs_seek = u64::from(data_offset) != cursor.position();
            if needs_seek {
                cursor.set_pos(data_offset as usize, "template definition")?;
            }
            let definition = Rc::new(read_template_definition_data(cursor, ctx)?);
            if needs_seek {
                cursor.set_pos(backup, "template definition restore")?;
            }
            definition
        }
    };

    let substitutions = read_substitution_array(cursor, ctx)?;

    Ok(BinXmlTemplate {
        definition,
        substitutions,
    })
}

/// Parses a template definition body at the cursor:
/// `{next_template_offset, guid, data_size, fragment header, elements…, EOF}`.
pub(crate) fn read_template_definition_data(
    cursor: &mut ByteCursor<'_>,
    ctx: &ChunkCtx<'_>,
) -> DeserializationResult<BinXmlTemplateDefinition> {
    let _next_template_offset = cursor.u32_named("next_template_offset")?;
    let guid = Guid::from_cursor(cursor)?;
    // data_size covers the fragment header through the EOF token
    let data_size = cursor.u32_named("template data size")?;

    let _fragment_header = read_fragment_header(cursor)?;
    let elements = read_element_list(cursor, ctx, true)?;

    Ok(BinXmlTemplateDefinition {
        guid,
        data_size,
        elements,
    })
}

/// The chain pointer of a template definition, without consuming anything
/// else. Used by the template cache to walk buckets.
pub(crate) fn peek_next_template_offset(
    cursor: &ByteCursor<'_>,
) -> DeserializationResult<u32> {
    let mut probe = *cursor;
    probe.u32_named("next_template_offset")
}

struct ValueDescriptor {
    size: u16,
    value_type: u8,
}

/// Parses the substitution array of a template instance:
/// `{count, descriptors, values}`.
pub(crate) fn read_substitution_array(
    cursor: &mut ByteCursor<'_>,
    ctx: &ChunkCtx<'_>,
) -> DeserializationResult<Vec<BinXmlValue>> {
    let count = cursor.i32_named("substitution count")?;
    if !(0..=MAX_SUBSTITUTIONS).contains(&count) {
        return Err(DeserializationError::TooManySubstitutions {
            count: i64::from(count),
        });
    }

    let mut descriptors = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let size = cursor.u16_named("value descriptor size")?;
        let value_type = cursor.u8_named("value descriptor type")?;
        let _unused = cursor.u8_named("value descriptor padding")?;
        descriptors.push(ValueDescriptor { size, value_type });
    }

    let mut values = Vec::with_capacity(descriptors.len());
    for descriptor in descriptors {
        let start = cursor.position();
        trace!(
            "substitution value type 0x{:02x} (size {}) at {}",
            descriptor.value_type,
            descriptor.size,
            start
        );

        let value =
            BinXmlValue::deserialize_sized(descriptor.value_type, descriptor.size, cursor, ctx)?;

        // A null substitution means the slot was deleted, its payload is
        // still present and needs skipping.
        if value == BinXmlValue::Null {
            cursor.advance(usize::from(descriptor.size), "null substitution payload")?;
        }

        let expected = start + u64::from(descriptor.size);
        if cursor.position() != expected {
            // Occurs with dirty samples; the rest of the record is usually
            // still recoverable.
            warn!(
                "Read an incorrect amount of data for value type 0x{:02x}: cursor at {}, should be at {}",
                descriptor.value_type,
                cursor.position(),
                expected
            );
            cursor.set_pos(expected as usize, "substitution value realignment")?;
        }

        values.push(value);
    }

    Ok(values)
}
