use crate::binxml::model::{BinXmlElement, BinXmlTemplate};
use crate::binxml::tokens::{
    self, TOKEN_CLOSE_EMPTY_ELEMENT, TOKEN_CLOSE_START_ELEMENT, TOKEN_END_ELEMENT, TOKEN_EOF,
    TOKEN_FRAGMENT_HEADER, TOKEN_TEMPLATE_INSTANCE,
};
use crate::err::{DeserializationError, DeserializationResult};
use crate::string_cache::StringCache;
use crate::template_cache::TemplateCache;
use crate::utils::ByteCursor;

use log::trace;

/// Intra-chunk context handed through the token parser.
///
/// Both caches are optional: template definitions and embedded fragments are
/// parsed before (or without) a fully initialized chunk, in which case names
/// and templates resolve by following offsets directly.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct ChunkCtx<'a> {
    pub strings: Option<&'a StringCache>,
    pub templates: Option<&'a TemplateCache>,
}

impl<'a> ChunkCtx<'a> {
    pub(crate) fn empty() -> ChunkCtx<'static> {
        ChunkCtx {
            strings: None,
            templates: None,
        }
    }

    pub(crate) fn new(strings: &'a StringCache, templates: &'a TemplateCache) -> ChunkCtx<'a> {
        ChunkCtx {
            strings: Some(strings),
            templates: Some(templates),
        }
    }
}

/// Parses one BinXML element, dispatching on the next byte.
///
/// The dispatch byte is peeked, not consumed; each branch parser reads its own
/// token so the on-disk layout stays visible in one place.
///
/// `in_template` mirrors the layout difference documented in MS-EVEN6: element
/// starts inside template definitions (and inside embedded BinXML values)
/// carry a dependency identifier, naked event documents do not.
pub(crate) fn parse_element(
    cursor: &mut ByteCursor<'_>,
    ctx: &ChunkCtx<'_>,
    in_template: bool,
) -> DeserializationResult<BinXmlElement> {
    let token = cursor.peek_u8().map_err(|_| DeserializationError::Truncated {
        what: "binxml token",
        offset: cursor.position(),
        need: 1,
        have: 0,
    })?;

    trace!("token 0x{:02x} at offset {}", token, cursor.position());

    match token {
        TOKEN_EOF => {
            cursor.advance(1, "eof token")?;
            Ok(BinXmlElement::Eof)
        }
        tokens::TOKEN_OPEN_START_ELEMENT | tokens::TOKEN_OPEN_START_ELEMENT_WITH_ATTRS => {
            let has_attributes = token == tokens::TOKEN_OPEN_START_ELEMENT_WITH_ATTRS;
            Ok(BinXmlElement::OpenStartElement(
                tokens::read_open_start_element(cursor, ctx, has_attributes, in_template)?,
            ))
        }
        TOKEN_CLOSE_START_ELEMENT => {
            cursor.advance(1, "close start element token")?;
            Ok(BinXmlElement::CloseStartElement)
        }
        TOKEN_CLOSE_EMPTY_ELEMENT => {
            cursor.advance(1, "close empty element token")?;
            Ok(BinXmlElement::CloseEmptyElement)
        }
        TOKEN_END_ELEMENT => {
            cursor.advance(1, "end element token")?;
            Ok(BinXmlElement::EndElement)
        }
        tokens::TOKEN_VALUE | tokens::TOKEN_VALUE_WITH_MORE => {
            Ok(BinXmlElement::ValueText(tokens::read_value_text(cursor)?))
        }
        tokens::TOKEN_CHAR_ENTITY_REF | tokens::TOKEN_CHAR_ENTITY_REF_WITH_MORE => Ok(
            BinXmlElement::CharEntityRef(tokens::read_char_entity_ref(cursor)?),
        ),
        tokens::TOKEN_ENTITY_REF | tokens::TOKEN_ENTITY_REF_WITH_MORE => {
            Ok(BinXmlElement::EntityRef(tokens::read_entity_ref(cursor, ctx)?))
        }
        TOKEN_TEMPLATE_INSTANCE => Ok(BinXmlElement::TemplateInstance(
            tokens::read_template_instance(cursor, ctx)?,
        )),
        tokens::TOKEN_NORMAL_SUBSTITUTION => Ok(BinXmlElement::NormalSubstitution(
            tokens::read_substitution_descriptor(cursor)?,
        )),
        tokens::TOKEN_OPTIONAL_SUBSTITUTION => Ok(BinXmlElement::OptionalSubstitution(
            tokens::read_substitution_descriptor(cursor)?,
        )),
        TOKEN_FRAGMENT_HEADER => Ok(BinXmlElement::FragmentHeader(tokens::read_fragment_header(
            cursor,
        )?)),
        value => Err(DeserializationError::InvalidToken {
            value,
            offset: cursor.position(),
        }),
    }
}

/// Parses elements until the EOF marker, which is consumed but not returned.
pub(crate) fn read_element_list(
    cursor: &mut ByteCursor<'_>,
    ctx: &ChunkCtx<'_>,
    in_template: bool,
) -> DeserializationResult<Vec<BinXmlElement>> {
    let mut elements = Vec::new();
    loop {
        let element = parse_element(cursor, ctx, in_template)?;
        if element == BinXmlElement::Eof {
            return Ok(elements);
        }
        elements.push(element);
    }
}

/// Parses a full BinXML fragment: the fragment header followed by exactly one
/// document element.
///
/// Both fragment shapes normalize to a template instance. A naked document (an
/// element start rather than a template instance) is wrapped in a synthesized
/// instance with an empty substitution array, so the materializer has a single
/// code path.
pub(crate) fn parse_fragment(
    cursor: &mut ByteCursor<'_>,
    ctx: &ChunkCtx<'_>,
    in_template: bool,
) -> DeserializationResult<BinXmlTemplate> {
    let _header = tokens::read_fragment_header(cursor)?;

    match cursor.peek_u8()? {
        TOKEN_TEMPLATE_INSTANCE => tokens::read_template_instance(cursor, ctx),
        tokens::TOKEN_OPEN_START_ELEMENT | tokens::TOKEN_OPEN_START_ELEMENT_WITH_ATTRS => {
            let elements = read_element_list(cursor, ctx, in_template)?;
            Ok(BinXmlTemplate::synthesized(elements))
        }
        value => Err(DeserializationError::InvalidToken {
            value,
            offset: cursor.position(),
        }),
    }
}
