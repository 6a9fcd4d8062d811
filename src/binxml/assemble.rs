use log::warn;

use crate::binxml::model::{BinXmlElement, BinXmlOpenStartElement, BinXmlTemplate, SubstitutionDescriptor};
use crate::binxml::value_variant::BinXmlValue;
use crate::err::{DeserializationError, DeserializationResult};
use crate::event_map::{EventMap, MapValue, XMLNS_PATH};

/// Materializes a normalized fragment into an event map and scrubs the
/// conventional `xmlns` attribute from the document element.
pub(crate) fn event_map(
    template: &BinXmlTemplate,
    carve_mode: bool,
) -> DeserializationResult<EventMap> {
    let mut map = template_to_map(template, carve_mode)?;
    map.del(XMLNS_PATH);
    Ok(map)
}

fn template_to_map(
    template: &BinXmlTemplate,
    carve_mode: bool,
) -> DeserializationResult<EventMap> {
    let (root, _) = build_node(&template.definition.elements, 0);
    node_to_map(&root, template, carve_mode)
}

/// A reconstructed element tree node: the opening element, the inline content
/// in document order, and the child elements.
#[derive(Default)]
struct Node<'a> {
    start: Option<&'a BinXmlOpenStartElement>,
    content: Vec<&'a BinXmlElement>,
    children: Vec<Node<'a>>,
}

/// Folds the flat element list back into a tree. Each element start opens a
/// child scope, end-element and close-empty-element pop it, and the
/// close-start-element delimiter is skipped.
fn build_node<'a>(elements: &'a [BinXmlElement], mut index: usize) -> (Node<'a>, usize) {
    let mut node = Node::default();

    while index < elements.len() {
        match &elements[index] {
            BinXmlElement::OpenStartElement(start) => {
                let (mut child, next) = build_node(elements, index + 1);
                child.start = Some(start);
                node.children.push(child);
                index = next;
            }
            BinXmlElement::EndElement | BinXmlElement::CloseEmptyElement => {
                return (node, index);
            }
            BinXmlElement::CloseStartElement => {}
            element => node.content.push(element),
        }
        index += 1;
    }

    (node, index)
}

fn node_to_map(
    node: &Node<'_>,
    template: &BinXmlTemplate,
    carve_mode: bool,
) -> DeserializationResult<EventMap> {
    // The synthetic root produced by tree reconstruction wraps the single
    // document element.
    if node.start.is_none() && node.children.len() == 1 {
        let child = &node.children[0];
        let name = child
            .start
            .map(|start| start.name.clone())
            .unwrap_or_default();
        let mut map = EventMap::new();
        map.insert(name, MapValue::Map(node_to_map(child, template, carve_mode)?));
        return Ok(map);
    }

    let mut map = EventMap::new();

    for (i, child) in node.children.iter().enumerate() {
        let child_map = node_to_map(child, template, carve_mode)?;

        // Forwarded logs occasionally carry `<Data Name="X"/>` with no value
        // at all; surface those as an empty string under the name.
        if child_map.len() == 1 {
            if let Some(MapValue::String(name)) = child_map.get_key("Name") {
                map.insert(name.clone(), MapValue::String(String::new()));
                continue;
            }
        }

        // The common `<Data Name="X">value</Data>` shape collapses into a
        // direct `X: value` entry.
        if child_map.len() == 2 && child_map.contains_key("Value") {
            if let Some(MapValue::String(name)) = child_map.get_key("Name") {
                let value = child_map
                    .get_key("Value")
                    .cloned()
                    .unwrap_or(MapValue::Null);
                map.insert(name.clone(), value);
                continue;
            }
        }

        // node.start can be absent for damaged elements in carving mode
        let mut name = child
            .start
            .map(|start| start.name.clone())
            .unwrap_or_default();
        if map.contains_key(&name) {
            name = format!("{name}{i}");
        }

        // A lone `Value` key is hoisted directly under the element name.
        if child_map.len() == 1 && child_map.contains_key("Value") {
            let value = child_map
                .get_key("Value")
                .cloned()
                .unwrap_or(MapValue::Null);
            map.insert(name, value);
        } else {
            map.insert(name, MapValue::Map(child_map));
        }
    }

    for element in &node.content {
        match element_value(element, template, carve_mode)? {
            None => {}
            Some(MapValue::Map(nested)) => {
                // A nested template merges its keys into the containing node.
                if let Err(err) = map.add(nested) {
                    if !carve_mode {
                        return Err(DeserializationError::UnexpectedContentElement {
                            what: "colliding nested template key",
                        });
                    }
                    warn!("Dropping nested template content: {err}");
                }
            }
            Some(MapValue::String(text)) => match map.get_key("Value") {
                Some(MapValue::String(existing)) => {
                    let mut combined = existing.clone();
                    combined.push_str(&text);
                    map.insert("Value", MapValue::String(combined));
                }
                _ => {
                    map.insert("Value", MapValue::String(text));
                }
            },
            Some(value) => {
                map.insert("Value", value);
            }
        }
    }

    if let Some(start) = node.start {
        for attribute in &start.attributes {
            // Null-valued attributes are omitted.
            if let Some(value) = element_value(&attribute.data, template, carve_mode)? {
                map.insert(attribute.name.clone(), value);
            }
        }
    }

    Ok(map)
}

fn resolve_substitution(
    descriptor: &SubstitutionDescriptor,
    template: &BinXmlTemplate,
    carve_mode: bool,
) -> DeserializationResult<Option<MapValue>> {
    match template
        .substitutions
        .get(usize::from(descriptor.substitution_index))
    {
        Some(value) => value_to_map_value(value, carve_mode),
        None if carve_mode => Ok(None),
        None => Err(DeserializationError::SubstitutionIndexOutOfRange {
            index: descriptor.substitution_index,
            count: template.substitutions.len(),
        }),
    }
}

/// Converts one inline content (or attribute data) element into a map value.
/// `None` means the element is omitted from the parent map.
fn element_value(
    element: &BinXmlElement,
    template: &BinXmlTemplate,
    carve_mode: bool,
) -> DeserializationResult<Option<MapValue>> {
    match element {
        BinXmlElement::ValueText(text) => Ok(Some(MapValue::String(text.clone()))),
        BinXmlElement::NormalSubstitution(descriptor)
        | BinXmlElement::OptionalSubstitution(descriptor) => {
            resolve_substitution(descriptor, template, carve_mode)
        }
        BinXmlElement::TemplateInstance(nested) => Ok(Some(MapValue::Map(template_to_map(
            nested, carve_mode,
        )?))),
        BinXmlElement::EntityRef(name) => match resolve_entity(name) {
            Some(text) => Ok(Some(MapValue::String(text.to_string()))),
            None if carve_mode => {
                warn!("Unknown entity reference `{name}`");
                Ok(None)
            }
            None => Err(DeserializationError::UnknownEntityRef { name: name.clone() }),
        },
        BinXmlElement::CharEntityRef(value) => Ok(char::from_u32(u32::from(*value))
            .map(|c| MapValue::String(c.to_string()))),
        element => {
            if carve_mode {
                warn!("Skipping content element `{}`", element.kind());
                Ok(None)
            } else {
                Err(DeserializationError::UnexpectedContentElement {
                    what: element.kind(),
                })
            }
        }
    }
}

fn resolve_entity(name: &str) -> Option<&'static str> {
    match name {
        "amp" => Some("&"),
        "lt" => Some("<"),
        "gt" => Some(">"),
        "quot" => Some("\""),
        "apos" => Some("'"),
        _ => None,
    }
}

/// The native representation of a decoded value inside an event map.
fn value_to_map_value(
    value: &BinXmlValue,
    carve_mode: bool,
) -> DeserializationResult<Option<MapValue>> {
    let converted = match value {
        BinXmlValue::Null => return Ok(None),
        BinXmlValue::String(s) => MapValue::String(s.clone()),
        BinXmlValue::AnsiString(bytes) => {
            let mut s = String::from_utf8_lossy(bytes).into_owned();
            while s.ends_with('\0') {
                s.pop();
            }
            MapValue::String(s)
        }
        BinXmlValue::Int8(v) => MapValue::Int(i64::from(*v)),
        BinXmlValue::Int16(v) => MapValue::Int(i64::from(*v)),
        BinXmlValue::Int32(v) => MapValue::Int(i64::from(*v)),
        BinXmlValue::Int64(v) => MapValue::Int(*v),
        BinXmlValue::UInt8(v) => MapValue::UInt(u64::from(*v)),
        BinXmlValue::UInt16(v) => MapValue::UInt(u64::from(*v)),
        BinXmlValue::UInt32(v) => MapValue::UInt(u64::from(*v)),
        BinXmlValue::UInt64(v) => MapValue::UInt(*v),
        BinXmlValue::Real32(v) => MapValue::Float(f64::from(*v)),
        BinXmlValue::Real64(v) => MapValue::Float(*v),
        BinXmlValue::Bool(v) => MapValue::Bool(*v),
        BinXmlValue::Binary(bytes) => MapValue::Binary(bytes.clone()),
        BinXmlValue::Guid(guid) => MapValue::String(guid.to_string()),
        BinXmlValue::FileTime(t) | BinXmlValue::SysTime(t) => MapValue::Time(*t),
        BinXmlValue::Sid(sid) => MapValue::String(sid.to_string()),
        BinXmlValue::HexInt32(v) => MapValue::String(format!("0x{v:08x}")),
        BinXmlValue::HexInt64(v) => MapValue::String(format!("0x{v:016x}")),
        BinXmlValue::BinXml(nested) => MapValue::Map(template_to_map(nested, carve_mode)?),
        BinXmlValue::StringArray(values) => MapValue::StringArray(values.clone()),
        BinXmlValue::UInt16Array(values) => MapValue::UInt16Array(values.clone()),
        BinXmlValue::UInt64Array(values) => MapValue::UInt64Array(values.clone()),
        BinXmlValue::Unknown { value_type, offset } => MapValue::String(format!(
            "unknown value type 0x{value_type:02x} at offset 0x{offset:08x}"
        )),
    };

    Ok(Some(converted))
}
