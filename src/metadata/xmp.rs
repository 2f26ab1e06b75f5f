//! XMP packet parsing
//!
//! Builds a small element tree with quick-xml, then reads RDF properties off
//! each top-level `rdf:Description`: attributes become simple properties,
//! `rdf:Bag`/`rdf:Seq` become lists, `rdf:Alt` takes its first item, and
//! structs become maps.

use std::collections::BTreeMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::{MetaValue, MetadataError, RawMetadata};

const MAX_DEPTH: usize = 64;

#[derive(Debug, Default)]
struct Node {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<Node>,
    text: String,
}

impl Node {
    fn from_start(start: &BytesStart<'_>) -> Result<Self, MetadataError> {
        let mut attrs = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            attrs.push((key, value));
        }

        Ok(Self {
            name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
            attrs,
            ..Default::default()
        })
    }

    fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Attributes that carry property values
    fn property_attrs(&self) -> impl Iterator<Item = &(String, String)> {
        self.attrs.iter().filter(|(k, _)| {
            !k.starts_with("xmlns") && !k.starts_with("rdf:") && !k.starts_with("xml:")
        })
    }
}

/// Parse an XMP packet into `XMP:<qname>` keyed properties
pub(crate) fn parse(packet: &[u8]) -> Result<RawMetadata, MetadataError> {
    let text = String::from_utf8_lossy(packet);
    let root = build_tree(&text)?;

    let mut out = RawMetadata::new();
    let mut descriptions = Vec::new();
    find_descriptions(&root, &mut descriptions);

    for description in descriptions {
        for (key, value) in description.property_attrs() {
            out.insert(format!("XMP:{}", key), MetaValue::text(value.clone()));
        }
        for child in &description.children {
            out.insert(format!("XMP:{}", child.name), value_of(child, 0));
        }
    }

    Ok(out)
}

fn build_tree(text: &str) -> Result<Node, MetadataError> {
    let mut reader = Reader::from_str(text);
    reader.trim_text(true);

    let mut stack = vec![Node::default()];

    loop {
        match reader.read_event()? {
            Event::Start(start) => {
                if stack.len() > MAX_DEPTH {
                    return Err(MetadataError::Malformed("XMP nesting too deep".to_string()));
                }
                stack.push(Node::from_start(&start)?);
            }
            Event::Empty(start) => {
                let node = Node::from_start(&start)?;
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                }
            }
            Event::End(_) => {
                if stack.len() > 1 {
                    if let Some(node) = stack.pop() {
                        if let Some(parent) = stack.last_mut() {
                            parent.children.push(node);
                        }
                    }
                }
            }
            Event::Text(text) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&text.unescape()?);
                }
            }
            Event::CData(data) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    // unclosed elements still count
    while stack.len() > 1 {
        if let Some(node) = stack.pop() {
            if let Some(parent) = stack.last_mut() {
                parent.children.push(node);
            }
        }
    }

    stack
        .pop()
        .ok_or_else(|| MetadataError::Malformed("empty XMP tree".to_string()))
}

fn find_descriptions<'a>(node: &'a Node, out: &mut Vec<&'a Node>) {
    for child in &node.children {
        if child.name == "rdf:Description" && node.name == "rdf:RDF" {
            out.push(child);
        } else {
            find_descriptions(child, out);
        }
    }
}

fn value_of(node: &Node, depth: usize) -> MetaValue {
    if depth > MAX_DEPTH {
        return MetaValue::Null;
    }

    if let Some(resource) = node.attr("rdf:resource") {
        return MetaValue::text(resource);
    }

    if node.children.is_empty() {
        let mut fields = node.property_attrs().peekable();
        if node.text.is_empty() && fields.peek().is_some() {
            return MetaValue::Map(
                fields
                    .map(|(k, v)| (k.clone(), MetaValue::text(v.clone())))
                    .collect(),
            );
        }
        return MetaValue::text(node.text.clone());
    }

    if let [container] = node.children.as_slice() {
        match container.name.as_str() {
            "rdf:Bag" | "rdf:Seq" => {
                return MetaValue::List(
                    container
                        .children
                        .iter()
                        .filter(|li| li.name == "rdf:li")
                        .map(|li| value_of(li, depth + 1))
                        .collect(),
                );
            }
            "rdf:Alt" => {
                return container
                    .children
                    .iter()
                    .find(|li| li.name == "rdf:li")
                    .map(|li| value_of(li, depth + 1))
                    .unwrap_or(MetaValue::Null);
            }
            "rdf:Description" => return struct_of(container, depth + 1),
            _ => {}
        }
    }

    struct_of(node, depth)
}

fn struct_of(node: &Node, depth: usize) -> MetaValue {
    let mut fields: BTreeMap<String, MetaValue> = node
        .property_attrs()
        .map(|(k, v)| (k.clone(), MetaValue::text(v.clone())))
        .collect();
    for child in &node.children {
        fields.insert(child.name.clone(), value_of(child, depth + 1));
    }
    MetaValue::Map(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xpacket begin="" id="W5M0MpCehiHzreSzNTczkc9d"?>
<x:xmpmeta xmlns:x="adobe:ns:meta/">
 <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
  <rdf:Description rdf:about="" xmlns:dc="http://purl.org/dc/elements/1.1/"
      xmlns:xmp="http://ns.adobe.com/xap/1.0/"
      xmlns:Iptc4xmpCore="http://iptc.org/std/Iptc4xmpCore/1.0/xmlns/"
      xmp:CreatorTool="Scanner 3000">
   <dc:creator><rdf:Seq><rdf:li>Ada Archivist</rdf:li></rdf:Seq></dc:creator>
   <dc:subject><rdf:Bag><rdf:li>maps</rdf:li><rdf:li>1820s</rdf:li></rdf:Bag></dc:subject>
   <dc:title><rdf:Alt><rdf:li xml:lang="x-default">Harbour &amp; Quay</rdf:li></rdf:Alt></dc:title>
   <Iptc4xmpCore:CreatorContactInfo rdf:parseType="Resource">
    <Iptc4xmpCore:CiAdrCity>Lisbon</Iptc4xmpCore:CiAdrCity>
   </Iptc4xmpCore:CreatorContactInfo>
  </rdf:Description>
 </rdf:RDF>
</x:xmpmeta>
<?xpacket end="w"?>"#;

    #[test]
    fn test_attribute_property() {
        let meta = parse(SAMPLE.as_bytes()).unwrap();
        assert_eq!(meta.get("XMP:xmp:CreatorTool"), Some(&MetaValue::text("Scanner 3000")));
    }

    #[test]
    fn test_arrays() {
        let meta = parse(SAMPLE.as_bytes()).unwrap();
        assert_eq!(
            meta.get("XMP:dc:subject"),
            Some(&MetaValue::List(vec![MetaValue::text("maps"), MetaValue::text("1820s")]))
        );
        assert_eq!(
            meta.get("XMP:dc:creator"),
            Some(&MetaValue::List(vec![MetaValue::text("Ada Archivist")]))
        );
        assert_eq!(meta.get("XMP:dc:title"), Some(&MetaValue::text("Harbour & Quay")));
    }

    #[test]
    fn test_struct_property() {
        let meta = parse(SAMPLE.as_bytes()).unwrap();
        let Some(MetaValue::Map(fields)) = meta.get("XMP:Iptc4xmpCore:CreatorContactInfo") else {
            panic!("expected struct");
        };
        assert_eq!(
            fields.get("Iptc4xmpCore:CiAdrCity"),
            Some(&MetaValue::text("Lisbon"))
        );
    }

    #[test]
    fn test_mismatched_tags_error() {
        let broken = "<x:xmpmeta><rdf:RDF><rdf:Description></rdf:RDF></x:xmpmeta>";
        assert!(parse(broken.as_bytes()).is_err());
    }
}
