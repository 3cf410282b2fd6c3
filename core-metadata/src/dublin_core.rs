//! Dublin Core XML parsing
//!
//! Extracts the children of the first `<dc>` element (any namespace prefix,
//! e.g. `oai_dc:dc`) as an ordered list of `(name, value)` pairs. Element
//! names are local names, so `<dc:title>` is reported as `title` and
//! qualified forms such as `<identifier.thumbnail>` keep their dotted name.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{MetadataError, Result};

/// The fifteen unqualified Dublin Core elements.
pub const DC_ELEMENTS: &[&str] = &[
    "title",
    "creator",
    "subject",
    "description",
    "publisher",
    "contributor",
    "date",
    "type",
    "format",
    "identifier",
    "source",
    "language",
    "relation",
    "coverage",
    "rights",
];

/// One child element of `<dc>` with its trimmed text content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DcElement {
    pub name: String,
    pub value: String,
}

/// Parsed Dublin Core record in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DublinCoreRecord {
    elements: Vec<DcElement>,
}

impl DublinCoreRecord {
    /// Parse raw record bytes.
    ///
    /// # Errors
    ///
    /// `MalformedXml` for syntax errors or an unterminated document,
    /// `MissingDublinCore` when no `<dc>` element exists.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::from_reader(bytes);
        reader.config_mut().trim_text(true);

        let mut buf = Vec::new();
        let mut depth = 0usize;
        // Depth of the <dc> element once entered.
        let mut dc_depth: Option<usize> = None;
        let mut seen_dc = false;
        let mut current: Option<(String, String)> = None;
        let mut elements = Vec::new();

        loop {
            let event = reader.read_event_into(&mut buf).map_err(|e| {
                MetadataError::MalformedXml(format!(
                    "at byte {}: {}",
                    reader.buffer_position(),
                    e
                ))
            })?;

            match event {
                Event::Start(start) => {
                    depth += 1;
                    let name = local_name(start.local_name().as_ref())?;
                    match dc_depth {
                        None if !seen_dc && name == "dc" => {
                            dc_depth = Some(depth);
                            seen_dc = true;
                        }
                        Some(dc) if depth == dc + 1 => {
                            current = Some((name, String::new()));
                        }
                        _ => {}
                    }
                }
                Event::Empty(empty) => {
                    let name = local_name(empty.local_name().as_ref())?;
                    if dc_depth.is_none() && !seen_dc && name == "dc" {
                        seen_dc = true;
                    }
                }
                Event::Text(text) => {
                    if let Some((_, value)) = current.as_mut() {
                        let unescaped = text
                            .unescape()
                            .map_err(|e| MetadataError::MalformedXml(e.to_string()))?;
                        append_text(value, &unescaped);
                    }
                }
                Event::CData(cdata) => {
                    if let Some((_, value)) = current.as_mut() {
                        let raw = cdata.into_inner();
                        append_text(value, &String::from_utf8_lossy(&raw));
                    }
                }
                Event::End(_) => {
                    if let Some(dc) = dc_depth {
                        if depth == dc + 1 {
                            if let Some((name, value)) = current.take() {
                                let value = value.trim();
                                if !value.is_empty() {
                                    elements.push(DcElement {
                                        name,
                                        value: value.to_string(),
                                    });
                                }
                            }
                        } else if depth == dc {
                            dc_depth = None;
                        }
                    }
                    depth = depth.saturating_sub(1);
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        if depth != 0 {
            return Err(MetadataError::MalformedXml(
                "document ended before all elements were closed".to_string(),
            ));
        }
        if !seen_dc {
            return Err(MetadataError::MissingDublinCore);
        }

        Ok(Self { elements })
    }

    pub fn elements(&self) -> &[DcElement] {
        &self.elements
    }

    /// Values of every element whose name equals `name`, in document order.
    pub fn values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.elements
            .iter()
            .filter(move |e| e.name == name)
            .map(|e| e.value.as_str())
    }

    /// Values of every element whose name satisfies `predicate`.
    pub fn values_where<'a, F>(&'a self, predicate: F) -> impl Iterator<Item = &'a str> + 'a
    where
        F: Fn(&str) -> bool + 'a,
    {
        self.elements
            .iter()
            .filter(move |e| predicate(&e.name))
            .map(|e| e.value.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

fn local_name(raw: &[u8]) -> Result<String> {
    std::str::from_utf8(raw)
        .map(str::to_string)
        .map_err(|e| MetadataError::MalformedXml(format!("element name is not UTF-8: {}", e)))
}

fn append_text(value: &mut String, text: &str) {
    if !value.is_empty() {
        value.push(' ');
    }
    value.push_str(text);
}

#[cfg(test)]
mod tests {
    use super::*;

    const OAI_DC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<record>
  <metadata>
    <oai_dc:dc xmlns:oai_dc="http://www.openarchives.org/OAI/2.0/oai_dc/"
               xmlns:dc="http://purl.org/dc/elements/1.1/">
      <dc:title>Map of Fiji</dc:title>
      <dc:title>Alternate &amp; title</dc:title>
      <dc:date>1920</dc:date>
      <dc:identifier>http://example.edu/items/123</dc:identifier>
      <dc:identifier.thumbnail>http://example.edu/thumbs/123.jpg</dc:identifier.thumbnail>
      <dc:description><![CDATA[A <rare> map]]></dc:description>
      <dc:subject></dc:subject>
    </oai_dc:dc>
  </metadata>
</record>"#;

    #[test]
    fn test_parse_collects_children_in_order() {
        let record = DublinCoreRecord::parse(OAI_DC.as_bytes()).unwrap();
        let names: Vec<&str> = record.elements().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["title", "title", "date", "identifier", "identifier.thumbnail", "description"]
        );
        assert_eq!(
            record.values("title").collect::<Vec<_>>(),
            vec!["Map of Fiji", "Alternate & title"]
        );
        assert_eq!(record.values("description").next(), Some("A <rare> map"));
    }

    #[test]
    fn test_values_where_prefix() {
        let record = DublinCoreRecord::parse(OAI_DC.as_bytes()).unwrap();
        let qualified: Vec<&str> = record
            .values_where(|name| name.starts_with("identifier."))
            .collect();
        assert_eq!(qualified, vec!["http://example.edu/thumbs/123.jpg"]);
    }

    #[test]
    fn test_empty_dc_is_valid() {
        let record = DublinCoreRecord::parse(b"<dc/>").unwrap();
        assert!(record.is_empty());

        let record = DublinCoreRecord::parse(b"<dc></dc>").unwrap();
        assert!(record.is_empty());
    }

    #[test]
    fn test_missing_dc_element() {
        let error = DublinCoreRecord::parse(b"<record><title>x</title></record>").unwrap_err();
        assert!(matches!(error, MetadataError::MissingDublinCore));
    }

    #[test]
    fn test_malformed_xml() {
        let error = DublinCoreRecord::parse(b"<dc><title>x</creator></dc>").unwrap_err();
        assert!(matches!(error, MetadataError::MalformedXml(_)));

        let error = DublinCoreRecord::parse(b"<dc><title>truncated").unwrap_err();
        assert!(matches!(error, MetadataError::MalformedXml(_)));
    }

    #[test]
    fn test_only_first_dc_element_is_read() {
        let xml = b"<r><dc><title>one</title></dc><dc><title>two</title></dc></r>";
        let record = DublinCoreRecord::parse(xml).unwrap();
        assert_eq!(record.values("title").collect::<Vec<_>>(), vec!["one"]);
    }
}
