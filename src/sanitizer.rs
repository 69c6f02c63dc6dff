//! Markup repair for upstream checklist documents
//!
//! Upstream XCCDF files are hand-edited and routinely carry HTML entities,
//! bare ampersands and unbalanced tags. This pass rewrites them into
//! well-formed XML before the structural parser sees them:
//!
//! - entity references are repaired (see [`repair_entities`])
//! - a `<` that cannot open markup is escaped as text
//! - HTML void elements such as `<br>` are written as empty elements
//! - an end tag closing an outer element implicitly closes the inner ones
//! - stray end tags are dropped and unclosed elements are closed at EOF
//! - the DOCTYPE is omitted

use std::borrow::Cow;
use std::sync::LazyLock;

use quick_xml::escape::{escape, resolve_html5_entity};
use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::QName;
use quick_xml::{Reader, Writer};
use regex::{Captures, Regex};
use tracing::{debug, warn};

use crate::error::{Result, StigError};

static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[0-9]+;|#[xX][0-9a-fA-F]+;|[A-Za-z][A-Za-z0-9]*;)?")
        .expect("entity pattern is valid")
});

/// Markup sections whose content is kept as is, or a `<` that cannot start a
/// tag, comment, declaration or processing instruction
static BARE_LT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)(<!\[CDATA\[.*?\]\]>|<!--.*?-->)|<([^\p{L}_:/!?]|$)")
        .expect("bare lt pattern is valid")
});

const PREDEFINED_ENTITIES: [&str; 5] = ["amp", "lt", "gt", "quot", "apos"];

/// HTML formatting elements that never have content
const HTML_VOID_ELEMENTS: [&str; 4] = ["br", "hr", "img", "wbr"];

fn is_void_element(name: &str) -> bool {
    HTML_VOID_ELEMENTS
        .iter()
        .any(|void| void.eq_ignore_ascii_case(name))
}

/// Repair entity references in raw (still escaped) character data.
///
/// XML-predefined and valid numeric references are kept for the XML parser,
/// HTML named entities are replaced by their characters, and every other `&`
/// is escaped as `&amp;`.
pub fn repair_entities(input: &str) -> Cow<'_, str> {
    if !input.contains('&') {
        return Cow::Borrowed(input);
    }

    ENTITY_RE.replace_all(input, |caps: &Captures| {
        let Some(reference) = caps.get(1) else {
            return "&amp;".to_string();
        };
        let reference = reference.as_str();
        let name = &reference[..reference.len() - 1];

        if let Some(number) = name.strip_prefix('#') {
            let code = match number.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok(),
                None => number.parse::<u32>().ok(),
            };
            return match code.and_then(char::from_u32) {
                Some(c) if is_xml_char(c) => format!("&{}", reference),
                _ => format!("&amp;{}", reference),
            };
        }

        if PREDEFINED_ENTITIES.contains(&name) {
            return format!("&{}", reference);
        }

        match resolve_html5_entity(name) {
            Some(resolved) => escape(resolved).into_owned(),
            None => format!("&amp;{}", reference),
        }
    })
}

/// Escape every `<` that cannot open markup, leaving CDATA and comments alone.
fn escape_bare_lt(input: &str) -> Cow<'_, str> {
    BARE_LT_RE.replace_all(input, |caps: &Captures| match caps.get(1) {
        Some(section) => section.as_str().to_string(),
        None => format!("&lt;{}", caps.get(2).map_or("", |m| m.as_str())),
    })
}

fn is_xml_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' || first == ':' => {
            chars.all(|c| c.is_alphanumeric() || matches!(c, '-' | '.' | '_' | ':'))
        }
        _ => false,
    }
}

fn is_xml_char(c: char) -> bool {
    matches!(c, '\t' | '\n' | '\r') || (c >= ' ' && c != '\u{fffe}' && c != '\u{ffff}')
}

/// Repair raw document bytes into a well-formed XML string.
pub fn sanitize(raw: &[u8]) -> Result<String> {
    let decoded = String::from_utf8_lossy(raw);
    let source = decoded.strip_prefix('\u{feff}').unwrap_or(&decoded);
    let source = escape_bare_lt(source);

    let mut reader = Reader::from_str(&source);
    let config = reader.config_mut();
    config.check_end_names = false;
    config.allow_unmatched_ends = true;

    let mut writer = Writer::new(Vec::with_capacity(source.len()));
    let mut open: Vec<String> = Vec::new();
    let mut dropped_ends = 0usize;

    loop {
        let event = reader.read_event().map_err(|e| StigError::Sanitize {
            details: format!("at byte {}: {}", reader.buffer_position(), e),
        })?;

        match event {
            Event::Start(start) if !is_xml_name(&element_name(start.name())) => {
                write_invalid_tag(&mut writer, &start, false)?;
            }
            Event::Empty(start) if !is_xml_name(&element_name(start.name())) => {
                write_invalid_tag(&mut writer, &start, true)?;
            }
            Event::Start(start) if is_void_element(&element_name(start.name())) => {
                write_event(&mut writer, Event::Empty(repair_start(&start)))?;
            }
            Event::Start(start) => {
                let repaired = repair_start(&start);
                open.push(element_name(start.name()));
                write_event(&mut writer, Event::Start(repaired))?;
            }
            Event::Empty(start) => {
                write_event(&mut writer, Event::Empty(repair_start(&start)))?;
            }
            Event::End(end) => {
                let name = element_name(end.name());
                match open.iter().rposition(|candidate| *candidate == name) {
                    Some(position) => {
                        for inner in open.drain(position..).rev() {
                            write_event(&mut writer, Event::End(BytesEnd::new(inner)))?;
                        }
                    }
                    None if is_void_element(&name) => {}
                    None => {
                        dropped_ends += 1;
                        warn!(element = %name, "dropping stray end tag");
                    }
                }
            }
            Event::Text(text) => {
                let raw_text = String::from_utf8_lossy(&text);
                let repaired = repair_entities(&raw_text);
                write_event(&mut writer, Event::Text(BytesText::from_escaped(repaired)))?;
            }
            Event::DocType(_) => debug!("omitting doctype"),
            Event::Eof => break,
            other => write_event(&mut writer, other)?,
        }
    }

    if !open.is_empty() {
        debug!(unclosed = open.len(), "closing unclosed elements at end of document");
    }
    for inner in open.drain(..).rev() {
        write_event(&mut writer, Event::End(BytesEnd::new(inner)))?;
    }
    if dropped_ends > 0 {
        debug!(dropped_ends, "sanitized document had stray end tags");
    }

    String::from_utf8(writer.into_inner()).map_err(|e| StigError::Sanitize {
        details: e.to_string(),
    })
}

fn element_name(name: QName<'_>) -> String {
    String::from_utf8_lossy(name.as_ref()).into_owned()
}

/// Rebuild a start tag with repaired attribute values; malformed and
/// duplicate attributes are dropped.
fn repair_start(start: &BytesStart<'_>) -> BytesStart<'static> {
    let mut repaired = BytesStart::new(element_name(start.name()));
    let mut seen: Vec<Vec<u8>> = Vec::new();

    for attribute in start.attributes().with_checks(false) {
        let attribute = match attribute {
            Ok(attribute) => attribute,
            Err(e) => {
                warn!(error = %e, "dropping malformed attribute");
                continue;
            }
        };

        let key = attribute.key.as_ref().to_vec();
        if seen.contains(&key) {
            continue;
        }

        let raw_value = String::from_utf8_lossy(&attribute.value);
        let value = repair_entities(&raw_value)
            .replace('"', "&quot;")
            .replace('<', "&lt;");
        repaired.push_attribute(Attribute {
            key: QName(&key),
            value: Cow::Owned(value.into_bytes()),
        });
        seen.push(key);
    }

    repaired
}

/// Keep a tag with an unusable name as escaped character data.
fn write_invalid_tag(
    writer: &mut Writer<Vec<u8>>,
    start: &BytesStart<'_>,
    empty: bool,
) -> Result<()> {
    let content = String::from_utf8_lossy(start);
    warn!(tag = %content, "escaping tag with invalid name");
    let raw = if empty {
        format!("<{}/>", content)
    } else {
        format!("<{}>", content)
    };
    write_event(writer, Event::Text(BytesText::new(&raw)))
}

fn write_event(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<()> {
    writer
        .write_event(event)
        .map_err(|e| StigError::Sanitize {
            details: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_ampersand_is_escaped() {
        assert_eq!(repair_entities("Tom & Jerry"), "Tom &amp; Jerry");
        assert_eq!(repair_entities("a &b c"), "a &amp;b c");
    }

    #[test]
    fn test_valid_references_are_kept() {
        assert_eq!(repair_entities("&lt;tag&gt; &amp; &#38; &#x26;"), "&lt;tag&gt; &amp; &#38; &#x26;");
    }

    #[test]
    fn test_html_entities_are_resolved() {
        assert_eq!(repair_entities("a&nbsp;b"), "a\u{a0}b");
        assert_eq!(repair_entities("&copy; DISA"), "\u{a9} DISA");
    }

    #[test]
    fn test_unknown_entity_is_escaped() {
        assert_eq!(repair_entities("&bogusentity;"), "&amp;bogusentity;");
    }

    #[test]
    fn test_invalid_numeric_reference_is_escaped() {
        assert_eq!(repair_entities("&#0;"), "&amp;#0;");
    }

    #[test]
    fn test_text_without_ampersand_is_borrowed() {
        assert!(matches!(repair_entities("plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_doctype_is_omitted() {
        let raw = br#"<?xml version="1.0"?><!DOCTYPE Benchmark SYSTEM "x.dtd"><Benchmark/>"#;
        let repaired = sanitize(raw).unwrap();
        assert!(!repaired.contains("DOCTYPE"));
        assert!(repaired.contains("<?xml version=\"1.0\"?>"));
        assert!(repaired.contains("<Benchmark/>"));
    }

    #[test]
    fn test_unclosed_elements_are_closed() {
        let repaired = sanitize(b"<a><b>text").unwrap();
        assert_eq!(repaired, "<a><b>text</b></a>");
    }

    #[test]
    fn test_outer_end_closes_inner_elements() {
        let repaired = sanitize(b"<a><b>text</a>").unwrap();
        assert_eq!(repaired, "<a><b>text</b></a>");
    }

    #[test]
    fn test_stray_end_tag_is_dropped() {
        let repaired = sanitize(b"<a>x</b></a>").unwrap();
        assert_eq!(repaired, "<a>x</a>");
    }

    #[test]
    fn test_void_elements_are_closed_in_place() {
        assert_eq!(sanitize(b"<p>a<br>b</p>").unwrap(), "<p>a<br/>b</p>");
        assert_eq!(sanitize(b"<p>a<br></br>b</p>").unwrap(), "<p>a<br/>b</p>");
        assert_eq!(sanitize(b"<p>a<br/>b</p>").unwrap(), "<p>a<br/>b</p>");
    }

    #[test]
    fn test_attribute_entities_are_repaired() {
        let repaired = sanitize(br#"<a title="R&D">x</a>"#).unwrap();
        assert_eq!(repaired, r#"<a title="R&amp;D">x</a>"#);
    }

    #[test]
    fn test_cdata_is_preserved() {
        let repaired = sanitize(b"<a><![CDATA[x & y]]></a>").unwrap();
        assert_eq!(repaired, "<a><![CDATA[x & y]]></a>");
    }

    #[test]
    fn test_byte_order_mark_is_dropped() {
        let mut raw = "\u{feff}".as_bytes().to_vec();
        raw.extend_from_slice(b"<a/>");
        assert_eq!(sanitize(&raw).unwrap(), "<a/>");
    }

    #[test]
    fn test_bare_less_than_stays_text() {
        let repaired = sanitize(b"<t>a < 5</t>").unwrap();
        let tree = crate::parser::parse(&repaired).unwrap();
        assert_eq!(tree.child_text("t"), Some("a < 5"));

        let repaired = sanitize(b"<Benchmark><title>length < 15 chars, a <= b</title></Benchmark>").unwrap();
        let tree = crate::parser::parse(&repaired).unwrap();
        let benchmark = tree.first_child("Benchmark").unwrap();
        assert_eq!(benchmark.child_text("title"), Some("length < 15 chars, a <= b"));
    }

    #[test]
    fn test_tag_with_invalid_name_becomes_text() {
        let repaired = sanitize(b"<t><x=1>y</t>").unwrap();
        let tree = crate::parser::parse(&repaired).unwrap();
        assert_eq!(tree.child_text("t"), Some("<x=1>y"));
    }

    #[test]
    fn test_less_than_at_end_of_text() {
        let repaired = sanitize(b"<t>x <").unwrap();
        assert_eq!(repaired, "<t>x &lt;</t>");
    }

    #[test]
    fn test_cdata_and_comments_are_not_escaped() {
        let repaired = sanitize(b"<a><![CDATA[1 < 2]]><!-- 3 < 4 --></a>").unwrap();
        assert_eq!(repaired, "<a><![CDATA[1 < 2]]><!-- 3 < 4 --></a>");
    }

    #[test]
    fn test_attribute_less_than_is_escaped() {
        let repaired = sanitize(br#"<a title="<b>">x</a>"#).unwrap();
        assert_eq!(repaired, r#"<a title="&lt;b>">x</a>"#);
    }

    #[test]
    fn test_unterminated_markup_is_an_error() {
        assert!(matches!(
            sanitize(b"<a><!-- open"),
            Err(StigError::Sanitize { .. })
        ));
        assert!(matches!(
            sanitize(b"<a><![CDATA[open"),
            Err(StigError::Sanitize { .. })
        ));
    }

    #[test]
    fn test_repaired_output_parses() {
        let raw = b"<Benchmark><title>Q&A &nbsp;guide</title><status date=\"2020-01-01\">";
        let repaired = sanitize(raw).unwrap();
        let tree = crate::parser::parse(&repaired).unwrap();
        let benchmark = tree.first_child("Benchmark").unwrap();
        assert_eq!(benchmark.child_text("title"), Some("Q&A \u{a0}guide"));
    }
}
