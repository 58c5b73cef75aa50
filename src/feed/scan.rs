//! Tolerant tag scanner used by the feed parser.
//!
//! Uses simple string scanning (no XML parser dependency), aimed at the
//! subset of RSS/Atom that blogging platforms actually emit. Tag names
//! match ASCII case-insensitively, CDATA sections and comments are skipped
//! while looking for tags, and quoted attribute values may contain `>`.
//! Every function here is total: malformed input yields fewer matches,
//! never a panic.

use crate::util::decode_entities;

const CDATA_OPEN: &str = "<![CDATA[";
const CDATA_CLOSE: &str = "]]>";

/// One occurrence of a named element.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Element<'a> {
    /// Raw attribute text between the tag name and the closing `>`.
    attrs: &'a str,
    /// Raw text between the open and close tags; `None` for self-closing
    /// or unterminated elements.
    inner: Option<&'a str>,
}

impl<'a> Element<'a> {
    pub(crate) fn inner(&self) -> Option<&'a str> {
        self.inner
    }

    /// Entity-decoded value of the attribute `name` (case-insensitive).
    pub(crate) fn attr(&self, name: &str) -> Option<String> {
        attribute(self.attrs, name).map(|value| decode_entities(value).into_owned())
    }
}

/// Returns every `name` element in `xml`, in document order.
///
/// Matching is non-greedy: an element ends at the first following close tag
/// of the same name.
pub(crate) fn elements<'a>(xml: &'a str, name: &str) -> Vec<Element<'a>> {
    let closing = format!("/{name}");
    let mut found = Vec::new();
    let mut pos = 0;

    while let Some(open) = find_tag(xml, name, pos) {
        let Some(open_end) = tag_end(xml, open) else {
            break;
        };

        let self_closing = xml.as_bytes()[open_end - 1] == b'/';
        let attrs_end = if self_closing { open_end - 1 } else { open_end };
        let attrs = xml.get(open + 1 + name.len()..attrs_end).unwrap_or("");

        if self_closing {
            found.push(Element { attrs, inner: None });
            pos = open_end + 1;
            continue;
        }

        match find_tag(xml, &closing, open_end + 1) {
            Some(close) => {
                found.push(Element {
                    attrs,
                    inner: Some(&xml[open_end + 1..close]),
                });
                pos = tag_end(xml, close).map_or(xml.len(), |end| end + 1);
            }
            None => {
                // No close tag after this point means none for any later open tag either
                found.push(Element { attrs, inner: None });
                break;
            }
        }
    }

    found
}

/// Returns the first `name` element in `xml`.
pub(crate) fn first_element<'a>(xml: &'a str, name: &str) -> Option<Element<'a>> {
    elements(xml, name).into_iter().next()
}

/// Concatenated contents of every CDATA section in `inner`, if it has any.
///
/// An unterminated section runs to the end of the input.
pub(crate) fn cdata_text(inner: &str) -> Option<String> {
    let mut rest = inner;
    let mut out: Option<String> = None;

    while let Some(start) = rest.find(CDATA_OPEN) {
        let body = &rest[start + CDATA_OPEN.len()..];
        let (section, remaining) = match body.find(CDATA_CLOSE) {
            Some(end) => (&body[..end], &body[end + CDATA_CLOSE.len()..]),
            None => (body, ""),
        };
        out.get_or_insert_with(String::new).push_str(section);
        rest = remaining;
    }

    out
}

/// Byte offset of the next `<name` tag at or after `from`, skipping CDATA and comments.
///
/// `name` may start with `/` to look for a close tag. The tag name must be
/// followed by whitespace, `>` or `/` so `<item` does not match `<itemref`.
fn find_tag(xml: &str, name: &str, from: usize) -> Option<usize> {
    let bytes = xml.as_bytes();
    let mut i = from;

    while i < bytes.len() {
        let at = i + xml.get(i..)?.find('<')?;
        let rest = &bytes[at..];

        if rest.starts_with(CDATA_OPEN.as_bytes()) {
            i = at + find_bytes(rest, CDATA_CLOSE.as_bytes())? + CDATA_CLOSE.len();
            continue;
        }
        if rest.starts_with(b"<!--") {
            i = at + find_bytes(rest, b"-->")? + 3;
            continue;
        }
        if name_matches(&rest[1..], name) {
            return Some(at);
        }
        i = at + 1;
    }

    None
}

fn name_matches(after_lt: &[u8], name: &str) -> bool {
    let n = name.len();
    after_lt.len() > n
        && after_lt[..n].eq_ignore_ascii_case(name.as_bytes())
        && matches!(after_lt[n], b'>' | b'/' | b' ' | b'\t' | b'\n' | b'\r')
}

/// Byte offset of the `>` closing the tag that starts at `open`, honoring quoted values.
fn tag_end(xml: &str, open: usize) -> Option<usize> {
    let mut quote: Option<u8> = None;

    for (offset, &b) in xml.as_bytes().get(open + 1..)?.iter().enumerate() {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None => match b {
                b'"' | b'\'' => quote = Some(b),
                b'>' => return Some(open + 1 + offset),
                _ => {}
            },
        }
    }

    None
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

/// Raw value of attribute `name` in a tag's attribute text.
///
/// Accepts double-quoted, single-quoted and unquoted values; a bare
/// attribute yields an empty value.
fn attribute<'a>(attrs: &'a str, name: &str) -> Option<&'a str> {
    let bytes = attrs.as_bytes();
    let len = bytes.len();
    let mut i = 0;

    let skip_ws = |mut i: usize| {
        while i < len && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        i
    };

    while i < len {
        i = skip_ws(i);
        let key_start = i;
        while i < len && !bytes[i].is_ascii_whitespace() && !matches!(bytes[i], b'=' | b'/') {
            i += 1;
        }
        let key = &attrs[key_start..i];
        i = skip_ws(i);

        let mut value = "";
        if i < len && bytes[i] == b'=' {
            i = skip_ws(i + 1);
            if i < len && matches!(bytes[i], b'"' | b'\'') {
                let quote = bytes[i];
                let value_start = i + 1;
                i = value_start;
                while i < len && bytes[i] != quote {
                    i += 1;
                }
                value = &attrs[value_start..i];
                if i < len {
                    i += 1;
                }
            } else {
                let value_start = i;
                while i < len && !bytes[i].is_ascii_whitespace() {
                    i += 1;
                }
                value = &attrs[value_start..i];
            }
        } else if key.is_empty() && i < len {
            // Stray `/` or similar; step over it
            i += 1;
        }

        if !key.is_empty() && key.eq_ignore_ascii_case(name) {
            return Some(value);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elements_in_document_order() {
        let xml = "<a><item>one</item><item>two</item><ITEM>three</ITEM></a>";
        let inner: Vec<_> = elements(xml, "item")
            .iter()
            .filter_map(|e| e.inner())
            .collect();
        assert_eq!(inner, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_name_must_end_at_boundary() {
        let xml = "<itemref>x</itemref><item id=\"1\">y</item>";
        let found = elements(xml, "item");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].inner(), Some("y"));
    }

    #[test]
    fn test_namespaced_names() {
        let xml = "<content:encoded>body</content:encoded><atom:link href=\"x\"/>";
        assert_eq!(
            first_element(xml, "content:encoded").and_then(|e| e.inner()),
            Some("body")
        );
        assert!(first_element(xml, "link").is_none());
    }

    #[test]
    fn test_self_closing_has_attrs_but_no_inner() {
        let xml = r#"<link rel="alternate" href="https://example.com/a?x=1&amp;y=2"/>"#;
        let link = first_element(xml, "link").unwrap();
        assert!(link.inner().is_none());
        assert_eq!(link.attr("rel").as_deref(), Some("alternate"));
        assert_eq!(
            link.attr("HREF").as_deref(),
            Some("https://example.com/a?x=1&y=2")
        );
    }

    #[test]
    fn test_tags_inside_cdata_are_ignored() {
        let xml = "<description><![CDATA[<item>fake</item>]]></description><item>real</item>";
        let found = elements(xml, "item");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].inner(), Some("real"));
    }

    #[test]
    fn test_close_tag_inside_cdata_does_not_end_element() {
        let xml = "<title><![CDATA[a </title> b]]></title>";
        let inner = first_element(xml, "title").and_then(|e| e.inner()).unwrap();
        assert_eq!(cdata_text(inner).as_deref(), Some("a </title> b"));
    }

    #[test]
    fn test_tags_inside_comments_are_ignored() {
        let xml = "<!-- <item>old</item> --><item>new</item>";
        let found = elements(xml, "item");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].inner(), Some("new"));
    }

    #[test]
    fn test_quoted_gt_in_attribute() {
        let xml = r#"<link title="a > b" href="/x">text</link>"#;
        let link = first_element(xml, "link").unwrap();
        assert_eq!(link.attr("href").as_deref(), Some("/x"));
        assert_eq!(link.inner(), Some("text"));
    }

    #[test]
    fn test_unterminated_element() {
        let xml = "<item><title>never closed";
        let found = elements(xml, "item");
        assert_eq!(found.len(), 1);
        assert!(found[0].inner().is_none());
        assert!(elements("<item", "item").is_empty());
    }

    #[test]
    fn test_many_unterminated_elements_scan_linearly() {
        let xml = "<item>".repeat(200_000);
        let found = elements(&xml, "item");
        assert_eq!(found.len(), 1);
        assert!(found[0].inner().is_none());
    }

    #[test]
    fn test_attribute_forms() {
        assert_eq!(attribute(r#" a="1" b='2' c=3 d"#, "a"), Some("1"));
        assert_eq!(attribute(r#" a="1" b='2' c=3 d"#, "b"), Some("2"));
        assert_eq!(attribute(r#" a="1" b='2' c=3 d"#, "c"), Some("3"));
        assert_eq!(attribute(r#" a="1" b='2' c=3 d"#, "d"), Some(""));
        assert_eq!(attribute(r#" a = "spaced" "#, "a"), Some("spaced"));
        assert_eq!(attribute(r#" a="1""#, "missing"), None);
        assert_eq!(attribute(r#" isPermaLink="true""#, "ispermalink"), Some("true"));
    }

    #[test]
    fn test_cdata_text() {
        assert_eq!(cdata_text("  <![CDATA[hi]]>  ").as_deref(), Some("hi"));
        assert_eq!(
            cdata_text("<![CDATA[a]]]]><![CDATA[>b]]>").as_deref(),
            Some("a]]>b")
        );
        assert_eq!(cdata_text("<![CDATA[open").as_deref(), Some("open"));
        assert_eq!(cdata_text("plain"), None);
    }

    #[test]
    fn test_multibyte_text_is_safe() {
        let xml = "<item><title>日本語 ✓</title></item><item>é</item>";
        let found = elements(xml, "item");
        assert_eq!(found.len(), 2);
        assert_eq!(found[1].inner(), Some("é"));
    }
}
