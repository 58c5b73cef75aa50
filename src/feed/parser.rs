use serde::{Deserialize, Serialize};
use url::Url;

use super::scan::{self, cdata_text, Element};
use crate::util::{collapse_whitespace, decode_entities};

/// A normalized post extracted from an RSS item or Atom entry.
///
/// `title`, `link` and `pub_date` are plain text: entity-decoded, trimmed,
/// whitespace-collapsed. `content` is HTML markup and is passed through as
/// found in the feed, apart from CDATA unwrapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    pub title: String,
    /// Absolute URL when it could be resolved, otherwise the raw link text (possibly empty)
    pub link: String,
    /// Date text exactly as published; never parsed or validated
    #[serde(rename = "pubDate")]
    pub pub_date: String,
    pub content: String,
}

/// Parses an RSS 2.0 or Atom 1.0 document into items, in document order.
///
/// Never fails: input that is empty, malformed or not XML at all simply
/// yields no items. See [`parse_feed_with_base`] for relative link resolution.
///
/// # Examples
///
/// ```
/// use feedrelay::feed::parse_feed;
///
/// let xml = r#"<rss><channel>
///   <item><title><![CDATA[Hello & welcome]]></title><link>https://example.com/1</link></item>
/// </channel></rss>"#;
/// let items = parse_feed(xml);
/// assert_eq!(items.len(), 1);
/// assert_eq!(items[0].title, "Hello & welcome");
///
/// assert!(parse_feed("definitely not a feed").is_empty());
/// ```
pub fn parse_feed(xml: &str) -> Vec<FeedItem> {
    parse_feed_with_base(xml, None)
}

/// Like [`parse_feed`], resolving relative item links against the origin of `base`.
///
/// RSS `<item>` blocks take precedence: Atom `<entry>` blocks are only
/// considered when the document has no items at all. A link that cannot be
/// resolved is kept verbatim.
pub fn parse_feed_with_base(xml: &str, base: Option<&Url>) -> Vec<FeedItem> {
    let origin = base.and_then(origin_of);

    let items = blocks(xml, "item");
    if !items.is_empty() {
        return items
            .into_iter()
            .map(|block| rss_item(block, origin.as_ref()))
            .collect();
    }

    blocks(xml, "entry")
        .into_iter()
        .map(|block| atom_entry(block, origin.as_ref()))
        .collect()
}

fn blocks<'a>(xml: &'a str, name: &str) -> Vec<&'a str> {
    scan::elements(xml, name)
        .into_iter()
        .filter_map(|element| element.inner())
        .collect()
}

fn rss_item(block: &str, origin: Option<&Url>) -> FeedItem {
    FeedItem {
        title: text_field(block, "title"),
        link: resolve_link(&rss_link(block), origin),
        pub_date: first_text(block, &["pubDate", "dc:date"]),
        content: first_content(block, &["content:encoded", "description"]),
    }
}

fn atom_entry(block: &str, origin: Option<&Url>) -> FeedItem {
    FeedItem {
        title: text_field(block, "title"),
        link: resolve_link(&atom_link(block), origin),
        pub_date: first_text(block, &["updated", "published"]),
        content: first_content(block, &["content", "summary"]),
    }
}

/// RSS link: `<link>` text, then any link `href`, then a `<guid isPermaLink="true">`.
fn rss_link(block: &str) -> String {
    let links = scan::elements(block, "link");

    if let Some(text) = links
        .iter()
        .filter_map(|link| link.inner())
        .map(element_text)
        .find(|text| !text.is_empty())
    {
        return text;
    }

    if let Some(href) = first_href(links.iter()) {
        return href;
    }

    scan::elements(block, "guid")
        .iter()
        .filter(|guid| {
            guid.attr("isPermaLink")
                .is_some_and(|value| value.trim().eq_ignore_ascii_case("true"))
        })
        .filter_map(|guid| guid.inner())
        .map(element_text)
        .find(|text| !text.is_empty())
        .unwrap_or_default()
}

/// Atom link: `rel="alternate"` href, then any link href, then the entry `<id>`.
fn atom_link(block: &str) -> String {
    let links = scan::elements(block, "link");

    let alternate = links.iter().filter(|link| {
        link.attr("rel")
            .is_some_and(|rel| rel.trim().eq_ignore_ascii_case("alternate"))
    });

    first_href(alternate)
        .or_else(|| first_href(links.iter()))
        .unwrap_or_else(|| text_field(block, "id"))
}

fn first_href<'a, 'b: 'a>(links: impl Iterator<Item = &'a Element<'b>>) -> Option<String> {
    links
        .filter_map(|link| link.attr("href"))
        .map(|href| collapse_whitespace(&href))
        .find(|href| !href.is_empty())
}

/// Plain text of an element's body: CDATA preferred, entities decoded, whitespace collapsed.
fn element_text(inner: &str) -> String {
    let raw = match cdata_text(inner) {
        Some(cdata) => cdata,
        None => inner.to_owned(),
    };
    collapse_whitespace(&decode_entities(&raw))
}

fn text_field(block: &str, name: &str) -> String {
    scan::first_element(block, name)
        .and_then(|element| element.inner())
        .map(element_text)
        .unwrap_or_default()
}

fn first_text(block: &str, names: &[&str]) -> String {
    names
        .iter()
        .map(|name| text_field(block, name))
        .find(|text| !text.is_empty())
        .unwrap_or_default()
}

/// First non-blank markup body among `names`; for each element a CDATA
/// section wins over its plain (entity-escaped) text.
fn first_content(block: &str, names: &[&str]) -> String {
    names
        .iter()
        .filter_map(|name| scan::first_element(block, name))
        .find_map(|element| element_content(&element))
        .unwrap_or_default()
}

fn element_content(element: &Element<'_>) -> Option<String> {
    let inner = element.inner()?;

    if let Some(cdata) = cdata_text(inner) {
        return (!cdata.trim().is_empty()).then_some(cdata);
    }

    // Atom inline XHTML is already markup; escaped text needs one decode to become markup
    let is_xhtml = element
        .attr("type")
        .is_some_and(|kind| kind.trim().eq_ignore_ascii_case("xhtml"));
    let plain = if is_xhtml {
        inner.trim().to_owned()
    } else {
        decode_entities(inner).into_owned()
    };

    (!plain.trim().is_empty()).then_some(plain)
}

fn origin_of(base: &Url) -> Option<Url> {
    let origin = base.origin();
    if !origin.is_tuple() {
        return None;
    }
    Url::parse(&format!("{}/", origin.ascii_serialization())).ok()
}

fn resolve_link(raw: &str, origin: Option<&Url>) -> String {
    if raw.is_empty() {
        return String::new();
    }

    match Url::parse(raw) {
        Ok(_) => raw.to_owned(),
        Err(url::ParseError::RelativeUrlWithoutBase) => origin
            .and_then(|origin| origin.join(raw).ok())
            .map(String::from)
            .unwrap_or_else(|| raw.to_owned()),
        Err(_) => raw.to_owned(),
    }
}
