use std::borrow::Cow;

/// Replacement for numeric character references that do not name a valid scalar value.
pub const REPLACEMENT_CHAR: char = '\u{FFFD}';

/// Longest entity body (between `&` and `;`) worth attempting to decode.
const MAX_ENTITY_LEN: usize = 32;

/// Trims a string and collapses every internal whitespace run to a single space.
///
/// # Examples
///
/// ```
/// use feedrelay::util::collapse_whitespace;
///
/// assert_eq!(collapse_whitespace("  Hello \n\t world  "), "Hello world");
/// assert_eq!(collapse_whitespace("   "), "");
/// ```
pub fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for word in s.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

/// Decodes XML/HTML character references in `s`.
///
/// Handles the five predefined XML entities, decimal (`&#8217;`) and
/// hexadecimal (`&#x2019;`) numeric references, and a handful of HTML named
/// entities that show up in real-world feeds (`&nbsp;`, `&hellip;`, ...).
///
/// A numeric reference that does not decode to a valid character becomes
/// [`REPLACEMENT_CHAR`]. Unknown named entities and stray ampersands are left
/// verbatim. Returns `Cow::Borrowed` when `s` contains no `&`.
///
/// # Examples
///
/// ```
/// use feedrelay::util::decode_entities;
///
/// assert_eq!(decode_entities("Tom &amp; Jerry"), "Tom & Jerry");
/// assert_eq!(decode_entities("it&#8217;s &#x263A;"), "it\u{2019}s \u{263A}");
/// assert_eq!(decode_entities("&#xD800;"), "\u{FFFD}");
/// assert_eq!(decode_entities("&unknown; & more"), "&unknown; & more");
/// ```
pub fn decode_entities(s: &str) -> Cow<'_, str> {
    if !s.contains('&') {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];

        // Only look a bounded distance ahead for the terminating `;`
        let decoded = after
            .char_indices()
            .take(MAX_ENTITY_LEN + 1)
            .find(|&(_, c)| c == ';')
            .map(|(semi, _)| semi)
            .filter(|&semi| semi <= MAX_ENTITY_LEN)
            .and_then(|semi| resolve_entity(&after[..semi]).map(|c| (c, semi)));

        match decoded {
            Some((resolved, semi)) => {
                out.push_str(&resolved);
                rest = &after[semi + 1..];
            }
            None => {
                out.push('&');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    Cow::Owned(out)
}

/// Resolves the body of a single entity reference (the text between `&` and `;`).
fn resolve_entity(name: &str) -> Option<Cow<'static, str>> {
    if let Some(numeric) = name.strip_prefix('#') {
        let code = match numeric.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => numeric.parse::<u32>().ok(),
        };
        let ch = code
            .filter(|&c| c != 0)
            .and_then(char::from_u32)
            .unwrap_or(REPLACEMENT_CHAR);
        return Some(Cow::Owned(ch.to_string()));
    }

    let resolved = match name {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" => "\u{a0}",
        "hellip" => "\u{2026}",
        "mdash" => "\u{2014}",
        "ndash" => "\u{2013}",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "ldquo" => "\u{201c}",
        "rdquo" => "\u{201d}",
        "laquo" => "\u{ab}",
        "raquo" => "\u{bb}",
        "copy" => "\u{a9}",
        "reg" => "\u{ae}",
        "trade" => "\u{2122}",
        _ => return None,
    };
    Some(Cow::Borrowed(resolved))
}

/// Returns `true` when a response body starts like an HTML document rather than feed XML.
///
/// Leading whitespace and a UTF-8 byte order mark are ignored; the comparison
/// is ASCII case-insensitive. Used to catch upstream outages that answer with
/// an HTML error or login page and a 200 status.
pub fn looks_like_html(body: &str) -> bool {
    let head = body.trim_start_matches(|c: char| c == '\u{feff}' || c.is_whitespace());
    starts_with_ignore_ascii_case(head, "<!doctype html") || starts_with_ignore_ascii_case(head, "<html")
}

fn starts_with_ignore_ascii_case(haystack: &str, prefix: &str) -> bool {
    haystack
        .as_bytes()
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix.as_bytes()))
}
