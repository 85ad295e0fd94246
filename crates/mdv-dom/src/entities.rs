//! HTML entity to Unicode conversion.
//!
//! Converts named HTML entities to their Unicode equivalents before XML
//! tokenizing. Standard XML entities (amp, lt, gt, quot, apos) are left
//! unchanged for the tokenizer to handle.

use std::sync::LazyLock;

use regex::Regex;

/// Regex pattern for matching named HTML entities.
static ENTITY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&([a-zA-Z][a-zA-Z0-9]*);").expect("invalid entity regex"));

/// Convert named HTML entities to Unicode characters.
///
/// Unknown entities are escaped as literal text so the tokenizer does not
/// reject the fragment.
pub(crate) fn convert_html_entities(html: &str) -> String {
    if !html.contains('&') {
        return html.to_owned();
    }
    ENTITY_PATTERN
        .replace_all(html, |caps: &regex::Captures| {
            let name = &caps[1];
            if is_xml_entity(name) {
                return caps[0].to_owned();
            }
            entity_to_unicode(name).map_or_else(|| format!("&amp;{name};"), String::from)
        })
        .into_owned()
}

fn is_xml_entity(name: &str) -> bool {
    matches!(name, "amp" | "lt" | "gt" | "quot" | "apos")
}

/// Map HTML entity name to Unicode character.
fn entity_to_unicode(name: &str) -> Option<&'static str> {
    Some(match name {
        "nbsp" => "\u{00a0}",
        "mdash" => "\u{2014}",
        "ndash" => "\u{2013}",
        "ldquo" => "\u{201c}",
        "rdquo" => "\u{201d}",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "bull" => "\u{2022}",
        "hellip" => "\u{2026}",
        "rarr" => "\u{2192}",
        "larr" => "\u{2190}",
        "harr" => "\u{2194}",
        "uarr" => "\u{2191}",
        "darr" => "\u{2193}",
        "le" => "\u{2264}",
        "ge" => "\u{2265}",
        "ne" => "\u{2260}",
        "plusmn" => "\u{00b1}",
        "times" => "\u{00d7}",
        "divide" => "\u{00f7}",
        "minus" => "\u{2212}",
        "copy" => "\u{00a9}",
        "reg" => "\u{00ae}",
        "trade" => "\u{2122}",
        "deg" => "\u{00b0}",
        "para" => "\u{00b6}",
        "sect" => "\u{00a7}",
        "laquo" => "\u{00ab}",
        "raquo" => "\u{00bb}",
        "zwj" => "\u{200d}",
        "zwnj" => "\u{200c}",
        "ensp" => "\u{2002}",
        "emsp" => "\u{2003}",
        "thinsp" => "\u{2009}",
        _ => return None,
    })
}

/// Decode an XML entity reference body (without `&` and `;`).
pub(crate) fn decode_entity(entity: &str) -> String {
    match entity {
        "lt" => "<".to_owned(),
        "gt" => ">".to_owned(),
        "amp" => "&".to_owned(),
        "apos" => "'".to_owned(),
        "quot" => "\"".to_owned(),
        s if s.starts_with('#') => {
            let code = if s.starts_with("#x") || s.starts_with("#X") {
                u32::from_str_radix(&s[2..], 16).ok()
            } else {
                s[1..].parse::<u32>().ok()
            };
            code.and_then(char::from_u32)
                .map_or_else(|| format!("&{entity};"), |c| c.to_string())
        }
        _ => format!("&{entity};"),
    }
}
