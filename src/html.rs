// Small HTML scanning helpers for the portal's grid markup.
// Tag and attribute names match ASCII case-insensitively. Lowercasing is
// ASCII-only so byte offsets in the lowered copy line up with the input.

use std::sync::OnceLock;

use regex::Regex;

/// One element: its opening tag text and everything up to the matching close.
#[derive(Debug, Clone, Copy)]
pub struct Element<'a> {
    pub open_tag: &'a str,
    pub inner: &'a str,
}

impl<'a> Element<'a> {
    pub fn attr(&self, name: &str) -> Option<String> {
        attr(self.open_tag, name)
    }

    /// The class attribute exactly as written, if any.
    pub fn class(&self) -> Option<String> {
        self.attr("class")
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.class()
            .is_some_and(|c| c.split_whitespace().any(|c| c == class))
    }

    /// Visible text: tags stripped, entities decoded, whitespace collapsed.
    pub fn text(&self) -> String {
        normalize_ws(&decode_entities(&strip_tags(self.inner)))
    }

    pub fn children(&self, tag: &str) -> Vec<Element<'a>> {
        elements(self.inner, tag)
    }

    pub fn first(&self, tag: &str) -> Option<Element<'a>> {
        self.children(tag).into_iter().next()
    }
}

/// Is `lc[at..]` the start of `<tag` followed by a tag-name boundary?
fn opens_at(lc: &str, at: usize, tag: &str) -> bool {
    let bytes = lc.as_bytes();
    let end = at + 1 + tag.len();
    bytes.get(at) == Some(&b'<')
        && lc.get(at + 1..end) == Some(tag)
        && matches!(bytes.get(end), Some(b' ' | b'\t' | b'\n' | b'\r' | b'>' | b'/'))
}

fn closes_at(lc: &str, at: usize, tag: &str) -> bool {
    let end = at + 2 + tag.len();
    lc.get(at..at + 2) == Some("</")
        && lc.get(at + 2..end) == Some(tag)
        && matches!(lc.as_bytes().get(end), Some(b'>' | b' ' | b'\t' | b'\n' | b'\r'))
}

/// Find the element starting at or after `from`. Returns the element and the
/// byte offset just past it. Nested elements of the same tag are balanced; an
/// element that is never closed runs to the end of `s`.
fn next_element<'a>(s: &'a str, lc: &str, tag: &str, from: usize) -> Option<(Element<'a>, usize)> {
    let mut start = from;
    loop {
        let rel = lc.get(start..)?.find('<')?;
        start += rel;
        if opens_at(lc, start, tag) {
            break;
        }
        start += 1;
    }
    let open_end = s[start..].find('>')? + start + 1;
    let open_tag = &s[start..open_end];
    if open_tag.ends_with("/>") {
        return Some((Element { open_tag, inner: "" }, open_end));
    }

    let mut depth = 1usize;
    let mut pos = open_end;
    while let Some(rel) = lc[pos..].find('<') {
        let at = pos + rel;
        if opens_at(lc, at, tag) {
            depth += 1;
        } else if closes_at(lc, at, tag) {
            depth -= 1;
            if depth == 0 {
                let close_end = lc[at..].find('>').map_or(lc.len(), |i| at + i + 1);
                return Some((
                    Element {
                        open_tag,
                        inner: &s[open_end..at],
                    },
                    close_end,
                ));
            }
        }
        pos = at + 1;
    }
    Some((
        Element {
            open_tag,
            inner: &s[open_end..],
        },
        s.len(),
    ))
}

/// Every outermost `tag` element in `s`, in document order.
pub fn elements<'a>(s: &'a str, tag: &str) -> Vec<Element<'a>> {
    let lc = s.to_ascii_lowercase();
    let tag = tag.to_ascii_lowercase();
    let mut out = Vec::new();
    let mut pos = 0usize;
    while let Some((el, next)) = next_element(s, &lc, &tag, pos) {
        out.push(el);
        pos = next;
    }
    out
}

/// Every `tag` element in `s`, including ones nested inside another match.
pub fn descendants<'a>(s: &'a str, tag: &str) -> Vec<Element<'a>> {
    let lc = s.to_ascii_lowercase();
    let tag = tag.to_ascii_lowercase();
    let mut out = Vec::new();
    let mut pos = 0usize;
    while let Some((el, _)) = next_element(s, &lc, &tag, pos) {
        let open_at = el.open_tag.as_ptr() as usize - s.as_ptr() as usize;
        out.push(el);
        pos = open_at + el.open_tag.len();
    }
    out
}

pub fn find_by_id<'a>(s: &'a str, tag: &str, id: &str) -> Option<Element<'a>> {
    descendants(s, tag)
        .into_iter()
        .find(|el| el.attr("id").as_deref() == Some(id))
}

fn attr_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
            .expect("valid attribute pattern")
    })
}

/// Attribute value from an opening tag, entity-decoded.
pub fn attr(open_tag: &str, name: &str) -> Option<String> {
    attr_pattern().captures_iter(open_tag).find_map(|caps| {
        if !caps[1].eq_ignore_ascii_case(name) {
            return None;
        }
        let raw = caps
            .get(2)
            .or_else(|| caps.get(3))
            .or_else(|| caps.get(4))
            .map_or("", |m| m.as_str());
        Some(decode_entities(raw))
    })
}

pub fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for ch in s.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}

pub fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail.find(';').filter(|&semi| semi <= 10).and_then(|semi| {
            let entity = &tail[1..semi];
            let ch = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some(' '),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse().ok()))
                    .and_then(char::from_u32),
            };
            ch.map(|c| (c, semi))
        });
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Collapse whitespace runs into one space and trim.
pub fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
