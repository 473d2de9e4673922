//! Best-effort HTML fragment parsing.
//!
//! Never fails: anything that does not tokenize as markup is kept as text,
//! unclosed elements are closed at end of input and stray end tags are
//! ignored.

use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HtmlNode {
    Element(HtmlElement),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HtmlElement {
    /// Lowercased tag name.
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<HtmlNode>,
}

impl HtmlElement {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Value of one inline `style` declaration, lowercased and trimmed.
    pub fn style(&self, property: &str) -> Option<String> {
        self.attr("style")?
            .split(';')
            .filter_map(|decl| decl.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case(property))
            .map(|(_, value)| value.trim().to_ascii_lowercase())
            .filter(|value| !value.is_empty())
    }
}

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style", "textarea", "title"];

const CLOSES_PARAGRAPH: &[&str] = &[
    "address", "blockquote", "div", "h1", "h2", "h3", "h4", "h5", "h6", "hr", "li", "ol", "p",
    "pre", "table", "ul",
];

pub fn is_void_element(name: &str) -> bool {
    VOID_ELEMENTS.contains(&name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedTag {
    name: String,
    attrs: Vec<(String, String)>,
    is_end: bool,
    self_closing: bool,
}

struct TreeBuilder {
    stack: Vec<HtmlElement>,
}

impl TreeBuilder {
    fn new() -> Self {
        Self {
            stack: vec![HtmlElement::default()],
        }
    }

    fn current(&mut self) -> &mut HtmlElement {
        if self.stack.is_empty() {
            self.stack.push(HtmlElement::default());
        }
        let last = self.stack.len() - 1;
        &mut self.stack[last]
    }

    fn text(&mut self, text: String) {
        if text.is_empty() {
            return;
        }
        let current = self.current();
        if let Some(HtmlNode::Text(prev)) = current.children.last_mut() {
            prev.push_str(&text);
        } else {
            current.children.push(HtmlNode::Text(text));
        }
    }

    fn close_top(&mut self) {
        if self.stack.len() <= 1 {
            return;
        }
        if let Some(element) = self.stack.pop() {
            self.current().children.push(HtmlNode::Element(element));
        }
    }

    fn is_open(&self, name: &str) -> Option<usize> {
        self.stack
            .iter()
            .skip(1)
            .rposition(|el| el.name == name)
            .map(|ix| ix + 1)
    }

    fn close_through(&mut self, depth: usize) {
        while self.stack.len() > depth {
            self.close_top();
        }
    }

    fn start(&mut self, tag: ParsedTag) {
        if CLOSES_PARAGRAPH.contains(&tag.name.as_str())
            && self.stack.last().is_some_and(|el| el.name == "p")
        {
            self.close_top();
        }
        if tag.name == "li" {
            let list_depth = self
                .stack
                .iter()
                .rposition(|el| el.name == "ul" || el.name == "ol")
                .unwrap_or(0);
            if let Some(open) = self.is_open("li").filter(|ix| *ix > list_depth) {
                self.close_through(open);
            }
        }

        let element = HtmlElement {
            name: tag.name,
            attrs: tag.attrs,
            children: Vec::new(),
        };
        if tag.self_closing || is_void_element(&element.name) {
            self.current().children.push(HtmlNode::Element(element));
        } else {
            self.stack.push(element);
        }
    }

    fn end(&mut self, name: &str) {
        match self.is_open(name) {
            Some(depth) => self.close_through(depth),
            None => trace!(tag = name, "ignored stray end tag"),
        }
    }

    fn finish(mut self) -> Vec<HtmlNode> {
        self.close_through(1);
        self.stack
            .pop()
            .map(|root| root.children)
            .unwrap_or_default()
    }
}

/// Parses an HTML fragment (or full document) into a node list.
pub fn parse_fragment(input: &str) -> Vec<HtmlNode> {
    let bytes = input.as_bytes();
    let mut builder = TreeBuilder::new();
    let mut idx = 0_usize;

    while idx < bytes.len() {
        if bytes[idx] != b'<' {
            let next = find_byte(bytes, idx.saturating_add(1), b'<').unwrap_or(bytes.len());
            builder.text(decode_entities(&input[idx..next]));
            idx = next;
            continue;
        }

        if starts_with(bytes, idx, b"<!--") {
            idx = skip_comment(bytes, idx);
            continue;
        }

        if starts_with(bytes, idx, b"<!") || starts_with(bytes, idx, b"<?") {
            idx = skip_to_gt(bytes, idx.saturating_add(2));
            continue;
        }

        let Some((tag, next_idx)) = parse_tag(input, idx) else {
            builder.text("<".to_string());
            idx = idx.saturating_add(1);
            continue;
        };

        if tag.is_end {
            builder.end(&tag.name);
        } else if !tag.self_closing && RAW_TEXT_ELEMENTS.contains(&tag.name.as_str()) {
            trace!(tag = %tag.name, "skipped raw text element");
            idx = skip_raw_text(input, next_idx, &tag.name);
            continue;
        } else {
            builder.start(tag);
        }
        idx = next_idx;
    }

    builder.finish()
}

fn parse_tag(input: &str, start: usize) -> Option<(ParsedTag, usize)> {
    let bytes = input.as_bytes();
    if bytes.get(start).copied() != Some(b'<') {
        return None;
    }

    let mut idx = start.saturating_add(1);
    let mut is_end = false;
    if bytes.get(idx).copied() == Some(b'/') {
        is_end = true;
        idx = idx.saturating_add(1);
    }

    let name_start = idx;
    while idx < bytes.len() && is_tag_name_char(bytes[idx]) {
        idx = idx.saturating_add(1);
    }
    if idx == name_start || !bytes[name_start].is_ascii_alphabetic() {
        return None;
    }
    let name = input[name_start..idx].to_ascii_lowercase();

    let mut attrs = Vec::new();
    let mut self_closing = false;
    loop {
        idx = skip_spaces(bytes, idx);
        match bytes.get(idx).copied() {
            None => return None,
            Some(b'>') => break,
            Some(b'/') => {
                self_closing = true;
                idx = idx.saturating_add(1);
                continue;
            }
            Some(_) => {}
        }
        self_closing = false;

        let attr_start = idx;
        while idx < bytes.len()
            && !bytes[idx].is_ascii_whitespace()
            && !matches!(bytes[idx], b'=' | b'>' | b'/')
        {
            idx = idx.saturating_add(1);
        }
        let attr_name = input[attr_start..idx].to_ascii_lowercase();
        idx = skip_spaces(bytes, idx);

        let mut value = String::new();
        if bytes.get(idx).copied() == Some(b'=') {
            idx = skip_spaces(bytes, idx.saturating_add(1));
            match bytes.get(idx).copied() {
                Some(quote @ (b'"' | b'\'')) => {
                    let value_start = idx.saturating_add(1);
                    let value_end = find_byte(bytes, value_start, quote)?;
                    value = decode_entities(&input[value_start..value_end]);
                    idx = value_end.saturating_add(1);
                }
                _ => {
                    let value_start = idx;
                    while idx < bytes.len()
                        && !bytes[idx].is_ascii_whitespace()
                        && bytes[idx] != b'>'
                    {
                        idx = idx.saturating_add(1);
                    }
                    value = decode_entities(&input[value_start..idx]);
                }
            }
        }
        if !attr_name.is_empty() && !attrs.iter().any(|(key, _)| *key == attr_name) {
            attrs.push((attr_name, value));
        }
    }

    Some((
        ParsedTag {
            name,
            attrs,
            is_end,
            self_closing,
        },
        idx.saturating_add(1),
    ))
}

fn skip_raw_text(input: &str, start: usize, tag_name: &str) -> usize {
    let bytes = input.as_bytes();
    let tag_bytes = tag_name.as_bytes();
    let mut idx = start;

    while idx < bytes.len() {
        if bytes[idx] == b'<'
            && bytes.get(idx.saturating_add(1)).copied() == Some(b'/')
            && starts_with_ignore_ascii_case(bytes, idx.saturating_add(2), tag_bytes)
        {
            return skip_to_gt(bytes, idx.saturating_add(2));
        }
        idx = idx.saturating_add(1);
    }
    bytes.len()
}

const NAMED_ENTITIES: &[(&str, char)] = &[
    ("amp", '&'),
    ("lt", '<'),
    ("gt", '>'),
    ("quot", '"'),
    ("apos", '\''),
    ("nbsp", '\u{a0}'),
];

/// Decodes character references. Unknown references are kept verbatim.
pub fn decode_entities(input: &str) -> String {
    if !input.contains('&') {
        return input.to_string();
    }
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let decoded = rest[1..]
            .find(';')
            .filter(|end| *end <= 10)
            .and_then(|end| decode_reference(&rest[1..=end]).map(|ch| (ch, end + 2)));
        match decoded {
            Some((ch, consumed)) => {
                out.push(ch);
                rest = &rest[consumed..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_reference(reference: &str) -> Option<char> {
    if let Some(numeric) = reference.strip_prefix('#') {
        let code = match numeric.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => numeric.parse::<u32>().ok()?,
        };
        return char::from_u32(code);
    }
    NAMED_ENTITIES
        .iter()
        .find(|(name, _)| *name == reference)
        .map(|(_, ch)| *ch)
}

pub fn escape_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

pub fn escape_attr(input: &str) -> String {
    escape_text(input).replace('"', "&quot;")
}

fn skip_comment(bytes: &[u8], start: usize) -> usize {
    find_subslice(bytes, start.saturating_add(4), b"-->")
        .map(|end| end.saturating_add(3))
        .unwrap_or(bytes.len())
}

fn skip_to_gt(bytes: &[u8], mut idx: usize) -> usize {
    while idx < bytes.len() {
        if bytes[idx] == b'>' {
            return idx.saturating_add(1);
        }
        idx = idx.saturating_add(1);
    }
    bytes.len()
}

fn skip_spaces(bytes: &[u8], mut idx: usize) -> usize {
    while idx < bytes.len() && bytes[idx].is_ascii_whitespace() {
        idx = idx.saturating_add(1);
    }
    idx
}

fn is_tag_name_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b':')
}

fn starts_with(bytes: &[u8], idx: usize, pattern: &[u8]) -> bool {
    let end = idx.saturating_add(pattern.len());
    end <= bytes.len() && bytes[idx..end] == *pattern
}

fn starts_with_ignore_ascii_case(bytes: &[u8], idx: usize, pattern: &[u8]) -> bool {
    let end = idx.saturating_add(pattern.len());
    if end > bytes.len() {
        return false;
    }
    bytes[idx..end]
        .iter()
        .zip(pattern.iter())
        .all(|(left, right)| left.eq_ignore_ascii_case(right))
}

fn find_subslice(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= bytes.len() {
        return None;
    }
    bytes[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|offset| from + offset)
}

fn find_byte(bytes: &[u8], from: usize, byte: u8) -> Option<usize> {
    bytes
        .get(from..)?
        .iter()
        .position(|candidate| *candidate == byte)
        .map(|offset| from + offset)
}
